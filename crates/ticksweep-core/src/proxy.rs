use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Proxy protocol scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyScheme {
    Http,
    Https,
    Socks5,
}

impl ProxyScheme {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
            Self::Socks5 => "socks5",
        }
    }
}

/// Normalized proxy endpoint in `scheme://host:port` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProxyAddress {
    pub scheme: ProxyScheme,
    pub host: String,
    pub port: u16,
}

impl ProxyAddress {
    /// Parse a raw proxy entry. Bare `host:port` defaults to HTTP.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let trimmed = input.trim();
        let malformed = || ValidationError::MalformedProxy {
            value: input.to_owned(),
        };

        let (scheme, rest) = match trimmed.split_once("://") {
            Some(("http", rest)) => (ProxyScheme::Http, rest),
            Some(("https", rest)) => (ProxyScheme::Https, rest),
            Some(("socks5", rest)) => (ProxyScheme::Socks5, rest),
            Some(_) => return Err(malformed()),
            None => (ProxyScheme::Http, trimmed),
        };

        let (host, port) = rest.rsplit_once(':').ok_or_else(malformed)?;
        if host.is_empty() || host.contains(['/', ' ', '@']) {
            return Err(malformed());
        }
        let port = port.parse::<u16>().map_err(|_| malformed())?;
        if port == 0 {
            return Err(malformed());
        }

        Ok(Self {
            scheme,
            host: host.to_owned(),
            port,
        })
    }

    /// Full URL form consumed by the transport layer.
    pub fn url(&self) -> String {
        self.to_string()
    }
}

impl Display for ProxyAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}:{}", self.scheme.as_str(), self.host, self.port)
    }
}

/// Normalize a raw proxy list, skipping malformed entries. An empty result is
/// the caller's concern, not an error here.
pub fn normalize_proxy_list<I, S>(raw: I) -> Vec<ProxyAddress>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    raw.into_iter()
        .filter_map(|entry| match ProxyAddress::parse(entry.as_ref()) {
            Ok(address) => Some(address),
            Err(error) => {
                tracing::debug!(entry = entry.as_ref(), %error, "skipping malformed proxy");
                None
            }
        })
        .collect()
}
