//! Line-oriented file loaders for the symbol and proxy boundaries.

use std::path::{Path, PathBuf};

use ticksweep_core::{ProxySource, SymbolSource};

fn read_lines(path: &Path) -> std::io::Result<Vec<String>> {
    let contents = std::fs::read_to_string(path)?;
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_owned)
        .collect())
}

/// One symbol per line; blank lines and `#` comments are skipped.
#[derive(Debug)]
pub struct FileSymbolSource {
    path: PathBuf,
}

impl FileSymbolSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SymbolSource for FileSymbolSource {
    fn load(&self) -> std::io::Result<Vec<String>> {
        read_lines(&self.path)
    }
}

/// One proxy per line; blank lines and `#` comments are skipped. Malformed
/// addresses are dropped later by the core's normalizer.
#[derive(Debug)]
pub struct FileProxySource {
    path: PathBuf,
}

impl FileProxySource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ProxySource for FileProxySource {
    fn load(&self) -> std::io::Result<Vec<String>> {
        read_lines(&self.path)
    }
}
