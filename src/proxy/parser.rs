//! Proxy list parsing and saving

use crate::proxy::models::{Candidate, CandidateSet, ErrorKind};
use crate::Result;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Scheme prefix tolerated in front of list entries
const SOCKS5_SCHEME: &str = "socks5://";

/// Parser for `ip:port` proxy lists
pub struct ProxyParser;

impl ProxyParser {
    /// Parse a bare `ip:port` token
    pub fn parse_token(token: &str) -> std::result::Result<Candidate, ErrorKind> {
        token.parse()
    }

    /// Parse a single list line
    ///
    /// Returns `None` for blank lines and `#` comments. A leading
    /// `socks5://` is accepted and dropped.
    pub fn parse_line(line: &str) -> Option<std::result::Result<Candidate, ErrorKind>> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }

        let token = line.strip_prefix(SOCKS5_SCHEME).unwrap_or(line);
        Some(Self::parse_token(token))
    }

    /// Parse a multi-line list into a candidate set, skipping invalid lines
    pub fn parse_string(content: &str) -> CandidateSet {
        let mut set = CandidateSet::new();
        for result in content.lines().filter_map(Self::parse_line) {
            match result {
                Ok(candidate) => {
                    set.insert(candidate);
                }
                Err(e) => debug!(error = %e, "skipping list entry"),
            }
        }
        set
    }

    /// Parse a list file into a candidate set
    pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<CandidateSet> {
        let content = fs::read_to_string(path)?;
        Ok(Self::parse_string(&content))
    }

    /// Save candidates to a file, one `ip:port` per line, in set order
    pub fn save_to_file<P: AsRef<Path>>(candidates: &CandidateSet, path: P) -> Result<()> {
        let mut content: String = candidates
            .iter()
            .map(Candidate::to_string)
            .collect::<Vec<_>>()
            .join("\n");
        if !content.is_empty() {
            content.push('\n');
        }

        fs::write(path, content)?;
        Ok(())
    }
}
