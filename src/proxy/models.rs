//! Proxy data models

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::{btree_set, BTreeMap, BTreeSet};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::str::FromStr;

/// Why a single candidate did not verify.
///
/// Every variant is scoped to one candidate; none of them stops a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, thiserror::Error)]
pub enum ErrorKind {
    #[error("invalid candidate: {0}")]
    InvalidCandidate(String),
    #[error("connection failed: {0}")]
    ConnectFailed(String),
    #[error("SOCKS5 handshake rejected: {0}")]
    HandshakeRejected(String),
    #[error("timed out")]
    Timeout,
    #[error("unexpected HTTP status: {0}")]
    UnexpectedStatus(u16),
    #[error("transport error: {0}")]
    TransportError(String),
}

impl ErrorKind {
    /// Short name of the variant, without the detail text.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::InvalidCandidate(_) => "invalid candidate",
            ErrorKind::ConnectFailed(_) => "connect failed",
            ErrorKind::HandshakeRejected(_) => "handshake rejected",
            ErrorKind::Timeout => "timeout",
            ErrorKind::UnexpectedStatus(_) => "unexpected status",
            ErrorKind::TransportError(_) => "transport error",
        }
    }
}

/// An unverified `ip:port` pair believed to be a SOCKS5 proxy.
///
/// The host is always a dotted-quad IPv4 address and the port is never 0;
/// the only way to build one from text is [`FromStr`], which enforces both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Candidate {
    host: Ipv4Addr,
    port: u16,
}

impl Candidate {
    /// Create a candidate from already validated parts.
    ///
    /// Returns `None` for port 0.
    pub fn new(host: Ipv4Addr, port: u16) -> Option<Self> {
        (port != 0).then_some(Self { host, port })
    }

    pub fn host(&self) -> Ipv4Addr {
        self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.host, self.port))
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Candidate {
    type Err = ErrorKind;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        let token = token.trim();
        let invalid = || ErrorKind::InvalidCandidate(token.to_string());

        let (host, port) = token.split_once(':').ok_or_else(invalid)?;

        // Ipv4Addr parsing rejects leading zeros, so "010.0.0.1" never
        // aliases "10.0.0.1" in the set.
        let host: Ipv4Addr = host.parse().map_err(|_| invalid())?;

        if port.is_empty() || port.len() > 5 || !port.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let port: u16 = port.parse().map_err(|_| invalid())?;

        Candidate::new(host, port).ok_or_else(invalid)
    }
}

impl TryFrom<String> for Candidate {
    type Error = ErrorKind;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Candidate> for String {
    fn from(candidate: Candidate) -> Self {
        candidate.to_string()
    }
}

/// Deduplicated, read-only collection of candidates for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateSet {
    candidates: BTreeSet<Candidate>,
}

impl CandidateSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from raw `ip:port` tokens, dropping malformed ones.
    pub fn from_tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::new();
        for token in tokens {
            if let Err(e) = set.insert_token(token.as_ref()) {
                tracing::debug!(error = %e, "rejected token");
            }
        }
        set
    }

    /// Parse and insert one token.
    ///
    /// Returns `Ok(false)` if the candidate was already present.
    pub fn insert_token(&mut self, token: &str) -> Result<bool, ErrorKind> {
        let candidate: Candidate = token.parse()?;
        Ok(self.insert(candidate))
    }

    pub fn insert(&mut self, candidate: Candidate) -> bool {
        self.candidates.insert(candidate)
    }

    pub fn extend(&mut self, other: CandidateSet) {
        self.candidates.extend(other.candidates);
    }

    pub fn contains(&self, candidate: &Candidate) -> bool {
        self.candidates.contains(candidate)
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn iter(&self) -> btree_set::Iter<'_, Candidate> {
        self.candidates.iter()
    }
}

impl FromIterator<Candidate> for CandidateSet {
    fn from_iter<T: IntoIterator<Item = Candidate>>(iter: T) -> Self {
        Self {
            candidates: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a CandidateSet {
    type Item = &'a Candidate;
    type IntoIter = btree_set::Iter<'a, Candidate>;

    fn into_iter(self) -> Self::IntoIter {
        self.candidates.iter()
    }
}

/// Verdict of a single probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Success,
    Failure,
}

/// Result of probing one candidate.
///
/// Fields are private so that a success always carries a latency and a
/// failure always carries an error kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    candidate: Candidate,
    outcome: Outcome,
    latency_ms: Option<f64>,
    error: Option<ErrorKind>,
}

impl ProbeResult {
    pub fn success(candidate: Candidate, latency_ms: f64) -> Self {
        Self {
            candidate,
            outcome: Outcome::Success,
            latency_ms: Some(latency_ms),
            error: None,
        }
    }

    pub fn failure(candidate: Candidate, error: ErrorKind) -> Self {
        Self {
            candidate,
            outcome: Outcome::Failure,
            latency_ms: None,
            error: Some(error),
        }
    }

    pub fn candidate(&self) -> &Candidate {
        &self.candidate
    }

    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    pub fn latency_ms(&self) -> Option<f64> {
        self.latency_ms
    }

    pub fn error(&self) -> Option<&ErrorKind> {
        self.error.as_ref()
    }

    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }
}

impl fmt::Display for ProbeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.latency_ms, &self.error) {
            (Some(ms), _) => write!(f, "{} ({:.0}ms)", self.candidate, ms),
            (None, Some(e)) => write!(f, "{} ({})", self.candidate, e),
            (None, None) => write!(f, "{}", self.candidate),
        }
    }
}

/// Aggregate of every probe result of one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Size of the candidate set handed to the run
    pub total: usize,
    /// Results in completion order
    pub results: Vec<ProbeResult>,
    /// Working proxies in completion order
    pub working: Vec<Candidate>,
    pub started_at: DateTime<Local>,
    pub finished_at: Option<DateTime<Local>>,
}

impl RunReport {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            results: Vec::with_capacity(total),
            working: Vec::new(),
            started_at: Local::now(),
            finished_at: None,
        }
    }

    pub fn record(&mut self, result: ProbeResult) {
        if result.is_success() {
            self.working.push(*result.candidate());
        }
        self.results.push(result);
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Local::now());
    }

    pub fn attempted(&self) -> usize {
        self.results.len()
    }

    pub fn succeeded(&self) -> usize {
        self.working.len()
    }

    pub fn failed(&self) -> usize {
        self.attempted() - self.succeeded()
    }

    /// Whether every candidate produced a result, i.e. the run was not
    /// cancelled or cut short by the run timeout.
    pub fn is_complete(&self) -> bool {
        self.attempted() == self.total
    }

    pub fn failures_by_kind(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for error in self.results.iter().filter_map(ProbeResult::error) {
            *counts.entry(error.label()).or_insert(0) += 1;
        }
        counts
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Checked {}/{} proxies: {} working, {} failed",
            self.attempted(),
            self.total,
            self.succeeded(),
            self.failed()
        )?;
        let failures = self.failures_by_kind();
        if !failures.is_empty() {
            let parts: Vec<String> = failures
                .iter()
                .map(|(kind, count)| format!("{kind}: {count}"))
                .collect();
            write!(f, " ({})", parts.join(", "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(s: &str) -> Candidate {
        s.parse().unwrap()
    }

    #[test]
    fn test_candidate_parse() {
        let c = candidate("203.0.113.7:1080");
        assert_eq!(c.host(), Ipv4Addr::new(203, 0, 113, 7));
        assert_eq!(c.port(), 1080);
        assert_eq!(c.to_string(), "203.0.113.7:1080");
    }

    #[test]
    fn test_candidate_parse_is_idempotent() {
        for token in ["1.2.3.4:80", " 10.0.0.1:65535 ", "255.255.255.255:1"] {
            let first = candidate(token);
            let second = candidate(&first.to_string());
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_candidate_rejects_malformed() {
        for token in [
            "",
            "1.2.3.4",
            "1.2.3.4:",
            "1.2.3.4:0",
            "1.2.3.4:65536",
            "1.2.3.4:+80",
            "1.2.3.4:80:US",
            "256.1.1.1:80",
            "1.2.3:80",
            "010.0.0.1:80",
            "example.com:80",
            "[::1]:80",
        ] {
            assert!(
                matches!(token.parse::<Candidate>(), Err(ErrorKind::InvalidCandidate(_))),
                "{token:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_candidate_set_dedup() {
        let set = CandidateSet::from_tokens(["1.2.3.4:80", "1.2.3.4:80"]);
        assert_eq!(set.len(), 1);
        assert!(set.contains(&candidate("1.2.3.4:80")));
    }

    #[test]
    fn test_candidate_set_drops_invalid_tokens() {
        let set = CandidateSet::from_tokens(["1.2.3.4:80", "bogus", "1.2.3.4:99999"]);
        assert_eq!(set.len(), 1);

        let mut set = CandidateSet::new();
        assert_eq!(set.insert_token("5.6.7.8:1080"), Ok(true));
        assert_eq!(set.insert_token("5.6.7.8:1080"), Ok(false));
        assert!(set.insert_token("5.6.7.8").is_err());
    }

    #[test]
    fn test_probe_result_accessors() {
        let c = candidate("127.0.0.1:1080");

        let ok = ProbeResult::success(c, 12.5);
        assert!(ok.is_success());
        assert_eq!(ok.outcome(), Outcome::Success);
        assert_eq!(ok.latency_ms(), Some(12.5));
        assert!(ok.error().is_none());

        let bad = ProbeResult::failure(c, ErrorKind::Timeout);
        assert!(!bad.is_success());
        assert_eq!(bad.latency_ms(), None);
        assert_eq!(bad.error(), Some(&ErrorKind::Timeout));
    }

    #[test]
    fn test_run_report_counts() {
        let mut report = RunReport::new(3);
        report.record(ProbeResult::success(candidate("1.1.1.1:1080"), 40.0));
        report.record(ProbeResult::failure(
            candidate("2.2.2.2:1080"),
            ErrorKind::ConnectFailed("refused".into()),
        ));
        assert!(!report.is_complete());

        report.record(ProbeResult::failure(candidate("3.3.3.3:1080"), ErrorKind::Timeout));
        report.finish();

        assert!(report.is_complete());
        assert_eq!(report.attempted(), 3);
        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.failed(), 2);
        assert_eq!(report.working, vec![candidate("1.1.1.1:1080")]);
        assert_eq!(report.failures_by_kind().get("timeout"), Some(&1));
        assert!(report.to_string().contains("1 working, 2 failed"));
    }

    #[test]
    fn test_candidate_serializes_as_token() {
        let c = candidate("9.9.9.9:1080");
        let json = serde_json::to_string(&c).unwrap();
        assert_eq!(json, "\"9.9.9.9:1080\"");
        assert_eq!(serde_json::from_str::<Candidate>(&json).unwrap(), c);
        assert!(serde_json::from_str::<Candidate>("\"9.9.9.9:0\"").is_err());
    }
}
