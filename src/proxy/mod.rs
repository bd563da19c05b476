//! Proxy module for collecting and validating SOCKS5 proxies
//!
//! This module provides functionality for:
//! - Crawling source URLs and extracting `ip:port` candidates
//! - Parsing candidate lists into deduplicated candidate sets
//! - Probing candidates through isolated SOCKS5 tunnels
//! - Running probes with bounded concurrency and recording working proxies

pub mod checker;
pub mod crawler;
pub mod models;
pub mod parser;
pub mod prober;
pub mod sink;

pub use checker::{CheckerConfig, ProxyChecker, DEFAULT_TEST_URL};
pub use crawler::{extract_tokens, CrawlResult, CrawlerConfig, ProxyCrawler};
pub use models::{Candidate, CandidateSet, ErrorKind, Outcome, ProbeResult, RunReport};
pub use parser::ProxyParser;
pub use prober::{probe, Probe, ProbeTarget, Socks5Prober};
pub use sink::{ResultSink, SinkError};
