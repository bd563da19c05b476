//! SOCKS5 Collector - proxy collector and concurrent validator
//!
//! Collects `ip:port` candidates from source URLs and checks each one by
//! sending a real HTTP request through it as a SOCKS5 proxy. Working
//! proxies are written to the output file as soon as they are confirmed.

pub mod proxy;
pub mod tui;

pub use proxy::*;

use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Application result type
pub type Result<T> = anyhow::Result<T>;

/// Default file locations
#[derive(Debug, Clone)]
pub struct Config {
    /// Source URLs, one per line
    pub url_list: PathBuf,
    /// Output of collect-only runs
    pub collected_output: PathBuf,
    /// Output of validation runs; truncated at the start of every run
    pub working_output: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            url_list: PathBuf::from("socks5list.txt"),
            collected_output: PathBuf::from("socks5.txt"),
            working_output: PathBuf::from("socks5work.txt"),
        }
    }
}

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` wins; otherwise `default_directive` is used. Logs go to
/// stderr so stdout stays clean for results.
pub fn init_logger(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
