//! Proxy checker: bounded, cancellable validation of a candidate set

use crate::proxy::models::{CandidateSet, ErrorKind, ProbeResult, RunReport};
use crate::proxy::prober::{AbortOnDrop, Probe, ProbeTarget, Socks5Prober};
use crate::proxy::sink::{ResultSink, SinkError};
use crate::Result;
use futures::future;
use futures::stream::{self, BoxStream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Default timeout for proxy checks in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// Default number of concurrent checks
const DEFAULT_CONCURRENCY: usize = 20;

/// Default URL to test proxies against
pub const DEFAULT_TEST_URL: &str = "http://httpbin.org/ip";

/// Configuration for proxy checker
#[derive(Debug, Clone)]
pub struct CheckerConfig {
    /// Timeout for each proxy check
    pub timeout: Duration,
    /// Number of concurrent checks
    pub concurrency: usize,
    /// URL to test proxies against
    pub test_url: String,
    /// Upper bound on the whole run
    pub run_timeout: Option<Duration>,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            concurrency: DEFAULT_CONCURRENCY,
            test_url: DEFAULT_TEST_URL.to_string(),
            run_timeout: None,
        }
    }
}

impl CheckerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_test_url(mut self, url: String) -> Self {
        self.test_url = url;
        self
    }

    pub fn with_run_timeout(mut self, run_timeout: Duration) -> Self {
        self.run_timeout = Some(run_timeout);
        self
    }

    /// Concurrency actually used; zero would never start a probe.
    pub fn effective_concurrency(&self) -> usize {
        self.concurrency.max(1)
    }
}

/// Stop condition shared by everything a single run starts
#[derive(Clone)]
struct RunStop {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl RunStop {
    fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    async fn stopped(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.cancel.cancelled() => {}
                    _ = time::sleep_until(deadline) => {}
                }
            }
            None => self.cancel.cancelled().await,
        }
    }
}

/// Validates candidate sets with a continuously refilled pool of probes.
///
/// At most `concurrency` probes are in flight at any time; as soon as one
/// finishes the next pending candidate starts. Results come out in
/// completion order. Cancelling the checker stops new probes and abandons
/// in-flight ones; a cancelled checker cannot be reused.
pub struct ProxyChecker<P = Socks5Prober> {
    config: CheckerConfig,
    prober: Arc<P>,
    cancel: CancellationToken,
}

impl ProxyChecker<Socks5Prober> {
    /// Create a new proxy checker with default configuration
    pub fn new() -> Result<Self> {
        Self::with_config(CheckerConfig::default())
    }

    /// Create a new proxy checker with custom configuration
    pub fn with_config(config: CheckerConfig) -> Result<Self> {
        let target = ProbeTarget::parse(&config.test_url)?;
        let prober = Socks5Prober::new(target, config.timeout);
        Ok(Self::with_prober(config, prober))
    }
}

impl<P: Probe + 'static> ProxyChecker<P> {
    /// Create a checker around any prober
    pub fn with_prober(config: CheckerConfig, prober: P) -> Self {
        Self {
            config,
            prober: Arc::new(prober),
            cancel: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &CheckerConfig {
        &self.config
    }

    /// Token that cancels every run of this checker
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Start a run over `candidates`.
    ///
    /// The returned stream is lazy: nothing is probed until it is polled.
    /// It yields exactly one result per candidate unless the run is
    /// cancelled or hits its run timeout, in which case it ends early.
    pub fn run(&self, candidates: &CandidateSet) -> BoxStream<'static, ProbeResult> {
        let stop = RunStop {
            cancel: self.cancel.clone(),
            deadline: self.config.run_timeout.map(|t| Instant::now() + t),
        };
        let gate = stop.clone();
        let prober = Arc::clone(&self.prober);
        let pending: Vec<_> = candidates.iter().copied().collect();

        debug!(
            candidates = pending.len(),
            concurrency = self.config.effective_concurrency(),
            "starting run"
        );

        // Each probe is its own task so its I/O and timeout keep running
        // while the consumer is busy with earlier results. Dropping the
        // stream aborts whatever is still in flight.
        stream::iter(pending)
            .take_while(move |_| future::ready(!gate.is_stopped()))
            .map(move |candidate| {
                let prober = Arc::clone(&prober);
                let stop = stop.clone();
                let task = AbortOnDrop(tokio::spawn(async move {
                    tokio::select! {
                        biased;
                        result = prober.probe(&candidate) => Some(result),
                        _ = stop.stopped() => {
                            debug!(%candidate, "probe abandoned");
                            None
                        }
                    }
                }));
                async move {
                    match task.await {
                        Ok(result) => result,
                        Err(e) => {
                            error!(%candidate, error = %e, "probe task failed");
                            Some(ProbeResult::failure(
                                candidate,
                                ErrorKind::TransportError(format!("probe task failed: {e}")),
                            ))
                        }
                    }
                }
            })
            .buffer_unordered(self.config.effective_concurrency())
            .filter_map(future::ready)
            .boxed()
    }

    /// Run in a background task and deliver results over a channel.
    ///
    /// Dropping the receiver stops the run.
    pub fn check_proxies_stream(&self, candidates: &CandidateSet) -> mpsc::Receiver<ProbeResult> {
        let (tx, rx) = mpsc::channel(self.config.effective_concurrency());
        let mut results = self.run(candidates);

        tokio::spawn(async move {
            while let Some(result) = results.next().await {
                if tx.send(result).await.is_err() {
                    break;
                }
            }
        });

        rx
    }

    /// Check every candidate and collect a report, without persisting
    pub async fn check_proxies(&self, candidates: &CandidateSet) -> RunReport {
        let mut report = RunReport::new(candidates.len());
        let mut results = self.run(candidates);

        while let Some(result) = results.next().await {
            log_result(&result);
            report.record(result);
        }

        report.finish();
        report
    }

    /// Check every candidate, persisting working proxies through `sink`
    pub async fn check_and_record(
        &self,
        candidates: &CandidateSet,
        sink: &ResultSink,
    ) -> std::result::Result<RunReport, SinkError> {
        self.check_and_record_with(candidates, sink, |_| {}).await
    }

    /// Like [`check_and_record`](Self::check_and_record), calling `observer`
    /// for every result after it has been persisted.
    ///
    /// A sink failure cancels the run and is returned.
    pub async fn check_and_record_with<F>(
        &self,
        candidates: &CandidateSet,
        sink: &ResultSink,
        mut observer: F,
    ) -> std::result::Result<RunReport, SinkError>
    where
        F: FnMut(&ProbeResult),
    {
        let mut report = RunReport::new(candidates.len());
        let mut results = self.run(candidates);

        while let Some(result) = results.next().await {
            log_result(&result);
            if let Err(e) = sink.on_result(&result).await {
                error!(error = %e, "aborting run");
                self.cancel();
                return Err(e);
            }
            observer(&result);
            report.record(result);
        }

        sink.finish().await?;
        report.finish();

        info!(
            attempted = report.attempted(),
            working = report.succeeded(),
            complete = report.is_complete(),
            "run finished"
        );
        Ok(report)
    }
}

fn log_result(result: &ProbeResult) {
    match (result.latency_ms(), result.error()) {
        (Some(latency_ms), _) => {
            info!(candidate = %result.candidate(), latency_ms, "working proxy")
        }
        (None, Some(e)) => debug!(candidate = %result.candidate(), error = %e, "proxy failed"),
        (None, None) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::models::{Candidate, ErrorKind};
    use async_trait::async_trait;

    /// Succeeds for even ports after a short delay
    struct EvenPortProber;

    #[async_trait]
    impl Probe for EvenPortProber {
        async fn probe(&self, candidate: &Candidate) -> ProbeResult {
            time::sleep(Duration::from_millis(5)).await;
            if candidate.port() % 2 == 0 {
                ProbeResult::success(*candidate, 5.0)
            } else {
                ProbeResult::failure(*candidate, ErrorKind::Timeout)
            }
        }
    }

    fn candidates(n: u16) -> CandidateSet {
        (1..=n)
            .map(|port| format!("127.0.0.1:{port}").parse::<Candidate>().unwrap())
            .collect()
    }

    #[test]
    fn test_checker_config_default() {
        let config = CheckerConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        assert_eq!(config.concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(config.test_url, DEFAULT_TEST_URL);
        assert!(config.run_timeout.is_none());
    }

    #[test]
    fn test_checker_config_builder() {
        let config = CheckerConfig::new()
            .with_timeout(Duration::from_secs(30))
            .with_concurrency(50)
            .with_test_url("http://example.com".to_string())
            .with_run_timeout(Duration::from_secs(600));

        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.concurrency, 50);
        assert_eq!(config.test_url, "http://example.com");
        assert_eq!(config.run_timeout, Some(Duration::from_secs(600)));
    }

    #[test]
    fn test_zero_concurrency_is_clamped() {
        let config = CheckerConfig::new().with_concurrency(0);
        assert_eq!(config.effective_concurrency(), 1);
    }

    #[test]
    fn test_proxy_checker_rejects_bad_test_url() {
        let config = CheckerConfig::new().with_test_url("gopher://example.com".to_string());
        assert!(ProxyChecker::with_config(config).is_err());
    }

    #[tokio::test]
    async fn test_every_candidate_yields_one_result() {
        let checker = ProxyChecker::with_prober(CheckerConfig::new().with_concurrency(4), EvenPortProber);
        let set = candidates(25);

        let report = checker.check_proxies(&set).await;

        assert!(report.is_complete());
        assert_eq!(report.succeeded() + report.failed(), set.len());
        assert_eq!(report.succeeded(), 12);
        assert!(report.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_empty_set_yields_nothing() {
        let checker = ProxyChecker::with_prober(CheckerConfig::new(), EvenPortProber);
        let report = checker.check_proxies(&CandidateSet::new()).await;
        assert_eq!(report.attempted(), 0);
        assert!(report.is_complete());
    }

    #[tokio::test]
    async fn test_cancelled_checker_starts_nothing() {
        let checker = ProxyChecker::with_prober(CheckerConfig::new(), EvenPortProber);
        checker.cancel();

        let results: Vec<_> = checker.run(&candidates(10)).collect().await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_stream_channel_delivers_all_results() {
        let checker = ProxyChecker::with_prober(CheckerConfig::new().with_concurrency(3), EvenPortProber);
        let mut rx = checker.check_proxies_stream(&candidates(9));

        let mut count = 0;
        while rx.recv().await.is_some() {
            count += 1;
        }
        assert_eq!(count, 9);
    }
}
