//! Single-candidate SOCKS5 probe
//!
//! Every probe opens its own TCP connection to the candidate, performs the
//! SOCKS5 handshake on that connection and sends one HTTP GET through the
//! resulting tunnel. Nothing about the proxy is stored outside the probe,
//! so concurrent probes never see each other's routing.

use crate::proxy::models::{Candidate, ErrorKind, ProbeResult};
use crate::Result;
use anyhow::{anyhow, bail};
use async_trait::async_trait;
use hyper::header::{CONNECTION, HOST, USER_AGENT};
use hyper::{Body, Request, StatusCode, Uri};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{self, Instant};
use tokio_socks::tcp::Socks5Stream;
use tracing::trace;

/// User agent sent with every probe request
const PROBE_USER_AGENT: &str = concat!("socks5-collector/", env!("CARGO_PKG_VERSION"));

/// The HTTP(S) endpoint requested through each proxy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    url: String,
    host: String,
    port: u16,
    host_header: String,
    path: String,
    tls: bool,
}

impl ProbeTarget {
    /// Parse an `http://` or `https://` URL
    pub fn parse(url: &str) -> Result<Self> {
        let uri: Uri = url
            .parse()
            .map_err(|e| anyhow!("invalid test URL {url}: {e}"))?;

        let tls = match uri.scheme_str() {
            Some("http") => false,
            Some("https") => true,
            other => bail!(
                "unsupported test URL scheme {:?} in {url}, use http or https",
                other.unwrap_or_default()
            ),
        };

        let authority = uri
            .authority()
            .ok_or_else(|| anyhow!("test URL {url} has no host"))?;
        let host_header = match authority.port_u16() {
            Some(port) => format!("{}:{}", authority.host(), port),
            None => authority.host().to_string(),
        };
        let host = authority
            .host()
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = authority.port_u16().unwrap_or(if tls { 443 } else { 80 });
        let path = uri
            .path_and_query()
            .map(|p| p.as_str())
            .filter(|p| !p.is_empty())
            .unwrap_or("/")
            .to_string();

        Ok(Self {
            url: url.to_string(),
            host,
            port,
            host_header,
            path,
            tls,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_tls(&self) -> bool {
        self.tls
    }
}

impl fmt::Display for ProbeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

/// Something that can verify one candidate.
///
/// The checker only talks to this trait, so the worker pool can be driven by
/// the real SOCKS5 prober or by an instrumented stand-in.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, candidate: &Candidate) -> ProbeResult;
}

/// Probes candidates as SOCKS5 proxies against a fixed target
#[derive(Debug, Clone)]
pub struct Socks5Prober {
    target: ProbeTarget,
    timeout: Duration,
}

impl Socks5Prober {
    pub fn new(target: ProbeTarget, timeout: Duration) -> Self {
        Self { target, timeout }
    }

    pub fn target(&self) -> &ProbeTarget {
        &self.target
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl Probe for Socks5Prober {
    async fn probe(&self, candidate: &Candidate) -> ProbeResult {
        probe(candidate, &self.target, self.timeout).await
    }
}

/// Probe one candidate.
///
/// Succeeds only when the handshake completes, the target answers `200 OK`
/// and the whole body arrives within `timeout`. Latency runs from the start
/// of the TCP connect to the last body byte.
pub async fn probe(candidate: &Candidate, target: &ProbeTarget, timeout: Duration) -> ProbeResult {
    let start = Instant::now();

    match time::timeout(timeout, exchange(candidate, target)).await {
        Ok(Ok(status)) if status == StatusCode::OK => {
            let elapsed = start.elapsed().as_secs_f64() * 1000.0;
            ProbeResult::success(*candidate, elapsed)
        }
        Ok(Ok(status)) => {
            ProbeResult::failure(*candidate, ErrorKind::UnexpectedStatus(status.as_u16()))
        }
        Ok(Err(kind)) => ProbeResult::failure(*candidate, kind),
        Err(_) => ProbeResult::failure(*candidate, ErrorKind::Timeout),
    }
}

async fn exchange(
    candidate: &Candidate,
    target: &ProbeTarget,
) -> std::result::Result<StatusCode, ErrorKind> {
    let socket = TcpStream::connect(candidate.socket_addr())
        .await
        .map_err(|e| ErrorKind::ConnectFailed(e.to_string()))?;

    // The target host is sent as-is so the proxy resolves it.
    let tunnel = Socks5Stream::connect_with_socket(socket, (target.host.as_str(), target.port))
        .await
        .map_err(|e| ErrorKind::HandshakeRejected(e.to_string()))?;
    trace!(%candidate, target = %target, "tunnel established");

    if target.tls {
        let connector = native_tls::TlsConnector::new()
            .map_err(|e| ErrorKind::TransportError(format!("TLS setup: {e}")))?;
        let stream = tokio_native_tls::TlsConnector::from(connector)
            .connect(&target.host, tunnel)
            .await
            .map_err(|e| ErrorKind::TransportError(format!("TLS handshake: {e}")))?;
        fetch(stream, target).await
    } else {
        fetch(tunnel, target).await
    }
}

/// Send a single GET over an established tunnel and drain the body
async fn fetch<S>(io: S, target: &ProbeTarget) -> std::result::Result<StatusCode, ErrorKind>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sender, connection) = hyper::client::conn::handshake(io)
        .await
        .map_err(transport_error)?;
    let _driver = AbortOnDrop(tokio::spawn(async move {
        if let Err(e) = connection.await {
            trace!(error = %e, "probe connection closed with error");
        }
    }));

    let request = Request::get(target.path.as_str())
        .header(HOST, target.host_header.as_str())
        .header(USER_AGENT, PROBE_USER_AGENT)
        .header(CONNECTION, "close")
        .body(Body::empty())
        .map_err(transport_error)?;

    let response = sender
        .send_request(request)
        .await
        .map_err(transport_error)?;
    let status = response.status();
    hyper::body::to_bytes(response.into_body())
        .await
        .map_err(transport_error)?;

    Ok(status)
}

fn transport_error(e: impl fmt::Display) -> ErrorKind {
    ErrorKind::TransportError(e.to_string())
}

/// Task handle that aborts the task when dropped.
///
/// Used for the connection driver of a probe (dropping it closes the
/// tunnel socket) and for the probe tasks of a run.
pub(crate) struct AbortOnDrop<T>(pub(crate) JoinHandle<T>);

impl<T> Future for AbortOnDrop<T> {
    type Output = std::result::Result<T, JoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0).poll(cx)
    }
}

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}
