//! Incremental, crash-safe record of working proxies
//!
//! Creating a [`ResultSink`] truncates the output file. Whatever was there
//! before is gone, so point it at a dedicated path.

use crate::proxy::models::{Candidate, ProbeResult};
use chrono::Local;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

/// Timestamp format used in the file header and the empty-run marker
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Run-level failure of the output file
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("cannot create output file {}: {source}", .path.display())]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot append to output file {}: {source}", .path.display())]
    Append {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

struct SinkState {
    file: File,
    working: Vec<Candidate>,
}

/// Appends every working proxy to the output file as soon as it is found.
///
/// `on_result` may be called concurrently; each call writes one complete
/// `ip:port` line under a lock, so records never interleave.
pub struct ResultSink {
    path: PathBuf,
    state: Mutex<SinkState>,
}

impl ResultSink {
    /// Truncate `path` and write the header block
    pub async fn create<P: AsRef<Path>>(path: P) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        let create_error = |source| SinkError::Create {
            path: path.clone(),
            source,
        };

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .await
            .map_err(create_error)?;

        let header = format!(
            "# Working SOCKS5 proxies\n# Updated: {}\n\n",
            Local::now().format(TIMESTAMP_FORMAT)
        );
        file.write_all(header.as_bytes())
            .await
            .map_err(create_error)?;
        file.flush().await.map_err(create_error)?;

        debug!(path = %path.display(), "output file initialised");

        Ok(Self {
            path,
            state: Mutex::new(SinkState {
                file,
                working: Vec::new(),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record one probe result.
    ///
    /// Failures are ignored. A success is written and flushed before this
    /// returns; the return value says whether anything was written.
    pub async fn on_result(&self, result: &ProbeResult) -> Result<bool, SinkError> {
        if !result.is_success() {
            return Ok(false);
        }

        let candidate = *result.candidate();
        let line = format!("{candidate}\n");

        let mut state = self.state.lock().await;
        state
            .file
            .write_all(line.as_bytes())
            .await
            .map_err(|source| self.append_error(source))?;
        state
            .file
            .flush()
            .await
            .map_err(|source| self.append_error(source))?;
        state.working.push(candidate);

        debug!(%candidate, path = %self.path.display(), "working proxy saved");
        Ok(true)
    }

    /// Working proxies recorded so far, in arrival order
    pub async fn working(&self) -> Vec<Candidate> {
        self.state.lock().await.working.clone()
    }

    /// Close out the run.
    ///
    /// If nothing was recorded the file is replaced by a "no working
    /// proxies" marker so an empty run is never mistaken for a crash.
    /// Returns the number of recorded proxies.
    pub async fn finish(&self) -> Result<usize, SinkError> {
        let mut state = self.state.lock().await;
        if !state.working.is_empty() {
            state
                .file
                .sync_data()
                .await
                .map_err(|source| self.append_error(source))?;
            return Ok(state.working.len());
        }

        let mut file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.path)
            .await
            .map_err(|source| self.append_error(source))?;
        let marker = format!(
            "# No working SOCKS5 proxies found\n# Check completed: {}\n",
            Local::now().format(TIMESTAMP_FORMAT)
        );
        file.write_all(marker.as_bytes())
            .await
            .map_err(|source| self.append_error(source))?;
        file.flush()
            .await
            .map_err(|source| self.append_error(source))?;
        state.file = file;

        debug!(path = %self.path.display(), "no working proxies, marker written");
        Ok(0)
    }

    fn append_error(&self, source: io::Error) -> SinkError {
        SinkError::Append {
            path: self.path.clone(),
            source,
        }
    }
}
