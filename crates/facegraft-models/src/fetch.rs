//! Artifact fetching.
//!
//! The provisioner only talks to the [`Fetcher`] trait so retry and mirror
//! logic can be exercised without a network. [`HttpFetcher`] is the real
//! implementation, a blocking `ureq` agent.

use crate::catalog::Source;
use std::io::{Read, Write};
use std::time::Duration;
use thiserror::Error;

const DEFAULT_TIMEOUT_SECS: u64 = 300;
const DEFAULT_MAX_BYTES: u64 = 2 * 1024 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("server returned status {0}")]
    Status(u16),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("artifact exceeds {limit} bytes")]
    TooLarge { limit: u64 },
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Streams one candidate's bytes into `dest`.
pub trait Fetcher: Send + Sync {
    /// Returns the number of bytes written.
    fn fetch(&self, source: &Source, dest: &mut dyn Write) -> Result<u64, FetchError>;
}

/// Blocking HTTP(S) fetcher.
pub struct HttpFetcher {
    agent: ureq::Agent,
    max_bytes: u64,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, max_bytes: u64) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(timeout)
            .user_agent(concat!("facegraft/", env!("CARGO_PKG_VERSION")))
            .build();
        Self { agent, max_bytes }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_TIMEOUT_SECS), DEFAULT_MAX_BYTES)
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, source: &Source, dest: &mut dyn Write) -> Result<u64, FetchError> {
        let mut request = self.agent.get(&source.url);
        for (name, value) in source.request_headers() {
            request = request.set(&name, &value);
        }

        let response = request.call().map_err(|e| match e {
            ureq::Error::Status(code, _) => FetchError::Status(code),
            ureq::Error::Transport(t) => FetchError::Transport(t.to_string()),
        })?;

        copy_capped(response.into_reader(), dest, self.max_bytes)
    }
}

/// Copy at most `max_bytes` from `body`; a longer body is an error.
fn copy_capped(body: impl Read, dest: &mut dyn Write, max_bytes: u64) -> Result<u64, FetchError> {
    let written = std::io::copy(&mut body.take(max_bytes.saturating_add(1)), dest)?;
    if written > max_bytes {
        return Err(FetchError::TooLarge { limit: max_bytes });
    }
    dest.flush()?;
    Ok(written)
}
