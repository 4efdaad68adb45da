//! HTTP retrieval of buildpacks and packages.
//!
//! Transport is behind the [`Fetch`] trait so callers can hand in clients
//! configured for their network (mutual TLS for in-cluster endpoints, the
//! system trust store for public ones) and tests can substitute fakes.

use std::io::{self, Read};

use thiserror::Error;
use tracing::debug;

/// Errors that can occur while downloading.
#[derive(Debug, Error)]
pub enum FetchError {
  #[error("failed to request '{url}': {source}")]
  Request {
    url: String,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
  },

  #[error("downloading '{url}' failed with status code {status}")]
  Status { url: String, status: u16 },

  #[error("failed to read response body from '{url}': {source}")]
  Body {
    url: String,
    #[source]
    source: io::Error,
  },
}

/// A source of bytes addressed by URL.
pub trait Fetch {
  /// Open `url` for streaming. Any non-success status is an error.
  fn open(&self, url: &str) -> Result<Box<dyn Read + Send>, FetchError>;

  /// Download `url` completely into memory.
  fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
    let mut reader = self.open(url)?;
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes).map_err(|source| FetchError::Body {
      url: url.to_string(),
      source,
    })?;
    debug!(url, size = bytes.len(), "download complete");
    Ok(bytes)
  }
}

impl Fetch for reqwest::blocking::Client {
  fn open(&self, url: &str) -> Result<Box<dyn Read + Send>, FetchError> {
    let response = self.get(url).send().map_err(|e| FetchError::Request {
      url: url.to_string(),
      source: Box::new(e),
    })?;

    if !response.status().is_success() {
      return Err(FetchError::Status {
        url: url.to_string(),
        status: response.status().as_u16(),
      });
    }

    Ok(Box::new(response))
  }
}
