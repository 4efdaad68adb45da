//! Streaming checksum verification.
//!
//! `ChecksumVerifyingReader` wraps any `Read` and feeds every byte it hands
//! out into a digest. The digest is checked once, on the first end-of-stream,
//! so a consumer that reads to the end either sees a clean EOF (content
//! matches) or an `InvalidData` error (content does not match). Consumers that
//! stop early never trigger verification.

use std::io::{self, Read};
use std::str::FromStr;

use sha2::Digest;
use thiserror::Error;

/// The digest of the consumed stream did not match the expected value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("checksum verification failure: expected {expected}, got {actual}")]
pub struct ChecksumMismatch {
  pub expected: String,
  pub actual: String,
}

/// A checksum algorithm name that is not supported.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported checksum verification algorithm: {0:?}")]
pub struct UnsupportedAlgorithm(pub String);

/// Algorithms accepted for package verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumAlgorithm {
  Sha256,
}

impl FromStr for ChecksumAlgorithm {
  type Err = UnsupportedAlgorithm;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "sha256" => Ok(ChecksumAlgorithm::Sha256),
      other => Err(UnsupportedAlgorithm(other.to_string())),
    }
  }
}

/// An expected checksum paired with the algorithm that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checksum {
  pub algorithm: ChecksumAlgorithm,
  pub value: String,
}

impl Checksum {
  pub fn sha256(value: impl Into<String>) -> Self {
    Self {
      algorithm: ChecksumAlgorithm::Sha256,
      value: value.into(),
    }
  }
}

enum State<D> {
  Hashing(D),
  Verified,
  Mismatch(ChecksumMismatch),
}

/// A reader that verifies the digest of everything read through it.
pub struct ChecksumVerifyingReader<R, D> {
  inner: R,
  expected: String,
  state: State<D>,
}

impl<R: Read, D: Digest> ChecksumVerifyingReader<R, D> {
  pub fn new(inner: R, expected: impl Into<String>) -> Self {
    Self {
      inner,
      expected: expected.into(),
      state: State::Hashing(D::new()),
    }
  }

  /// Unwrap the underlying reader.
  pub fn into_inner(self) -> R {
    self.inner
  }

  fn finish(&mut self) -> io::Result<()> {
    // The digest is consumed here; every later EOF replays the stored outcome.
    self.state = match std::mem::replace(&mut self.state, State::Verified) {
      State::Hashing(hasher) => {
        let actual = hex::encode(hasher.finalize());
        if actual.eq_ignore_ascii_case(&self.expected) {
          State::Verified
        } else {
          State::Mismatch(ChecksumMismatch {
            expected: self.expected.clone(),
            actual,
          })
        }
      }
      done => done,
    };

    match &self.state {
      State::Mismatch(mismatch) => Err(io::Error::new(io::ErrorKind::InvalidData, mismatch.clone())),
      _ => Ok(()),
    }
  }
}

impl<R: Read, D: Digest> Read for ChecksumVerifyingReader<R, D> {
  fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
    if buf.is_empty() {
      return Ok(0);
    }

    let n = self.inner.read(buf)?;
    if n == 0 {
      self.finish()?;
      return Ok(0);
    }

    if let State::Hashing(hasher) = &mut self.state {
      hasher.update(&buf[..n]);
    }
    Ok(n)
  }
}
