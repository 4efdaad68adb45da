//! Fetching what staging needs before it starts.
//!
//! - `buildpack`: installs an ordered buildpack list from zip URLs or git
//!   remotes and records it in a manifest
//! - `package`: downloads a single package, optionally checksum-verified,
//!   and restores build caches
//! - `fetch`: the HTTP transport seam
//! - `git`: the git clone seam

pub mod buildpack;
pub mod fetch;
pub mod git;
pub mod package;

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::archive::{ExtractError, TarError};
use crate::util::checksum::ChecksumMismatch;

pub use buildpack::{BuildpackInstaller, load_manifest};
pub use fetch::{Fetch, FetchError};
pub use git::{CloneDepth, CloneError, GixCloner, RepoCloner};
pub use package::{PackageInstaller, restore_cache};

/// Errors that can occur while installing buildpacks or packages.
#[derive(Debug, Error)]
pub enum InstallError {
  #[error("empty url")]
  EmptyUrl,

  #[error("empty download directory")]
  EmptyDownloadDir,

  /// Both the internal and the default client failed.
  #[error("failed to download '{url}': {internal}; default client also failed: {default}")]
  Download {
    url: String,
    #[source]
    internal: FetchError,
    default: FetchError,
  },

  #[error(transparent)]
  Fetch(#[from] FetchError),

  #[error("failed to extract archive: {0}")]
  Extract(#[from] ExtractError),

  #[error("failed to clone '{url}': {source}")]
  Clone {
    url: String,
    #[source]
    source: CloneError,
  },

  #[error(transparent)]
  Checksum(#[from] ChecksumMismatch),

  #[error("failed to restore cache: {0}")]
  Restore(#[from] TarError),

  #[error("invalid buildpack manifest '{}': {source}", .path.display())]
  Manifest {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("installing buildpack {name}: {url} failed: {source}")]
  Buildpack {
    name: String,
    url: String,
    #[source]
    source: Box<InstallError>,
  },

  #[error("io error: {0}")]
  Io(#[from] io::Error),
}
