//! Installing buildpacks from git remotes.
//!
//! A buildpack URL that does not serve a zip archive is treated as a git
//! repository. The URL fragment, if any, names the branch or tag to check out
//! (`https://github.com/org/buildpack#v1.2.3`).

use std::fs;
use std::io;
use std::num::NonZeroU32;
use std::path::Path;

use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors that can occur while cloning a repository.
#[derive(Debug, Error)]
pub enum CloneError {
  #[error("failed to prepare clone of '{url}': {source}")]
  Prepare {
    url: String,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
  },

  #[error("failed to fetch '{url}': {source}")]
  Fetch {
    url: String,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
  },

  #[error("failed to check out '{url}': {source}")]
  Checkout {
    url: String,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
  },

  #[error("io error: {0}")]
  Io(#[from] io::Error),
}

/// How much history to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloneDepth {
  /// Only the tip commit of the requested ref.
  Shallow,
  Full,
}

/// Clones a repository ref into a working tree.
///
/// Only the repository itself is checked out. Submodules are not initialised,
/// so a buildpack that vendors code through submodules comes out incomplete.
pub trait RepoCloner {
  fn clone_repo(&self, url: &str, branch: Option<&str>, dest: &Path, depth: CloneDepth) -> Result<(), CloneError>;
}

/// [`RepoCloner`] backed by gix's blocking network client.
///
/// gix has no submodule checkout; `.gitmodules` entries are left as empty
/// directories.
#[derive(Debug, Clone, Copy, Default)]
pub struct GixCloner;

impl RepoCloner for GixCloner {
  fn clone_repo(&self, url: &str, branch: Option<&str>, dest: &Path, depth: CloneDepth) -> Result<(), CloneError> {
    let prepare_err = |e: Box<dyn std::error::Error + Send + Sync>| CloneError::Prepare {
      url: url.to_string(),
      source: e,
    };

    let mut prepared = gix::prepare_clone(url, dest).map_err(|e| prepare_err(Box::new(e)))?;

    if depth == CloneDepth::Shallow {
      prepared = prepared.with_shallow(gix::remote::fetch::Shallow::DepthAtRemote(NonZeroU32::MIN));
    }
    if let Some(branch) = branch {
      prepared = prepared
        .with_ref_name(Some(branch))
        .map_err(|e| prepare_err(Box::new(e)))?;
    }

    let (mut checkout, _outcome) = prepared
      .fetch_then_checkout(gix::progress::Discard, &gix::interrupt::IS_INTERRUPTED)
      .map_err(|e| CloneError::Fetch {
        url: url.to_string(),
        source: Box::new(e),
      })?;

    checkout
      .main_worktree(gix::progress::Discard, &gix::interrupt::IS_INTERRUPTED)
      .map_err(|e| CloneError::Checkout {
        url: url.to_string(),
        source: Box::new(e),
      })?;

    Ok(())
  }
}

/// Split a URL into the repository location and its `#fragment`.
///
/// An empty fragment counts as absent.
pub fn split_fragment(url: &str) -> (&str, Option<&str>) {
  match url.split_once('#') {
    Some((base, fragment)) if !fragment.is_empty() => (base, Some(fragment)),
    Some((base, _)) => (base, None),
    None => (url, None),
  }
}

/// Clone `url` into `dest`, shallow first and falling back to a full clone.
///
/// `dest` is removed before each attempt so that neither starts from a
/// partially written tree.
pub fn clone_with_fallback<G: RepoCloner + ?Sized>(cloner: &G, url: &str, dest: &Path) -> Result<(), CloneError> {
  let (repo_url, branch) = split_fragment(url);
  info!(url = repo_url, branch, dest = %dest.display(), "cloning buildpack");

  remove_dir_if_exists(dest)?;
  match cloner.clone_repo(repo_url, branch, dest, CloneDepth::Shallow) {
    Ok(()) => return Ok(()),
    Err(e) => warn!(url = repo_url, error = %e, "shallow clone failed, retrying with full history"),
  }

  remove_dir_if_exists(dest)?;
  cloner.clone_repo(repo_url, branch, dest, CloneDepth::Full)?;
  debug!(url = repo_url, "full clone complete");
  Ok(())
}

fn remove_dir_if_exists(path: &Path) -> io::Result<()> {
  match fs::remove_dir_all(path) {
    Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
    _ => Ok(()),
  }
}
