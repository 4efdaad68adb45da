//! Buildpack installation.
//!
//! Each buildpack is installed to `buildpack_path(buildpacks_dir, name)`, the
//! same location the staging runner resolves it from. Two fallbacks apply:
//!
//! 1. The download is attempted with the internal client first and retried
//!    with the default client.
//! 2. Content that is not a zip archive is taken to be a git repository
//!    (hosted git URLs answer with an HTML page) and cloned instead.
//!
//! Once every buildpack is in place the input list is written to
//! `config.json` in the buildpacks directory.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::InstallError;
use super::fetch::Fetch;
use super::git::{GixCloner, RepoCloner, clone_with_fallback};
use crate::archive::{ExtractError, SafeZipExtractor};
use crate::config::{Buildpack, buildpack_path};
use crate::consts::BUILDPACK_MANIFEST_FILENAME;

/// Installs buildpacks into a buildpacks directory.
pub struct BuildpackInstaller<F, G = GixCloner> {
  internal: F,
  default: F,
  cloner: G,
  buildpacks_dir: PathBuf,
  extractor: SafeZipExtractor,
}

impl<F: Fetch> BuildpackInstaller<F, GixCloner> {
  pub fn new(internal: F, default: F, buildpacks_dir: impl Into<PathBuf>) -> Self {
    Self {
      internal,
      default,
      cloner: GixCloner,
      buildpacks_dir: buildpacks_dir.into(),
      extractor: SafeZipExtractor::default(),
    }
  }
}

impl<F: Fetch, G: RepoCloner> BuildpackInstaller<F, G> {
  /// Replace the git cloner.
  pub fn with_cloner<C: RepoCloner>(self, cloner: C) -> BuildpackInstaller<F, C> {
    BuildpackInstaller {
      internal: self.internal,
      default: self.default,
      cloner,
      buildpacks_dir: self.buildpacks_dir,
      extractor: self.extractor,
    }
  }

  pub fn with_extractor(mut self, extractor: SafeZipExtractor) -> Self {
    self.extractor = extractor;
    self
  }

  pub fn buildpacks_dir(&self) -> &Path {
    &self.buildpacks_dir
  }

  /// Install every buildpack in order, then write the manifest.
  ///
  /// Stops at the first buildpack that cannot be installed.
  pub fn install(&self, buildpacks: &[Buildpack]) -> Result<(), InstallError> {
    fs::create_dir_all(&self.buildpacks_dir)?;

    for buildpack in buildpacks {
      info!(buildpack = %buildpack.name, url = %buildpack.url, "installing buildpack");
      self.install_one(buildpack).map_err(|source| InstallError::Buildpack {
        name: buildpack.name.clone(),
        url: buildpack.url.clone(),
        source: Box::new(source),
      })?;
    }

    write_manifest(&self.buildpacks_dir, buildpacks)?;
    info!(count = buildpacks.len(), dir = %self.buildpacks_dir.display(), "buildpacks installed");
    Ok(())
  }

  fn install_one(&self, buildpack: &Buildpack) -> Result<(), InstallError> {
    if buildpack.url.is_empty() {
      return Err(InstallError::EmptyUrl);
    }

    let dest = buildpack_path(&self.buildpacks_dir, &buildpack.name);
    match self.install_from_archive(&buildpack.url, &dest) {
      Err(InstallError::Extract(e)) if e.is_not_archive() => {
        debug!(buildpack = %buildpack.name, error = %e, "content is not a zip archive, cloning");
        clone_with_fallback(&self.cloner, &buildpack.url, &dest).map_err(|source| InstallError::Clone {
          url: buildpack.url.clone(),
          source,
        })
      }
      result => result,
    }
  }

  fn install_from_archive(&self, url: &str, dest: &Path) -> Result<(), InstallError> {
    let bytes = self.download(url)?;

    let mut archive = tempfile::Builder::new()
      .prefix("buildpack-")
      .suffix(".zip")
      .tempfile()?;
    archive.write_all(&bytes)?;
    archive.flush()?;

    fs::create_dir_all(dest)?;
    self.extractor.extract(archive.path(), dest).map_err(|e| match e {
      ExtractError::Io(io) => InstallError::Io(io),
      other => InstallError::Extract(other),
    })?;

    debug!(url, dest = %dest.display(), "extracted buildpack archive");
    Ok(())
  }

  fn download(&self, url: &str) -> Result<Vec<u8>, InstallError> {
    let internal = match self.internal.fetch(url) {
      Ok(bytes) => return Ok(bytes),
      Err(e) => e,
    };

    warn!(url, error = %internal, "internal client failed, retrying with default client");
    self.default.fetch(url).map_err(|default| InstallError::Download {
      url: url.to_string(),
      internal,
      default,
    })
  }
}

/// Write the installed buildpack list to `<dir>/config.json`.
pub fn write_manifest(dir: &Path, buildpacks: &[Buildpack]) -> Result<(), InstallError> {
  let path = dir.join(BUILDPACK_MANIFEST_FILENAME);
  let json = serde_json::to_vec(buildpacks).map_err(|source| InstallError::Manifest {
    path: path.clone(),
    source,
  })?;
  fs::write(&path, json)?;
  Ok(())
}

/// Read the buildpack list written by [`BuildpackInstaller::install`].
pub fn load_manifest(dir: &Path) -> Result<Vec<Buildpack>, InstallError> {
  let path = dir.join(BUILDPACK_MANIFEST_FILENAME);
  let content = fs::read(&path)?;
  serde_json::from_slice(&content).map_err(|source| InstallError::Manifest { path, source })
}
