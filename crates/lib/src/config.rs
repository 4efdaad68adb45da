//! Staging configuration and buildpack ordering.
//!
//! A `BuildConfig` is built once per staging attempt. Besides the input and
//! output locations it carries the buildpack order and whether that order was
//! given explicitly (`skip_detect`). Everything the pipeline derives from the
//! order (supply buildpacks, deps indices, cache locations) lives here so the
//! installer and the runner compute identical paths.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consts::{
  DEFAULT_BUILD_ARTIFACTS_CACHE_DIR, DEFAULT_BUILD_DIR, DEFAULT_BUILDPACKS_DIR, DEFAULT_OUTPUT_BUILD_ARTIFACTS_CACHE,
  DEFAULT_OUTPUT_DROPLET, DEFAULT_OUTPUT_METADATA, FINAL_CACHE_DIR,
};
use crate::util::hash::hash_name;

/// Errors that can occur while reading staging configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to parse buildpacks JSON: {0}")]
  ParseBuildpacks(#[from] serde_json::Error),
}

/// A buildpack as handed to the stager by the platform.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Buildpack {
  /// Name used to address the buildpack on disk.
  pub name: String,
  /// Platform key reported back in staging results.
  #[serde(default)]
  pub key: String,
  /// Zip location, or a git URL with an optional `#branch` fragment.
  #[serde(default)]
  pub url: String,
  #[serde(default)]
  pub skip_detect: bool,
}

/// Parameters for a single staging run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildConfig {
  /// Application source tree; buildpacks compile in place.
  pub build_dir: PathBuf,
  /// Root under which buildpacks are installed (see [`buildpack_path`]).
  pub buildpacks_dir: PathBuf,
  pub output_droplet: PathBuf,
  pub output_metadata: PathBuf,
  pub output_build_artifacts_cache: PathBuf,
  /// Cache root handed to buildpacks, one subdirectory per buildpack position.
  pub build_artifacts_cache_dir: PathBuf,
  pub buildpack_order: Vec<String>,
  /// The order was given explicitly; run supply/finalize instead of detect.
  pub skip_detect: bool,
}

impl Default for BuildConfig {
  fn default() -> Self {
    Self {
      build_dir: PathBuf::from(DEFAULT_BUILD_DIR),
      buildpacks_dir: PathBuf::from(DEFAULT_BUILDPACKS_DIR),
      output_droplet: PathBuf::from(DEFAULT_OUTPUT_DROPLET),
      output_metadata: PathBuf::from(DEFAULT_OUTPUT_METADATA),
      output_build_artifacts_cache: PathBuf::from(DEFAULT_OUTPUT_BUILD_ARTIFACTS_CACHE),
      build_artifacts_cache_dir: PathBuf::from(DEFAULT_BUILD_ARTIFACTS_CACHE_DIR),
      buildpack_order: Vec::new(),
      skip_detect: false,
    }
  }
}

impl BuildConfig {
  /// Populate the buildpack order from a JSON array of buildpacks.
  ///
  /// An empty string leaves the current order untouched.
  pub fn init_buildpacks(&mut self, buildpacks_json: &str) -> Result<(), ConfigError> {
    if buildpacks_json.trim().is_empty() {
      return Ok(());
    }

    let buildpacks: Vec<Buildpack> = serde_json::from_str(buildpacks_json)?;
    self.set_buildpacks(&buildpacks);
    Ok(())
  }

  /// Populate the buildpack order from already parsed buildpacks.
  ///
  /// Detection is skipped only when every buildpack asks for it; a mixed
  /// list falls back to auto-detection over the whole order.
  pub fn set_buildpacks(&mut self, buildpacks: &[Buildpack]) {
    self.buildpack_order = buildpacks.iter().map(|b| b.name.clone()).collect();
    self.skip_detect = !buildpacks.is_empty() && buildpacks.iter().all(|b| b.skip_detect);
  }

  /// Buildpacks that only supply dependencies: every buildpack but the last,
  /// and only when the order was given explicitly.
  pub fn supply_buildpacks(&self) -> &[String] {
    match self.buildpack_order.split_last() {
      Some((_, supply)) if self.skip_detect => supply,
      _ => &[],
    }
  }

  /// The buildpack that finalizes (or compiles) the droplet in explicit mode.
  pub fn final_buildpack(&self) -> Option<&str> {
    if !self.skip_detect {
      return None;
    }
    self.buildpack_order.last().map(String::as_str)
  }

  /// Name of the deps subdirectory for the buildpack at position `index`.
  ///
  /// Indices are zero-padded to the number of digits of the buildpack count
  /// so that the directories sort lexically in buildpack order.
  pub fn deps_index(&self, index: usize) -> String {
    let count = self.supply_buildpacks().len() + 1;
    let width = count.ilog10() as usize + 1;
    format!("{:0width$}", index, width = width)
  }

  /// Cache directory of a supply buildpack.
  pub fn supply_cache_path(&self, buildpack: &str) -> PathBuf {
    self.build_artifacts_cache_dir.join(hash_name(buildpack))
  }

  /// Cache directory of the final buildpack.
  pub fn final_cache_path(&self) -> PathBuf {
    self.build_artifacts_cache_dir.join(FINAL_CACHE_DIR)
  }

  /// Install location of a buildpack under this config's buildpacks root.
  pub fn buildpack_path(&self, buildpack: &str) -> PathBuf {
    buildpack_path(&self.buildpacks_dir, buildpack)
  }
}

/// Install location of a buildpack: `<dir>/<sha256(name)>`.
///
/// Depends only on the name, never on the content, so the installer and the
/// runner agree on it without coordination.
pub fn buildpack_path(dir: &Path, name: &str) -> PathBuf {
  dir.join(hash_name(name))
}
