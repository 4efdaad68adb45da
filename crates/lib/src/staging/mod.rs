//! The staging pipeline.
//!
//! A [`Runner`] takes one [`BuildConfig`] through a fixed sequence of phases:
//!
//! ```text
//! directory setup -> cache gc -> detect | supply x N -> finalize | compile -> release -> packaging
//! ```
//!
//! In auto-detect mode the first buildpack whose `bin/detect` succeeds is
//! used. When the order was given explicitly every buildpack but the last
//! runs `bin/supply`, each into its own `deps/<index>` directory, and the
//! last one finalizes (or, for buildpacks that predate multi-buildpack
//! support, compiles) the droplet.
//!
//! Any failure aborts the remaining phases. The temporary contents tree is
//! removed when the run ends, whatever the outcome.

pub mod packaging;
pub mod release;
pub mod result;
pub mod script;
pub mod types;

use std::error::Error as StdError;
use std::ffi::OsStr;
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::archive::write_tar_gz;
use crate::config::BuildConfig;
use crate::consts::DEPS_CONFIG_FILENAME;

use self::packaging::{copy_tree, write_metadata};
use self::release::{ProcessTypes, merge_process_types, parse_release, read_procfile};
use self::script::run_script;

pub use self::result::{BuildpackMetadata, LifecycleMetadata, ModifyError, StagingResult};
pub use self::types::{FailureKind, Phase, StagingError};

/// A buildpack directory could not be located.
#[derive(Debug, Error)]
pub enum ResolveError {
  #[error("Failed to read buildpack directory '{}' for buildpack '{name}'", .path.display())]
  Unreadable {
    path: PathBuf,
    name: String,
    #[source]
    source: io::Error,
  },

  #[error("malformed buildpack does not contain a /bin dir: {0}")]
  Malformed(String),
}

/// Temporary tree that becomes the droplet.
struct Workspace {
  contents: TempDir,
  deps_dir: PathBuf,
  profile_dir: PathBuf,
}

/// The buildpack that will finalize or compile, and the metadata gathered so far.
struct Selection {
  dir: PathBuf,
  buildpacks: Vec<BuildpackMetadata>,
}

#[derive(Debug, Default, Deserialize)]
struct DepsConfig {
  #[serde(default)]
  name: String,
  #[serde(default)]
  version: String,
}

/// Runs a staging attempt for one configuration.
pub struct Runner {
  config: BuildConfig,
}

impl Runner {
  pub fn new(config: BuildConfig) -> Self {
    Self { config }
  }

  /// Stage the application and write the droplet, cache and result.
  pub async fn run(&self) -> Result<StagingResult, StagingError> {
    enter(Phase::DirectorySetup);
    let workspace = self
      .make_directories()
      .map_err(system("Failed to set up filesystem when generating droplet"))?;

    enter(Phase::CacheGc);
    self
      .clean_cache_dir()
      .map_err(system("Failed to clean build artifacts cache"))?;

    let selection = if self.config.skip_detect {
      enter(Phase::Supply);
      self.run_supply_buildpacks(&workspace).await?
    } else {
      enter(Phase::Detect);
      self.detect(&workspace).await?
    };

    self.run_finalize(&selection.dir, &workspace).await?;

    // Finalize may have rewritten any buildpack's config.yml.
    let buildpacks = if self.config.skip_detect {
      self.buildpacks_metadata(&workspace, &self.config.buildpack_order)
    } else {
      selection.buildpacks
    };

    enter(Phase::Release);
    let process_types = self.release(&selection.dir).await?;

    enter(Phase::Packaging);
    let result = StagingResult::new(process_types, buildpacks);
    self.package(&workspace, &result)?;

    enter(Phase::Done);
    Ok(result)
  }

  fn make_directories(&self) -> io::Result<Workspace> {
    create_parent(&self.config.output_droplet)?;
    create_parent(&self.config.output_metadata)?;
    create_parent(&self.config.output_build_artifacts_cache)?;
    fs::create_dir_all(self.config.final_cache_path())?;
    for buildpack in self.config.supply_buildpacks() {
      fs::create_dir_all(self.config.supply_cache_path(buildpack))?;
    }

    let contents = tempfile::Builder::new().prefix("contents").tempdir()?;
    let deps_dir = contents.path().join("deps");
    for index in 0..=self.config.supply_buildpacks().len() {
      fs::create_dir_all(deps_dir.join(self.config.deps_index(index)))?;
    }
    let profile_dir = contents.path().join("profile.d");
    fs::create_dir_all(&profile_dir)?;

    debug!(contents = %contents.path().display(), "created staging workspace");
    Ok(Workspace {
      contents,
      deps_dir,
      profile_dir,
    })
  }

  /// Drop cache entries that no buildpack in the current order owns.
  fn clean_cache_dir(&self) -> io::Result<()> {
    let mut keep = vec![self.config.final_cache_path()];
    keep.extend(
      self
        .config
        .supply_buildpacks()
        .iter()
        .map(|b| self.config.supply_cache_path(b)),
    );

    for entry in fs::read_dir(&self.config.build_artifacts_cache_dir)? {
      let entry = entry?;
      let path = entry.path();
      if keep.contains(&path) {
        continue;
      }

      debug!(path = %path.display(), "removing stale cache entry");
      if entry.file_type()?.is_dir() {
        fs::remove_dir_all(&path)?;
      } else {
        fs::remove_file(&path)?;
      }
    }
    Ok(())
  }

  /// Locate the directory holding a buildpack's `bin/`.
  ///
  /// Archives that wrap the buildpack in a single top-level directory are
  /// unwrapped one level.
  fn resolve(&self, name: &str) -> Result<PathBuf, ResolveError> {
    let path = self.config.buildpack_path(name);
    if path.join("bin").exists() {
      return Ok(path);
    }

    let entries = fs::read_dir(&path)
      .and_then(|dir| dir.collect::<io::Result<Vec<_>>>())
      .map_err(|source| ResolveError::Unreadable {
        path: path.clone(),
        name: name.to_string(),
        source,
      })?;

    if let [only] = entries.as_slice() {
      let nested = only.path();
      if nested.join("bin").exists() {
        return Ok(nested);
      }
    }

    Err(ResolveError::Malformed(name.to_string()))
  }

  async fn detect(&self, workspace: &Workspace) -> Result<Selection, StagingError> {
    for name in &self.config.buildpack_order {
      let dir = match self.resolve(name) {
        Ok(dir) => dir,
        Err(e) => {
          warn!(buildpack = %name, error = %e, "skipping buildpack");
          continue;
        }
      };

      let detect = dir.join("bin").join("detect");
      match fs::metadata(&detect) {
        Err(e) => {
          warn!(buildpack = %name, error = %e, "failed to find detect script");
          continue;
        }
        Ok(meta) if meta.permissions().mode() & 0o111 == 0 => {
          warn!(buildpack = %name, "WARNING: buildpack script '/bin/detect' is not executable");
          continue;
        }
        Ok(_) => {}
      }

      let mut output = Vec::new();
      match run_script(&detect, [&self.config.build_dir], &mut output).await {
        Ok(()) => {
          let mut buildpacks = self.buildpacks_metadata(workspace, std::slice::from_ref(name));
          if let Some(detected) = buildpacks.first_mut().filter(|b| b.name.is_empty()) {
            detected.name = String::from_utf8_lossy(&output).trim().to_string();
          }
          info!(buildpack = %name, "buildpack detected");
          return Ok(Selection { dir, buildpacks });
        }
        Err(e) => debug!(buildpack = %name, error = %e, "detect did not match"),
      }
    }

    Err(StagingError::new(FailureKind::Detect))
  }

  /// Resolve every supply buildpack and make sure it can supply.
  fn validate_supply_buildpacks(&self) -> Result<Vec<PathBuf>, StagingError> {
    self
      .config
      .supply_buildpacks()
      .iter()
      .map(|name| {
        let dir = self.resolve(name).map_err(failed(FailureKind::Supply))?;
        let has_supply = dir
          .join("bin")
          .join("supply")
          .try_exists()
          .map_err(failed(FailureKind::Supply))?;
        if !has_supply {
          warn!(buildpack = %name, "supply script missing");
          return Err(StagingError::with_message(
            FailureKind::Supply,
            "Error: one of the buildpacks chosen to supply dependencies does not support multi-buildpack apps",
          ));
        }
        Ok(dir)
      })
      .collect()
  }

  async fn run_supply_buildpacks(&self, workspace: &Workspace) -> Result<Selection, StagingError> {
    let final_buildpack = self
      .config
      .final_buildpack()
      .ok_or_else(|| StagingError::new(FailureKind::Supply).caused_by("no buildpacks specified"))?;

    let dirs = self.validate_supply_buildpacks()?;
    let mut stdout = tokio::io::stdout();

    for (index, (name, dir)) in self.config.supply_buildpacks().iter().zip(&dirs).enumerate() {
      info!(buildpack = %name, index, "running supply");
      let cache = self.config.supply_cache_path(name);
      let deps_index = self.config.deps_index(index);
      let args: [&OsStr; 4] = [
        self.config.build_dir.as_os_str(),
        cache.as_os_str(),
        workspace.deps_dir.as_os_str(),
        OsStr::new(&deps_index),
      ];
      run_script(&dir.join("bin").join("supply"), args, &mut stdout)
        .await
        .map_err(failed(FailureKind::Supply))?;
    }

    let dir = self.resolve(final_buildpack).map_err(failed(FailureKind::Supply))?;
    Ok(Selection {
      dir,
      buildpacks: self.buildpacks_metadata(workspace, &self.config.buildpack_order),
    })
  }

  /// Run the chosen buildpack: supply + finalize when it supports
  /// multi-buildpack staging, compile otherwise.
  async fn run_finalize(&self, dir: &Path, workspace: &Workspace) -> Result<(), StagingError> {
    let supply_count = self.config.supply_buildpacks().len();
    let deps_index = self.config.deps_index(supply_count);
    let cache = self.config.final_cache_path();
    let build_dir = self.config.build_dir.as_os_str();
    let bin = dir.join("bin");
    let mut stdout = tokio::io::stdout();

    let has_finalize = bin
      .join("finalize")
      .try_exists()
      .map_err(failed(FailureKind::Finalize))?;

    if has_finalize {
      enter(Phase::Finalize);
      let args: [&OsStr; 4] = [
        build_dir,
        cache.as_os_str(),
        workspace.deps_dir.as_os_str(),
        OsStr::new(&deps_index),
      ];

      let has_supply = bin.join("supply").try_exists().map_err(failed(FailureKind::Supply))?;
      if has_supply {
        run_script(&bin.join("supply"), args, &mut stdout)
          .await
          .map_err(failed(FailureKind::Supply))?;
      }

      let finalize_args = args.into_iter().chain([workspace.profile_dir.as_os_str()]);
      run_script(&bin.join("finalize"), finalize_args, &mut stdout)
        .await
        .map_err(failed(FailureKind::Finalize))?;
      return Ok(());
    }

    enter(Phase::Compile);
    if supply_count > 0 {
      warn!(
        "Warning: the last buildpack is not compatible with multi-buildpack apps and cannot make use of any dependencies supplied by the buildpacks specified before it"
      );
    }

    // Compile-only buildpacks never populate their deps directory.
    fs::remove_dir_all(workspace.deps_dir.join(&deps_index)).map_err(failed(FailureKind::Compile))?;

    run_script(&bin.join("compile"), [build_dir, cache.as_os_str()], &mut stdout)
      .await
      .map_err(failed(FailureKind::Compile))
  }

  /// Read `deps/<index>/config.yml` for each buildpack in `names`.
  ///
  /// Unreadable or malformed descriptors leave name and version empty.
  fn buildpacks_metadata(&self, workspace: &Workspace, names: &[String]) -> Vec<BuildpackMetadata> {
    names
      .iter()
      .enumerate()
      .map(|(index, key)| {
        let path = workspace
          .deps_dir
          .join(self.config.deps_index(index))
          .join(DEPS_CONFIG_FILENAME);
        let deps = fs::read_to_string(&path)
          .ok()
          .and_then(|content| serde_yaml::from_str::<DepsConfig>(&content).ok())
          .unwrap_or_default();

        BuildpackMetadata {
          key: key.clone(),
          name: deps.name,
          version: deps.version,
        }
      })
      .collect()
  }

  async fn release(&self, dir: &Path) -> Result<ProcessTypes, StagingError> {
    let procfile = read_procfile(&self.config.build_dir)?;

    let mut output = Vec::new();
    run_script(
      &dir.join("bin").join("release"),
      [&self.config.build_dir],
      &mut output,
    )
    .await
    .map_err(failed(FailureKind::Release))?;

    let release = parse_release(&output)?;
    Ok(merge_process_types(release.into_process_types(), procfile))
  }

  fn package(&self, workspace: &Workspace, result: &StagingResult) -> Result<(), StagingError> {
    let contents = workspace.contents.path();

    write_metadata(&self.config.output_metadata, result).map_err(system("Failed to encode generated metadata"))?;

    for name in ["tmp", "logs"] {
      fs::create_dir_all(contents.join(name)).map_err(system("Failed to set up droplet filesystem"))?;
    }

    copy_tree(&self.config.build_dir, &contents.join("app")).map_err(system("Failed to copy compiled droplet"))?;

    write_tar_gz(contents, &self.config.output_droplet).map_err(system("Failed to compress droplet filesystem"))?;
    write_tar_gz(
      &self.config.build_artifacts_cache_dir,
      &self.config.output_build_artifacts_cache,
    )
    .map_err(system("Failed to compress build artifacts"))?;

    info!(
      droplet = %self.config.output_droplet.display(),
      cache = %self.config.output_build_artifacts_cache.display(),
      "staging artifacts written"
    );
    Ok(())
  }
}

fn enter(phase: Phase) {
  info!(phase = %phase, "entering phase");
}

fn create_parent(path: &Path) -> io::Result<()> {
  match path.parent() {
    Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
    _ => Ok(()),
  }
}

/// Classify a cause as a failure of `kind` with the kind's summary.
fn failed<E>(kind: FailureKind) -> impl FnOnce(E) -> StagingError
where
  E: Into<Box<dyn StdError + Send + Sync>>,
{
  move |e| StagingError::new(kind).caused_by(e)
}

/// Classify a cause as a system failure with a site-specific summary.
fn system<E>(message: &'static str) -> impl FnOnce(E) -> StagingError
where
  E: Into<Box<dyn StdError + Send + Sync>>,
{
  move |e| StagingError::with_message(FailureKind::System, message).caused_by(e)
}
