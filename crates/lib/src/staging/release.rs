//! Start commands: the Procfile and the buildpack's release output.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use serde::Deserialize;
use tracing::warn;

use super::types::{FailureKind, StagingError};
use crate::consts::PROCFILE_FILENAME;

/// Process type name to start command.
pub type ProcessTypes = BTreeMap<String, String>;

/// The part of `bin/release` output the stager consumes.
#[derive(Debug, Default, Deserialize)]
pub struct Release {
  #[serde(default)]
  default_process_types: Option<ProcessTypes>,
}

impl Release {
  pub fn into_process_types(self) -> ProcessTypes {
    self.default_process_types.unwrap_or_default()
  }
}

/// Read `<build_dir>/Procfile`. A missing Procfile yields no commands.
pub fn read_procfile(build_dir: &Path) -> Result<ProcessTypes, StagingError> {
  let failure = || StagingError::with_message(FailureKind::Release, "Failed to read command from Procfile");

  let content = match fs::read_to_string(build_dir.join(PROCFILE_FILENAME)) {
    Ok(content) => content,
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(ProcessTypes::new()),
    Err(e) => return Err(failure().caused_by(e)),
  };

  if content.trim().is_empty() {
    return Ok(ProcessTypes::new());
  }

  // The parser's message would point into user content; only the verdict is kept.
  serde_yaml::from_str(&content).map_err(|_| failure().caused_by("invalid YAML"))
}

/// Parse the stdout of `bin/release`.
pub fn parse_release(output: &[u8]) -> Result<Release, StagingError> {
  if output.iter().all(u8::is_ascii_whitespace) {
    return Ok(Release::default());
  }

  serde_yaml::from_slice(output)
    .map_err(|e| StagingError::with_message(FailureKind::Release, "buildpack's release output invalid").caused_by(e))
}

/// Overlay Procfile commands on the buildpack's defaults.
///
/// Warns when the result has no `web` command, since the app will not start
/// without one.
pub fn merge_process_types(mut defaults: ProcessTypes, procfile: ProcessTypes) -> ProcessTypes {
  defaults.extend(procfile);

  if defaults.get("web").is_none_or(|cmd| cmd.is_empty()) {
    warn!("No start command specified by buildpack or via Procfile.");
    warn!("App will not start unless a command is provided at runtime.");
  }

  defaults
}
