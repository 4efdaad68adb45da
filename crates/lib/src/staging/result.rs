//! The staging result document written next to the droplet.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::release::ProcessTypes;
use crate::config::Buildpack;
use crate::consts::LIFECYCLE_TYPE;

/// Errors that can occur while rewriting a staging result.
#[derive(Debug, Error)]
pub enum ModifyError {
  #[error("could not find buildpack with name: {0}")]
  UnknownBuildpack(String),
}

/// One buildpack that took part in staging.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildpackMetadata {
  pub key: String,
  pub name: String,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleMetadata {
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub buildpack_key: String,
  pub detected_buildpack: String,
  pub buildpacks: Vec<BuildpackMetadata>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagingResult {
  pub lifecycle_type: String,
  pub lifecycle_metadata: LifecycleMetadata,
  pub process_types: ProcessTypes,
  pub execution_metadata: String,
}

impl StagingResult {
  /// Build a result; the last buildpack is the one reported as detected.
  pub fn new(process_types: ProcessTypes, buildpacks: Vec<BuildpackMetadata>) -> Self {
    let last = buildpacks.last().cloned().unwrap_or_default();
    Self {
      lifecycle_type: LIFECYCLE_TYPE.to_string(),
      lifecycle_metadata: LifecycleMetadata {
        buildpack_key: last.key,
        detected_buildpack: last.name,
        buildpacks,
      },
      process_types,
      execution_metadata: String::new(),
    }
  }

  /// Replace the buildpack names recorded as keys with the platform keys
  /// of the matching `buildpacks` entries.
  pub fn with_buildpack_keys(mut self, buildpacks: &[Buildpack]) -> Result<Self, ModifyError> {
    let key_for = |name: &str| {
      buildpacks
        .iter()
        .find(|b| b.name == name)
        .map(|b| b.key.clone())
        .ok_or_else(|| ModifyError::UnknownBuildpack(name.to_string()))
    };

    let metadata = &mut self.lifecycle_metadata;
    metadata.buildpack_key = key_for(&metadata.buildpack_key)?;
    for buildpack in &mut metadata.buildpacks {
      buildpack.key = key_for(&buildpack.key)?;
    }

    Ok(self)
  }
}
