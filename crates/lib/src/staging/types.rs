//! Failure classification and phase bookkeeping for staging runs.

use std::error::Error;
use std::fmt;

/// Which part of staging failed. Each kind maps to the exit code the
/// platform reads to report the failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
  System,
  Detect,
  Compile,
  Release,
  Supply,
  Finalize,
}

impl FailureKind {
  pub fn exit_code(self) -> i32 {
    match self {
      FailureKind::System => 1,
      FailureKind::Detect => 222,
      FailureKind::Compile => 223,
      FailureKind::Release => 224,
      FailureKind::Supply => 225,
      FailureKind::Finalize => 227,
    }
  }

  /// Summary used when the failure site does not supply its own.
  pub fn summary(self) -> &'static str {
    match self {
      FailureKind::System => "Failed to stage application",
      FailureKind::Detect => "None of the buildpacks detected a compatible application",
      FailureKind::Compile => "Failed to compile droplet",
      FailureKind::Release => "Failed to build droplet release",
      FailureKind::Supply => "Failed to run all supply scripts",
      FailureKind::Finalize => "Failed to run finalize script",
    }
  }
}

/// A staging failure: its kind, a summary for the user, and the cause.
#[derive(Debug)]
pub struct StagingError {
  kind: FailureKind,
  message: String,
  source: Option<Box<dyn Error + Send + Sync>>,
}

impl StagingError {
  /// A failure with the kind's default summary.
  pub fn new(kind: FailureKind) -> Self {
    Self::with_message(kind, kind.summary())
  }

  pub fn with_message(kind: FailureKind, message: impl Into<String>) -> Self {
    Self {
      kind,
      message: message.into(),
      source: None,
    }
  }

  /// Attach the underlying cause.
  pub fn caused_by(mut self, source: impl Into<Box<dyn Error + Send + Sync>>) -> Self {
    self.source = Some(source.into());
    self
  }

  pub fn kind(&self) -> FailureKind {
    self.kind
  }

  pub fn message(&self) -> &str {
    &self.message
  }

  pub fn exit_code(&self) -> i32 {
    self.kind.exit_code()
  }
}

impl fmt::Display for StagingError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}: exit status {}", self.message, self.exit_code())?;
    if let Some(source) = &self.source {
      write!(f, " - internal error: {}", source)?;
    }
    Ok(())
  }
}

impl Error for StagingError {
  fn source(&self) -> Option<&(dyn Error + 'static)> {
    self.source.as_deref().map(|e| e as &(dyn Error + 'static))
  }
}

/// Stages of a run, in the order they execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
  DirectorySetup,
  CacheGc,
  Detect,
  Supply,
  Finalize,
  Compile,
  Release,
  Packaging,
  Done,
}

impl fmt::Display for Phase {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Phase::DirectorySetup => "directory-setup",
      Phase::CacheGc => "cache-gc",
      Phase::Detect => "detect",
      Phase::Supply => "supply",
      Phase::Finalize => "finalize",
      Phase::Compile => "compile",
      Phase::Release => "release",
      Phase::Packaging => "packaging",
      Phase::Done => "done",
    };
    f.write_str(name)
  }
}
