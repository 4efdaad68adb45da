//! Running buildpack scripts.

use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::process::Command;
use tracing::debug;

/// Errors that can occur while running a buildpack script.
#[derive(Debug, Error)]
pub enum ScriptError {
  #[error("failed to start '{}': {source}", .script.display())]
  Spawn {
    script: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("'{}' failed with {status}", .script.display())]
  Exit { script: PathBuf, status: ExitStatus },

  #[error("failed to relay output of '{}': {source}", .script.display())]
  Io {
    script: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// Run `script` with `args`, copying its stdout into `sink`.
///
/// Pass a `Vec<u8>` to capture output (detect, release) or
/// `tokio::io::stdout()` to stream it. Stderr goes straight to the parent's
/// stderr and stdin is closed.
pub async fn run_script<I, S, W>(script: &Path, args: I, sink: &mut W) -> Result<(), ScriptError>
where
  I: IntoIterator<Item = S>,
  S: AsRef<OsStr>,
  W: AsyncWrite + Unpin + ?Sized,
{
  let io_err = |source: io::Error| ScriptError::Io {
    script: script.to_path_buf(),
    source,
  };

  debug!(script = %script.display(), "running buildpack script");

  let mut child = Command::new(script)
    .args(args)
    .stdin(Stdio::null())
    .stdout(Stdio::piped())
    .stderr(Stdio::inherit())
    .kill_on_drop(true)
    .spawn()
    .map_err(|source| ScriptError::Spawn {
      script: script.to_path_buf(),
      source,
    })?;

  if let Some(mut stdout) = child.stdout.take() {
    tokio::io::copy(&mut stdout, sink).await.map_err(io_err)?;
  }
  sink.flush().await.map_err(io_err)?;

  let status = child.wait().await.map_err(io_err)?;
  if !status.success() {
    return Err(ScriptError::Exit {
      script: script.to_path_buf(),
      status,
    });
  }

  Ok(())
}
