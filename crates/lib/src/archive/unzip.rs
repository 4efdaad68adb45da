//! Bounded zip extraction.
//!
//! Buildpacks and application bits arrive as zip archives from sources the
//! stager does not control. Extraction therefore caps the number of bytes
//! written per member, refuses entry names that escape the target directory,
//! and restores Unix permission bits so that `bin/*` scripts stay executable.

use std::fs::{self, File};
use std::io::{self, BufReader, Read, Seek, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;
use zip::ZipArchive;
use zip::result::ZipError;

use crate::consts::DEFAULT_UNZIPPED_SIZE_LIMIT;

/// Errors that can occur while extracting a zip archive.
#[derive(Debug, Error)]
pub enum ExtractError {
  #[error("target directory cannot be empty")]
  EmptyTarget,

  /// The input is not a readable zip archive.
  #[error("invalid zip archive: {0}")]
  InvalidArchive(#[source] ZipError),

  #[error("failed to read zip entry {index}: {source}")]
  Entry {
    index: usize,
    #[source]
    source: ZipError,
  },

  #[error("zip entry '{0}' escapes the target directory")]
  UnsafePath(String),

  #[error("extracting zip stopped at {limit} byte limit for '{}'", .path.display())]
  TooLarge { path: PathBuf, limit: u64 },

  #[error("io error: {0}")]
  Io(#[from] io::Error),
}

impl ExtractError {
  /// Whether the failure means the input was not a zip archive at all, as
  /// opposed to a valid archive that could not be extracted.
  pub fn is_not_archive(&self) -> bool {
    matches!(self, ExtractError::InvalidArchive(_))
  }
}

/// Extracts zip archives with a per-member size ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SafeZipExtractor {
  size_limit: u64,
}

impl Default for SafeZipExtractor {
  fn default() -> Self {
    Self::new(DEFAULT_UNZIPPED_SIZE_LIMIT)
  }
}

impl SafeZipExtractor {
  pub fn new(size_limit: u64) -> Self {
    Self { size_limit }
  }

  pub fn size_limit(&self) -> u64 {
    self.size_limit
  }

  /// Extract the zip file at `archive` into `target_dir`.
  pub fn extract(&self, archive: &Path, target_dir: &Path) -> Result<(), ExtractError> {
    if target_dir.as_os_str().is_empty() {
      return Err(ExtractError::EmptyTarget);
    }

    let file = File::open(archive)?;
    self.extract_from(BufReader::new(file), target_dir)
  }

  /// Extract a zip archive read from `reader` into `target_dir`.
  pub fn extract_from<R: Read + Seek>(&self, reader: R, target_dir: &Path) -> Result<(), ExtractError> {
    if target_dir.as_os_str().is_empty() {
      return Err(ExtractError::EmptyTarget);
    }

    let mut archive = ZipArchive::new(reader).map_err(ExtractError::InvalidArchive)?;
    let mut dir_modes: Vec<(PathBuf, u32)> = Vec::new();

    for index in 0..archive.len() {
      let mut entry = archive
        .by_index(index)
        .map_err(|source| ExtractError::Entry { index, source })?;

      let relative = entry
        .enclosed_name()
        .ok_or_else(|| ExtractError::UnsafePath(entry.name().to_string()))?;
      let dest_path = target_dir.join(relative);

      if entry.is_dir() {
        fs::create_dir_all(&dest_path)?;
        if let Some(mode) = entry.unix_mode() {
          dir_modes.push((dest_path, mode));
        }
        continue;
      }

      if let Some(parent) = dest_path.parent() {
        fs::create_dir_all(parent)?;
      }

      let mut out = File::create(&dest_path)?;
      self.copy_bounded(&mut entry, &mut out, &dest_path)?;
      out.flush()?;

      if let Some(mode) = entry.unix_mode() {
        set_mode(&dest_path, mode)?;
      }
    }

    // Directory modes go on last so read-only directories can still be filled.
    for (path, mode) in dir_modes.into_iter().rev() {
      set_mode(&path, mode)?;
    }

    debug!(target = %target_dir.display(), entries = archive.len(), "extracted zip archive");
    Ok(())
  }

  /// Copy at most `size_limit` bytes; a member with bytes left after the
  /// ceiling is rejected.
  fn copy_bounded<R: Read, W: Write>(&self, src: &mut R, dst: &mut W, dest_path: &Path) -> Result<u64, ExtractError> {
    let written = io::copy(&mut src.by_ref().take(self.size_limit), dst)?;

    if written == self.size_limit {
      let mut probe = [0u8; 1];
      if src.read(&mut probe)? > 0 {
        return Err(ExtractError::TooLarge {
          path: dest_path.to_path_buf(),
          limit: self.size_limit,
        });
      }
    }

    Ok(written)
  }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
  use std::os::unix::fs::PermissionsExt;
  fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
  Ok(())
}
