//! Single-package downloads and build cache restoration.
//!
//! Application bits and build cache bundles are downloaded into a temporary
//! file next to their destination and only moved into place once the body
//! has been read completely (and, when a checksum is configured, verified).

use std::io;
use std::path::{Path, PathBuf};

use sha2::Sha256;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use super::InstallError;
use super::fetch::Fetch;
use crate::archive::unpack_tar_gz;
use crate::util::checksum::{Checksum, ChecksumAlgorithm, ChecksumMismatch, ChecksumVerifyingReader};

/// Downloads one package to `<download_dir>/<file_name>`.
pub struct PackageInstaller<F> {
  client: F,
  url: String,
  download_dir: PathBuf,
  file_name: String,
  checksum: Option<Checksum>,
}

impl<F: Fetch> PackageInstaller<F> {
  pub fn new(client: F, url: impl Into<String>, download_dir: impl Into<PathBuf>, file_name: impl Into<String>) -> Self {
    Self {
      client,
      url: url.into(),
      download_dir: download_dir.into(),
      file_name: file_name.into(),
      checksum: None,
    }
  }

  /// Require the downloaded content to match `checksum`.
  pub fn with_checksum(mut self, checksum: Checksum) -> Self {
    self.checksum = Some(checksum);
    self
  }

  /// Download the package and return its final path.
  ///
  /// Nothing is written to the destination unless the download completed
  /// and verified.
  pub fn install(&self) -> Result<PathBuf, InstallError> {
    if self.url.is_empty() {
      return Err(InstallError::EmptyUrl);
    }
    if self.download_dir.as_os_str().is_empty() {
      return Err(InstallError::EmptyDownloadDir);
    }

    std::fs::create_dir_all(&self.download_dir)?;
    let dest = self.download_dir.join(&self.file_name);

    info!(url = %self.url, dest = %dest.display(), "downloading package");
    let mut body = self.client.open(&self.url)?;
    let mut temp = NamedTempFile::new_in(&self.download_dir)?;

    let copied = match &self.checksum {
      Some(checksum) => match checksum.algorithm {
        ChecksumAlgorithm::Sha256 => {
          let mut verified = ChecksumVerifyingReader::<_, Sha256>::new(body, checksum.value.as_str());
          io::copy(&mut verified, temp.as_file_mut())
        }
      },
      None => io::copy(&mut body, temp.as_file_mut()),
    };
    let size = copied.map_err(checksum_or_io)?;

    temp.persist(&dest).map_err(|e| InstallError::Io(e.error))?;
    debug!(dest = %dest.display(), size, "package downloaded");
    Ok(dest)
  }
}

/// Surface a checksum failure raised through the reader as its own error.
fn checksum_or_io(err: io::Error) -> InstallError {
  let mismatch = err
    .get_ref()
    .and_then(|inner| inner.downcast_ref::<ChecksumMismatch>())
    .cloned();
  match mismatch {
    Some(mismatch) => InstallError::Checksum(mismatch),
    None => InstallError::Io(err),
  }
}

/// Unpack a build cache archive into `cache_dir`.
///
/// Returns `false` without touching `cache_dir` when there is no archive,
/// which is the case for an application's first staging.
pub fn restore_cache(archive: &Path, cache_dir: &Path) -> Result<bool, InstallError> {
  if !archive.exists() {
    debug!(archive = %archive.display(), "no build cache to restore");
    return Ok(false);
  }

  unpack_tar_gz(archive, cache_dir)?;
  info!(archive = %archive.display(), dest = %cache_dir.display(), "restored build cache");
  Ok(true)
}
