//! Assembling the droplet contents and writing the result document.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use filetime::FileTime;
use walkdir::WalkDir;

use super::result::StagingResult;

/// Write the staging result as JSON to `path`.
///
/// Uses atomic write (write to temp, then rename), so readers never see a
/// partial document.
pub fn write_metadata(path: &Path, result: &StagingResult) -> io::Result<()> {
  let mut temp_name = OsString::from(path.as_os_str());
  temp_name.push(".tmp");
  let temp_path = PathBuf::from(temp_name);

  let content = serde_json::to_vec(result)?;
  fs::write(&temp_path, content)?;
  fs::rename(&temp_path, path)
}

/// Recursively copy `src` into `dest`, keeping permissions, modification
/// times and symlinks.
pub fn copy_tree(src: &Path, dest: &Path) -> io::Result<()> {
  let mut dirs = Vec::new();

  for entry in WalkDir::new(src).follow_links(false) {
    let entry = entry?;
    let relative = entry.path().strip_prefix(src).map_err(io::Error::other)?;
    let target = dest.join(relative);
    let file_type = entry.file_type();
    let metadata = entry.metadata()?;
    let atime = FileTime::from_last_access_time(&metadata);
    let mtime = FileTime::from_last_modification_time(&metadata);

    if file_type.is_dir() {
      fs::create_dir_all(&target)?;
      dirs.push((target, metadata.permissions(), atime, mtime));
    } else if file_type.is_symlink() {
      symlink(&fs::read_link(entry.path())?, &target)?;
      filetime::set_symlink_file_times(&target, atime, mtime)?;
    } else {
      fs::copy(entry.path(), &target)?;
      filetime::set_file_times(&target, atime, mtime)?;
    }
  }

  // Applied last: populating a directory changes its mtime, and read-only
  // directories must still be writable while they are filled.
  for (path, permissions, atime, mtime) in dirs.into_iter().rev() {
    fs::set_permissions(&path, permissions)?;
    filetime::set_file_times(&path, atime, mtime)?;
  }

  Ok(())
}

#[cfg(unix)]
fn symlink(original: &Path, link: &Path) -> io::Result<()> {
  std::os::unix::fs::symlink(original, link)
}

#[cfg(not(unix))]
fn symlink(original: &Path, _link: &Path) -> io::Result<()> {
  Err(io::Error::new(
    io::ErrorKind::Unsupported,
    format!("cannot copy symlink to '{}'", original.display()),
  ))
}
