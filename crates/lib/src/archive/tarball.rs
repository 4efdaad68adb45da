//! Gzip'd tarballs for droplets and build caches.
//!
//! Consumers of the droplet address its content by fixed names such as
//! `./app/` and `./deps/0/`, so entries are written with an explicit `./`
//! prefix (the form `tar -czf out.tgz -C dir .` produces). The `tar` crate
//! strips leading `./` when setting paths, so names and link targets are
//! written into the header as raw bytes, using GNU long-name records when
//! they exceed the 100-byte header fields.
//!
//! Archives are written to a temporary sibling and renamed into place, so a
//! failed write never leaves a truncated archive at the destination.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tar::{Archive, Builder, EntryType, Header};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

/// Errors that can occur while writing or reading tarballs.
#[derive(Debug, Error)]
pub enum TarError {
  #[error("failed to walk '{}': {source}", .path.display())]
  Walk {
    path: PathBuf,
    #[source]
    source: walkdir::Error,
  },

  #[error("failed to write archive '{}': {source}", .path.display())]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to unpack archive '{}': {source}", .path.display())]
  Unpack {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// Write the contents of `src_dir` as a gzip'd tar at `dest`.
///
/// Entry names are relative to `src_dir` and prefixed with `./`; directories
/// carry a trailing slash. Symlinks are stored as links, not followed.
pub fn write_tar_gz(src_dir: &Path, dest: &Path) -> Result<(), TarError> {
  let write_err = |source: io::Error| TarError::Write {
    path: dest.to_path_buf(),
    source,
  };

  let parent = match dest.parent() {
    Some(p) if !p.as_os_str().is_empty() => p,
    _ => Path::new("."),
  };
  fs::create_dir_all(parent).map_err(write_err)?;

  let temp = NamedTempFile::new_in(parent).map_err(write_err)?;
  let encoder = GzEncoder::new(BufWriter::new(temp.as_file()), Compression::default());
  let mut builder = Builder::new(encoder);

  let mut entries = 0usize;
  for entry in WalkDir::new(src_dir).follow_links(false).sort_by_file_name() {
    let entry = entry.map_err(|source| TarError::Walk {
      path: src_dir.to_path_buf(),
      source,
    })?;
    append_entry(&mut builder, src_dir, entry.path()).map_err(write_err)?;
    entries += 1;
  }

  let encoder = builder.into_inner().map_err(write_err)?;
  let mut writer = encoder.finish().map_err(write_err)?;
  writer.flush().map_err(write_err)?;
  drop(writer);

  temp.persist(dest).map_err(|e| write_err(e.error))?;

  debug!(src = %src_dir.display(), dest = %dest.display(), entries, "wrote tarball");
  Ok(())
}

/// Unpack a gzip'd tar into `dest`, preserving permissions.
pub fn unpack_tar_gz(archive_path: &Path, dest: &Path) -> Result<(), TarError> {
  let unpack_err = |source: io::Error| TarError::Unpack {
    path: archive_path.to_path_buf(),
    source,
  };

  fs::create_dir_all(dest).map_err(unpack_err)?;

  let file = File::open(archive_path).map_err(unpack_err)?;
  let mut archive = Archive::new(GzDecoder::new(BufReader::new(file)));
  archive.set_preserve_permissions(true);
  archive.unpack(dest).map_err(unpack_err)?;

  debug!(archive = %archive_path.display(), dest = %dest.display(), "unpacked tarball");
  Ok(())
}

fn append_entry<W: Write>(builder: &mut Builder<W>, root: &Path, path: &Path) -> io::Result<()> {
  let metadata = fs::symlink_metadata(path)?;
  let relative = path.strip_prefix(root).map_err(io::Error::other)?;
  let file_type = metadata.file_type();

  let mut name = b".".to_vec();
  for component in relative.components() {
    name.push(b'/');
    name.extend_from_slice(component.as_os_str().as_bytes());
  }
  if file_type.is_dir() {
    name.push(b'/');
  }

  let mut header = Header::new_gnu();
  header.set_metadata(&metadata);

  if file_type.is_symlink() {
    header.set_entry_type(EntryType::Symlink);
    header.set_size(0);
    let target = fs::read_link(path)?;
    set_raw_field(
      builder,
      EntryType::GNULongLink,
      target.as_os_str().as_bytes(),
      &mut header.as_old_mut().linkname,
    )?;
  } else if file_type.is_dir() {
    header.set_size(0);
  }

  set_raw_field(builder, EntryType::GNULongName, &name, &mut header.as_old_mut().name)?;
  header.set_cksum();

  if file_type.is_file() {
    builder.append(&header, File::open(path)?)
  } else {
    builder.append(&header, io::empty())
  }
}

/// Store `value` verbatim in a fixed-width header field.
///
/// Values that do not fit are preceded by a GNU `././@LongLink` record of
/// `kind` (long name or long link target); the field keeps a truncated copy.
fn set_raw_field<W: Write>(
  builder: &mut Builder<W>,
  kind: EntryType,
  value: &[u8],
  field: &mut [u8],
) -> io::Result<()> {
  if value.len() > field.len() {
    let mut long = Header::new_gnu();
    let marker = b"././@LongLink";
    long.as_old_mut().name[..marker.len()].copy_from_slice(marker);
    long.set_mode(0o644);
    long.set_uid(0);
    long.set_gid(0);
    long.set_mtime(0);
    long.set_size(value.len() as u64 + 1);
    long.set_entry_type(kind);
    long.set_cksum();
    builder.append(&long, value.chain(&[0u8][..]))?;
  }

  let len = value.len().min(field.len());
  field.fill(0);
  field[..len].copy_from_slice(&value[..len]);
  Ok(())
}
