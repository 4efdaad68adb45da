//! Archive handling.
//!
//! - `unzip`: bounded extraction of buildpack and application zips
//! - `tarball`: gzip'd tarballs for droplets and build caches

pub mod tarball;
pub mod unzip;

pub use tarball::{TarError, unpack_tar_gz, write_tar_gz};
pub use unzip::{ExtractError, SafeZipExtractor};
