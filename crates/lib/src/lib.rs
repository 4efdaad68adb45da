//! stager-lib: buildpack staging pipeline
//!
//! This crate turns an application source tree and an ordered list of
//! buildpacks into the artifacts a deployment platform consumes:
//! - `config`: staging parameters and buildpack ordering
//! - `install`: fetching buildpacks (zip archives or git remotes) and packages
//! - `staging`: the detect/supply/finalize/compile/release pipeline
//! - `archive`: bounded zip extraction and droplet/cache tarballs

pub mod archive;
pub mod config;
pub mod consts;
pub mod install;
pub mod staging;
pub mod util;
