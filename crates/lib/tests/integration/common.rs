//! Shared helpers for stager-lib integration tests.

use std::fs::{self, File};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use stager::config::BuildConfig;
use tempfile::TempDir;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

/// Isolated staging environment.
///
/// Each test gets its own temporary directory holding the application,
/// buildpacks, cache and outputs.
pub struct TestEnv {
  pub temp: TempDir,
}

impl TestEnv {
  pub fn new() -> Self {
    let env = Self {
      temp: TempDir::new().unwrap(),
    };
    fs::create_dir_all(env.app_dir()).unwrap();
    env
  }

  pub fn app_dir(&self) -> PathBuf {
    self.temp.path().join("app")
  }

  pub fn buildpacks_dir(&self) -> PathBuf {
    self.temp.path().join("buildpacks")
  }

  /// Write a file relative to the application directory.
  pub fn write_app_file(&self, relative_path: &str, content: &str) {
    let path = self.app_dir().join(relative_path);
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
  }

  /// A config with every path inside the environment and no buildpacks.
  pub fn config(&self) -> BuildConfig {
    let root = self.temp.path();
    BuildConfig {
      build_dir: self.app_dir(),
      buildpacks_dir: self.buildpacks_dir(),
      output_droplet: root.join("out/droplet.tgz"),
      output_metadata: root.join("out/result.json"),
      output_build_artifacts_cache: root.join("out/cache.tgz"),
      build_artifacts_cache_dir: root.join("cache"),
      ..Default::default()
    }
  }
}

/// Zip a buildpack from `(phase, script body)` pairs, wrapped in `top_dir`
/// when given.
pub fn buildpack_zip(top_dir: Option<&str>, scripts: &[(&str, &str)]) -> Vec<u8> {
  let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
  let options = SimpleFileOptions::default().unix_permissions(0o755);
  let prefix = top_dir.map(|d| format!("{}/", d)).unwrap_or_default();

  writer.add_directory(format!("{}bin/", prefix), options).unwrap();
  for (phase, body) in scripts {
    writer.start_file(format!("{}bin/{}", prefix, phase), options).unwrap();
    writer.write_all(format!("#!/bin/sh\n{}\n", body).as_bytes()).unwrap();
  }
  writer.finish().unwrap().into_inner()
}

/// Entry names of a gzip'd tarball, in archive order.
pub fn tar_entries(archive: &Path) -> Vec<String> {
  let mut archive = tar::Archive::new(GzDecoder::new(File::open(archive).unwrap()));
  archive
    .entries()
    .unwrap()
    .map(|e| e.unwrap().path().unwrap().to_string_lossy().to_string())
    .collect()
}

/// Parse the staging result JSON at `path`.
pub fn read_json(path: &Path) -> serde_json::Value {
  serde_json::from_slice(&fs::read(path).unwrap()).unwrap()
}
