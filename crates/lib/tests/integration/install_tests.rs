use std::fs;

use reqwest::blocking::Client;
use stager::archive::write_tar_gz;
use stager::config::{Buildpack, buildpack_path};
use stager::install::{BuildpackInstaller, InstallError, PackageInstaller, load_manifest, restore_cache};
use stager::staging::Runner;
use stager::util::checksum::Checksum;
use stager::util::hash::hash_bytes;
use tempfile::TempDir;

use super::common::{TestEnv, buildpack_zip, read_json};

/// A client that refuses plain http, standing in for an unreachable
/// in-cluster endpoint.
fn failing_internal_client() -> Client {
  Client::builder().https_only(true).build().unwrap()
}

fn buildpack(name: &str, key: &str, url: String) -> Buildpack {
  Buildpack {
    name: name.to_string(),
    key: key.to_string(),
    url,
    skip_detect: false,
  }
}

#[test]
fn internal_failure_falls_back_to_default_client() {
  let mut server = mockito::Server::new();
  let mock = server
    .mock("GET", "/ruby.zip")
    .with_status(200)
    .with_body(buildpack_zip(Some("ruby-buildpack"), &[("detect", "echo Ruby")]))
    .create();
  let env = TestEnv::new();
  let buildpacks = vec![buildpack("ruby", "ruby-key", format!("{}/ruby.zip", server.url()))];

  BuildpackInstaller::new(failing_internal_client(), Client::new(), env.buildpacks_dir())
    .install(&buildpacks)
    .unwrap();

  mock.assert();
  let installed = buildpack_path(&env.buildpacks_dir(), "ruby");
  assert!(installed.join("ruby-buildpack/bin/detect").is_file());
  assert_eq!(load_manifest(&env.buildpacks_dir()).unwrap(), buildpacks);
}

#[test]
fn download_failure_names_the_buildpack() {
  let mut server = mockito::Server::new();
  let _mock = server.mock("GET", "/missing.zip").with_status(404).create();
  let env = TestEnv::new();
  let url = format!("{}/missing.zip", server.url());

  let err = BuildpackInstaller::new(Client::new(), Client::new(), env.buildpacks_dir())
    .install(&[buildpack("missing", "", url.clone())])
    .unwrap_err();

  let message = err.to_string();
  assert!(message.starts_with(&format!("installing buildpack missing: {} failed", url)), "{message}");
  assert!(message.contains("status code 404"), "{message}");
  assert!(!env.buildpacks_dir().join("config.json").exists());
}

#[test]
fn non_archive_that_is_not_a_repository_fails_to_clone() {
  let mut server = mockito::Server::new();
  let mock = server
    .mock("GET", "/not-a-buildpack")
    .with_status(200)
    .with_body("<html>definitely not a zip</html>")
    .create();
  let env = TestEnv::new();
  let url = format!("{}/not-a-buildpack", server.url());

  let err = BuildpackInstaller::new(Client::new(), Client::new(), env.buildpacks_dir())
    .install(&[buildpack("html", "", url)])
    .unwrap_err();

  mock.assert();
  match err {
    InstallError::Buildpack { name, source, .. } => {
      assert_eq!(name, "html");
      assert!(matches!(*source, InstallError::Clone { .. }), "unexpected cause: {source}");
    }
    other => panic!("expected a buildpack error, got {other}"),
  }
}

#[test]
fn verified_cache_round_trips_through_download() {
  let temp = TempDir::new().unwrap();
  let previous = temp.path().join("previous-cache");
  fs::create_dir_all(previous.join("final")).unwrap();
  fs::write(previous.join("final/gems.lock"), "rack 3.0").unwrap();
  let bundle = temp.path().join("bundle.tgz");
  write_tar_gz(&previous, &bundle).unwrap();
  let bytes = fs::read(&bundle).unwrap();

  let mut server = mockito::Server::new();
  let _mock = server
    .mock("GET", "/cache.tgz")
    .with_status(200)
    .with_body(&bytes)
    .create();
  let downloads = temp.path().join("downloads");

  let archive = PackageInstaller::new(
    Client::new(),
    format!("{}/cache.tgz", server.url()),
    &downloads,
    "cache.tgz",
  )
  .with_checksum(Checksum::sha256(hash_bytes(&bytes)))
  .install()
  .unwrap();

  let cache_dir = temp.path().join("cache");
  assert!(restore_cache(&archive, &cache_dir).unwrap());
  assert_eq!(fs::read_to_string(cache_dir.join("final/gems.lock")).unwrap(), "rack 3.0");
}

#[test]
fn checksum_mismatch_leaves_nothing_behind() {
  let mut server = mockito::Server::new();
  let _mock = server
    .mock("GET", "/app.zip")
    .with_status(200)
    .with_body("tampered bits")
    .create();
  let temp = TempDir::new().unwrap();

  let err = PackageInstaller::new(
    Client::new(),
    format!("{}/app.zip", server.url()),
    temp.path(),
    "app.zip",
  )
  .with_checksum(Checksum::sha256(hash_bytes(b"original bits")))
  .install()
  .unwrap_err();

  assert!(matches!(err, InstallError::Checksum(_)), "unexpected error: {err}");
  assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 0);
}

#[test]
fn installed_buildpacks_stage_with_platform_keys() {
  let mut server = mockito::Server::new();
  let _node = server
    .mock("GET", "/node.zip")
    .with_status(200)
    .with_body(buildpack_zip(
      None,
      &[("supply", "printf 'name: nodejs\\nversion: 20.1\\n' > \"$3/$4/config.yml\"")],
    ))
    .create();
  let _staticfile = server
    .mock("GET", "/staticfile.zip")
    .with_status(200)
    .with_body(buildpack_zip(
      Some("staticfile-buildpack-1.6"),
      &[
        ("finalize", "printf 'name: staticfile\\n' > \"$3/$4/config.yml\""),
        ("release", "printf 'default_process_types:\\n  web: nginx\\n'"),
      ],
    ))
    .create();

  let env = TestEnv::new();
  env.write_app_file("index.html", "<h1>hi</h1>");
  env.write_app_file("Procfile", "worker: node queue.js\n");
  let buildpacks = vec![
    Buildpack {
      skip_detect: true,
      ..buildpack("node", "node-key", format!("{}/node.zip", server.url()))
    },
    Buildpack {
      skip_detect: true,
      ..buildpack("staticfile", "static-key", format!("{}/staticfile.zip", server.url()))
    },
  ];

  BuildpackInstaller::new(Client::new(), Client::new(), env.buildpacks_dir())
    .install(&buildpacks)
    .unwrap();

  let mut config = env.config();
  config.set_buildpacks(&load_manifest(&env.buildpacks_dir()).unwrap());
  let runtime = tokio::runtime::Runtime::new().unwrap();
  let result = runtime.block_on(Runner::new(config.clone()).run()).unwrap();

  let result = result.with_buildpack_keys(&buildpacks).unwrap();
  let metadata = &result.lifecycle_metadata;
  assert_eq!(metadata.buildpack_key, "static-key");
  assert_eq!(metadata.detected_buildpack, "staticfile");
  let keys: Vec<&str> = metadata.buildpacks.iter().map(|b| b.key.as_str()).collect();
  assert_eq!(keys, vec!["node-key", "static-key"]);
  assert_eq!(metadata.buildpacks[0].version, "20.1");
  assert_eq!(result.process_types["web"], "nginx");
  assert_eq!(result.process_types["worker"], "node queue.js");

  // The document on disk is written before platform keys are applied.
  let written = read_json(&config.output_metadata);
  assert_eq!(written["lifecycle_metadata"]["buildpack_key"], "staticfile");
}
