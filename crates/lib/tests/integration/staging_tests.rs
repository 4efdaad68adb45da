use std::fs;

use serde_json::json;
use stager::archive::SafeZipExtractor;
use stager::config::buildpack_path;
use stager::staging::{FailureKind, Runner};

use super::common::{TestEnv, buildpack_zip, read_json, tar_entries};

const RELEASE_WEB: &str = "printf 'default_process_types:\\n  web: run.sh\\n'";

/// Unpack a zipped buildpack where the installer would have put it.
fn install_zip(env: &TestEnv, name: &str, zip: Vec<u8>) {
  let dest = buildpack_path(&env.buildpacks_dir(), name);
  fs::create_dir_all(&dest).unwrap();
  SafeZipExtractor::default()
    .extract_from(std::io::Cursor::new(zip), &dest)
    .unwrap();
}

#[tokio::test]
async fn single_buildpack_produces_droplet_and_metadata() {
  let env = TestEnv::new();
  env.write_app_file("run.sh", "#!/bin/sh\necho running\n");
  env.write_app_file("lib/app.rb", "puts :ok");
  install_zip(
    &env,
    "ruby_buildpack",
    buildpack_zip(
      Some("ruby-buildpack-v1"),
      &[
        ("detect", "echo Ruby"),
        ("compile", "echo compiled > \"$1/compiled\""),
        ("release", RELEASE_WEB),
      ],
    ),
  );

  let mut config = env.config();
  config
    .init_buildpacks(r#"[{"name": "ruby_buildpack", "key": "ruby-key", "url": "https://example.com/ruby.zip"}]"#)
    .unwrap();
  Runner::new(config.clone()).run().await.unwrap();

  assert_eq!(
    read_json(&config.output_metadata),
    json!({
      "lifecycle_type": "buildpack",
      "lifecycle_metadata": {
        "buildpack_key": "ruby_buildpack",
        "detected_buildpack": "Ruby",
        "buildpacks": [{"key": "ruby_buildpack", "name": "Ruby"}]
      },
      "process_types": {"web": "run.sh"},
      "execution_metadata": ""
    })
  );

  let entries = tar_entries(&config.output_droplet);
  for expected in [
    "./app/run.sh",
    "./app/lib/app.rb",
    "./app/compiled",
    "./tmp/",
    "./logs/",
  ] {
    assert!(entries.iter().any(|e| e == expected), "missing {expected} in {entries:?}");
  }
  assert!(!entries.iter().any(|e| e.starts_with("./tmp/") && e != "./tmp/"));
  assert!(!entries.iter().any(|e| e.starts_with("./logs/") && e != "./logs/"));
  assert!(config.output_build_artifacts_cache.exists());
}

#[tokio::test]
async fn explicit_order_supplies_then_finalizes() {
  let env = TestEnv::new();
  for (name, version) in [("node", "18.0"), ("python", "3.12")] {
    let supply = format!(
      "echo {name} >> \"$1/supplied\"\nprintf 'name: {name}\\nversion: {version}\\n' > \"$3/$4/config.yml\"\necho cached > \"$2/{name}.cache\""
    );
    install_zip(&env, name, buildpack_zip(None, &[("supply", supply.as_str())]));
  }
  install_zip(
    &env,
    "go",
    buildpack_zip(
      None,
      &[
        ("finalize", "ls \"$3\" > \"$1/deps-seen\"\nprintf 'name: go\\n' > \"$3/$4/config.yml\""),
        ("release", RELEASE_WEB),
      ],
    ),
  );

  let mut config = env.config();
  config
    .init_buildpacks(
      r#"[
        {"name": "node", "skip_detect": true},
        {"name": "python", "skip_detect": true},
        {"name": "go", "skip_detect": true}
      ]"#,
    )
    .unwrap();
  assert!(config.skip_detect);

  let result = Runner::new(config.clone()).run().await.unwrap();

  assert_eq!(fs::read_to_string(env.app_dir().join("supplied")).unwrap(), "node\npython\n");
  assert_eq!(fs::read_to_string(env.app_dir().join("deps-seen")).unwrap(), "0\n1\n2\n");
  assert_eq!(result.lifecycle_metadata.detected_buildpack, "go");
  let versions: Vec<&str> = result
    .lifecycle_metadata
    .buildpacks
    .iter()
    .map(|b| b.version.as_str())
    .collect();
  assert_eq!(versions, vec!["18.0", "3.12", ""]);

  let cache_entries = tar_entries(&config.output_build_artifacts_cache);
  for name in ["node", "python"] {
    let expected = format!("./{}/{}.cache", stager::util::hash::hash_name(name), name);
    assert!(cache_entries.contains(&expected), "missing {expected} in {cache_entries:?}");
  }
  assert!(cache_entries.iter().any(|e| e == "./final/"));
}

#[tokio::test]
async fn mixed_skip_detect_falls_back_to_detection() {
  let env = TestEnv::new();
  install_zip(
    &env,
    "static",
    buildpack_zip(
      None,
      &[
        ("detect", "echo Staticfile"),
        ("supply", "echo supplied > \"$1/supplied\""),
        ("compile", "exit 0"),
        ("release", RELEASE_WEB),
      ],
    ),
  );

  let mut config = env.config();
  config
    .init_buildpacks(r#"[{"name": "static", "skip_detect": true}, {"name": "other", "skip_detect": false}]"#)
    .unwrap();

  let result = Runner::new(config).run().await.unwrap();

  assert_eq!(result.lifecycle_metadata.detected_buildpack, "Staticfile");
  assert!(!env.app_dir().join("supplied").exists());
}

#[tokio::test]
async fn failed_staging_writes_no_outputs() {
  let env = TestEnv::new();
  install_zip(&env, "picky", buildpack_zip(None, &[("detect", "exit 1")]));

  let mut config = env.config();
  config.init_buildpacks(r#"[{"name": "picky"}]"#).unwrap();

  let err = Runner::new(config.clone()).run().await.unwrap_err();

  assert_eq!(err.kind(), FailureKind::Detect);
  assert_eq!(err.exit_code(), 222);
  assert!(!config.output_droplet.exists());
  assert!(!config.output_metadata.exists());
  assert!(!config.output_build_artifacts_cache.exists());
}

#[tokio::test]
async fn droplet_keeps_raw_names_and_long_link_targets() {
  use std::ffi::OsStr;
  use std::os::unix::ffi::OsStrExt;

  let env = TestEnv::new();
  fs::write(env.app_dir().join(OsStr::from_bytes(b"caf\xe9.txt")), "menu").unwrap();
  let target = format!("/{}", "x".repeat(150));
  std::os::unix::fs::symlink(&target, env.app_dir().join("shared")).unwrap();
  install_zip(
    &env,
    "static",
    buildpack_zip(None, &[("detect", "echo Static"), ("compile", "exit 0"), ("release", RELEASE_WEB)]),
  );

  let mut config = env.config();
  config.init_buildpacks(r#"[{"name": "static"}]"#).unwrap();
  Runner::new(config.clone()).run().await.unwrap();

  let restored = env.temp.path().join("restored");
  stager::archive::unpack_tar_gz(&config.output_droplet, &restored).unwrap();
  assert_eq!(
    fs::read_to_string(restored.join("app").join(OsStr::from_bytes(b"caf\xe9.txt"))).unwrap(),
    "menu"
  );
  assert_eq!(fs::read_link(restored.join("app/shared")).unwrap().as_os_str(), OsStr::new(&target));
}
