//! Fixed names and default locations shared across the pipeline.

/// Manifest of installed buildpacks, written into the buildpacks directory.
pub const BUILDPACK_MANIFEST_FILENAME: &str = "config.json";

/// Per-buildpack descriptor written into `deps/<index>/`.
pub const DEPS_CONFIG_FILENAME: &str = "config.yml";

/// Cache subdirectory owned by the final buildpack.
pub const FINAL_CACHE_DIR: &str = "final";

pub const PROCFILE_FILENAME: &str = "Procfile";

/// Lifecycle tag recorded in every staging result.
pub const LIFECYCLE_TYPE: &str = "buildpack";

/// Upper bound on the uncompressed size of a single zip member (10 GiB).
pub const DEFAULT_UNZIPPED_SIZE_LIMIT: u64 = 10 * 1024 * 1024 * 1024;

pub const DEFAULT_BUILD_DIR: &str = "/tmp/app";
pub const DEFAULT_BUILDPACKS_DIR: &str = "/var/lib/buildpacks";
pub const DEFAULT_OUTPUT_DROPLET: &str = "/out/droplet.tgz";
pub const DEFAULT_OUTPUT_METADATA: &str = "/out/result.json";
pub const DEFAULT_OUTPUT_BUILD_ARTIFACTS_CACHE: &str = "/buildpack-cache/cache.tgz";
pub const DEFAULT_BUILD_ARTIFACTS_CACHE_DIR: &str = "/buildpack-cache/cache";
