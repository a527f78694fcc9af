/// Application name used for default directories.
pub const APP_NAME: &str = "strata";

/// Version of the canonical fingerprint encoding.
///
/// Bumping this invalidates every existing cache record.
pub const FINGERPRINT_FORMAT: u32 = 1;

/// Version of the on-disk cache record format.
pub const CACHE_RECORD_VERSION: u32 = 1;

/// Environment variable overriding the cache directory.
pub const CACHE_DIR_ENV: &str = "STRATA_CACHE_DIR";

/// Environment variable overriding the artifact directory.
pub const ARTIFACT_DIR_ENV: &str = "STRATA_ARTIFACT_DIR";

/// Default manifest file name looked up by the CLI.
pub const DEFAULT_MANIFEST: &str = "strata.yaml";
