//! Utility functions

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Version information for the gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Get version information
pub fn version_info() -> VersionInfo {
    VersionInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: option_env!("GIT_HASH").unwrap_or("unknown").to_string(),
        build_time: option_env!("BUILD_TIME").unwrap_or("unknown").to_string(),
    }
}

/// Current UTC time as a compact `YYYYMMDD-HHMMSS` stamp.
///
/// Used to build per-session asset names for the pipeline module.
pub fn compact_utc_timestamp() -> String {
    Utc::now().format("%Y%m%d-%H%M%S").to_string()
}
