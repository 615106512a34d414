//! Utility functions

use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use crate::errors::ShipError;

/// Version information for ship
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    /// Release version; the client installs the agent with the same one
    pub version: String,
    /// `git describe` of the build, `-dirty` when the tree had changes
    pub git_commit: String,
    /// Target triple the binary was built for
    pub target: String,
    pub build_time: String,
}

/// Get version information
pub fn version_info() -> VersionInfo {
    VersionInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_commit: option_env!("SHIP_GIT_COMMIT").unwrap_or("unknown").to_string(),
        target: option_env!("SHIP_BUILD_TARGET").unwrap_or("unknown").to_string(),
        build_time: option_env!("SHIP_BUILD_TIME").unwrap_or("unknown").to_string(),
    }
}

/// Calculate SHA256 hash of a file without loading it whole
pub async fn sha256_file(path: &Path) -> Result<String, ShipError> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Hex encoding utilities
mod hex {
    const HEX_CHARS: &[u8; 16] = b"0123456789abcdef";

    pub fn encode(data: impl AsRef<[u8]>) -> String {
        let data = data.as_ref();
        let mut result = String::with_capacity(data.len() * 2);
        for byte in data {
            result.push(HEX_CHARS[(byte >> 4) as usize] as char);
            result.push(HEX_CHARS[(byte & 0x0f) as usize] as char);
        }
        result
    }
}
