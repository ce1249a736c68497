//! Runtime configuration for a [`MeshContext`](crate::topology::context::MeshContext).

use crate::mesh_error::MeshError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Environment variable overriding [`MeshConfig::default_tag`].
pub const ENV_DEFAULT_TAG: &str = "DEVICE_MESH_DEFAULT_TAG";
/// Environment variable overriding [`MeshConfig::comm_tag_base`].
pub const ENV_COMM_TAG_BASE: &str = "DEVICE_MESH_COMM_TAG_BASE";
/// Environment variable overriding [`MeshConfig::recv_timeout_ms`].
pub const ENV_RECV_TIMEOUT_MS: &str = "DEVICE_MESH_RECV_TIMEOUT_MS";

/// Knobs shared by every mesh built from one context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// Namespace under which mesh-derived groups are registered.
    pub default_tag: String,
    /// First point-to-point tag; group `g` talks on `comm_tag_base + g`.
    pub comm_tag_base: u16,
    /// Receive timeout for the in-process backend. `None` blocks forever.
    pub recv_timeout_ms: Option<u64>,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            default_tag: String::new(),
            comm_tag_base: 0x1000,
            recv_timeout_ms: None,
        }
    }
}

impl MeshConfig {
    /// Defaults overlaid with any `DEVICE_MESH_*` environment variables.
    pub fn from_env() -> Result<Self, MeshError> {
        Self::default().with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup (the environment in
    /// [`MeshConfig::from_env`]).
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Result<Self, MeshError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(tag) = lookup(ENV_DEFAULT_TAG) {
            self.default_tag = tag;
        }
        if let Some(raw) = lookup(ENV_COMM_TAG_BASE) {
            self.comm_tag_base = parse_tag(&raw).ok_or(MeshError::InvalidConfig {
                key: ENV_COMM_TAG_BASE,
                value: raw,
            })?;
        }
        if let Some(raw) = lookup(ENV_RECV_TIMEOUT_MS) {
            let ms = raw.trim().parse::<u64>().map_err(|_| MeshError::InvalidConfig {
                key: ENV_RECV_TIMEOUT_MS,
                value: raw.clone(),
            })?;
            self.recv_timeout_ms = Some(ms);
        }
        Ok(self)
    }

    /// The receive timeout as a [`Duration`].
    pub fn recv_timeout(&self) -> Option<Duration> {
        self.recv_timeout_ms.map(Duration::from_millis)
    }
}

/// Accepts decimal or `0x`-prefixed hex.
fn parse_tag(raw: &str) -> Option<u16> {
    let raw = raw.trim();
    match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16).ok(),
        None => raw.parse().ok(),
    }
}
