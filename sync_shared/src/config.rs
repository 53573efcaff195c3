//! Configuration system.
//!
//! Loads sync configuration from JSON strings/files.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Root configuration shared by client/server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Server listen address, e.g. `127.0.0.1:40000`.
    pub server_addr: String,
    /// Rate at which the server publishes updates.
    #[serde(default = "default_tick_hz")]
    pub tick_hz: u32,
    /// Client render cadence, frames/sec.
    #[serde(default = "default_interp_rate")]
    pub interp_rate: u32,
    /// Maximum retained snapshots.
    #[serde(default = "default_interp_buffer_size")]
    pub interp_buffer_size: usize,
    /// Fixed lag behind the server clock. Derived from `interp_rate` when unset.
    #[serde(default)]
    pub render_delay_ms: Option<f64>,
    /// How far past the newest snapshot values may be projected.
    #[serde(default = "default_max_extrapolation_ms")]
    pub max_extrapolation_ms: f64,
    /// Player name (client only).
    #[serde(default = "default_player_name")]
    pub player_name: String,
}

fn default_tick_hz() -> u32 {
    20
}

fn default_interp_rate() -> u32 {
    10
}

fn default_interp_buffer_size() -> usize {
    32
}

fn default_max_extrapolation_ms() -> f64 {
    250.0
}

fn default_player_name() -> String {
    "Player".to_string()
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:40000".to_string(),
            tick_hz: default_tick_hz(),
            interp_rate: default_interp_rate(),
            interp_buffer_size: default_interp_buffer_size(),
            render_delay_ms: None,
            max_extrapolation_ms: default_max_extrapolation_ms(),
            player_name: default_player_name(),
        }
    }
}

impl SyncConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    /// Reads and parses a JSON config file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::from_json_str(&text).with_context(|| format!("parse config {}", path.display()))
    }

    /// Render delay in milliseconds: explicit override, else one interpolation period.
    pub fn render_delay_ms(&self) -> f64 {
        self.render_delay_ms
            .unwrap_or_else(|| 1000.0 / self.interp_rate.max(1) as f64)
    }
}
