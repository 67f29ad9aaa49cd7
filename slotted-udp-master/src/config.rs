//! Master configuration
//!
//! Loaded from a TOML file, with CLI flags (see `main.rs`) taking
//! precedence over whatever the file sets.

use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterConfig {
    #[serde(default = "default_address")]
    pub address: Ipv4Addr,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Number of slots to provision on the multicast address.
    #[serde(default = "default_slot_count")]
    pub slot_count: u32,

    /// Width of each slot, in microseconds.
    #[serde(default = "default_slot_width_us")]
    pub slot_width_us: u32,

    /// How often to transmit the master clock, in microseconds.
    #[serde(default = "default_transmit_interval_us")]
    pub transmit_interval_us: u32,
}

fn default_address() -> Ipv4Addr {
    slotted_udp::DEFAULT_GROUP
}
fn default_port() -> u16 {
    slotted_udp::DEFAULT_PORT
}
fn default_slot_count() -> u32 {
    10
}
fn default_slot_width_us() -> u32 {
    10_000
}
fn default_transmit_interval_us() -> u32 {
    slotted_udp::DEFAULT_SYNC_INTERVAL_US as u32
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_port(),
            slot_count: default_slot_count(),
            slot_width_us: default_slot_width_us(),
            transmit_interval_us: default_transmit_interval_us(),
        }
    }
}

impl MasterConfig {
    /// Search `master.toml`, then `/etc/slotted-udp/master.toml`, then
    /// `~/.config/slotted-udp/master.toml`, falling back to defaults if
    /// none exist.
    pub fn load(explicit_path: Option<&str>) -> Result<Self> {
        if let Some(path) = explicit_path {
            return Self::load_from_file(path);
        }

        let search_paths = [
            "master.toml",
            "/etc/slotted-udp/master.toml",
            "~/.config/slotted-udp/master.toml",
        ];

        for path in search_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::load_from_file(expanded.as_ref());
            }
        }

        tracing::warn!("no master.toml found, using built-in defaults");
        Ok(Self::default())
    }

    fn load_from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path))?;
        let config: MasterConfig =
            toml::from_str(&content).with_context(|| format!("failed to parse {}", path))?;
        tracing::info!(path, "loaded master configuration");
        Ok(config)
    }
}
