//! Server configuration loaded from TOML.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Where the binary looks for its config when no path is given.
pub const DEFAULT_CONFIG_PATH: &str = "config/server.toml";

/// Runtime settings of the authoritative server.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address.
    pub bind: String,
    /// World seed, used only when no saved world exists.
    pub seed: u64,
    /// Simulation steps per real second.
    pub tick_rate: u32,
    /// Chunk radius each client subscribes to around its player.
    pub view_distance: i32,
    /// Directory holding region files, world meta and player records.
    pub save_dir: PathBuf,
    /// Seconds of simulated time between periodic saves.
    pub save_interval_secs: u64,
    /// Resident chunk budget before unreferenced chunks are evicted.
    pub max_resident_chunks: usize,
    /// Outbound messages buffered per client before it is disconnected.
    pub client_queue_depth: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:5555".to_string(),
            seed: 12345,
            tick_rate: 60,
            view_distance: 3,
            save_dir: PathBuf::from("saves"),
            save_interval_secs: 30,
            max_resident_chunks: 1024,
            client_queue_depth: 1024,
        }
    }
}

impl ServerConfig {
    /// Load configuration from an explicit path, falling back to defaults on errors.
    pub fn load_from_path(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<ServerConfig>(&contents) {
                Ok(cfg) => cfg.sanitized(),
                Err(err) => {
                    warn!("Failed to parse {}: {err}. Using defaults", path.display());
                    ServerConfig::default()
                }
            },
            Err(err) => {
                if err.kind() == std::io::ErrorKind::NotFound {
                    warn!("Server config not found at {}. Using defaults", path.display());
                } else {
                    warn!("Failed to read {}: {err}. Using defaults", path.display());
                }
                ServerConfig::default()
            }
        }
    }

    /// Save configuration to an explicit path.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        let toml = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml)?;
        Ok(())
    }

    /// Replace values the server cannot run with by their defaults.
    pub fn sanitized(mut self) -> Self {
        let defaults = ServerConfig::default();
        if self.tick_rate == 0 {
            warn!("tick_rate must be positive; using {}", defaults.tick_rate);
            self.tick_rate = defaults.tick_rate;
        }
        if self.view_distance < 0 {
            warn!("view_distance must not be negative; using {}", defaults.view_distance);
            self.view_distance = defaults.view_distance;
        }
        if self.save_interval_secs == 0 {
            warn!("save_interval_secs must be positive; using {}", defaults.save_interval_secs);
            self.save_interval_secs = defaults.save_interval_secs;
        }
        if self.client_queue_depth == 0 {
            warn!("client_queue_depth must be positive; using {}", defaults.client_queue_depth);
            self.client_queue_depth = defaults.client_queue_depth;
        }
        let minimum_budget = ((2 * self.view_distance + 1) * (2 * self.view_distance + 1)) as usize;
        if self.max_resident_chunks < minimum_budget {
            warn!(
                "max_resident_chunks {} cannot hold one client's view; raising to {minimum_budget}",
                self.max_resident_chunks
            );
            self.max_resident_chunks = minimum_budget;
        }
        self
    }
}
