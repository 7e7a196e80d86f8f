use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Destination of the collected event log.
    pub output_path: String,
    /// Capture device name; the default device is used when unset.
    pub capture_device: Option<String>,
    /// Minimum interval between connection table rebuilds.
    pub snapshot_ttl_secs: u64,
    /// Buffered events that trigger a durable flush.
    pub flush_threshold: usize,
    /// Hard cap on buffered events; oldest are dropped beyond this.
    pub buffer_capacity: usize,
    /// Length of one bounded capture window.
    pub capture_window_secs: u64,
    /// Re-check interval while waiting for the start date.
    pub start_poll_secs: u64,
    /// Backoff after a recoverable capture failure.
    pub error_backoff_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            output_path: "data/network_traffic_data.csv".to_string(),
            capture_device: None,
            snapshot_ttl_secs: 2,
            flush_threshold: 10,
            buffer_capacity: 1000,
            capture_window_secs: 2,
            start_poll_secs: 60,
            error_backoff_secs: 5,
        }
    }
}

pub fn load_settings(config_path: &str) -> Settings {
    if Path::new(config_path).exists() {
        match fs::read_to_string(config_path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(settings) => {
                    log::info!("Loaded settings from {}", config_path);
                    return settings;
                }
                Err(e) => {
                    log::warn!("Failed to parse settings file: {}. Using defaults.", e);
                }
            },
            Err(e) => {
                log::warn!("Failed to read settings file: {}. Using defaults.", e);
            }
        }
    }

    log::info!("Using default settings");
    Settings::default()
}

pub fn save_settings(settings: &Settings, config_path: &str) -> anyhow::Result<()> {
    let content = serde_json::to_string_pretty(settings)?;
    fs::write(config_path, content)?;
    Ok(())
}
