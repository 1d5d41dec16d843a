//! Configuration management for the telemetry core
//!
//! This module provides runtime configuration loading from JSON files so the
//! monitored device, refresh cadence, bucket width and classification
//! thresholds can be changed without recompilation.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub aggregation: AggregationConfig,
    #[serde(default)]
    pub classification: SafetyThresholds,
    #[serde(default)]
    pub fleet: FleetConfig,
}

/// Monitored device identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Store key of the cabin device this dashboard follows
    pub device_id: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device_id: "car_001".to_string(),
        }
    }
}

/// Live-mode retrieval cadence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshConfig {
    /// How far back the live view fetches on entry and on every tick
    pub live_lookback_ms: i64,
    /// Period of the background re-fetch while in live mode
    pub period_ms: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            live_lookback_ms: 24 * 60 * 60 * 1000,
            period_ms: 30_000,
        }
    }
}

impl RefreshConfig {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }
}

/// Display series parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationConfig {
    /// Width of each trend bucket in minutes (must be > 0)
    pub bucket_width_minutes: u32,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            bucket_width_minutes: 5,
        }
    }
}

/// Rule engine thresholds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SafetyThresholds {
    /// Cabin temperature above which any occupancy or heat warning applies (°C)
    pub warning_temp_c: f64,
    /// Temperature above which an empty cabin is classified Danger (°C)
    pub danger_temp_c: f64,
    /// Relative humidity above which a hot cabin is flagged (%)
    pub humid_pct: f64,
}

impl Default for SafetyThresholds {
    fn default() -> Self {
        Self {
            warning_temp_c: 27.0,
            danger_temp_c: 35.0,
            humid_pct: 85.0,
        }
    }
}

/// Fleet health scoring parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    /// Maximum age of a device's last report to count as reporting
    pub staleness_window_ms: i64,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            staleness_window_ms: 60_000,
        }
    }
}

impl AppConfig {
    /// Load configuration from JSON file
    ///
    /// # Arguments
    /// * `path` - Path to JSON config file
    ///
    /// # Returns
    /// The parsed configuration, or the defaults if the file is missing or
    /// the JSON is invalid. Missing sections fall back to their defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    log::info!("[Config] Loaded configuration from {:?}", path.as_ref());
                    config
                }
                Err(err) => {
                    log::warn!(
                        "[Config] Failed to parse JSON from {:?}: {}. Using defaults.",
                        path.as_ref(),
                        err
                    );
                    Self::default()
                }
            },
            Err(err) => {
                log::warn!(
                    "[Config] Failed to read config file {:?}: {}. Using defaults.",
                    path.as_ref(),
                    err
                );
                Self::default()
            }
        }
    }

    /// Load configuration from the bundled assets directory
    pub fn load() -> Self {
        Self::load_from_file("assets/telemetry_config.json")
    }

    /// Return a copy targeting a different device
    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device.device_id = device_id.into();
        self
    }
}
