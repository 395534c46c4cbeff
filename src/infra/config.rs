//! Configuration loading from TOML files
//!
//! Invalid or missing configuration falls back to hard-coded defaults
//! with a logged warning - a bad config file must never prevent the
//! lane from starting.

use crate::domain::types::{VirtualLine, Zone};
use anyhow::Context;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    /// V4L2 device path or stream URI handed to ffmpeg
    #[serde(default = "default_camera_source")]
    pub source: String,
    #[serde(default = "default_frame_width")]
    pub width: u32,
    #[serde(default = "default_frame_height")]
    pub height: u32,
    #[serde(default = "default_fps")]
    pub fps: u32,
}

fn default_camera_source() -> String {
    "/dev/video0".to_string()
}

fn default_frame_width() -> u32 {
    1280
}

fn default_frame_height() -> u32 {
    720
}

fn default_fps() -> u32 {
    30
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            source: default_camera_source(),
            width: default_frame_width(),
            height: default_frame_height(),
            fps: default_fps(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SerialConfig {
    #[serde(default = "default_serial_device")]
    pub device: String,
    #[serde(default = "default_serial_baud")]
    pub baud: u32,
}

fn default_serial_device() -> String {
    "/dev/ttyUSB0".to_string()
}

fn default_serial_baud() -> u32 {
    115_200
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self { device: default_serial_device(), baud: default_serial_baud() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ZonesConfig {
    #[serde(default = "default_entry_zone")]
    pub entry: Zone,
    #[serde(default = "default_exit_zone")]
    pub exit: Zone,
    #[serde(default)]
    pub entry_line: VirtualLine,
    #[serde(default)]
    pub exit_line: VirtualLine,
}

fn default_entry_zone() -> Zone {
    Zone::new(0, 0, 640, 480)
}

fn default_exit_zone() -> Zone {
    Zone::new(640, 0, 1280, 480)
}

impl Default for ZonesConfig {
    fn default() -> Self {
        Self {
            entry: default_entry_zone(),
            exit: default_exit_zone(),
            entry_line: VirtualLine::default(),
            exit_line: VirtualLine::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectionConfig {
    /// Minimum blob area (pixels) to count as a vehicle
    #[serde(default = "default_motion_threshold")]
    pub motion_threshold: u32,
    /// Minimum seconds between accepted crossings per zone
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: f64,
    /// Frames contributing to the background estimate
    #[serde(default = "default_history")]
    pub history: u32,
    /// Squared-distance sensitivity of the background model
    #[serde(default = "default_var_threshold")]
    pub var_threshold: f64,
    #[serde(default = "default_detect_shadows")]
    pub detect_shadows: bool,
    /// Frames fed to the background model before detection starts
    #[serde(default = "default_warmup_frames")]
    pub warmup_frames: u32,
}

fn default_motion_threshold() -> u32 {
    500
}

fn default_cooldown_secs() -> f64 {
    3.0
}

fn default_history() -> u32 {
    500
}

fn default_var_threshold() -> f64 {
    50.0
}

fn default_detect_shadows() -> bool {
    true
}

fn default_warmup_frames() -> u32 {
    150
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            motion_threshold: default_motion_threshold(),
            cooldown_secs: default_cooldown_secs(),
            history: default_history(),
            var_threshold: default_var_threshold(),
            detect_shadows: default_detect_shadows(),
            warmup_frames: default_warmup_frames(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ParkingConfig {
    #[serde(default = "default_total_slots")]
    pub total_slots: u32,
    #[serde(default = "default_hourly_rate")]
    pub hourly_rate: f64,
}

fn default_total_slots() -> u32 {
    1
}

fn default_hourly_rate() -> f64 {
    10.0
}

impl Default for ParkingConfig {
    fn default() -> Self {
        Self { total_slots: default_total_slots(), hourly_rate: default_hourly_rate() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GateConfig {
    /// Grace period before an opened gate auto-closes
    #[serde(default = "default_close_delay_secs")]
    pub close_delay_secs: f64,
    /// Buzzer duration for the parking-full alert
    #[serde(default = "default_buzzer_secs")]
    pub buzzer_secs: f64,
    /// Delay before the single plate-extraction retry
    #[serde(default = "default_ocr_retry_delay_secs")]
    pub ocr_retry_delay_secs: f64,
}

fn default_close_delay_secs() -> f64 {
    5.0
}

fn default_buzzer_secs() -> f64 {
    3.0
}

fn default_ocr_retry_delay_secs() -> f64 {
    0.5
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            close_delay_secs: default_close_delay_secs(),
            buzzer_secs: default_buzzer_secs(),
            ocr_retry_delay_secs: default_ocr_retry_delay_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

fn default_data_dir() -> String {
    "data".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { data_dir: default_data_dir() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OcrConfig {
    /// OCR command invoked with the zone image on stdin
    #[serde(default = "default_ocr_command")]
    pub command: String,
}

fn default_ocr_command() -> String {
    "tesseract".to_string()
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self { command: default_ocr_command() }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
struct TomlConfig {
    #[serde(default)]
    camera: CameraConfig,
    #[serde(default)]
    serial: SerialConfig,
    #[serde(default)]
    zones: ZonesConfig,
    #[serde(default)]
    detection: DetectionConfig,
    #[serde(default)]
    parking: ParkingConfig,
    #[serde(default)]
    gate: GateConfig,
    #[serde(default)]
    storage: StorageConfig,
    #[serde(default)]
    ocr: OcrConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone, Default)]
pub struct Config {
    camera: CameraConfig,
    serial: SerialConfig,
    zones: ZonesConfig,
    detection: DetectionConfig,
    parking: ParkingConfig,
    gate: GateConfig,
    storage: StorageConfig,
    ocr: OcrConfig,
    config_file: String,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        let mut config = Self {
            camera: toml_config.camera,
            serial: toml_config.serial,
            zones: toml_config.zones,
            detection: toml_config.detection,
            parking: toml_config.parking,
            gate: toml_config.gate,
            storage: toml_config.storage,
            ocr: toml_config.ocr,
            config_file: path.display().to_string(),
        };
        config.sanitize();
        Ok(config)
    }

    /// Load configuration - tries the TOML file first, falls back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "config_load_failed_using_defaults");
                Self { config_file: "default".to_string(), ..Self::default() }
            }
        }
    }

    /// Replace invalid geometry with defaults, field by field
    fn sanitize(&mut self) {
        if !self.zones.entry.is_valid() {
            warn!(zone = "entry", "config_invalid_zone_using_default");
            self.zones.entry = default_entry_zone();
        }
        if !self.zones.exit.is_valid() {
            warn!(zone = "exit", "config_invalid_zone_using_default");
            self.zones.exit = default_exit_zone();
        }
        if !self.zones.entry_line.is_valid() {
            warn!(line = "entry", "config_invalid_line_using_default");
            self.zones.entry_line = VirtualLine::default();
        }
        if !self.zones.exit_line.is_valid() {
            warn!(line = "exit", "config_invalid_line_using_default");
            self.zones.exit_line = VirtualLine::default();
        }
    }

    pub fn camera(&self) -> &CameraConfig {
        &self.camera
    }

    pub fn serial(&self) -> &SerialConfig {
        &self.serial
    }

    pub fn zones(&self) -> &ZonesConfig {
        &self.zones
    }

    pub fn detection(&self) -> &DetectionConfig {
        &self.detection
    }

    pub fn parking(&self) -> &ParkingConfig {
        &self.parking
    }

    pub fn gate(&self) -> &GateConfig {
        &self.gate
    }

    pub fn storage(&self) -> &StorageConfig {
        &self.storage
    }

    pub fn ocr(&self) -> &OcrConfig {
        &self.ocr
    }

    pub fn config_file(&self) -> &str {
        if self.config_file.is_empty() {
            "default"
        } else {
            &self.config_file
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.camera().width, 1280);
        assert_eq!(config.camera().height, 720);
        assert_eq!(config.serial().baud, 115_200);
        assert_eq!(config.detection().motion_threshold, 500);
        assert_eq!(config.detection().cooldown_secs, 3.0);
        assert_eq!(config.detection().warmup_frames, 150);
        assert_eq!(config.parking().total_slots, 1);
        assert_eq!(config.parking().hourly_rate, 10.0);
        assert_eq!(config.gate().close_delay_secs, 5.0);
        assert_eq!(config.gate().buzzer_secs, 3.0);
    }

    #[test]
    fn test_default_zones_split_frame() {
        let config = Config::default();
        assert_eq!(config.zones().entry, Zone::new(0, 0, 640, 480));
        assert_eq!(config.zones().exit, Zone::new(640, 0, 1280, 480));
        assert_eq!(config.zones().entry_line, VirtualLine(0.5));
    }

    #[test]
    fn test_load_from_missing_path_falls_back() {
        let config = Config::load_from_path("/nonexistent/parklane.toml");
        assert_eq!(config.config_file(), "default");
        assert_eq!(config.parking().total_slots, 1);
    }
}
