//! Integration tests for configuration loading

use parklane::domain::types::{VirtualLine, Zone};
use parklane::infra::Config;
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn test_load_config_from_file() {
    let mut temp_file = NamedTempFile::new().unwrap();

    let config_content = r#"
[camera]
source = "rtsp://lane-cam/stream"
width = 640
height = 480
fps = 15

[serial]
device = "/dev/ttyAMA0"
baud = 57600

[zones]
entry = { x1 = 0, y1 = 100, x2 = 320, y2 = 480 }
exit = { x1 = 320, y1 = 100, x2 = 640, y2 = 480 }
entry_line = 0.6
exit_line = 0.4

[detection]
motion_threshold = 800
cooldown_secs = 2.0
warmup_frames = 60

[parking]
total_slots = 4
hourly_rate = 2.5

[gate]
close_delay_secs = 8.0

[storage]
data_dir = "/var/lib/parklane"

[ocr]
command = "/usr/local/bin/tesseract"
"#;

    temp_file.write_all(config_content.as_bytes()).unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.camera().source, "rtsp://lane-cam/stream");
    assert_eq!(config.camera().width, 640);
    assert_eq!(config.camera().fps, 15);
    assert_eq!(config.serial().device, "/dev/ttyAMA0");
    assert_eq!(config.serial().baud, 57600);
    assert_eq!(config.zones().entry, Zone::new(0, 100, 320, 480));
    assert_eq!(config.zones().entry_line, VirtualLine(0.6));
    assert_eq!(config.detection().motion_threshold, 800);
    assert_eq!(config.detection().cooldown_secs, 2.0);
    assert_eq!(config.detection().warmup_frames, 60);
    assert_eq!(config.parking().total_slots, 4);
    assert_eq!(config.parking().hourly_rate, 2.5);
    assert_eq!(config.gate().close_delay_secs, 8.0);
    assert_eq!(config.storage().data_dir, "/var/lib/parklane");
    assert_eq!(config.ocr().command, "/usr/local/bin/tesseract");
}

#[test]
fn test_missing_sections_use_defaults() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(b"[parking]\ntotal_slots = 2\n").unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.parking().total_slots, 2);
    // Everything unmentioned keeps its default
    assert_eq!(config.parking().hourly_rate, 10.0);
    assert_eq!(config.camera().source, "/dev/video0");
    assert_eq!(config.serial().baud, 115_200);
    assert_eq!(config.detection().history, 500);
    assert!(config.detection().detect_shadows);
    assert_eq!(config.gate().buzzer_secs, 3.0);
    assert_eq!(config.gate().ocr_retry_delay_secs, 0.5);
}

#[test]
fn test_load_from_path_fallback() {
    let config = Config::load_from_path("/nonexistent/path/parklane.toml");

    assert_eq!(config.config_file(), "default");
    assert_eq!(config.parking().total_slots, 1);
    assert_eq!(config.camera().width, 1280);
}

#[test]
fn test_invalid_config_file_falls_back() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(b"not valid toml {{{").unwrap();
    temp_file.flush().unwrap();

    let config = Config::load_from_path(&temp_file.path().display().to_string());
    assert_eq!(config.config_file(), "default");
}

#[test]
fn test_invalid_geometry_replaced_with_defaults() {
    let mut temp_file = NamedTempFile::new().unwrap();

    // Inverted zone, out-of-range line
    let config_content = r#"
[zones]
entry = { x1 = 640, y1 = 480, x2 = 0, y2 = 0 }
entry_line = 1.5
"#;
    temp_file.write_all(config_content.as_bytes()).unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.zones().entry, Zone::new(0, 0, 640, 480));
    assert_eq!(config.zones().entry_line, VirtualLine(0.5));
    // Valid fields in the same section are kept
    assert_eq!(config.zones().exit, Zone::new(640, 0, 1280, 480));
}
