//! Shared types for the parking lane controller

use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Identity of a detection zone within the camera frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ZoneId {
    Entry,
    Exit,
}

impl ZoneId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ZoneId::Entry => "entry",
            ZoneId::Exit => "exit",
        }
    }
}

impl std::fmt::Display for ZoneId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rectangular detection zone in pixel coordinates
///
/// Invariant: x1 < x2 and y1 < y2. Immutable after configuration load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zone {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl Zone {
    pub fn new(x1: u32, y1: u32, x2: u32, y2: u32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn is_valid(&self) -> bool {
        self.x1 < self.x2 && self.y1 < self.y2
    }

    pub fn width(&self) -> u32 {
        self.x2.saturating_sub(self.x1)
    }

    pub fn height(&self) -> u32 {
        self.y2.saturating_sub(self.y1)
    }

    /// Crop an image to this zone, clamped to the image bounds.
    /// Camera resolution may differ from the configured frame size.
    pub fn crop(&self, image: &GrayImage) -> GrayImage {
        let x1 = self.x1.min(image.width());
        let y1 = self.y1.min(image.height());
        let x2 = self.x2.min(image.width());
        let y2 = self.y2.min(image.height());
        image::imageops::crop_imm(image, x1, y1, x2.saturating_sub(x1), y2.saturating_sub(y1))
            .to_image()
    }
}

/// Virtual trigger line as a fraction of frame height
///
/// Stored as a ratio so the configuration survives camera resolution
/// changes; resolved to an absolute pixel row once actual frame
/// dimensions are known at camera start.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VirtualLine(pub f64);

impl VirtualLine {
    pub fn is_valid(&self) -> bool {
        (0.0..=1.0).contains(&self.0)
    }

    /// Absolute pixel row for the given frame height
    pub fn resolve(&self, frame_height: u32) -> u32 {
        (frame_height as f64 * self.0) as u32
    }
}

impl Default for VirtualLine {
    fn default() -> Self {
        VirtualLine(0.5)
    }
}

/// A detected trigger line crossing for one zone
///
/// Carries the full frame and the zone crop captured at detection time
/// so the plate reader can work on the image the vehicle was seen in.
#[derive(Debug, Clone)]
pub struct CrossingEvent {
    pub zone: ZoneId,
    pub frame: GrayImage,
    pub zone_image: GrayImage,
    pub at: Instant,
}

/// Outbound actuator commands understood by the gate microcontroller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateCommand {
    OpenEntryGate,
    CloseEntryGate,
    OpenExitGate,
    CloseExitGate,
    BuzzerOn,
    BuzzerOff,
}

impl GateCommand {
    /// Wire string, sent as a newline-terminated line
    pub fn as_str(&self) -> &'static str {
        match self {
            GateCommand::OpenEntryGate => "OPEN_ENTRY_GATE",
            GateCommand::CloseEntryGate => "CLOSE_ENTRY_GATE",
            GateCommand::OpenExitGate => "OPEN_EXIT_GATE",
            GateCommand::CloseExitGate => "CLOSE_EXIT_GATE",
            GateCommand::BuzzerOn => "BUZZER_ON",
            GateCommand::BuzzerOff => "BUZZER_OFF",
        }
    }

    /// Open command for a zone's gate
    pub fn open(zone: ZoneId) -> Self {
        match zone {
            ZoneId::Entry => GateCommand::OpenEntryGate,
            ZoneId::Exit => GateCommand::OpenExitGate,
        }
    }

    /// Close command for a zone's gate
    pub fn close(zone: ZoneId) -> Self {
        match zone {
            ZoneId::Entry => GateCommand::CloseEntryGate,
            ZoneId::Exit => GateCommand::CloseExitGate,
        }
    }
}

impl std::fmt::Display for GateCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inbound messages from the slot-occupancy sensor
#[derive(Debug, Clone, PartialEq)]
pub enum SlotMessage {
    Occupied,
    Free,
    Unknown(String),
}

impl std::str::FromStr for SlotMessage {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "SLOT_OCCUPIED" => SlotMessage::Occupied,
            "SLOT_FREE" => SlotMessage::Free,
            other => SlotMessage::Unknown(other.to_string()),
        })
    }
}

/// Validated number plate text
///
/// Uppercase alphanumeric, 3-10 characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Plate(String);

impl Plate {
    /// Clean raw OCR output into a valid plate, or None if the result
    /// falls outside the 3-10 character window.
    pub fn parse(raw: &str) -> Option<Self> {
        let cleaned: String =
            raw.chars().filter(|c| c.is_ascii_alphanumeric()).map(|c| c.to_ascii_uppercase()).collect();

        if (3..=10).contains(&cleaned.len()) {
            Some(Plate(cleaned))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Plate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
