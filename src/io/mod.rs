//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `camera` - frame acquisition from an ffmpeg-fed video source
//! - `serial` - actuator command link to the gate microcontroller
//! - `ocr` - number plate extraction (external OCR engine)
//! - `store` - JSON-backed vehicle and history records

pub mod camera;
pub mod ocr;
pub mod serial;
pub mod store;

// Re-export commonly used types
pub use camera::{FrameSource, PipeCamera};
pub use ocr::{PlateReader, TesseractReader};
pub use serial::{ActuatorLink, SerialLink};
pub use store::{JsonStore, VehicleStore};
