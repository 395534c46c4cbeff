//! Domain models - core business types for the parking lane
//!
//! This module contains the canonical data types used throughout the system:
//! - `Zone` / `VirtualLine` - detection geometry within the camera frame
//! - `CrossingEvent` - a vehicle crossing a zone's trigger line
//! - `Plate` - validated number plate text
//! - `GateCommand` / `SlotMessage` - the serial wire vocabulary
//! - `ActiveVehicle` / `HistoryRecord` - ledger records
//! - `FeeSchedule` - parking fee arithmetic

pub mod fees;
pub mod records;
pub mod types;

// Re-export commonly used types at module level
pub use fees::FeeSchedule;
pub use records::{ActiveVehicle, HistoryRecord};
pub use types::{CrossingEvent, GateCommand, Plate, SlotMessage, VirtualLine, Zone, ZoneId};
