//! Ledger records for vehicles in the parking lot

use crate::domain::types::Plate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A vehicle currently inside the lot
///
/// Unique by plate while active; destroyed (moved to history) on exit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveVehicle {
    pub plate: Plate,
    pub entry_time: DateTime<Utc>,
    pub slot: u32,
}

/// A completed parking stay, append-only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub plate: Plate,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub fee: f64,
    pub slot: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_vehicle_json_round_trip() {
        let vehicle = ActiveVehicle {
            plate: Plate::parse("ABC123").unwrap(),
            entry_time: Utc::now(),
            slot: 1,
        };
        let json = serde_json::to_string(&vehicle).unwrap();
        let parsed: ActiveVehicle = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, vehicle);
    }

    #[test]
    fn test_plate_serializes_as_plain_string() {
        let vehicle = ActiveVehicle {
            plate: Plate::parse("XYZ999").unwrap(),
            entry_time: Utc::now(),
            slot: 2,
        };
        let json = serde_json::to_value(&vehicle).unwrap();
        assert_eq!(json["plate"], "XYZ999");
    }
}
