//! JSON-backed vehicle and history records
//!
//! Two files under the data directory: `vehicles.json` holds the
//! active-vehicle ledger, `history.json` the append-only completed
//! stays. Every mutation rewrites the file atomically (temp file +
//! rename) so a crash never leaves a half-written ledger.

use crate::domain::records::{ActiveVehicle, HistoryRecord};
use crate::domain::types::Plate;
use anyhow::Context;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Active-vehicle and history storage
///
/// All operations are synchronous and never raise past this boundary:
/// failures return false/None/empty and are logged here.
pub trait VehicleStore: Send + Sync {
    fn add_active(&self, plate: &Plate, entry_time: DateTime<Utc>, slot: u32) -> bool;
    fn get_active(&self, plate: &Plate) -> Option<ActiveVehicle>;
    fn remove_active(&self, plate: &Plate) -> bool;
    fn add_history(
        &self,
        plate: &Plate,
        entry_time: DateTime<Utc>,
        exit_time: DateTime<Utc>,
        fee: f64,
        slot: u32,
    ) -> bool;
    fn list_active(&self) -> Vec<ActiveVehicle>;

    /// Free slot numbers in 1..=total, lowest first
    fn available_slots(&self, total: u32) -> Vec<u32> {
        let occupied: Vec<u32> = self.list_active().iter().map(|v| v.slot).collect();
        (1..=total).filter(|slot| !occupied.contains(slot)).collect()
    }

    fn is_full(&self, total: u32) -> bool {
        self.available_slots(total).is_empty()
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct VehiclesFile {
    vehicles: Vec<ActiveVehicle>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct HistoryFile {
    history: Vec<HistoryRecord>,
}

/// File-backed store
pub struct JsonStore {
    vehicles_path: PathBuf,
    history_path: PathBuf,
    // Serializes read-modify-write cycles across handler tasks
    write_lock: Mutex<()>,
}

impl JsonStore {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> anyhow::Result<Self> {
        let data_dir = data_dir.as_ref();
        fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data dir {}", data_dir.display()))?;

        let store = Self {
            vehicles_path: data_dir.join("vehicles.json"),
            history_path: data_dir.join("history.json"),
            write_lock: Mutex::new(()),
        };

        if !store.vehicles_path.exists() {
            write_atomic(&store.vehicles_path, &VehiclesFile::default())?;
            info!(file = %store.vehicles_path.display(), "store_file_initialized");
        }
        if !store.history_path.exists() {
            write_atomic(&store.history_path, &HistoryFile::default())?;
            info!(file = %store.history_path.display(), "store_file_initialized");
        }

        Ok(store)
    }

    fn read_vehicles(&self) -> VehiclesFile {
        read_or_default(&self.vehicles_path)
    }

    fn read_history(&self) -> HistoryFile {
        read_or_default(&self.history_path)
    }
}

impl VehicleStore for JsonStore {
    fn add_active(&self, plate: &Plate, entry_time: DateTime<Utc>, slot: u32) -> bool {
        let _guard = self.write_lock.lock();
        let mut data = self.read_vehicles();

        if data.vehicles.iter().any(|v| &v.plate == plate) {
            warn!(plate = %plate, "store_duplicate_active_plate");
            return false;
        }

        data.vehicles.push(ActiveVehicle { plate: plate.clone(), entry_time, slot });

        match write_atomic(&self.vehicles_path, &data) {
            Ok(()) => {
                info!(plate = %plate, slot = %slot, "active_vehicle_added");
                true
            }
            Err(e) => {
                error!(plate = %plate, error = %e, "store_write_failed");
                false
            }
        }
    }

    fn get_active(&self, plate: &Plate) -> Option<ActiveVehicle> {
        self.read_vehicles().vehicles.into_iter().find(|v| &v.plate == plate)
    }

    fn remove_active(&self, plate: &Plate) -> bool {
        let _guard = self.write_lock.lock();
        let mut data = self.read_vehicles();

        let before = data.vehicles.len();
        data.vehicles.retain(|v| &v.plate != plate);
        if data.vehicles.len() == before {
            warn!(plate = %plate, "store_plate_not_active");
            return false;
        }

        match write_atomic(&self.vehicles_path, &data) {
            Ok(()) => {
                info!(plate = %plate, "active_vehicle_removed");
                true
            }
            Err(e) => {
                error!(plate = %plate, error = %e, "store_write_failed");
                false
            }
        }
    }

    fn add_history(
        &self,
        plate: &Plate,
        entry_time: DateTime<Utc>,
        exit_time: DateTime<Utc>,
        fee: f64,
        slot: u32,
    ) -> bool {
        let _guard = self.write_lock.lock();
        let mut data = self.read_history();

        data.history.push(HistoryRecord {
            plate: plate.clone(),
            entry_time,
            exit_time,
            fee,
            slot,
        });

        match write_atomic(&self.history_path, &data) {
            Ok(()) => {
                info!(plate = %plate, fee = %fee, "history_record_added");
                true
            }
            Err(e) => {
                error!(plate = %plate, error = %e, "store_write_failed");
                false
            }
        }
    }

    fn list_active(&self) -> Vec<ActiveVehicle> {
        self.read_vehicles().vehicles
    }
}

fn read_or_default<T: Default + for<'de> Deserialize<'de>>(path: &Path) -> T {
    match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str(&content) {
            Ok(data) => data,
            Err(e) => {
                error!(file = %path.display(), error = %e, "store_parse_error");
                T::default()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => T::default(),
        Err(e) => {
            error!(file = %path.display(), error = %e, "store_read_error");
            T::default()
        }
    }
}

/// Write the full file, atomically: serialize to a sibling temp file,
/// then rename over the target.
fn write_atomic<T: Serialize>(path: &Path, data: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(data)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json.as_bytes())
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn plate(s: &str) -> Plate {
        Plate::parse(s).unwrap()
    }

    #[test]
    fn test_new_store_initializes_files() {
        let dir = tempdir().unwrap();
        let store = JsonStore::new(dir.path()).unwrap();

        assert!(dir.path().join("vehicles.json").exists());
        assert!(dir.path().join("history.json").exists());
        assert!(store.list_active().is_empty());
    }

    #[test]
    fn test_add_and_get_active() {
        let dir = tempdir().unwrap();
        let store = JsonStore::new(dir.path()).unwrap();
        let now = Utc::now();

        assert!(store.add_active(&plate("ABC123"), now, 1));

        let found = store.get_active(&plate("ABC123")).unwrap();
        assert_eq!(found.slot, 1);
        assert_eq!(found.entry_time, now);
        assert!(store.get_active(&plate("XYZ999")).is_none());
    }

    #[test]
    fn test_duplicate_active_plate_refused() {
        let dir = tempdir().unwrap();
        let store = JsonStore::new(dir.path()).unwrap();
        let now = Utc::now();

        assert!(store.add_active(&plate("ABC123"), now, 1));
        assert!(!store.add_active(&plate("ABC123"), now, 2));
        assert_eq!(store.list_active().len(), 1);
    }

    #[test]
    fn test_remove_active() {
        let dir = tempdir().unwrap();
        let store = JsonStore::new(dir.path()).unwrap();

        store.add_active(&plate("ABC123"), Utc::now(), 1);
        assert!(store.remove_active(&plate("ABC123")));
        assert!(!store.remove_active(&plate("ABC123")));
        assert!(store.list_active().is_empty());
    }

    #[test]
    fn test_available_slots_lowest_first() {
        let dir = tempdir().unwrap();
        let store = JsonStore::new(dir.path()).unwrap();

        assert_eq!(store.available_slots(3), vec![1, 2, 3]);

        store.add_active(&plate("AAA111"), Utc::now(), 1);
        store.add_active(&plate("BBB222"), Utc::now(), 3);
        assert_eq!(store.available_slots(3), vec![2]);
        assert!(!store.is_full(3));

        store.add_active(&plate("CCC333"), Utc::now(), 2);
        assert!(store.is_full(3));
    }

    #[test]
    fn test_add_history_appends() {
        let dir = tempdir().unwrap();
        let store = JsonStore::new(dir.path()).unwrap();
        let entry = Utc::now();
        let exit = entry + chrono::Duration::hours(2);

        assert!(store.add_history(&plate("ABC123"), entry, exit, 20.0, 1));
        assert!(store.add_history(&plate("XYZ999"), entry, exit, 10.0, 1));

        let content = fs::read_to_string(dir.path().join("history.json")).unwrap();
        let parsed: HistoryFile = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed.history.len(), 2);
        assert_eq!(parsed.history[0].fee, 20.0);
    }

    #[test]
    fn test_survives_corrupt_file() {
        let dir = tempdir().unwrap();
        let store = JsonStore::new(dir.path()).unwrap();

        fs::write(dir.path().join("vehicles.json"), "not json").unwrap();

        assert!(store.list_active().is_empty());
        // The next write repairs the file
        assert!(store.add_active(&plate("ABC123"), Utc::now(), 1));
        assert_eq!(store.list_active().len(), 1);
    }

    #[test]
    fn test_records_persist_across_instances() {
        let dir = tempdir().unwrap();
        {
            let store = JsonStore::new(dir.path()).unwrap();
            store.add_active(&plate("ABC123"), Utc::now(), 1);
        }
        let reopened = JsonStore::new(dir.path()).unwrap();
        assert!(reopened.get_active(&plate("ABC123")).is_some());
    }
}
