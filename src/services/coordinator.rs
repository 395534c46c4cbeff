//! Gate coordination state machine
//!
//! Consumes crossing events and drives the entry/exit sequences: plate
//! extraction, capacity and duplicate checks, record keeping, gate
//! commands, and the delayed auto-close. One handler per zone runs at
//! a time; crossings arriving while a zone is busy are dropped.

use crate::domain::fees::FeeSchedule;
use crate::domain::types::{CrossingEvent, GateCommand, Plate, SlotMessage, Zone, ZoneId};
use crate::infra::config::Config;
use crate::io::ocr::PlateReader;
use crate::io::serial::ActuatorLink;
use crate::io::store::VehicleStore;
use chrono::Utc;
use image::GrayImage;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

/// Interval at which buffered actuator messages are drained
const MESSAGE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Per-zone busy flags plus the hardware slot-occupancy signal
///
/// `try_begin` is the single admission point: it atomically claims a
/// zone so concurrent crossings cannot start two handlers.
#[derive(Default)]
pub struct GateFlags {
    inner: Mutex<FlagState>,
}

#[derive(Default)]
struct FlagState {
    entry_busy: bool,
    exit_busy: bool,
    slot_occupied: bool,
}

impl GateFlags {
    /// Claim a zone for processing. Returns false if it is already
    /// claimed.
    pub fn try_begin(&self, zone: ZoneId) -> bool {
        let mut state = self.inner.lock();
        let busy = match zone {
            ZoneId::Entry => &mut state.entry_busy,
            ZoneId::Exit => &mut state.exit_busy,
        };
        if *busy {
            false
        } else {
            *busy = true;
            true
        }
    }

    pub fn finish(&self, zone: ZoneId) {
        let mut state = self.inner.lock();
        match zone {
            ZoneId::Entry => state.entry_busy = false,
            ZoneId::Exit => state.exit_busy = false,
        }
    }

    pub fn is_busy(&self, zone: ZoneId) -> bool {
        let state = self.inner.lock();
        match zone {
            ZoneId::Entry => state.entry_busy,
            ZoneId::Exit => state.exit_busy,
        }
    }

    pub fn set_slot_occupied(&self, occupied: bool) {
        self.inner.lock().slot_occupied = occupied;
    }

    pub fn slot_occupied(&self) -> bool {
        self.inner.lock().slot_occupied
    }
}

/// Timing knobs of the gate sequences
#[derive(Debug, Clone, Copy)]
pub struct GateTiming {
    pub close_delay: Duration,
    pub buzzer: Duration,
    pub ocr_retry_delay: Duration,
}

struct Shared {
    store: Arc<dyn VehicleStore>,
    reader: Arc<dyn PlateReader>,
    link: Arc<dyn ActuatorLink>,
    flags: GateFlags,
    fees: FeeSchedule,
    total_slots: u32,
    entry_zone: Zone,
    exit_zone: Zone,
    timing: GateTiming,
}

/// Owner of the gate state machine
pub struct GateCoordinator {
    shared: Arc<Shared>,
}

impl GateCoordinator {
    pub fn new(
        config: &Config,
        store: Arc<dyn VehicleStore>,
        reader: Arc<dyn PlateReader>,
        link: Arc<dyn ActuatorLink>,
    ) -> Self {
        let gate = config.gate();
        Self {
            shared: Arc::new(Shared {
                store,
                reader,
                link,
                flags: GateFlags::default(),
                fees: FeeSchedule::new(config.parking().hourly_rate),
                total_slots: config.parking().total_slots,
                entry_zone: config.zones().entry,
                exit_zone: config.zones().exit,
                timing: GateTiming {
                    close_delay: Duration::from_secs_f64(gate.close_delay_secs.max(0.0)),
                    buzzer: Duration::from_secs_f64(gate.buzzer_secs.max(0.0)),
                    ocr_retry_delay: Duration::from_secs_f64(
                        gate.ocr_retry_delay_secs.max(0.0),
                    ),
                },
            }),
        }
    }

    /// Event loop: crossings in, gate sequences out. Returns after
    /// shutdown is signalled, with both gates commanded closed.
    pub async fn run(
        &self,
        mut event_rx: mpsc::Receiver<CrossingEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut poll = tokio::time::interval(MESSAGE_POLL_INTERVAL);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(total_slots = %self.shared.total_slots, "coordinator_started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                event = event_rx.recv() => {
                    match event {
                        Some(event) => self.dispatch(event),
                        None => break,
                    }
                }
                _ = poll.tick() => {
                    self.drain_messages();
                }
            }
        }

        info!("coordinator_stopping");
        self.close_gates().await;
        info!("coordinator_stopped");
    }

    /// Claim the zone and hand the event to its handler task.
    fn dispatch(&self, event: CrossingEvent) {
        if !self.shared.flags.try_begin(event.zone) {
            warn!(zone = %event.zone, "crossing_ignored_already_processing");
            return;
        }

        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            match event.zone {
                ZoneId::Entry => handle_entry(shared, event).await,
                ZoneId::Exit => handle_exit(shared, event).await,
            }
        });
    }

    /// Apply buffered occupancy messages from the actuator controller.
    fn drain_messages(&self) {
        for line in self.shared.link.poll_messages() {
            match line.parse::<SlotMessage>() {
                Ok(SlotMessage::Occupied) => {
                    info!("slot_sensor_occupied");
                    self.shared.flags.set_slot_occupied(true);
                }
                Ok(SlotMessage::Free) => {
                    info!("slot_sensor_free");
                    self.shared.flags.set_slot_occupied(false);
                }
                Ok(SlotMessage::Unknown(other)) => {
                    warn!(message = %other, "actuator_message_unknown");
                }
                Err(never) => match never {},
            }
        }
    }

    /// Leave the lane in a safe state: both gates closed, buzzer off.
    async fn close_gates(&self) {
        for command in
            [GateCommand::CloseEntryGate, GateCommand::CloseExitGate, GateCommand::BuzzerOff]
        {
            self.shared.link.send(command).await;
        }
    }
}

/// Run one extraction on the blocking pool. OCR shells out and can
/// take seconds; it must never pin an async worker thread.
async fn read_plate(reader: Arc<dyn PlateReader>, image: GrayImage) -> Option<Plate> {
    match tokio::task::spawn_blocking(move || reader.extract(&image)).await {
        Ok(plate) => plate,
        Err(e) => {
            warn!(error = %e, "plate_reader_task_failed");
            None
        }
    }
}

/// Extract a plate from the crossing capture, with one delayed retry
/// against a fresh crop of the full frame.
async fn extract_plate(shared: &Shared, event: &CrossingEvent) -> Option<Plate> {
    if let Some(plate) =
        read_plate(Arc::clone(&shared.reader), event.zone_image.clone()).await
    {
        return Some(plate);
    }

    warn!(zone = %event.zone, "plate_extraction_failed_retrying");
    tokio::time::sleep(shared.timing.ocr_retry_delay).await;

    let rect = match event.zone {
        ZoneId::Entry => shared.entry_zone,
        ZoneId::Exit => shared.exit_zone,
    };
    read_plate(Arc::clone(&shared.reader), rect.crop(&event.frame)).await
}

async fn handle_entry(shared: Arc<Shared>, event: CrossingEvent) {
    // Capacity first: either the ledger or the hardware sensor saying
    // full denies entry
    if shared.store.is_full(shared.total_slots) || shared.flags.slot_occupied() {
        warn!("entry_denied_parking_full");
        shared.link.send(GateCommand::BuzzerOn).await;
        tokio::time::sleep(shared.timing.buzzer).await;
        shared.link.send(GateCommand::BuzzerOff).await;
        shared.flags.finish(ZoneId::Entry);
        return;
    }

    let Some(plate) = extract_plate(&shared, &event).await else {
        warn!(zone = %event.zone, "entry_abandoned_no_plate");
        shared.flags.finish(ZoneId::Entry);
        return;
    };

    if shared.store.get_active(&plate).is_some() {
        warn!(plate = %plate, "entry_denied_plate_already_inside");
        shared.flags.finish(ZoneId::Entry);
        return;
    }

    let Some(slot) = shared.store.available_slots(shared.total_slots).first().copied()
    else {
        // Filled up between the capacity check and now
        warn!(plate = %plate, "entry_denied_no_slot_left");
        shared.flags.finish(ZoneId::Entry);
        return;
    };

    if !shared.store.add_active(&plate, Utc::now(), slot) {
        warn!(plate = %plate, "entry_aborted_record_not_saved");
        shared.flags.finish(ZoneId::Entry);
        return;
    }

    info!(
        plate = %plate,
        slot = %slot,
        latency_ms = %event.at.elapsed().as_millis(),
        "vehicle_entering"
    );
    shared.link.send(GateCommand::open(ZoneId::Entry)).await;
    schedule_close(shared, ZoneId::Entry);
}

async fn handle_exit(shared: Arc<Shared>, event: CrossingEvent) {
    let Some(plate) = extract_plate(&shared, &event).await else {
        warn!(zone = %event.zone, "exit_abandoned_no_plate");
        shared.flags.finish(ZoneId::Exit);
        return;
    };

    let Some(vehicle) = shared.store.get_active(&plate) else {
        warn!(plate = %plate, "exit_denied_plate_not_inside");
        shared.flags.finish(ZoneId::Exit);
        return;
    };

    let exit_time = Utc::now();
    let fee = shared.fees.fee(vehicle.entry_time, exit_time);
    info!(
        plate = %plate,
        slot = %vehicle.slot,
        entry_time = %vehicle.entry_time.to_rfc3339(),
        exit_time = %exit_time.to_rfc3339(),
        duration = %crate::domain::fees::duration_text(vehicle.entry_time, exit_time),
        fee = %shared.fees.format_fee(fee),
        latency_ms = %event.at.elapsed().as_millis(),
        "parking_receipt"
    );

    // The history record is the billing artifact: without it the exit
    // does not proceed
    if !shared.store.add_history(&plate, vehicle.entry_time, exit_time, fee, vehicle.slot)
    {
        warn!(plate = %plate, "exit_aborted_history_not_saved");
        shared.flags.finish(ZoneId::Exit);
        return;
    }

    if !shared.store.remove_active(&plate) {
        // Billed but still listed; flagged for operator attention
        warn!(plate = %plate, "exit_active_record_not_removed");
    }

    shared.link.send(GateCommand::open(ZoneId::Exit)).await;
    schedule_close(shared, ZoneId::Exit);
}

/// Arm the auto-close timer for an opened gate.
///
/// The busy flag stays set for the whole grace period; clearing it
/// early (operator intervention) cancels the close. The flag is
/// cleared only after the close command so a new crossing can never
/// interleave with a closing gate.
fn schedule_close(shared: Arc<Shared>, zone: ZoneId) {
    tokio::spawn(async move {
        tokio::time::sleep(shared.timing.close_delay).await;
        if !shared.flags.is_busy(zone) {
            info!(zone = %zone, "gate_close_skipped_flag_cleared");
            return;
        }
        shared.link.send(GateCommand::close(zone)).await;
        shared.flags.finish(zone);
    });
}
