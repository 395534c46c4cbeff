//! Trigger line crossing detection
//!
//! Works on the foreground mask produced by the background model: per
//! zone, the mask is cropped, foreground pixels are grouped into
//! connected blobs, and a crossing is declared when the first blob of
//! sufficient area straddles the zone's trigger row. Each zone then
//! enters a cooldown so one slow-moving vehicle produces one event.

use crate::domain::types::{CrossingEvent, VirtualLine, Zone, ZoneId};
use crate::infra::config::{DetectionConfig, ZonesConfig};
use crate::io::camera::FrameSource;
use crate::services::motion::{BackgroundModel, CLASS_FOREGROUND};
use image::{GrayImage, Luma};
use imageproc::region_labelling::{connected_components, Connectivity};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

/// Sleep after a failed frame read before trying again
const READ_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Extent and size of one connected foreground blob, rows relative to
/// the zone crop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Blob {
    pub top: u32,
    pub bottom: u32,
    pub area: u32,
}

struct ZoneWatch {
    id: ZoneId,
    rect: Zone,
    line: VirtualLine,
    /// Absolute trigger row, resolved against the first frame seen
    trigger_row: Option<u32>,
    last_crossing: Option<tokio::time::Instant>,
}

/// Per-frame crossing detector for both lane zones
pub struct CrossingDetector {
    watches: Vec<ZoneWatch>,
    motion_threshold: u32,
    cooldown: Duration,
    event_tx: mpsc::Sender<CrossingEvent>,
}

impl CrossingDetector {
    pub fn new(
        zones: &ZonesConfig,
        detection: &DetectionConfig,
        event_tx: mpsc::Sender<CrossingEvent>,
    ) -> Self {
        let watch = |id, rect, line| ZoneWatch {
            id,
            rect,
            line,
            trigger_row: None,
            last_crossing: None,
        };
        Self {
            watches: vec![
                watch(ZoneId::Entry, zones.entry, zones.entry_line),
                watch(ZoneId::Exit, zones.exit, zones.exit_line),
            ],
            motion_threshold: detection.motion_threshold,
            cooldown: Duration::from_secs_f64(detection.cooldown_secs.max(0.0)),
            event_tx,
        }
    }

    /// Check both zones against one frame and its foreground mask.
    pub fn process_frame(&mut self, frame: &GrayImage, mask: &GrayImage) {
        for watch in &mut self.watches {
            check_zone(
                watch,
                frame,
                mask,
                self.motion_threshold,
                self.cooldown,
                &self.event_tx,
            );
        }
    }
}

fn check_zone(
    watch: &mut ZoneWatch,
    frame: &GrayImage,
    mask: &GrayImage,
    motion_threshold: u32,
    cooldown: Duration,
    event_tx: &mpsc::Sender<CrossingEvent>,
) {
    if let Some(last) = watch.last_crossing {
        if last.elapsed() < cooldown {
            return;
        }
    }

    let trigger_abs =
        *watch.trigger_row.get_or_insert_with(|| watch.line.resolve(frame.height()));
    // Trigger row relative to the zone crop; a line outside the zone
    // can never be straddled
    let zone_row = trigger_abs as i64 - watch.rect.y1 as i64;

    let zone_mask = watch.rect.crop(mask);
    for blob in find_blobs(&zone_mask) {
        if blob.area < motion_threshold {
            continue;
        }
        if (blob.top as i64) <= zone_row && zone_row <= (blob.bottom as i64) {
            watch.last_crossing = Some(tokio::time::Instant::now());
            info!(
                zone = %watch.id,
                area = %blob.area,
                top = %blob.top,
                bottom = %blob.bottom,
                "crossing_detected"
            );

            let event = CrossingEvent {
                zone: watch.id,
                frame: frame.clone(),
                zone_image: watch.rect.crop(frame),
                at: std::time::Instant::now(),
            };
            // Cooldown is already armed: a full queue drops the event
            // rather than stalling the frame loop
            if let Err(e) = event_tx.try_send(event) {
                warn!(zone = %watch.id, error = %e, "crossing_event_dropped");
            }
            break;
        }
    }
}

/// Group foreground pixels (shadows excluded) into 8-connected blobs,
/// ordered by first appearance in raster scan.
pub(crate) fn find_blobs(mask: &GrayImage) -> Vec<Blob> {
    let (width, height) = mask.dimensions();
    if width == 0 || height == 0 {
        return Vec::new();
    }

    let mut binary = GrayImage::new(width, height);
    for (src, dst) in mask.pixels().zip(binary.pixels_mut()) {
        dst.0[0] = if src.0[0] == CLASS_FOREGROUND { 255 } else { 0 };
    }

    let labeled = connected_components(&binary, Connectivity::Eight, Luma([0u8]));

    // Labels are assigned in raster order, so ascending label order is
    // the deterministic first-found order
    let mut blobs: BTreeMap<u32, Blob> = BTreeMap::new();
    for (_, y, px) in labeled.enumerate_pixels() {
        let label = px.0[0];
        if label == 0 {
            continue;
        }
        blobs
            .entry(label)
            .and_modify(|b| {
                b.top = b.top.min(y);
                b.bottom = b.bottom.max(y);
                b.area += 1;
            })
            .or_insert(Blob { top: y, bottom: y, area: 1 });
    }
    blobs.into_values().collect()
}

/// Frame loop: read, update the background model, detect crossings.
///
/// The first `warmup_frames` frames only feed the model; detection
/// starts after that. Runs until shutdown is signalled or the camera
/// channel closes permanently.
pub async fn run_detection_loop<C: FrameSource>(
    mut camera: C,
    mut model: BackgroundModel,
    mut detector: CrossingDetector,
    warmup_frames: u32,
    fps: u32,
    mut shutdown: watch::Receiver<bool>,
) {
    let frame_interval = Duration::from_millis(1000 / fps.max(1) as u64);
    let mut ticker = tokio::time::interval(frame_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let mut warmed: u32 = 0;
    info!(fps = %fps, warmup_frames = %warmup_frames, "detection_loop_started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("detection_loop_stopped");
                    return;
                }
            }
            _ = ticker.tick() => {}
        }

        let Some(frame) = camera.read_frame().await else {
            warn!("frame_read_failed");
            tokio::time::sleep(READ_RETRY_DELAY).await;
            continue;
        };

        let mask = model.apply(&frame);

        if warmed < warmup_frames {
            warmed += 1;
            if warmed == warmup_frames {
                info!(frames = %warmed, "background_learning_complete");
            }
            continue;
        }

        detector.process_frame(&frame, &mask);
    }
}
