//! Adaptive background model for motion detection
//!
//! Per-pixel Gaussian mixture updated online every frame. Output is a
//! foreground mask with one byte class per pixel: background, shadow
//! (a darker version of the background, when enabled), or foreground.
//!
//! The model must be warmed up (~150 frames) before its output is used
//! for crossing detection, so initial scene noise does not trigger
//! false crossings; the detection loop owns that warm-up phase.

use crate::infra::config::DetectionConfig;
use image::GrayImage;
use tracing::{debug, info};

pub const CLASS_BACKGROUND: u8 = 0;
pub const CLASS_SHADOW: u8 = 127;
pub const CLASS_FOREGROUND: u8 = 255;

const MODES_PER_PIXEL: usize = 3;
const INITIAL_VARIANCE: f32 = 225.0;
const MIN_VARIANCE: f32 = 4.0;
const MAX_VARIANCE: f32 = 5.0 * INITIAL_VARIANCE;
/// Cumulative weight of the modes considered part of the background
const BACKGROUND_RATIO: f32 = 0.9;
/// A pixel this much darker than the background (but not darker than
/// half of it) is classed as shadow rather than foreground
const SHADOW_RATIO_LOW: f32 = 0.5;
const SHADOW_RATIO_HIGH: f32 = 0.95;

#[derive(Debug, Clone, Copy, Default)]
struct Gaussian {
    weight: f32,
    mean: f32,
    variance: f32,
}

/// Running per-pixel Gaussian mixture background model
pub struct BackgroundModel {
    history: u32,
    var_threshold: f32,
    detect_shadows: bool,
    width: u32,
    height: u32,
    /// MODES_PER_PIXEL gaussians per pixel, contiguous, each pixel's
    /// modes kept sorted by weight descending
    modes: Vec<Gaussian>,
    frames_seen: u64,
}

impl BackgroundModel {
    pub fn new(config: &DetectionConfig) -> Self {
        Self {
            history: config.history.max(1),
            var_threshold: config.var_threshold as f32,
            detect_shadows: config.detect_shadows,
            width: 0,
            height: 0,
            modes: Vec::new(),
            frames_seen: 0,
        }
    }

    /// Update the model with one frame and return the class mask,
    /// same dimensions as the input.
    pub fn apply(&mut self, frame: &GrayImage) -> GrayImage {
        let (width, height) = frame.dimensions();
        if (width, height) != (self.width, self.height) {
            if self.width != 0 {
                info!(
                    old_width = %self.width,
                    old_height = %self.height,
                    width = %width,
                    height = %height,
                    "background_model_reset_on_resize"
                );
            } else {
                debug!(width = %width, height = %height, "background_model_initialized");
            }
            self.width = width;
            self.height = height;
            self.modes =
                vec![Gaussian::default(); width as usize * height as usize * MODES_PER_PIXEL];
            self.frames_seen = 0;
        }

        self.frames_seen += 1;
        // Fast adaptation while young, steady 1/history once mature
        let alpha = 1.0 / self.frames_seen.min(self.history as u64) as f32;

        let mut mask = vec![CLASS_BACKGROUND; width as usize * height as usize];
        for (i, px) in frame.as_raw().iter().enumerate() {
            let modes = &mut self.modes[i * MODES_PER_PIXEL..(i + 1) * MODES_PER_PIXEL];
            mask[i] = classify_and_update(
                modes,
                *px as f32,
                alpha,
                self.var_threshold,
                self.detect_shadows,
            );
        }

        // Dimensions match the mask buffer by construction
        GrayImage::from_raw(width, height, mask).unwrap_or_else(|| GrayImage::new(width, height))
    }
}

/// One pixel: match against the mixture, update it, and classify.
fn classify_and_update(
    modes: &mut [Gaussian],
    x: f32,
    alpha: f32,
    var_threshold: f32,
    detect_shadows: bool,
) -> u8 {
    // Dominant background estimate before this sample is folded in,
    // used for the shadow ratio test
    let background_mean = if modes[0].weight > 0.0 { modes[0].mean } else { 0.0 };

    // Match against modes in weight order
    let mut matched = None;
    for (i, mode) in modes.iter().enumerate() {
        if mode.weight <= 0.0 {
            continue;
        }
        let d2 = (x - mode.mean) * (x - mode.mean);
        if d2 < var_threshold * mode.variance.max(MIN_VARIANCE) {
            matched = Some(i);
            break;
        }
    }

    // Classify against the pre-update ordering: the matched mode is
    // background if it sits inside the top BACKGROUND_RATIO of weight
    let foreground = match matched {
        None => true,
        Some(idx) => {
            let weight_before: f32 = modes[..idx].iter().map(|m| m.weight).sum();
            weight_before >= BACKGROUND_RATIO
        }
    };

    // Update the mixture
    match matched {
        Some(idx) => {
            for (i, mode) in modes.iter_mut().enumerate() {
                if mode.weight <= 0.0 {
                    continue;
                }
                mode.weight *= 1.0 - alpha;
                if i == idx {
                    mode.weight += alpha;
                }
            }
            let mode = &mut modes[idx];
            let d = x - mode.mean;
            mode.mean += alpha * d;
            mode.variance = (mode.variance + alpha * (d * d - mode.variance))
                .clamp(MIN_VARIANCE, MAX_VARIANCE);
        }
        None => {
            // Replace the weakest mode with a fresh one centered on
            // the sample
            let weakest = weakest_mode(modes);
            for mode in modes.iter_mut() {
                mode.weight *= 1.0 - alpha;
            }
            modes[weakest] =
                Gaussian { weight: alpha, mean: x, variance: INITIAL_VARIANCE };
        }
    }

    normalize_and_sort(modes);

    if foreground
        && detect_shadows
        && background_mean > 0.0
        && (SHADOW_RATIO_LOW..=SHADOW_RATIO_HIGH).contains(&(x / background_mean))
    {
        CLASS_SHADOW
    } else if foreground {
        CLASS_FOREGROUND
    } else {
        CLASS_BACKGROUND
    }
}

fn weakest_mode(modes: &[Gaussian]) -> usize {
    let mut weakest = 0;
    for (i, mode) in modes.iter().enumerate() {
        if mode.weight < modes[weakest].weight {
            weakest = i;
        }
    }
    weakest
}

fn normalize_and_sort(modes: &mut [Gaussian]) {
    let total: f32 = modes.iter().map(|m| m.weight).sum();
    if total > 0.0 {
        for mode in modes.iter_mut() {
            mode.weight /= total;
        }
    }
    modes.sort_unstable_by(|a, b| {
        b.weight.partial_cmp(&a.weight).unwrap_or(std::cmp::Ordering::Equal)
    });
}
