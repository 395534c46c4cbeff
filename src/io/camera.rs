//! Frame acquisition from a video source
//!
//! Frames come from an ffmpeg child process emitting raw gray8 video
//! on stdout, scaled to the configured size. A blocking reader thread
//! assembles full frames and hands them over a small bounded channel
//! so the capture loop is backpressured when detection falls behind.

use crate::infra::config::CameraConfig;
use anyhow::Context;
use async_trait::async_trait;
use image::GrayImage;
use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Bounded wait for the next frame before reporting a transient failure
const READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Source of grayscale camera frames
///
/// A `None` return is a transient failure: the caller logs it and
/// retries on the next iteration, it is never fatal.
#[async_trait]
pub trait FrameSource: Send {
    async fn read_frame(&mut self) -> Option<GrayImage>;
}

/// Camera backed by an ffmpeg child process
pub struct PipeCamera {
    frame_rx: mpsc::Receiver<GrayImage>,
    child: Child,
}

impl PipeCamera {
    /// Spawn ffmpeg against the configured source.
    ///
    /// Spawn failure (ffmpeg missing, device unopenable) is fatal to
    /// system start.
    pub fn spawn(config: &CameraConfig) -> anyhow::Result<Self> {
        let mut cmd = Command::new("ffmpeg");
        cmd.arg("-hide_banner").arg("-loglevel").arg("error");

        if config.source.starts_with("/dev/video") {
            cmd.arg("-f").arg("video4linux2");
            cmd.arg("-framerate").arg(config.fps.to_string());
        }

        cmd.arg("-i")
            .arg(&config.source)
            .arg("-vf")
            .arg(format!("scale={}:{}", config.width, config.height))
            .arg("-pix_fmt")
            .arg("gray")
            .arg("-f")
            .arg("rawvideo")
            .arg("-")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn ffmpeg for camera {}", config.source))?;

        let stdout = child.stdout.take().context("ffmpeg stdout not captured")?;

        info!(
            source = %config.source,
            width = %config.width,
            height = %config.height,
            fps = %config.fps,
            "camera_started"
        );

        let (frame_tx, frame_rx) = mpsc::channel(2);
        let (width, height) = (config.width, config.height);
        std::thread::spawn(move || read_raw_frames(stdout, width, height, frame_tx));

        Ok(Self { frame_rx, child })
    }
}

#[async_trait]
impl FrameSource for PipeCamera {
    async fn read_frame(&mut self) -> Option<GrayImage> {
        match tokio::time::timeout(READ_TIMEOUT, self.frame_rx.recv()).await {
            Ok(frame) => frame,
            Err(_) => None,
        }
    }
}

impl Drop for PipeCamera {
    fn drop(&mut self) {
        if let Err(e) = self.child.kill() {
            warn!(error = %e, "camera_child_kill_failed");
        }
        let _ = self.child.wait();
        info!("camera_released");
    }
}

/// Blocking reader: one gray8 frame is exactly width * height bytes.
fn read_raw_frames(
    mut stdout: impl Read,
    width: u32,
    height: u32,
    frame_tx: mpsc::Sender<GrayImage>,
) {
    let frame_len = (width * height) as usize;

    loop {
        let mut buf = vec![0u8; frame_len];
        if let Err(e) = stdout.read_exact(&mut buf) {
            // EOF or broken pipe - the child exited or was killed
            warn!(error = %e, "camera_stream_ended");
            return;
        }

        let Some(frame) = GrayImage::from_raw(width, height, buf) else {
            warn!("camera_frame_size_mismatch");
            continue;
        };

        // blocking_send backpressures the ffmpeg pipe when the
        // detection loop falls behind
        if frame_tx.blocking_send(frame).is_err() {
            return;
        }
    }
}
