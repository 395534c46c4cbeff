//! Serial actuator link to the gate microcontroller
//!
//! Protocol: newline-terminated ASCII lines at 115200 8N1.
//! Outbound commands: OPEN_ENTRY_GATE, CLOSE_ENTRY_GATE,
//! OPEN_EXIT_GATE, CLOSE_EXIT_GATE, BUZZER_ON, BUZZER_OFF.
//! Inbound messages: SLOT_OCCUPIED, SLOT_FREE.

use crate::domain::types::GateCommand;
use anyhow::Context;
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, watch};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info, warn};

/// Bounded timeout for a single command write
const WRITE_TIMEOUT: Duration = Duration::from_millis(500);

/// Inbound lines buffered before the oldest is dropped
const INBOUND_BUFFER: usize = 64;

/// Command send / message receive channel to the actuator controller
///
/// `send` returns false on failure instead of erroring - a dropped
/// command is logged and recovered, never fatal. `poll_messages` is
/// non-blocking and returns whatever lines have been buffered.
#[async_trait]
pub trait ActuatorLink: Send + Sync {
    async fn send(&self, command: GateCommand) -> bool;
    fn poll_messages(&self) -> Vec<String>;
}

/// Actuator link over a serial port
pub struct SerialLink {
    writer: tokio::sync::Mutex<WriteHalf<SerialStream>>,
    inbound_rx: parking_lot::Mutex<mpsc::Receiver<String>>,
}

impl SerialLink {
    /// Open the serial device and start the inbound reader task.
    ///
    /// Open failure is fatal to system start; everything after that is
    /// logged and recovered.
    pub fn open(device: &str, baud: u32, shutdown: watch::Receiver<bool>) -> anyhow::Result<Self> {
        let port = tokio_serial::new(device, baud)
            .timeout(Duration::from_millis(100))
            .open_native_async()
            .with_context(|| format!("Failed to open serial device {}", device))?;

        info!(device = %device, baud = %baud, "serial_port_opened");

        let (reader, writer) = tokio::io::split(port);
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_BUFFER);
        tokio::spawn(read_lines(reader, inbound_tx, shutdown));

        Ok(Self {
            writer: tokio::sync::Mutex::new(writer),
            inbound_rx: parking_lot::Mutex::new(inbound_rx),
        })
    }
}

#[async_trait]
impl ActuatorLink for SerialLink {
    async fn send(&self, command: GateCommand) -> bool {
        let line = format!("{}\n", command.as_str());
        let mut writer = self.writer.lock().await;

        let write = async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        };

        match tokio::time::timeout(WRITE_TIMEOUT, write).await {
            Ok(Ok(())) => {
                info!(command = %command, "actuator_command_sent");
                true
            }
            Ok(Err(e)) => {
                warn!(command = %command, error = %e, "actuator_write_error");
                false
            }
            Err(_) => {
                warn!(command = %command, "actuator_write_timeout");
                false
            }
        }
    }

    fn poll_messages(&self) -> Vec<String> {
        let mut rx = self.inbound_rx.lock();
        let mut messages = Vec::new();
        while let Ok(line) = rx.try_recv() {
            messages.push(line);
        }
        messages
    }
}

/// Reader task: accumulates bytes, splits on newlines, buffers
/// complete lines for `poll_messages`.
async fn read_lines(
    mut reader: ReadHalf<SerialStream>,
    inbound_tx: mpsc::Sender<String>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut pending: Vec<u8> = Vec::with_capacity(64);
    let mut buf = [0u8; 64];

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    debug!("serial_reader_shutdown");
                    return;
                }
            }
            read = reader.read(&mut buf) => {
                match read {
                    Ok(0) => {
                        // Serial reads time out with zero bytes, keep polling
                    }
                    Ok(n) => {
                        pending.extend_from_slice(&buf[..n]);
                        drain_complete_lines(&mut pending, &inbound_tx);
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                    Err(e) => {
                        warn!(error = %e, "serial_read_error");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
            }
        }
    }
}

fn drain_complete_lines(pending: &mut Vec<u8>, inbound_tx: &mpsc::Sender<String>) {
    while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
        let line_bytes: Vec<u8> = pending.drain(..=pos).collect();
        let line = String::from_utf8_lossy(&line_bytes).trim().to_string();
        if line.is_empty() {
            continue;
        }
        debug!(line = %line, "serial_line_received");
        if let Err(e) = inbound_tx.try_send(line) {
            warn!(error = %e, "serial_inbound_buffer_full");
        }
    }
}
