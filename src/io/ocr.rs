//! Number plate extraction
//!
//! The OCR engine is an external collaborator: the core only needs
//! image -> plate-or-nothing. Failure is an absence value, never an
//! error escaping to the coordinator.

use crate::domain::types::Plate;
use image::GrayImage;
use std::io::{Cursor, Write};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// How long a single OCR invocation may run before being killed
const OCR_TIMEOUT: Duration = Duration::from_secs(10);

/// Black-box plate extraction
pub trait PlateReader: Send + Sync {
    fn extract(&self, image: &GrayImage) -> Option<Plate>;
}

/// Plate reader shelling out to the tesseract CLI
///
/// Single-line page segmentation with an alphanumeric whitelist; raw
/// output is cleaned and validated through [`Plate::parse`].
pub struct TesseractReader {
    command: String,
}

impl TesseractReader {
    pub fn new(command: &str) -> Self {
        Self { command: command.to_string() }
    }

    fn run_ocr(&self, png: &[u8]) -> Option<String> {
        let mut child = Command::new(&self.command)
            .args(["stdin", "stdout", "--psm", "7"])
            .arg("-c")
            .arg("tessedit_char_whitelist=ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| warn!(command = %self.command, error = %e, "ocr_spawn_failed"))
            .ok()?;

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(png) {
                warn!(error = %e, "ocr_stdin_write_failed");
            }
            // drop closes the pipe so tesseract sees EOF
        }

        let deadline = Instant::now() + OCR_TIMEOUT;
        loop {
            match child.try_wait() {
                Ok(Some(status)) if status.success() => break,
                Ok(Some(status)) => {
                    warn!(status = %status, "ocr_exited_with_error");
                    return None;
                }
                Ok(None) => {
                    if Instant::now() >= deadline {
                        warn!("ocr_timeout_killing_process");
                        let _ = child.kill();
                        let _ = child.wait();
                        return None;
                    }
                    std::thread::sleep(Duration::from_millis(50));
                }
                Err(e) => {
                    warn!(error = %e, "ocr_wait_failed");
                    return None;
                }
            }
        }

        let mut output = String::new();
        use std::io::Read;
        child.stdout.take()?.read_to_string(&mut output).ok()?;
        Some(output)
    }
}

impl PlateReader for TesseractReader {
    fn extract(&self, image: &GrayImage) -> Option<Plate> {
        let mut png = Cursor::new(Vec::new());
        if let Err(e) = image.write_to(&mut png, image::ImageFormat::Png) {
            warn!(error = %e, "ocr_png_encode_failed");
            return None;
        }

        let raw = self.run_ocr(png.get_ref())?;
        match Plate::parse(&raw) {
            Some(plate) => {
                debug!(plate = %plate, "plate_extracted");
                Some(plate)
            }
            None => {
                debug!(raw = %raw.trim(), "plate_text_rejected");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Stub reader returning a fixed sequence of results
    pub struct StubReader {
        results: parking_lot::Mutex<Vec<Option<Plate>>>,
    }

    impl StubReader {
        pub fn new(mut results: Vec<Option<Plate>>) -> Self {
            results.reverse();
            Self { results: parking_lot::Mutex::new(results) }
        }
    }

    impl PlateReader for StubReader {
        fn extract(&self, _image: &GrayImage) -> Option<Plate> {
            self.results.lock().pop().flatten()
        }
    }

    #[test]
    fn test_stub_reader_sequences_results() {
        let reader = StubReader::new(vec![None, Plate::parse("ABC123")]);
        let image = GrayImage::new(8, 8);
        assert!(reader.extract(&image).is_none());
        assert_eq!(reader.extract(&image), Plate::parse("ABC123"));
        assert!(reader.extract(&image).is_none());
    }
}
