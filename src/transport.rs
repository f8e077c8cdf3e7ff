use crate::constants::*;
use parking_lot::Mutex;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Duration;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),
    #[error("link is closed")]
    Closed,
}

/// Byte sink for the physical link.
///
/// `write` must return promptly: either the frame is accepted or an error is
/// reported. Retrying is left to the implementation.
pub trait Transport: Send + Sync {
    fn write(&self, frame: &[u8]) -> Result<(), TransportError>;
    fn is_open(&self) -> bool;
}

/// USB serial link to the servo board.
pub struct SerialTransport {
    port: Mutex<Option<Box<dyn serialport::SerialPort>>>,
    name: String,
}

impl SerialTransport {
    /// Opens `path` at 8N1 and waits for the board to come out of reset.
    pub async fn open(path: &str, baud_rate: u32) -> Result<Self, TransportError> {
        let name = path.to_string();
        let port = tokio::task::spawn_blocking(move || -> Result<Box<dyn serialport::SerialPort>, TransportError> {
            let mut port = serialport::new(&name, baud_rate)
                .data_bits(serialport::DataBits::Eight)
                .stop_bits(serialport::StopBits::One)
                .parity(serialport::Parity::None)
                .flow_control(serialport::FlowControl::None)
                .timeout(Duration::from_millis(WRITE_TIMEOUT_MS))
                .open()?;

            // DTR high / RTS low keeps ESP32-style boards out of the bootloader.
            if let Err(e) = port.write_data_terminal_ready(true) {
                warn!("could not set DTR, continuing anyway: {}", e);
            }
            if let Err(e) = port.write_request_to_send(false) {
                warn!("could not clear RTS, continuing anyway: {}", e);
            }
            Ok(port)
        })
        .await
        .map_err(|e| TransportError::Io(std::io::Error::other(e)))??;

        debug!("waiting {}ms for {} to settle", LINK_SETTLE_MS, path);
        tokio::time::sleep(Duration::from_millis(LINK_SETTLE_MS)).await;
        info!("serial link open on {} at {} baud", path, baud_rate);

        Ok(SerialTransport {
            port: Mutex::new(Some(port)),
            name: path.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn close(&self) {
        if self.port.lock().take().is_some() {
            info!("serial link on {} closed", self.name);
        }
    }
}

impl Transport for SerialTransport {
    fn write(&self, frame: &[u8]) -> Result<(), TransportError> {
        let mut guard = self.port.lock();
        let port = guard.as_mut().ok_or(TransportError::Closed)?;
        port.write_all(frame)?;
        port.flush()?;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.port.lock().is_some()
    }
}

/// In-memory sink that keeps every frame it accepts.
#[derive(Clone, Default)]
pub struct RecordingTransport {
    frames: Arc<Mutex<Vec<Vec<u8>>>>,
    failing: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.frames.lock().clone()
    }

    /// Frames decoded as text, handy for assertions and dry-run output.
    pub fn lines(&self) -> Vec<String> {
        self.frames
            .lock()
            .iter()
            .map(|f| String::from_utf8_lossy(f).trim_end().to_string())
            .collect()
    }

    pub fn clear(&self) {
        self.frames.lock().clear();
    }

    /// While set, every write fails with an i/o error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl Transport for RecordingTransport {
    fn write(&self, frame: &[u8]) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "simulated write failure",
            )));
        }
        self.frames.lock().push(frame.to_vec());
        Ok(())
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_transport_keeps_frames_in_order() {
        let transport = RecordingTransport::new();
        transport.write(b"#0P500\n").unwrap();
        transport.write(b"#1P2500\n").unwrap();
        assert_eq!(transport.lines(), vec!["#0P500", "#1P2500"]);
    }

    #[test]
    fn failing_and_closed_writes_are_reported() {
        let transport = RecordingTransport::new();
        transport.set_failing(true);
        assert!(matches!(transport.write(b"x"), Err(TransportError::Io(_))));
        transport.set_failing(false);
        transport.close();
        assert!(!transport.is_open());
        assert!(matches!(transport.write(b"x"), Err(TransportError::Closed)));
        assert!(transport.frames().is_empty());
    }

    #[tokio::test]
    async fn opening_a_missing_port_fails() {
        let result = SerialTransport::open("/dev/this-port-does-not-exist", BAUD_RATE).await;
        assert!(result.is_err());
    }
}
