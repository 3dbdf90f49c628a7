//! # Frame Reader
//!
//! This module owns the serial side of the customer interface: opening the port
//! (8N1), pulling fixed-size windows of [`WINDOW_SIZE`] bytes, and the flush and
//! reopen recovery used after framing errors.
//!
//! The acquisition loop talks to the link through the [`MeterLink`] trait so the
//! pipeline can run against [`crate::mbus::serial_mock::MockSerialPort`] in tests.

use crate::constants::{DEFAULT_BAUDRATE, WINDOW_SIZE};
use crate::error::MeterError;
use crate::util::hex::encode_hex_upper;
use bytes::{Bytes, BytesMut};
use log::{debug, info};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_serial::{ClearBuffer, SerialPort, SerialPortBuilderExt, SerialStream};

/// Fixed-size block of bytes read from the link in one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawWindow {
    bytes: Bytes,
}

impl RawWindow {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Upper-case hex rendering, the representation used in captures.
    pub fn to_hex(&self) -> String {
        encode_hex_upper(&self.bytes)
    }
}

impl From<Vec<u8>> for RawWindow {
    fn from(bytes: Vec<u8>) -> Self {
        RawWindow {
            bytes: Bytes::from(bytes),
        }
    }
}

impl From<Bytes> for RawWindow {
    fn from(bytes: Bytes) -> Self {
        RawWindow { bytes }
    }
}

/// Source of raw windows.
#[async_trait::async_trait]
pub trait MeterLink: Send {
    /// Reads exactly one window. No retry: failures go back to the caller.
    async fn read_window(&mut self) -> Result<RawWindow, MeterError>;

    /// Drops pending output and reopens the channel.
    async fn recover(&mut self) -> Result<(), MeterError>;
}

/// Reads exactly [`WINDOW_SIZE`] bytes from `reader`.
pub async fn read_window_from<R>(reader: &mut R) -> Result<RawWindow, MeterError>
where
    R: AsyncRead + Unpin + Send,
{
    let mut buf = BytesMut::zeroed(WINDOW_SIZE);
    reader
        .read_exact(&mut buf)
        .await
        .map_err(|e| MeterError::Link(e.to_string()))?;
    Ok(RawWindow::from(buf.freeze()))
}

/// Configuration for the serial connection.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    pub port: String,
    pub baudrate: u32,
}

impl SerialConfig {
    pub fn new(port: impl Into<String>) -> Self {
        SerialConfig {
            port: port.into(),
            baudrate: DEFAULT_BAUDRATE,
        }
    }
}

/// Serial connection to the meter's customer interface.
pub struct SerialLink {
    config: SerialConfig,
    port: Option<SerialStream>,
}

impl SerialLink {
    /// Opens the serial port with 8 data bits, no parity and one stop bit.
    pub fn open(config: SerialConfig) -> Result<Self, MeterError> {
        let port = open_port(&config)?;
        info!("Opened {} at {} baud", config.port, config.baudrate);
        Ok(SerialLink {
            config,
            port: Some(port),
        })
    }
}

fn open_port(config: &SerialConfig) -> Result<SerialStream, MeterError> {
    tokio_serial::new(&config.port, config.baudrate)
        .data_bits(tokio_serial::DataBits::Eight)
        .parity(tokio_serial::Parity::None)
        .stop_bits(tokio_serial::StopBits::One)
        .open_native_async()
        .map_err(|e| MeterError::Link(format!("{}: {e}", config.port)))
}

#[async_trait::async_trait]
impl MeterLink for SerialLink {
    async fn read_window(&mut self) -> Result<RawWindow, MeterError> {
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| MeterError::Link(format!("{} is closed", self.config.port)))?;
        read_window_from(port).await
    }

    async fn recover(&mut self) -> Result<(), MeterError> {
        if let Some(port) = self.port.take() {
            port.clear(ClearBuffer::Output)
                .map_err(|e| MeterError::Link(e.to_string()))?;
            // Dropping the stream closes the port.
            drop(port);
        }
        debug!("Reopening {}", self.config.port);
        self.port = Some(open_port(&self.config)?);
        Ok(())
    }
}
