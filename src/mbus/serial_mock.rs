//! Mock serial port implementation for testing
//!
//! This module provides a mock meter link that can be used to exercise the
//! acquisition pipeline without requiring actual hardware.

use crate::error::MeterError;
use crate::mbus::serial::{read_window_from, MeterLink, RawWindow};
use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};

/// Mock serial port that replays queued bytes
#[derive(Clone, Default)]
pub struct MockSerialPort {
    /// Data to be read from the port (incoming)
    pub rx_buffer: Arc<Mutex<VecDeque<u8>>>,
    /// Simulated read errors, consumed one per read
    pub read_errors: Arc<Mutex<VecDeque<io::Error>>>,
    /// Number of flush + reopen cycles requested
    pub recoveries: Arc<Mutex<usize>>,
    /// Number of windows handed out
    pub windows_read: Arc<Mutex<usize>>,
}

impl MockSerialPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue data to be read from the port
    pub fn queue_rx_data(&self, data: &[u8]) {
        let mut rx = self.rx_buffer.lock().unwrap();
        rx.extend(data);
    }

    /// Queue an error for the next read
    pub fn queue_read_error(&self, error: io::Error) {
        self.read_errors.lock().unwrap().push_back(error);
    }

    /// Bytes still waiting to be read
    pub fn pending(&self) -> usize {
        self.rx_buffer.lock().unwrap().len()
    }

    pub fn recoveries(&self) -> usize {
        *self.recoveries.lock().unwrap()
    }

    pub fn windows_read(&self) -> usize {
        *self.windows_read.lock().unwrap()
    }

    /// Clear all buffers
    pub fn clear(&self) {
        self.rx_buffer.lock().unwrap().clear();
        self.read_errors.lock().unwrap().clear();
    }
}

impl AsyncRead for MockSerialPort {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if let Some(error) = self.read_errors.lock().unwrap().pop_front() {
            return Poll::Ready(Err(error));
        }

        let mut rx = self.rx_buffer.lock().unwrap();
        let available = rx.len().min(buf.remaining());

        if available > 0 {
            let data: Vec<u8> = rx.drain(..available).collect();
            buf.put_slice(&data);
        }

        // An empty read signals EOF, which `read_exact` reports as UnexpectedEof.
        Poll::Ready(Ok(()))
    }
}

#[async_trait::async_trait]
impl MeterLink for MockSerialPort {
    async fn read_window(&mut self) -> Result<RawWindow, MeterError> {
        let window = read_window_from(self).await?;
        *self.windows_read.lock().unwrap() += 1;
        Ok(window)
    }

    async fn recover(&mut self) -> Result<(), MeterError> {
        *self.recoveries.lock().unwrap() += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::WINDOW_SIZE;

    #[tokio::test]
    async fn test_window_from_queue() {
        let mut port = MockSerialPort::new();
        port.queue_rx_data(&vec![0x68; WINDOW_SIZE + 4]);

        let window = port.read_window().await.unwrap();
        assert_eq!(window.len(), WINDOW_SIZE);
        assert_eq!(port.pending(), 4);
        assert_eq!(port.windows_read(), 1);
    }

    #[tokio::test]
    async fn test_empty_queue_is_link_error() {
        let mut port = MockSerialPort::new();
        assert!(matches!(port.read_window().await, Err(MeterError::Link(_))));
    }

    #[tokio::test]
    async fn test_queued_error() {
        let mut port = MockSerialPort::new();
        port.queue_rx_data(&vec![0x68; WINDOW_SIZE]);
        port.queue_read_error(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged"));

        assert!(port.read_window().await.is_err());
        assert!(port.read_window().await.is_ok());
    }

    #[tokio::test]
    async fn test_recover_counts() {
        let mut port = MockSerialPort::new();
        let observer = port.clone();
        port.recover().await.unwrap();
        port.recover().await.unwrap();
        assert_eq!(observer.recoveries(), 2);
    }

    #[test]
    fn test_clear_buffers() {
        let port = MockSerialPort::new();
        port.queue_rx_data(&[1, 2, 3]);
        port.clear();
        assert_eq!(port.pending(), 0);
    }

    #[test]
    fn test_short_queue_is_link_error() {
        let mut port = MockSerialPort::new();
        port.queue_rx_data(&[0x68; 10]);
        let err = tokio_test::block_on(port.read_window()).unwrap_err();
        assert!(matches!(err, MeterError::Link(_)));
        assert_eq!(port.windows_read(), 0);
    }
}
