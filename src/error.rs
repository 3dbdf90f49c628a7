//! # Meter Error Handling
//!
//! This module defines the MeterError enum, which represents the different error
//! types that can occur while acquiring and decoding smart meter frames.
//!
//! Each pipeline stage has its own error type ([`FrameError`], [`DecryptError`],
//! [`DecodeError`], [`SinkError`]); they convert into `MeterError` so the
//! acquisition loop can apply one handling policy per class.

use crate::dlms::apdu::DecodeError;
use crate::dlms::security::DecryptError;
use crate::mbus::envelope::FrameError;
use crate::reading::Quantity;
use crate::sink::SinkError;
use std::time::Duration;
use thiserror::Error;

/// Represents the different error types that can occur in the meter pipeline.
#[derive(Debug, Error)]
pub enum MeterError {
    /// I/O failure on the serial link (timeout, disconnect, short read).
    #[error("Serial link error: {0}")]
    Link(String),

    /// The M-Bus wrapper of the raw window is malformed.
    #[error("Invalid M-Bus frame: {0}")]
    FrameInvalid(#[from] FrameError),

    /// Authenticated decryption failed.
    #[error("Decryption failed: {0}")]
    Decrypt(#[from] DecryptError),

    /// The decrypted APDU could not be parsed.
    #[error("APDU decode failed: {0}")]
    Decode(#[from] DecodeError),

    /// Fewer than all registry quantities were populated in this cycle.
    #[error("Incomplete reading, missing: {}", format_missing(.missing))]
    IncompleteReading { missing: Vec<Quantity> },

    /// The sink refused the reading or returned no record identifier.
    #[error("Dispatch to sink failed: {0}")]
    Dispatch(String),

    /// No reading was dispatched within the link-health deadline.
    #[error("No reading dispatched within {0:?}")]
    LinkHealthTimeout(Duration),

    /// Configuration file missing, unreadable or incomplete.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Decryption key missing or malformed.
    #[error("Key error: {0}")]
    Key(String),
}

impl MeterError {
    /// Fatal errors end the acquisition loop and the process.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MeterError::Dispatch(_)
                | MeterError::LinkHealthTimeout(_)
                | MeterError::Config(_)
                | MeterError::Key(_)
        )
    }
}

impl From<SinkError> for MeterError {
    fn from(err: SinkError) -> Self {
        MeterError::Dispatch(err.to_string())
    }
}

fn format_missing(missing: &[Quantity]) -> String {
    missing
        .iter()
        .map(|q| q.name())
        .collect::<Vec<_>>()
        .join(", ")
}
