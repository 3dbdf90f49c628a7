//! # Reading Sinks
//!
//! A sink receives every dispatched [`Reading`] and answers with the identifier
//! of the stored record. No identifier means the reading was not stored, which
//! the acquisition loop treats as fatal.

use crate::reading::Reading;
use chrono::{Local, NaiveDateTime};
use log::debug;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Sink rejected the reading: {0}")]
    Rejected(String),
}

/// Destination of dispatched readings.
#[async_trait::async_trait]
pub trait ReadingSink: Send {
    /// Stores one reading. `Ok(None)` means nothing was stored.
    async fn store(&mut self, reading: &Reading) -> Result<Option<u64>, SinkError>;
}

/// One persisted row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredReading {
    pub data_id: u64,
    pub created_on: NaiveDateTime,
    #[serde(flatten)]
    pub reading: Reading,
}

/// Appends one JSON object per reading to a file.
pub struct JsonLinesSink {
    path: PathBuf,
    next_id: u64,
}

impl JsonLinesSink {
    /// Opens `path`, continuing the id sequence of an existing file.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        let next_id = match tokio::fs::read_to_string(&path).await {
            Ok(content) => last_id(&content) + 1,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 1,
            Err(source) => return Err(SinkError::Io { path, source }),
        };
        debug!("{} opened, next data_id {next_id}", path.display());
        Ok(JsonLinesSink { path, next_id })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn last_id(content: &str) -> u64 {
    content
        .lines()
        .filter_map(|line| serde_json::from_str::<StoredReading>(line).ok())
        .map(|record| record.data_id)
        .max()
        .unwrap_or(0)
}

#[async_trait::async_trait]
impl ReadingSink for JsonLinesSink {
    async fn store(&mut self, reading: &Reading) -> Result<Option<u64>, SinkError> {
        let record = StoredReading {
            data_id: self.next_id,
            created_on: Local::now().naive_local(),
            reading: reading.clone(),
        };
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let io_err = |source| SinkError::Io {
            path: self.path.clone(),
            source,
        };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(io_err)?;
        file.write_all(line.as_bytes()).await.map_err(io_err)?;
        file.flush().await.map_err(io_err)?;

        self.next_id += 1;
        Ok(Some(record.data_id))
    }
}

/// Acknowledges readings without storing them, for runs with persistence off.
#[derive(Debug, Default)]
pub struct DiscardSink {
    count: u64,
}

#[async_trait::async_trait]
impl ReadingSink for DiscardSink {
    async fn store(&mut self, _reading: &Reading) -> Result<Option<u64>, SinkError> {
        self.count += 1;
        Ok(Some(self.count))
    }
}
