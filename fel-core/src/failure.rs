//! Append-only audit trail of failed certification attempts.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    sync::Mutex,
};
use thiserror::Error;

use crate::pos::PosOrder;

#[derive(Debug, Error)]
pub enum FailureSinkError {
    #[error("failed to write failure log '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode failure record: {0}")]
    Serialize(String),
}

/// One failed attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedOrderRecord {
    pub order_name: String,
    pub pos_reference: String,
    pub customer_name: String,
    pub amount_total: f64,
    pub error_message: String,
    pub recorded_at: DateTime<Utc>,
}

impl FailedOrderRecord {
    pub fn from_order(order: &PosOrder, error_message: impl Into<String>, recorded_at: DateTime<Utc>) -> Self {
        Self {
            order_name: order.name.clone(),
            pos_reference: order.pos_reference.clone(),
            customer_name: order.customer_name().to_string(),
            amount_total: order.amount_total,
            error_message: error_message.into(),
            recorded_at,
        }
    }
}

/// Destination for failure records. Implementations only ever append.
pub trait FailureSink: Send + Sync {
    fn record(&self, record: &FailedOrderRecord) -> Result<(), FailureSinkError>;
}

/// Newline-delimited JSON file, one record per line.
#[derive(Debug)]
pub struct JsonLinesFailureLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonLinesFailureLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> FailureSinkError {
        FailureSinkError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl FailureSink for JsonLinesFailureLog {
    fn record(&self, record: &FailedOrderRecord) -> Result<(), FailureSinkError> {
        let mut line =
            serde_json::to_string(record).map_err(|e| FailureSinkError::Serialize(e.to_string()))?;
        line.push('\n');

        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io_error(e))?;
        file.write_all(line.as_bytes()).map_err(|e| self.io_error(e))?;
        Ok(())
    }
}

/// In-memory sink for tests and embedding hosts.
#[derive(Debug, Default)]
pub struct MemoryFailureSink {
    records: Mutex<Vec<FailedOrderRecord>>,
}

impl MemoryFailureSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<FailedOrderRecord> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl FailureSink for MemoryFailureSink {
    fn record(&self, record: &FailedOrderRecord) -> Result<(), FailureSinkError> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(record.clone());
        Ok(())
    }
}
