//! Audit trail of vault operations.
//!
//! Records every seal, open, and reset that reached a terminal outcome. The
//! log is append-only and lives in memory; attach an [`AuditSink`] to forward
//! records elsewhere. Records never contain plaintext, ciphertext, or nonces.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What was attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Seal,
    Open,
    Reset,
}

/// A sink that receives audit records.
pub trait AuditSink: Send {
    /// Append a record. Called once per terminal outcome.
    fn append(&mut self, record: AuditRecord);
}

/// A permanent record of one vault operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub operation: Operation,
    /// Ticket of the request, `0` for requests rejected before one was issued.
    pub ticket: u64,
    /// `success`, `cancelled`, or a failure reason code.
    pub outcome: String,
    pub timestamp: DateTime<Utc>,
}

impl AuditRecord {
    pub fn now(operation: Operation, ticket: u64, outcome: impl Into<String>) -> Self {
        Self {
            operation,
            ticket,
            outcome: outcome.into(),
            timestamp: Utc::now(),
        }
    }
}

/// An append-only log of vault operations.
/// Can forward records to additional sinks via `add_forward_sink`.
#[derive(Default)]
pub struct AuditLog {
    records: Vec<AuditRecord>,
    forward_sinks: Vec<Box<dyn AuditSink>>,
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog")
            .field("records", &self.records)
            .field("forward_sinks", &self.forward_sinks.len())
            .finish()
    }
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink to receive a copy of every record.
    pub fn add_forward_sink(&mut self, sink: Box<dyn AuditSink>) {
        self.forward_sinks.push(sink);
    }

    /// Append a new record to the log and forward to any attached sinks.
    pub fn append(&mut self, record: AuditRecord) {
        for sink in self.forward_sinks.iter_mut() {
            sink.append(record.clone());
        }
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, AuditRecord> {
        self.records.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct Shared(Arc<Mutex<Vec<AuditRecord>>>);

    impl AuditSink for Shared {
        fn append(&mut self, record: AuditRecord) {
            self.0.lock().unwrap().push(record);
        }
    }

    #[test]
    fn test_forward_sink_receives_copy() {
        let collected = Arc::new(Mutex::new(Vec::new()));
        let mut log = AuditLog::new();
        log.add_forward_sink(Box::new(Shared(Arc::clone(&collected))));

        log.append(AuditRecord::now(Operation::Seal, 1, "success"));
        log.append(AuditRecord::now(Operation::Open, 2, "cancelled"));

        assert_eq!(log.len(), 2);
        let collected = collected.lock().unwrap();
        assert_eq!(collected.len(), 2);
        assert_eq!(collected[1].outcome, "cancelled");
        assert_eq!(collected[1].operation, Operation::Open);
    }
}
