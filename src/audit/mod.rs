//! Audit trail
//!
//! Two event families feed the external logging/report collaborator: PII
//! access events, appended on every encrypt/decrypt attempt whether it
//! succeeds or fails, and change events appended on every committed write.
//! PII events carry the plaintext length only, never the plaintext.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Operation tag of a PII access event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PiiOperation {
    /// Successful encryption
    Encrypt,
    /// Failed encryption attempt
    EncryptFailed,
    /// Successful decryption
    Decrypt,
    /// Failed decryption attempt (tamper or unresolvable key)
    DecryptFailed,
}

impl PiiOperation {
    /// Stable uppercase tag used in exported audit rows
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Encrypt => "ENCRYPT",
            Self::EncryptFailed => "ENCRYPT_FAILED",
            Self::Decrypt => "DECRYPT",
            Self::DecryptFailed => "DECRYPT_FAILED",
        }
    }
}

/// One encryption or decryption attempt.
///
/// Decryption is a PII-access event regardless of outcome, so failures are
/// recorded with the same shape as successes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PiiAccessEvent {
    /// Logical name of the key the operation ran under
    pub key_name: String,
    /// What happened
    pub operation: PiiOperation,
    /// Identity of the caller
    pub principal: String,
    /// Length of the plaintext involved; zero for failed decrypts
    pub plaintext_len: usize,
    /// When the attempt happened
    pub at: DateTime<Utc>,
}

/// Kind of a committed write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeOperation {
    /// Record created
    Insert,
    /// Record modified
    Update,
    /// Record soft-deleted
    Delete,
}

/// One committed write, in the shape the report collaborator consumes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Logical table the record belongs to
    pub table: String,
    /// Primary key of the record
    pub record_id: String,
    /// Kind of write
    pub operation: ChangeOperation,
    /// Prior field values, when the write replaced existing data
    pub old_values: Option<serde_json::Value>,
    /// New field values
    pub new_values: Option<serde_json::Value>,
    /// Identity of the caller
    pub principal: String,
    /// Barangay code the record belongs to, when geographic
    pub geographic_code: Option<String>,
    /// When the write committed
    pub at: DateTime<Utc>,
}

/// Destination for audit events.
///
/// The registry appends through this trait so deployments can forward events
/// to their own logging pipeline; tests use the in-memory sink.
pub trait AuditSink: Send + Sync + std::fmt::Debug {
    /// Append a PII access event
    fn record_pii_access(&self, event: PiiAccessEvent);

    /// Append a change event
    fn record_change(&self, event: ChangeEvent);
}

/// In-memory audit sink
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    pii_events: Mutex<Vec<PiiAccessEvent>>,
    change_events: Mutex<Vec<ChangeEvent>>,
}

impl MemoryAuditLog {
    /// Create an empty log
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all PII access events so far
    #[must_use]
    pub fn pii_events(&self) -> Vec<PiiAccessEvent> {
        self.pii_events.lock().expect("audit lock poisoned").clone()
    }

    /// Snapshot of all change events so far
    #[must_use]
    pub fn change_events(&self) -> Vec<ChangeEvent> {
        self.change_events
            .lock()
            .expect("audit lock poisoned")
            .clone()
    }
}

impl AuditSink for MemoryAuditLog {
    fn record_pii_access(&self, event: PiiAccessEvent) {
        self.pii_events
            .lock()
            .expect("audit lock poisoned")
            .push(event);
    }

    fn record_change(&self, event: ChangeEvent) {
        self.change_events
            .lock()
            .expect("audit lock poisoned")
            .push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_tags() {
        assert_eq!(PiiOperation::Encrypt.as_str(), "ENCRYPT");
        assert_eq!(PiiOperation::DecryptFailed.as_str(), "DECRYPT_FAILED");
    }

    #[test]
    fn test_memory_log_records_in_order() {
        let log = MemoryAuditLog::new();
        for operation in [PiiOperation::Encrypt, PiiOperation::Decrypt] {
            log.record_pii_access(PiiAccessEvent {
                key_name: "pii_master_key".to_string(),
                operation,
                principal: "clerk-1".to_string(),
                plaintext_len: 4,
                at: Utc::now(),
            });
        }
        let events = log.pii_events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].operation, PiiOperation::Encrypt);
        assert_eq!(events[1].operation, PiiOperation::Decrypt);
    }
}
