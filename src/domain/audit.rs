use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{format_cents, ledger_now, Cents, TransactionId, TransactionRecord};

pub type AuditId = Uuid;

/// Action tag for fund movements.
pub const ACTION_TRANSFER: &str = "TRANSFER";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditStatus {
    Success,
    Failure,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Success => "SUCCESS",
            AuditStatus::Failure => "FAILURE",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "SUCCESS" => Some(AuditStatus::Success),
            "FAILURE" => Some(AuditStatus::Failure),
            _ => None,
        }
    }
}

/// An immutable, security-relevant event correlated with ledger activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: AuditId,
    pub sequence: i64,
    pub transaction_id: Option<TransactionId>,
    pub action: String,
    pub details: String,
    pub status: AuditStatus,
    pub sender_user_id: Option<String>,
    pub receiver_user_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(action: impl Into<String>, details: impl Into<String>, status: AuditStatus) -> Self {
        Self {
            id: Uuid::new_v4(),
            sequence: 0, // Will be set by repository
            transaction_id: None,
            action: action.into(),
            details: details.into(),
            status,
            sender_user_id: None,
            receiver_user_id: None,
            timestamp: ledger_now(),
        }
    }

    /// The SUCCESS entry written alongside a committed transfer.
    pub fn transfer_success(record: &TransactionRecord) -> Self {
        let mut entry = Self::new(
            ACTION_TRANSFER,
            format!(
                "{} sent {} to {}",
                record.sender_user_id,
                format_cents(record.amount_cents),
                record.receiver_user_id
            ),
            AuditStatus::Success,
        )
        .with_parties(&record.sender_user_id, &record.receiver_user_id);
        entry.transaction_id = Some(record.id);
        entry.timestamp = record.timestamp;
        entry
    }

    /// A FAILURE entry for a rejected transfer attempt.
    /// `amount_cents` is `None` when the amount itself could not be parsed.
    pub fn transfer_failure(
        sender_user_id: &str,
        receiver_user_id: &str,
        amount_cents: Option<Cents>,
        reason: &str,
    ) -> Self {
        let attempted = amount_cents
            .map(format_cents)
            .unwrap_or_else(|| "an invalid amount".to_string());
        Self::new(
            ACTION_TRANSFER,
            format!(
                "{} failed to send {} to {}: {}",
                sender_user_id, attempted, receiver_user_id, reason
            ),
            AuditStatus::Failure,
        )
        .with_parties(sender_user_id, receiver_user_id)
    }

    pub fn with_parties(mut self, sender: &str, receiver: &str) -> Self {
        self.sender_user_id = Some(sender.to_string());
        self.receiver_user_id = Some(receiver.to_string());
        self
    }

    pub fn involves(&self, user_id: &str) -> bool {
        self.sender_user_id.as_deref() == Some(user_id)
            || self.receiver_user_id.as_deref() == Some(user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TransferLeg;

    #[test]
    fn test_transfer_success_entry() {
        let sender = TransferLeg {
            account_id: Uuid::new_v4(),
            user_id: "alice".into(),
            balance_after: 30_000,
        };
        let receiver = TransferLeg {
            account_id: Uuid::new_v4(),
            user_id: "bob".into(),
            balance_after: 70_000,
        };
        let record = TransactionRecord::completed(&sender, &receiver, 20_000, None);

        let entry = AuditEntry::transfer_success(&record);

        assert_eq!(entry.action, ACTION_TRANSFER);
        assert_eq!(entry.status, AuditStatus::Success);
        assert_eq!(entry.transaction_id, Some(record.id));
        assert_eq!(entry.details, "alice sent 200.00 to bob");
        assert_eq!(entry.timestamp, record.timestamp);
        assert!(entry.involves("alice"));
        assert!(entry.involves("bob"));
    }

    #[test]
    fn test_transfer_failure_entry() {
        let entry = AuditEntry::transfer_failure("alice", "bob", Some(40_000), "insufficient funds");
        assert_eq!(entry.status, AuditStatus::Failure);
        assert!(entry.transaction_id.is_none());
        assert_eq!(
            entry.details,
            "alice failed to send 400.00 to bob: insufficient funds"
        );

        let unparsed = AuditEntry::transfer_failure("alice", "bob", None, "invalid amount");
        assert!(unparsed.details.contains("an invalid amount"));
    }

    #[test]
    fn test_status_roundtrip() {
        for status in [AuditStatus::Success, AuditStatus::Failure] {
            assert_eq!(AuditStatus::from_str(status.as_str()), Some(status));
        }
    }
}
