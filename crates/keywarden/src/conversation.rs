use crate::wallet::WalletId;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Why a verification code is being awaited.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CodePurpose {
    LinkDevice,
    ResetPin,
}

/// What free-text follow-up, if any, the user currently owes us.
///
/// A closed enum rather than a string tag: every flow is handled
/// exhaustively and "unknown state" is unrepresentable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Pending {
    ImportingWallet,
    RenamingWallet { wallet_id: WalletId },
    ChangingAddress,
    ExportConfirmPending { wallet_id: WalletId },
    SettingPin,
    AwaitingCode { purpose: CodePurpose },
}

/// Durable record of a pending flow. At most one exists per user; starting a
/// new flow overwrites it (last-writer-wins, there is only one conversation).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateRecord {
    #[serde(flatten)]
    pub pending: Pending,
    pub created_at: DateTime<Utc>,
    /// Opaque payload a flow needs to complete (e.g. an expected link code).
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub aux: Value,
}

impl StateRecord {
    pub fn new(pending: Pending) -> Self {
        Self {
            pending,
            created_at: Utc::now(),
            aux: Value::Null,
        }
    }

    pub fn with_aux(pending: Pending, aux: Value) -> Self {
        Self {
            pending,
            created_at: Utc::now(),
            aux,
        }
    }

    /// A record the user abandoned long ago must not consume an unrelated
    /// message months later; stale records read as idle.
    pub fn is_stale(&self, ttl_seconds: u64, now: DateTime<Utc>) -> bool {
        let ttl = Duration::seconds(i64::try_from(ttl_seconds).unwrap_or(i64::MAX));
        now.signed_duration_since(self.created_at) > ttl
    }
}

/// Read the live pending state, treating stale records as absent.
pub fn live_pending(
    record: Option<&StateRecord>,
    ttl_seconds: u64,
    now: DateTime<Utc>,
) -> Option<&StateRecord> {
    record.filter(|r| !r.is_stale(ttl_seconds, now))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_record_is_live() {
        let r = StateRecord::new(Pending::ImportingWallet);
        assert!(live_pending(Some(&r), 900, Utc::now()).is_some());
    }

    #[test]
    fn stale_record_reads_as_idle() {
        let mut r = StateRecord::new(Pending::ImportingWallet);
        r.created_at = Utc::now() - Duration::seconds(901);
        assert!(live_pending(Some(&r), 900, Utc::now()).is_none());
    }

    #[test]
    fn state_record_serde_round_trip() -> eyre::Result<()> {
        let r = StateRecord::with_aux(
            Pending::AwaitingCode {
                purpose: CodePurpose::LinkDevice,
            },
            serde_json::json!({ "code_hash": "abc" }),
        );
        let s = serde_json::to_string(&r)?;
        let back: StateRecord = serde_json::from_str(&s)?;
        assert_eq!(back.pending, r.pending);
        assert_eq!(back.aux, r.aux);
        Ok(())
    }
}
