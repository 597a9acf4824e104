//! Queue store trait definition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use repsync_common::{MutationId, MutationKind, Result};

/// A write waiting to be accepted by the remote endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingMutation {
    /// Identifier within the kind's segment.
    pub id: MutationId,
    /// Segment the record lives in.
    pub kind: MutationKind,
    /// Data replayed against the remote endpoint. Opaque to the queue.
    pub payload: serde_json::Value,
    /// Creation time. Never changes.
    pub enqueued_at: DateTime<Utc>,
    /// Set once the remote endpoint accepts the write.
    pub synced: bool,
    /// Number of failed submission attempts.
    pub retry_count: u32,
    /// Time of the most recent submission attempt.
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// Most recent failure description. Advisory only.
    pub last_error: Option<String>,
}

impl PendingMutation {
    /// Whether the record has used up its submission attempts.
    pub fn is_abandoned(&self, max_retries: u32) -> bool {
        !self.synced && self.retry_count >= max_retries
    }
}

/// Durable, per-kind segmented queue of pending mutations.
///
/// Implementations must persist across process restarts. Only the sync
/// engine calls the lifecycle methods; UI code only enqueues.
#[async_trait]
pub trait MutationQueue: Send + Sync {
    /// Record a new write.
    ///
    /// # Postconditions
    /// - Record is stored with `retry_count = 0` and `synced = false`
    /// - Returned id is greater than every id previously issued for `kind`
    ///
    /// Never touches the network, so it succeeds while offline.
    async fn enqueue(
        &self,
        kind: MutationKind,
        payload: serde_json::Value,
        enqueued_at: DateTime<Utc>,
    ) -> Result<MutationId>;

    /// Unsynced records of a kind, ascending by id.
    ///
    /// Abandoned records are included; eligibility is the retry policy's call.
    async fn list_pending(&self, kind: MutationKind) -> Result<Vec<PendingMutation>>;

    /// Fetch a single record, synced or not.
    async fn get(&self, kind: MutationKind, id: MutationId) -> Result<Option<PendingMutation>>;

    /// Mark a record as accepted by the remote endpoint.
    ///
    /// # Errors
    /// - Record not found
    async fn mark_synced(&self, kind: MutationKind, id: MutationId) -> Result<()>;

    /// Record a failed submission attempt.
    ///
    /// Increments `retry_count`, sets `last_attempt_at` and `last_error`.
    /// A record that is already synced is left untouched.
    ///
    /// # Errors
    /// - Record not found
    async fn mark_failed(
        &self,
        kind: MutationKind,
        id: MutationId,
        error: &str,
        attempted_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Delete synced records of a kind. Returns how many were removed.
    async fn purge_synced(&self, kind: MutationKind) -> Result<usize>;

    /// Number of unsynced records of a kind.
    async fn count_pending(&self, kind: MutationKind) -> Result<usize>;

    /// Unsynced records whose attempts are exhausted.
    async fn list_abandoned(
        &self,
        kind: MutationKind,
        max_retries: u32,
    ) -> Result<Vec<PendingMutation>>;

    /// Number of unsynced records across every kind.
    async fn count_all_pending(&self) -> Result<usize> {
        let mut total = 0;
        for kind in MutationKind::ALL {
            total += self.count_pending(kind).await?;
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abandoned_requires_unsynced() {
        let mut record = PendingMutation {
            id: MutationId::new(1),
            kind: MutationKind::SetWrite,
            payload: serde_json::json!({}),
            enqueued_at: Utc::now(),
            synced: false,
            retry_count: 10,
            last_attempt_at: Some(Utc::now()),
            last_error: Some("boom".to_string()),
        };
        assert!(record.is_abandoned(10));
        assert!(!record.is_abandoned(11));

        record.synced = true;
        assert!(!record.is_abandoned(10));
    }
}
