//! Admin activity recording
//!
//! Every administrative mutation leaves an audit row. Recording is best
//! effort: a failing recorder is logged and never fails the mutation.

use crate::Result;
use async_trait::async_trait;
use chrono::Utc;
use ledger_core::{AdminActivity, Ledger};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

/// Action names written to `action_type`
pub mod actions {
    /// Credits debited and transfer created
    pub const SETTLEMENT_INITIATED: &str = "settlement.initiated";
    /// Transfer status, hash or notes changed
    pub const SETTLEMENT_UPDATED: &str = "settlement.updated";
    /// Manual credit adjustment
    pub const CREDITS_ADJUSTED: &str = "credits.adjusted";
    /// Wallet registered
    pub const WALLET_ADDED: &str = "wallet.added";
    /// Account opened
    pub const USER_REGISTERED: &str = "user.registered";
}

/// Audit row before it is stamped with an id and timestamp
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityEntry {
    /// Acting admin
    pub admin_id: String,
    /// One of [`actions`]
    pub action_type: &'static str,
    /// Kind of touched entity
    pub entity_type: &'static str,
    /// ID of touched entity
    pub entity_id: String,
    /// Free-form context
    pub metadata: Value,
    /// State before the change
    pub old_values: Option<Value>,
    /// State after the change
    pub new_values: Option<Value>,
}

impl ActivityEntry {
    /// Entry with empty metadata and no snapshots
    pub fn new(
        admin_id: impl Into<String>,
        action_type: &'static str,
        entity_type: &'static str,
        entity_id: impl Into<String>,
    ) -> Self {
        Self {
            admin_id: admin_id.into(),
            action_type,
            entity_type,
            entity_id: entity_id.into(),
            metadata: Value::Object(Default::default()),
            old_values: None,
            new_values: None,
        }
    }

    /// Attach metadata
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Attach before/after snapshots
    pub fn with_values(mut self, old_values: Option<Value>, new_values: Option<Value>) -> Self {
        self.old_values = old_values;
        self.new_values = new_values;
        self
    }

    fn into_activity(self) -> AdminActivity {
        AdminActivity {
            id: Uuid::now_v7(),
            admin_id: self.admin_id,
            action_type: self.action_type.to_string(),
            entity_type: self.entity_type.to_string(),
            entity_id: self.entity_id,
            metadata: self.metadata,
            old_values: self.old_values,
            new_values: self.new_values,
            created_at: Utc::now(),
        }
    }
}

/// Audit log sink
#[async_trait]
pub trait ActivityRecorder: Send + Sync + std::fmt::Debug {
    /// Append one row
    async fn record(&self, entry: ActivityEntry) -> Result<AdminActivity>;

    /// Most recent rows, newest first
    async fn list_activities(&self, limit: usize) -> Result<Vec<AdminActivity>>;
}

/// Recorder backed by the ledger's `activity` column family
#[derive(Debug, Clone)]
pub struct LedgerActivityRecorder {
    ledger: Arc<Ledger>,
}

impl LedgerActivityRecorder {
    /// Create recorder
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl ActivityRecorder for LedgerActivityRecorder {
    async fn record(&self, entry: ActivityEntry) -> Result<AdminActivity> {
        let activity = entry.into_activity();
        self.ledger.record_activity(&activity)?;

        tracing::debug!(
            activity_id = %activity.id,
            admin_id = %activity.admin_id,
            action_type = %activity.action_type,
            entity_id = %activity.entity_id,
            "Admin activity recorded"
        );
        Ok(activity)
    }

    async fn list_activities(&self, limit: usize) -> Result<Vec<AdminActivity>> {
        Ok(self.ledger.recent_activities(limit)?)
    }
}

/// Record `entry`, logging and swallowing any failure
pub async fn record_quietly(recorder: &dyn ActivityRecorder, entry: ActivityEntry) {
    let action_type = entry.action_type;
    let entity_id = entry.entity_id.clone();

    if let Err(e) = recorder.record(entry).await {
        tracing::warn!(
            action_type,
            entity_id = %entity_id,
            error = %e,
            "Failed to record admin activity"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use ledger_core::Config;
    use serde_json::json;

    #[derive(Debug)]
    struct BrokenRecorder;

    #[async_trait]
    impl ActivityRecorder for BrokenRecorder {
        async fn record(&self, _entry: ActivityEntry) -> Result<AdminActivity> {
            Err(Error::Internal("audit store offline".to_string()))
        }

        async fn list_activities(&self, _limit: usize) -> Result<Vec<AdminActivity>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_ledger_recorder_round_trip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        let ledger = Arc::new(Ledger::open(config).await.unwrap());
        let recorder = LedgerActivityRecorder::new(ledger);

        let recorded = recorder
            .record(
                ActivityEntry::new("admin-1", actions::CREDITS_ADJUSTED, "user", "u1")
                    .with_metadata(json!({ "amount": 25, "reason": "goodwill" }))
                    .with_values(Some(json!({ "balance": 10 })), Some(json!({ "balance": 35 }))),
            )
            .await
            .unwrap();

        let listed = recorder.list_activities(5).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0], recorded);
        assert_eq!(listed[0].metadata["reason"], "goodwill");
    }

    #[tokio::test]
    async fn test_record_quietly_swallows_failures() {
        record_quietly(
            &BrokenRecorder,
            ActivityEntry::new("admin-1", actions::USER_REGISTERED, "user", "u1"),
        )
        .await;
    }
}
