//! Per-user dialogue state kept in the key-value store

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::store::KeyValueStore;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Idle,
    AwaitingAmount,
    AwaitingDestinationWallet,
    AwaitingUserConfirmation,
    AwaitingExternalSettlement,
    AwaitingSwapChoice,
    AwaitingSwapAmount,
    AwaitingSwapConfirmation,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Idle => "idle",
            Step::AwaitingAmount => "awaiting_amount",
            Step::AwaitingDestinationWallet => "awaiting_destination_wallet",
            Step::AwaitingUserConfirmation => "awaiting_user_confirmation",
            Step::AwaitingExternalSettlement => "awaiting_external_settlement",
            Step::AwaitingSwapChoice => "awaiting_swap_choice",
            Step::AwaitingSwapAmount => "awaiting_swap_amount",
            Step::AwaitingSwapConfirmation => "awaiting_swap_confirmation",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSession {
    pub user_id: String,
    pub step: Step,
    pub amount_in: Option<Decimal>,
    pub destination_wallet: Option<String>,
    pub chosen_asset: Option<String>,
    pub pending_transaction_id: Option<Uuid>,
    /// Completed bridge a swap is paid from
    #[serde(default)]
    pub source_transaction_id: Option<Uuid>,
    /// Part of that bridge not yet swapped
    pub available_amount: Option<Decimal>,
    /// Last amount out shown to the user
    pub quoted_amount_out: Option<Decimal>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationSession {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            step: Step::Idle,
            amount_in: None,
            destination_wallet: None,
            chosen_asset: None,
            pending_transaction_id: None,
            source_transaction_id: None,
            available_amount: None,
            quoted_amount_out: None,
            updated_at: Utc::now(),
        }
    }

    pub fn at(mut self, step: Step) -> Self {
        self.step = step;
        self
    }

    /// A scratch field the current step relies on
    pub fn require<T: Clone>(&self, field: &Option<T>, name: &str) -> OrchestratorResult<T> {
        field.clone().ok_or_else(|| {
            OrchestratorError::Internal(format!(
                "session for {} at {} has no {}",
                self.user_id,
                self.step.as_str(),
                name
            ))
        })
    }
}

/// Sessions stored as JSON under `session:{user_id}`, expiring after `ttl`
#[derive(Clone)]
pub struct SessionStore {
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(store: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    fn key(user_id: &str) -> String {
        format!("session:{}", user_id)
    }

    pub async fn load(&self, user_id: &str) -> OrchestratorResult<Option<ConversationSession>> {
        let Some(raw) = self.store.get(&Self::key(user_id)).await? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| OrchestratorError::Store(format!("corrupt session for {}: {}", user_id, e)))
    }

    pub async fn save(&self, mut session: ConversationSession) -> OrchestratorResult<()> {
        session.updated_at = Utc::now();
        let raw = serde_json::to_string(&session)
            .map_err(|e| OrchestratorError::Internal(format!("session encoding failed: {}", e)))?;
        self.store
            .set(&Self::key(&session.user_id), &raw, Some(self.ttl))
            .await
    }

    pub async fn clear(&self, user_id: &str) -> OrchestratorResult<()> {
        self.store.delete(&Self::key(user_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_session_survives_round_trip_through_store() {
        let store = Arc::new(MemoryStore::new());
        let sessions = SessionStore::new(store.clone(), Duration::from_secs(60));

        let mut session = ConversationSession::new("u1").at(Step::AwaitingDestinationWallet);
        session.amount_in = Some(dec!(50.5));
        sessions.save(session).await.unwrap();

        let loaded = sessions.load("u1").await.unwrap().unwrap();
        assert_eq!(loaded.step, Step::AwaitingDestinationWallet);
        assert_eq!(loaded.amount_in, Some(dec!(50.5)));
        assert!(store.get("session:u1").await.unwrap().is_some());

        sessions.clear("u1").await.unwrap();
        assert!(sessions.load("u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_session_is_a_store_error() {
        let store = Arc::new(MemoryStore::new());
        store.set("session:u1", "not json", None).await.unwrap();

        let err = SessionStore::new(store, Duration::from_secs(60))
            .load("u1")
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Store(_)));
    }
}
