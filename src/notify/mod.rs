//! Outbound user notifications
//!
//! Delivery is best-effort: a failed send is logged and counted but never
//! surfaces as an error of the caller and never touches the ledger.

mod webhook;

pub use webhook::WebhookNotifier;

use crate::error::OrchestratorResult;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

/// Messages pushed to a user outside of a request/reply exchange
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    BridgeCompleted {
        transaction_id: Uuid,
        amount_out: Decimal,
        destination_wallet: String,
        settlement_tx_hash: Option<String>,
    },
    BridgeFailed {
        transaction_id: Uuid,
        reason: String,
    },
    WalletStepTimedOut {
        transaction_id: Uuid,
    },
}

impl Notification {
    pub fn name(&self) -> &'static str {
        match self {
            Notification::BridgeCompleted { .. } => "bridge_completed",
            Notification::BridgeFailed { .. } => "bridge_failed",
            Notification::WalletStepTimedOut { .. } => "wallet_step_timed_out",
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, user_id: &str, notification: &Notification) -> OrchestratorResult<()>;
}

/// Send and swallow any failure
pub async fn deliver(notifier: &dyn Notifier, user_id: &str, notification: Notification) {
    if let Err(e) = notifier.send(user_id, &notification).await {
        warn!(
            "Failed to send {} notification to {}: {}",
            notification.name(),
            user_id,
            e
        );
        crate::metrics::record_notification_failure(notification.name());
    }
}

/// Writes notifications to the log when no chat gateway is configured
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, user_id: &str, notification: &Notification) -> OrchestratorResult<()> {
        info!(user_id, kind = notification.name(), "notification: {:?}", notification);
        Ok(())
    }
}

#[cfg(test)]
pub mod recording {
    use super::*;
    use crate::error::OrchestratorError;
    use std::sync::Mutex;

    /// Keeps every notification; optionally fails every send
    #[derive(Default)]
    pub struct RecordingNotifier {
        sent: Mutex<Vec<(String, Notification)>>,
        fail: bool,
    }

    impl RecordingNotifier {
        pub fn failing() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                fail: true,
            }
        }

        pub fn sent(&self) -> Vec<(String, Notification)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, user_id: &str, notification: &Notification) -> OrchestratorResult<()> {
            self.sent
                .lock()
                .unwrap()
                .push((user_id.to_string(), notification.clone()));
            if self.fail {
                return Err(OrchestratorError::NotificationDelivery {
                    user_id: user_id.to_string(),
                    message: "chat unavailable".into(),
                });
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::recording::RecordingNotifier;
    use super::*;

    #[tokio::test]
    async fn test_deliver_swallows_failures() {
        let notifier = RecordingNotifier::failing();
        deliver(
            &notifier,
            "u1",
            Notification::WalletStepTimedOut {
                transaction_id: Uuid::new_v4(),
            },
        )
        .await;

        assert_eq!(notifier.sent().len(), 1);
    }

    #[test]
    fn test_notification_wire_shape() {
        let id = Uuid::nil();
        let json = serde_json::to_value(Notification::BridgeFailed {
            transaction_id: id,
            reason: "provider_stuck".into(),
        })
        .unwrap();

        assert_eq!(json["kind"], "bridge_failed");
        assert_eq!(json["reason"], "provider_stuck");
    }
}
