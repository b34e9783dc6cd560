//! Background reconciliation of pending bridges
//!
//! Each tick walks every `pending` bridge row and advances it:
//! - rows older than the bridge timeout are failed without asking the provider
//! - otherwise the provider status is polled and terminal answers are claimed
//!
//! Only the caller whose claim moved the row out of `pending` notifies the
//! user, so overlapping ticks (or instances) never double-notify.

use crate::bridge::{BridgeApi, BridgeStatus};
use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::ledger::{FailureReason, Ledger, Settlement, Transaction};
use crate::notify::{deliver, Notification, Notifier};

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{Notify, RwLock};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// What happened to one row during reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Failed(FailureReason),
    StillPending,
    /// Someone else settled the row first
    AlreadySettled,
}

/// Per-tick counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    pub completed: usize,
    pub failed: usize,
    pub still_pending: usize,
    pub errors: usize,
}

impl ReconcileSummary {
    fn record(&mut self, outcome: Option<Outcome>) {
        match outcome {
            Some(Outcome::Completed) => self.completed += 1,
            Some(Outcome::Failed(_)) => self.failed += 1,
            Some(Outcome::StillPending) => self.still_pending += 1,
            Some(Outcome::AlreadySettled) => {}
            None => self.errors += 1,
        }
    }
}

pub struct Reconciler {
    ledger: Arc<dyn Ledger>,
    bridge: Arc<dyn BridgeApi>,
    notifier: Arc<dyn Notifier>,
    poll_interval: Duration,
    bridge_timeout: Duration,
    max_concurrent_polls: usize,
    shutdown: Arc<RwLock<bool>>,
    wake: Notify,
}

impl Reconciler {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        bridge: Arc<dyn BridgeApi>,
        notifier: Arc<dyn Notifier>,
        config: &OrchestratorConfig,
    ) -> Self {
        Self {
            ledger,
            bridge,
            notifier,
            poll_interval: config.poll_interval(),
            bridge_timeout: config.bridge_timeout(),
            max_concurrent_polls: config.max_concurrent_polls.max(1),
            shutdown: Arc::new(RwLock::new(false)),
            wake: Notify::new(),
        }
    }

    /// Main reconciliation loop
    pub async fn run(&self) -> OrchestratorResult<()> {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Reconciler started (interval {:?}, timeout {:?})",
            self.poll_interval, self.bridge_timeout
        );

        loop {
            if *self.shutdown.read().await {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {
                    match self.tick().await {
                        Ok(summary) if summary != ReconcileSummary::default() => {
                            info!("Reconciliation tick: {:?}", summary);
                        }
                        Ok(_) => {}
                        Err(e) => error!("Error loading pending bridges: {}", e),
                    }
                }

                _ = self.wake.notified() => {}
            }
        }

        info!("Reconciler stopped");
        Ok(())
    }

    /// One pass over every pending bridge
    pub async fn tick(&self) -> OrchestratorResult<ReconcileSummary> {
        let pending = self.ledger.pending_bridges().await?;
        crate::metrics::record_reconcile_tick(pending.len());
        Ok(self.reconcile_all(pending).await)
    }

    /// Same per-row logic restricted to one user's pending bridges
    pub async fn reconcile_user(&self, user_id: &str) -> OrchestratorResult<ReconcileSummary> {
        let pending = self.ledger.pending_bridges_for_user(user_id).await?;
        Ok(self.reconcile_all(pending).await)
    }

    async fn reconcile_all(&self, rows: Vec<Transaction>) -> ReconcileSummary {
        let outcomes: Vec<Option<Outcome>> = stream::iter(rows)
            .map(|tx| async move {
                let id = tx.id;
                match self.reconcile_one(tx).await {
                    Ok(outcome) => Some(outcome),
                    Err(e) if e.is_retryable() => {
                        warn!("Transaction {} left for the next pass: {}", id, e);
                        None
                    }
                    Err(e) => {
                        error!("Failed to reconcile transaction {}: {}", id, e);
                        None
                    }
                }
            })
            .buffer_unordered(self.max_concurrent_polls)
            .collect()
            .await;

        let mut summary = ReconcileSummary::default();
        for outcome in outcomes {
            summary.record(outcome);
        }
        summary
    }

    /// Advance a single pending bridge
    pub async fn reconcile_one(&self, tx: Transaction) -> OrchestratorResult<Outcome> {
        let age = (Utc::now() - tx.created_at).to_std().unwrap_or_default();
        if age > self.bridge_timeout {
            warn!(
                "Bridge {} pending for {:?}, abandoning without polling",
                tx.id, age
            );
            return self.fail(&tx, FailureReason::TimedOut).await;
        }

        let external_ref = tx.external_ref.as_deref().ok_or_else(|| {
            OrchestratorError::Internal(format!("pending bridge {} has no external ref", tx.id))
        })?;

        let report = self.bridge.poll_status(external_ref).await.map_err(|e| {
            crate::metrics::record_status_poll("error");
            e
        })?;

        match report.status {
            BridgeStatus::Pending => {
                crate::metrics::record_status_poll("pending");
                debug!("Bridge {} still pending at provider", tx.id);
                Ok(Outcome::StillPending)
            }
            BridgeStatus::Executed => {
                crate::metrics::record_status_poll("executed");
                let amount_out = report.amount_out.ok_or_else(|| {
                    OrchestratorError::bridge(format!("{} executed without an amount", external_ref))
                })?;
                self.complete(&tx, amount_out, report.settlement_tx_hash).await
            }
            BridgeStatus::Failed => {
                crate::metrics::record_status_poll("failed");
                self.fail(&tx, FailureReason::ProviderFailed).await
            }
            BridgeStatus::Stuck => {
                crate::metrics::record_status_poll("stuck");
                self.fail(&tx, FailureReason::ProviderStuck).await
            }
        }
    }

    async fn complete(
        &self,
        tx: &Transaction,
        amount_out: rust_decimal::Decimal,
        settlement_tx_hash: Option<String>,
    ) -> OrchestratorResult<Outcome> {
        let settlement = Settlement::Completed {
            amount_out,
            settlement_tx_hash,
        };
        let Some(settled) = self.ledger.settle(tx.id, settlement).await? else {
            debug!("Bridge {} already settled elsewhere", tx.id);
            return Ok(Outcome::AlreadySettled);
        };

        info!(
            "Bridge {} completed for user {}: {} received",
            settled.id, settled.user_id, amount_out
        );
        crate::metrics::record_bridge_settled("bridge_completed");
        if let Some(latency) = settled
            .settled_at
            .and_then(|at| (at - settled.created_at).to_std().ok())
        {
            crate::metrics::record_bridge_latency(latency.as_secs_f64());
        }

        deliver(
            self.notifier.as_ref(),
            &settled.user_id,
            Notification::BridgeCompleted {
                transaction_id: settled.id,
                amount_out,
                destination_wallet: settled.destination_wallet.clone(),
                settlement_tx_hash: settled.settlement_tx_hash.clone(),
            },
        )
        .await;

        Ok(Outcome::Completed)
    }

    async fn fail(&self, tx: &Transaction, reason: FailureReason) -> OrchestratorResult<Outcome> {
        let Some(settled) = self
            .ledger
            .settle(tx.id, Settlement::Failed { reason })
            .await?
        else {
            debug!("Bridge {} already settled elsewhere", tx.id);
            return Ok(Outcome::AlreadySettled);
        };

        warn!("Bridge {} failed for user {}: {}", settled.id, settled.user_id, reason);
        crate::metrics::record_bridge_settled(reason.as_str());

        deliver(
            self.notifier.as_ref(),
            &settled.user_id,
            Notification::BridgeFailed {
                transaction_id: settled.id,
                reason: reason.to_string(),
            },
        )
        .await;

        Ok(Outcome::Failed(reason))
    }

    /// Stop the loop after the current tick
    pub async fn stop(&self) {
        let mut shutdown = self.shutdown.write().await;
        *shutdown = true;
        self.wake.notify_one();
        info!("Reconciler shutdown initiated");
    }
}
