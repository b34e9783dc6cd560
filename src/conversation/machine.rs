//! Conversation state machine
//!
//! One call to [`ConversationMachine::handle`] per inbound user event.
//! Validation failures and out-of-place events leave the session exactly
//! as it was; provider and persistence failures end the conversation.

use super::events::{Reply, SwapChoice, UserEvent};
use super::session::{ConversationSession, SessionStore, Step};
use super::AddressValidator;
use crate::amount::parse_amount;
use crate::bridge::BridgeApi;
use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, OrchestratorResult, ValidationError};
use crate::ledger::{FailureReason, Ledger, NewTransaction, Settlement, TransactionStatus};
use crate::notify::{deliver, Notification, Notifier};
use crate::reconcile::Reconciler;
use crate::store::{KeyValueStore, QuoteCache, WalletDirectory};
use crate::swap::SwapService;

use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Collaborators the machine is built from
pub struct MachineParts {
    pub store: Arc<dyn KeyValueStore>,
    pub ledger: Arc<dyn Ledger>,
    pub bridge: Arc<dyn BridgeApi>,
    pub swaps: Arc<SwapService>,
    pub reconciler: Arc<Reconciler>,
    pub notifier: Arc<dyn Notifier>,
    pub validator: Arc<dyn AddressValidator>,
}

/// One dialogue step at a time per user
#[derive(Clone, Default)]
struct UserLocks(Arc<DashMap<String, Arc<Mutex<()>>>>);

impl UserLocks {
    async fn lock(&self, user_id: &str) -> OwnedMutexGuard<()> {
        let lock = self.0.entry(user_id.to_string()).or_default().clone();
        lock.lock_owned().await
    }

    fn release(&self, user_id: &str, guard: OwnedMutexGuard<()>) {
        drop(guard);
        self.0.remove_if(user_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

pub struct ConversationMachine {
    locks: UserLocks,
    sessions: SessionStore,
    quotes: QuoteCache,
    wallets: WalletDirectory,
    ledger: Arc<dyn Ledger>,
    bridge: Arc<dyn BridgeApi>,
    swaps: Arc<SwapService>,
    reconciler: Arc<Reconciler>,
    validator: Arc<dyn AddressValidator>,
    watch: WalletWatch,
}

impl ConversationMachine {
    pub fn new(parts: MachineParts, config: &OrchestratorConfig) -> Self {
        let sessions = SessionStore::new(parts.store.clone(), config.session_ttl());
        let quotes = QuoteCache::new(parts.store.clone(), config.session_ttl());
        let locks = UserLocks::default();
        let watch = WalletWatch {
            locks: locks.clone(),
            ledger: parts.ledger.clone(),
            notifier: parts.notifier,
            sessions: sessions.clone(),
            quotes: quotes.clone(),
            waiters: Arc::new(DashMap::new()),
            timeout: config.wallet_confirmation_timeout(),
        };

        Self {
            locks,
            sessions,
            quotes,
            wallets: WalletDirectory::new(parts.store),
            ledger: parts.ledger,
            bridge: parts.bridge,
            swaps: parts.swaps,
            reconciler: parts.reconciler,
            validator: parts.validator,
            watch,
        }
    }

    #[cfg(test)]
    fn with_wallet_timeout(mut self, timeout: Duration) -> Self {
        self.watch.timeout = timeout;
        self
    }

    pub fn wallets(&self) -> &WalletDirectory {
        &self.wallets
    }

    /// Current session, if the user is mid-dialogue
    pub async fn session(&self, user_id: &str) -> OrchestratorResult<Option<ConversationSession>> {
        self.sessions.load(user_id).await
    }

    /// Apply one user event and produce the reply for the transport.
    ///
    /// Events for the same user are applied one after another, so a
    /// repeated `Confirm` sees the step the first one left behind.
    pub async fn handle(&self, user_id: &str, event: UserEvent) -> Reply {
        let guard = self.locks.lock(user_id).await;
        let reply = self.handle_locked(user_id, event).await;
        self.locks.release(user_id, guard);
        reply
    }

    async fn handle_locked(&self, user_id: &str, event: UserEvent) -> Reply {
        let name = event.name();
        debug!("User {} sent {}", user_id, name);

        match self.dispatch(user_id, event).await {
            Ok(reply) => reply,
            Err(OrchestratorError::Validation(e)) => Reply::Invalid {
                message: e.to_string(),
            },
            Err(OrchestratorError::UnexpectedEvent { event, step }) => {
                Reply::Unexpected { event, step }
            }
            Err(e) => {
                if e.should_alert() {
                    error!("{} for user {} failed: {}", name, user_id, e);
                } else {
                    warn!("{} for user {} failed: {}", name, user_id, e);
                }
                if let Err(clear_err) = self.sessions.clear(user_id).await {
                    error!("Failed to clear session for {}: {}", user_id, clear_err);
                }
                Reply::Failed {
                    message: e.to_string(),
                }
            }
        }
    }

    async fn dispatch(&self, user_id: &str, event: UserEvent) -> OrchestratorResult<Reply> {
        let session = self
            .sessions
            .load(user_id)
            .await?
            .unwrap_or_else(|| ConversationSession::new(user_id));

        match (session.step, event) {
            (_, UserEvent::Cancel) => {
                self.sessions.clear(user_id).await?;
                self.quotes.clear(user_id).await?;
                info!("User {} cancelled at {}", user_id, session.step.as_str());
                Ok(Reply::Cancelled)
            }
            (_, UserEvent::CheckBridges) => {
                let summary = self.reconciler.reconcile_user(user_id).await?;
                Ok(Reply::BridgeCheck {
                    completed: summary.completed,
                    failed: summary.failed,
                    still_pending: summary.still_pending + summary.errors,
                })
            }

            (Step::Idle, UserEvent::StartBridge) => self.start_bridge(session).await,
            (Step::AwaitingAmount, UserEvent::Text { text }) => {
                self.bridge_amount(session, &text).await
            }
            (Step::AwaitingDestinationWallet, UserEvent::Text { text }) => {
                self.destination_wallet(session, text.trim()).await
            }
            (Step::AwaitingUserConfirmation, UserEvent::Confirm) => {
                self.commit_bridge(session).await
            }
            (
                Step::AwaitingExternalSettlement,
                UserEvent::WalletConfirmed {
                    transaction_id,
                    source_tx_ref,
                },
            ) => {
                self.wallet_confirmed(session, transaction_id, source_tx_ref)
                    .await
            }
            (Step::AwaitingExternalSettlement, UserEvent::WalletRejected) => {
                self.wallet_rejected(session).await
            }

            (Step::Idle, UserEvent::StartSwap) => self.start_swap(session).await,
            (Step::AwaitingSwapChoice, UserEvent::SwapChoice { choice }) => {
                self.swap_choice(session, choice).await
            }
            (Step::AwaitingSwapAmount, UserEvent::Text { text }) => {
                let amount = parse_amount(&text)?;
                let available = session.require(&session.available_amount, "available amount")?;
                if amount > available {
                    return Err(ValidationError::ExceedsAvailable { available }.into());
                }
                self.quote_swap(session, amount).await
            }
            (Step::AwaitingSwapConfirmation, UserEvent::Confirm) => {
                self.execute_swap(session).await
            }

            (step, event) => Err(OrchestratorError::UnexpectedEvent {
                event: event.name().to_string(),
                step: step.as_str().to_string(),
            }),
        }
    }

    async fn start_bridge(&self, session: ConversationSession) -> OrchestratorResult<Reply> {
        if self
            .wallets
            .connected_wallet(&session.user_id)
            .await?
            .is_none()
        {
            return Ok(Reply::ConnectWallet);
        }

        self.sessions.save(session.at(Step::AwaitingAmount)).await?;
        Ok(Reply::AskAmount)
    }

    async fn bridge_amount(
        &self,
        mut session: ConversationSession,
        text: &str,
    ) -> OrchestratorResult<Reply> {
        session.amount_in = Some(parse_amount(text)?);
        self.sessions
            .save(session.at(Step::AwaitingDestinationWallet))
            .await?;
        Ok(Reply::AskDestinationWallet)
    }

    /// Quote, then persist the pending row before anything is committed
    async fn destination_wallet(
        &self,
        mut session: ConversationSession,
        address: &str,
    ) -> OrchestratorResult<Reply> {
        if !self.validator.is_valid(address) {
            return Err(ValidationError::InvalidAddress.into());
        }
        let user_id = session.user_id.clone();
        let amount = session.require(&session.amount_in, "amount")?;

        let Some(source) = self.wallets.connected_wallet(&user_id).await? else {
            self.sessions.clear(&user_id).await?;
            return Ok(Reply::ConnectWallet);
        };

        let quote = self.bridge.request_quote(amount, &source, address).await?;
        let external_ref = quote
            .external_ref
            .clone()
            .ok_or_else(|| OrchestratorError::bridge("quote carries no quote id"))?;

        let tx = self
            .ledger
            .insert(NewTransaction::pending_bridge(
                &user_id,
                address,
                amount,
                &external_ref,
            ))
            .await?;
        self.quotes.put(&user_id, &external_ref).await?;
        info!(
            "Bridge {} created for user {}: {} quoted at {} (quote {})",
            tx.id, user_id, amount, quote.priced_amount_out, external_ref
        );

        session.destination_wallet = Some(address.to_string());
        session.pending_transaction_id = Some(tx.id);
        session.quoted_amount_out = Some(quote.priced_amount_out);
        self.sessions
            .save(session.at(Step::AwaitingUserConfirmation))
            .await?;

        Ok(Reply::BridgeQuote {
            transaction_id: tx.id,
            amount_in: amount,
            amount_out: quote.priced_amount_out,
            destination_wallet: address.to_string(),
        })
    }

    async fn commit_bridge(&self, session: ConversationSession) -> OrchestratorResult<Reply> {
        let transaction_id = session.require(&session.pending_transaction_id, "transaction")?;
        let tx = self.ledger.get(transaction_id).await?.ok_or_else(|| {
            OrchestratorError::TransactionNotFound {
                tx_id: transaction_id.to_string(),
            }
        })?;
        if tx.status != TransactionStatus::Pending {
            info!(
                "Bridge {} is already {}, not committing quote for user {}",
                tx.id, tx.status, session.user_id
            );
            self.sessions.clear(&session.user_id).await?;
            self.quotes.clear(&session.user_id).await?;
            return Ok(Reply::ConfirmationExpired { transaction_id });
        }
        let external_ref = tx.external_ref.clone().ok_or_else(|| {
            OrchestratorError::Internal(format!("bridge {} has no external ref", tx.id))
        })?;

        // A failed commit leaves the row pending for the reconciler
        self.bridge.commit(&external_ref).await?;
        crate::metrics::record_bridge_started();
        info!("Bridge {} committed (quote {})", tx.id, external_ref);

        let user_id = session.user_id.clone();
        self.sessions
            .save(session.at(Step::AwaitingExternalSettlement))
            .await?;
        self.watch.start(&user_id, transaction_id);

        Ok(Reply::ApproveInWallet {
            transaction_id,
            external_ref,
        })
    }

    async fn wallet_confirmed(
        &self,
        session: ConversationSession,
        claimed_id: Option<Uuid>,
        source_tx_ref: String,
    ) -> OrchestratorResult<Reply> {
        let user_id = session.user_id.clone();
        let Some(external_ref) = self.quotes.get(&user_id).await? else {
            let transaction_id = session.require(&session.pending_transaction_id, "transaction")?;
            self.sessions.clear(&user_id).await?;
            return Ok(Reply::ConfirmationExpired { transaction_id });
        };

        let tx = self
            .ledger
            .find_by_external_ref(&external_ref)
            .await?
            .ok_or_else(|| OrchestratorError::TransactionNotFound {
                tx_id: external_ref.clone(),
            })?;
        if claimed_id.is_some_and(|id| id != tx.id) {
            return Err(OrchestratorError::UnexpectedEvent {
                event: "wallet_confirmed".into(),
                step: session.step.as_str().to_string(),
            });
        }

        let delivered = self.watch.confirm(tx.id, source_tx_ref.clone());
        if !delivered {
            // No live wait; it either expired or was lost with a restart
            let current = self.ledger.get(tx.id).await?;
            if current.map(|t| t.status) == Some(TransactionStatus::FailedBridge) {
                self.sessions.clear(&user_id).await?;
                self.quotes.clear(&user_id).await?;
                return Ok(Reply::ConfirmationExpired {
                    transaction_id: tx.id,
                });
            }
        }

        self.sessions.clear(&user_id).await?;
        self.quotes.clear(&user_id).await?;
        info!(
            "Bridge {} signed by user {} (source tx {})",
            tx.id, user_id, source_tx_ref
        );

        Ok(Reply::BridgeSubmitted {
            transaction_id: tx.id,
            source_tx_ref,
        })
    }

    async fn wallet_rejected(&self, session: ConversationSession) -> OrchestratorResult<Reply> {
        let user_id = session.user_id.clone();
        let transaction_id = session.require(&session.pending_transaction_id, "transaction")?;
        self.watch.abandon(transaction_id);

        let settlement = Settlement::Failed {
            reason: FailureReason::WalletRejected,
        };
        if self.ledger.settle(transaction_id, settlement).await?.is_some() {
            crate::metrics::record_bridge_settled(FailureReason::WalletRejected.as_str());
            info!("User {} rejected bridge {} in wallet", user_id, transaction_id);
        }

        self.sessions.clear(&user_id).await?;
        self.quotes.clear(&user_id).await?;
        Ok(Reply::BridgeRejected { transaction_id })
    }

    async fn start_swap(&self, mut session: ConversationSession) -> OrchestratorResult<Reply> {
        let Some(bridged) = self
            .ledger
            .latest_completed_bridge(&session.user_id)
            .await?
        else {
            return Ok(Reply::NothingToSwap);
        };

        let swapped = self.ledger.swapped_from(bridged.id).await?;
        let available = bridged.amount_out.unwrap_or(bridged.amount_in) - swapped;
        if available <= Decimal::ZERO {
            debug!("Bridge {} of user {} is fully swapped", bridged.id, session.user_id);
            return Ok(Reply::NothingToSwap);
        }

        let output_asset = self.swaps.output_asset().to_string();
        session.source_transaction_id = Some(bridged.id);
        session.available_amount = Some(available);
        session.destination_wallet = Some(bridged.destination_wallet.clone());
        session.chosen_asset = Some(output_asset.clone());
        self.sessions
            .save(session.at(Step::AwaitingSwapChoice))
            .await?;

        Ok(Reply::SwapOptions {
            available,
            destination_wallet: bridged.destination_wallet,
            output_asset,
        })
    }

    async fn swap_choice(
        &self,
        session: ConversationSession,
        choice: SwapChoice,
    ) -> OrchestratorResult<Reply> {
        let available = session.require(&session.available_amount, "available amount")?;
        match choice {
            SwapChoice::All => self.quote_swap(session, available).await,
            SwapChoice::Custom => {
                self.sessions
                    .save(session.at(Step::AwaitingSwapAmount))
                    .await?;
                Ok(Reply::AskSwapAmount {
                    available,
                    minimum: self.swaps.min_swap_amount(),
                })
            }
            SwapChoice::Later => {
                self.sessions.clear(&session.user_id).await?;
                Ok(Reply::SwapPostponed)
            }
        }
    }

    async fn quote_swap(
        &self,
        mut session: ConversationSession,
        amount: Decimal,
    ) -> OrchestratorResult<Reply> {
        let preview = self.swaps.preview(amount).await?;

        session.amount_in = Some(amount);
        session.quoted_amount_out = Some(preview.quote.priced_amount_out);
        self.sessions
            .save(session.at(Step::AwaitingSwapConfirmation))
            .await?;

        Ok(Reply::SwapQuote {
            amount: preview.amount,
            commission: preview.commission,
            net_amount: preview.net_amount,
            output_asset: preview.output_asset,
            amount_out: preview.quote.priced_amount_out,
        })
    }

    async fn execute_swap(&self, session: ConversationSession) -> OrchestratorResult<Reply> {
        let amount = session.require(&session.amount_in, "amount")?;
        let destination = session.require(&session.destination_wallet, "destination wallet")?;
        let source = session.require(&session.source_transaction_id, "source bridge")?;

        let tx = self
            .swaps
            .execute(&session.user_id, source, &destination, amount)
            .await?;
        self.sessions.clear(&session.user_id).await?;

        Ok(Reply::SwapCompleted {
            transaction_id: tx.id,
            amount_out: tx.amount_out.unwrap_or_default(),
            settlement_tx_hash: tx.settlement_tx_hash.unwrap_or_default(),
        })
    }
}

/// Bounded waits for the wallet confirmation, one per committed bridge
#[derive(Clone)]
struct WalletWatch {
    locks: UserLocks,
    ledger: Arc<dyn Ledger>,
    notifier: Arc<dyn Notifier>,
    sessions: SessionStore,
    quotes: QuoteCache,
    waiters: Arc<DashMap<Uuid, oneshot::Sender<String>>>,
    timeout: Duration,
}

impl WalletWatch {
    fn start(&self, user_id: &str, transaction_id: Uuid) {
        let (confirmed, rx) = oneshot::channel();
        self.waiters.insert(transaction_id, confirmed);

        let watch = self.clone();
        let user_id = user_id.to_string();
        tokio::spawn(async move {
            match tokio::time::timeout(watch.timeout, rx).await {
                Ok(Ok(source_tx_ref)) => {
                    debug!("Wallet confirmed bridge {} ({})", transaction_id, source_tx_ref);
                }
                Ok(Err(_)) => {
                    debug!("Wallet wait for bridge {} ended without confirmation", transaction_id);
                }
                Err(_) => watch.expire(&user_id, transaction_id).await,
            }
        });
    }

    /// Resolve a live wait. False when there is none for this bridge.
    ///
    /// Whoever removes the waiter decides the race with expiry; the send
    /// may find the watcher already gone.
    fn confirm(&self, transaction_id: Uuid, source_tx_ref: String) -> bool {
        match self.waiters.remove(&transaction_id) {
            Some((_, confirmed)) => {
                let _ = confirmed.send(source_tx_ref);
                true
            }
            None => false,
        }
    }

    fn abandon(&self, transaction_id: Uuid) {
        self.waiters.remove(&transaction_id);
    }

    async fn expire(&self, user_id: &str, transaction_id: Uuid) {
        let guard = self.locks.lock(user_id).await;
        self.expire_locked(user_id, transaction_id).await;
        self.locks.release(user_id, guard);
    }

    async fn expire_locked(&self, user_id: &str, transaction_id: Uuid) {
        if self.waiters.remove(&transaction_id).is_none() {
            debug!("Bridge {} was confirmed before its wallet wait expired", transaction_id);
            return;
        }

        let settlement = Settlement::Failed {
            reason: FailureReason::WalletTimeout,
        };
        match self.ledger.settle(transaction_id, settlement).await {
            Ok(Some(_)) => {
                let reason = OrchestratorError::UserTimeoutOrCancel {
                    step: format!("wallet confirmation within {:?}", self.timeout),
                };
                warn!("Bridge {} of user {} failed: {}", transaction_id, user_id, reason);
                crate::metrics::record_bridge_settled(FailureReason::WalletTimeout.as_str());
                deliver(
                    self.notifier.as_ref(),
                    user_id,
                    Notification::WalletStepTimedOut { transaction_id },
                )
                .await;
            }
            Ok(None) => debug!("Bridge {} settled before the wallet wait expired", transaction_id),
            Err(e) => error!("Failed to expire bridge {}: {}", transaction_id, e),
        }

        // The user may have moved on to a new dialogue meanwhile
        match self.sessions.load(user_id).await {
            Ok(Some(session)) if session.pending_transaction_id == Some(transaction_id) => {
                if let Err(e) = self.sessions.clear(user_id).await {
                    error!("Failed to clear session for {}: {}", user_id, e);
                }
                if let Err(e) = self.quotes.clear(user_id).await {
                    error!("Failed to clear quote for {}: {}", user_id, e);
                }
            }
            Ok(_) => {}
            Err(e) => error!("Failed to load session for {}: {}", user_id, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{MockBridgeApi, StatusReport};
    use crate::config::SwapConfig;
    use crate::conversation::Base58AddressValidator;
    use crate::ledger::{MemoryLedger, OperationType, Transaction};
    use crate::notify::recording::RecordingNotifier;
    use crate::quote::Quote;
    use crate::store::MemoryStore;
    use crate::swap::MockSwapApi;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const DEST: &str = "So11111111111111111111111111111111111111112";

    struct Harness {
        machine: ConversationMachine,
        ledger: Arc<MemoryLedger>,
        store: Arc<MemoryStore>,
        notifier: Arc<RecordingNotifier>,
        reconciler: Arc<Reconciler>,
    }

    /// Quotes like `quoting_bridge` but takes a while to commit
    #[derive(Default)]
    struct SlowCommitBridge {
        commits: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl BridgeApi for SlowCommitBridge {
        async fn request_quote(
            &self,
            _amount: Decimal,
            _source_address: &str,
            _destination_address: &str,
        ) -> OrchestratorResult<Quote> {
            Ok(bridge_quote())
        }

        async fn commit(&self, _external_ref: &str) -> OrchestratorResult<()> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.commits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn poll_status(&self, _external_ref: &str) -> OrchestratorResult<StatusReport> {
            Err(OrchestratorError::bridge("not polled in this test"))
        }
    }

    fn config() -> OrchestratorConfig {
        OrchestratorConfig {
            instance_id: "test".into(),
            poll_interval_secs: 30,
            bridge_timeout_secs: 3600,
            wallet_confirmation_timeout_secs: 300,
            max_concurrent_polls: 4,
            session_ttl_secs: 3600,
            health_check_interval_secs: 30,
        }
    }

    fn swap_config() -> SwapConfig {
        SwapConfig {
            base_url: "http://unused".into(),
            input_asset: "USDC".into(),
            output_asset: "MEME".into(),
            fee_wallet: "FeeWallet".into(),
            max_slippage_bps: 50,
            min_swap_amount: dec!(5),
            input_decimals: 6,
            output_decimals: 9,
            request_timeout_secs: 5,
        }
    }

    fn bridge_quote() -> Quote {
        Quote {
            external_ref: Some("q-1".into()),
            priced_amount_out: dec!(49.5),
            raw_terms: serde_json::json!({ "quoteId": "q-1" }),
        }
    }

    /// Bridge mock that quotes 50 → 49.5 and commits successfully
    fn quoting_bridge() -> MockBridgeApi {
        let mut bridge = MockBridgeApi::new();
        bridge
            .expect_request_quote()
            .withf(|amount, source, dest| {
                *amount == dec!(50) && source == "EQsource" && dest == DEST
            })
            .returning(|_, _, _| Ok(bridge_quote()));
        bridge
    }

    async fn harness(bridge: MockBridgeApi, swap: MockSwapApi) -> Harness {
        harness_with(Arc::new(bridge), swap).await
    }

    async fn harness_with(bridge: Arc<dyn BridgeApi>, swap: MockSwapApi) -> Harness {
        let ledger = Arc::new(MemoryLedger::new());
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::default());

        let swaps = Arc::new(SwapService::new(
            Arc::new(swap),
            ledger.clone(),
            swap_config(),
        ));
        let reconciler = Arc::new(Reconciler::new(
            ledger.clone(),
            bridge.clone(),
            notifier.clone(),
            &config(),
        ));
        let machine = ConversationMachine::new(
            MachineParts {
                store: store.clone(),
                ledger: ledger.clone(),
                bridge,
                swaps,
                reconciler: reconciler.clone(),
                notifier: notifier.clone(),
                validator: Arc::new(Base58AddressValidator),
            },
            &config(),
        );
        machine.wallets().connect("u1", "EQsource").await.unwrap();

        Harness {
            machine,
            ledger,
            store,
            notifier,
            reconciler,
        }
    }

    fn text(s: &str) -> UserEvent {
        UserEvent::Text { text: s.into() }
    }

    async fn step(h: &Harness) -> Step {
        h.machine
            .session("u1")
            .await
            .unwrap()
            .map(|s| s.step)
            .unwrap_or(Step::Idle)
    }

    /// Drive the dialogue up to the shown bridge quote
    async fn to_quote(h: &Harness) -> Uuid {
        assert_eq!(h.machine.handle("u1", UserEvent::StartBridge).await, Reply::AskAmount);
        assert_eq!(h.machine.handle("u1", text("50")).await, Reply::AskDestinationWallet);
        match h.machine.handle("u1", text(DEST)).await {
            Reply::BridgeQuote {
                transaction_id,
                amount_out,
                ..
            } => {
                assert_eq!(amount_out, dec!(49.5));
                transaction_id
            }
            other => panic!("expected quote, got {:?}", other),
        }
    }

    async fn completed_bridge(ledger: &MemoryLedger, amount_out: Decimal) -> Transaction {
        let tx = ledger
            .insert(NewTransaction::pending_bridge("u1", DEST, amount_out, "q-old"))
            .await
            .unwrap();
        ledger
            .settle(
                tx.id,
                Settlement::Completed {
                    amount_out,
                    settlement_tx_hash: Some("sig".into()),
                },
            )
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_bridge_requires_connected_wallet() {
        let h = harness(MockBridgeApi::new(), MockSwapApi::new()).await;
        h.machine.wallets().disconnect("u1").await.unwrap();

        assert_eq!(h.machine.handle("u1", UserEvent::StartBridge).await, Reply::ConnectWallet);
        assert_eq!(step(&h).await, Step::Idle);
    }

    #[tokio::test]
    async fn test_invalid_amount_keeps_step() {
        let h = harness(MockBridgeApi::new(), MockSwapApi::new()).await;
        h.machine.handle("u1", UserEvent::StartBridge).await;

        for bad in ["abc", "0", "-5", ""] {
            let reply = h.machine.handle("u1", text(bad)).await;
            assert!(matches!(reply, Reply::Invalid { .. }), "input {:?}", bad);
            assert_eq!(step(&h).await, Step::AwaitingAmount);
        }

        h.machine.handle("u1", text("50,5")).await;
        let session = h.machine.session("u1").await.unwrap().unwrap();
        assert_eq!(session.amount_in, Some(dec!(50.5)));
        assert_eq!(session.step, Step::AwaitingDestinationWallet);
    }

    #[tokio::test]
    async fn test_invalid_address_keeps_step() {
        let mut bridge = MockBridgeApi::new();
        bridge.expect_request_quote().times(0);
        let h = harness(bridge, MockSwapApi::new()).await;
        h.machine.handle("u1", UserEvent::StartBridge).await;
        h.machine.handle("u1", text("50")).await;

        let reply = h.machine.handle("u1", text("0xnot-a-solana-address")).await;

        assert_eq!(
            reply,
            Reply::Invalid {
                message: ValidationError::InvalidAddress.to_string()
            }
        );
        assert_eq!(step(&h).await, Step::AwaitingDestinationWallet);
    }

    #[tokio::test]
    async fn test_full_bridge_flow_then_reconcile() {
        let mut bridge = quoting_bridge();
        bridge
            .expect_commit()
            .withf(|r| r == "q-1")
            .times(1)
            .returning(|_| Ok(()));
        bridge
            .expect_poll_status()
            .withf(|r| r == "q-1")
            .times(1)
            .returning(|_| Ok(StatusReport::executed(dec!(49.5), "5xSig")));
        let h = harness(bridge, MockSwapApi::new()).await;

        let tx_id = to_quote(&h).await;
        let row = h.ledger.get(tx_id).await.unwrap().unwrap();
        assert_eq!(row.status, TransactionStatus::Pending);
        assert_eq!(row.external_ref.as_deref(), Some("q-1"));
        assert_eq!(h.store.get("quote:u1").await.unwrap().as_deref(), Some("q-1"));

        assert_eq!(
            h.machine.handle("u1", UserEvent::Confirm).await,
            Reply::ApproveInWallet {
                transaction_id: tx_id,
                external_ref: "q-1".into()
            }
        );
        assert_eq!(step(&h).await, Step::AwaitingExternalSettlement);

        let reply = h
            .machine
            .handle(
                "u1",
                UserEvent::WalletConfirmed {
                    transaction_id: Some(tx_id),
                    source_tx_ref: "te6cc".into(),
                },
            )
            .await;
        assert_eq!(
            reply,
            Reply::BridgeSubmitted {
                transaction_id: tx_id,
                source_tx_ref: "te6cc".into()
            }
        );
        assert_eq!(step(&h).await, Step::Idle);
        assert!(h.store.get("quote:u1").await.unwrap().is_none());

        assert_eq!(
            h.machine.handle("u1", UserEvent::CheckBridges).await,
            Reply::BridgeCheck {
                completed: 1,
                failed: 0,
                still_pending: 0
            }
        );
        let row = h.ledger.get(tx_id).await.unwrap().unwrap();
        assert_eq!(row.status, TransactionStatus::BridgeCompleted);
        assert_eq!(row.amount_out, Some(dec!(49.5)));
        assert_eq!(h.notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_commit_failure_keeps_pending_row() {
        let mut bridge = quoting_bridge();
        bridge
            .expect_commit()
            .times(1)
            .returning(|_| Err(OrchestratorError::bridge("commit returned 500")));
        let h = harness(bridge, MockSwapApi::new()).await;

        let tx_id = to_quote(&h).await;
        let reply = h.machine.handle("u1", UserEvent::Confirm).await;

        assert!(matches!(reply, Reply::Failed { .. }));
        assert_eq!(step(&h).await, Step::Idle);
        assert_eq!(
            h.ledger.get(tx_id).await.unwrap().unwrap().status,
            TransactionStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_wallet_timeout_fails_bridge_and_notifies() {
        let mut bridge = quoting_bridge();
        bridge.expect_commit().returning(|_| Ok(()));
        let mut h = harness(bridge, MockSwapApi::new()).await;
        h.machine = h.machine.with_wallet_timeout(Duration::from_millis(50));

        let tx_id = to_quote(&h).await;
        h.machine.handle("u1", UserEvent::Confirm).await;
        tokio::time::sleep(Duration::from_millis(300)).await;

        let row = h.ledger.get(tx_id).await.unwrap().unwrap();
        assert_eq!(row.status, TransactionStatus::FailedBridge);
        assert_eq!(row.failure_reason.as_deref(), Some("wallet_timeout"));
        assert_eq!(
            h.notifier.sent(),
            vec![(
                "u1".to_string(),
                Notification::WalletStepTimedOut {
                    transaction_id: tx_id
                }
            )]
        );
        assert_eq!(step(&h).await, Step::Idle);

        let late = h
            .machine
            .handle(
                "u1",
                UserEvent::WalletConfirmed {
                    transaction_id: None,
                    source_tx_ref: "te6cc".into(),
                },
            )
            .await;
        assert!(matches!(late, Reply::Unexpected { .. }));
    }

    #[tokio::test]
    async fn test_wallet_rejection_fails_bridge() {
        let mut bridge = quoting_bridge();
        bridge.expect_commit().returning(|_| Ok(()));
        let h = harness(bridge, MockSwapApi::new()).await;

        let tx_id = to_quote(&h).await;
        h.machine.handle("u1", UserEvent::Confirm).await;
        let reply = h.machine.handle("u1", UserEvent::WalletRejected).await;

        assert_eq!(reply, Reply::BridgeRejected { transaction_id: tx_id });
        let row = h.ledger.get(tx_id).await.unwrap().unwrap();
        assert_eq!(row.failure_reason.as_deref(), Some("wallet_rejected"));
        assert_eq!(step(&h).await, Step::Idle);
    }

    #[tokio::test]
    async fn test_cancel_never_touches_ledger() {
        let mut bridge = quoting_bridge();
        bridge.expect_commit().times(0);
        let h = harness(bridge, MockSwapApi::new()).await;

        let tx_id = to_quote(&h).await;
        assert_eq!(h.machine.handle("u1", UserEvent::Cancel).await, Reply::Cancelled);

        assert_eq!(step(&h).await, Step::Idle);
        assert!(h.store.get("quote:u1").await.unwrap().is_none());
        assert_eq!(
            h.ledger.get(tx_id).await.unwrap().unwrap().status,
            TransactionStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_out_of_place_event_is_rejected_without_change() {
        let h = harness(MockBridgeApi::new(), MockSwapApi::new()).await;
        h.machine.handle("u1", UserEvent::StartBridge).await;

        let reply = h.machine.handle("u1", UserEvent::Confirm).await;

        assert_eq!(
            reply,
            Reply::Unexpected {
                event: "confirm".into(),
                step: "awaiting_amount".into()
            }
        );
        assert_eq!(step(&h).await, Step::AwaitingAmount);
    }

    #[tokio::test]
    async fn test_nothing_to_swap_without_completed_bridge() {
        let h = harness(MockBridgeApi::new(), MockSwapApi::new()).await;
        assert_eq!(h.machine.handle("u1", UserEvent::StartSwap).await, Reply::NothingToSwap);
    }

    #[tokio::test]
    async fn test_custom_swap_flow() {
        let mut swap = MockSwapApi::new();
        swap.expect_request_quote()
            .withf(|amount, asset| *amount == dec!(49) && asset == "MEME")
            .returning(|_, _| {
                Ok(Quote {
                    external_ref: None,
                    priced_amount_out: dec!(1500),
                    raw_terms: serde_json::json!({ "route": {} }),
                })
            });
        swap.expect_execute()
            .withf(|_, wallet, fee| wallet == DEST && fee.commission == dec!(1))
            .times(1)
            .returning(|_, _, _| Ok("sig-swap".to_string()));
        let h = harness(MockBridgeApi::new(), swap).await;
        completed_bridge(&h.ledger, dec!(100)).await;

        assert_eq!(
            h.machine.handle("u1", UserEvent::StartSwap).await,
            Reply::SwapOptions {
                available: dec!(100),
                destination_wallet: DEST.into(),
                output_asset: "MEME".into()
            }
        );
        h.machine
            .handle("u1", UserEvent::SwapChoice { choice: SwapChoice::Custom })
            .await;

        let too_much = h.machine.handle("u1", text("150")).await;
        assert!(matches!(too_much, Reply::Invalid { .. }));
        assert_eq!(step(&h).await, Step::AwaitingSwapAmount);

        let too_little = h.machine.handle("u1", text("3")).await;
        assert!(matches!(too_little, Reply::Invalid { .. }));
        assert_eq!(step(&h).await, Step::AwaitingSwapAmount);

        assert_eq!(
            h.machine.handle("u1", text("50")).await,
            Reply::SwapQuote {
                amount: dec!(50),
                commission: dec!(1),
                net_amount: dec!(49),
                output_asset: "MEME".into(),
                amount_out: dec!(1500)
            }
        );

        let reply = h.machine.handle("u1", UserEvent::Confirm).await;
        let Reply::SwapCompleted {
            transaction_id,
            settlement_tx_hash,
            ..
        } = reply
        else {
            panic!("expected swap completion, got {:?}", reply);
        };
        assert_eq!(settlement_tx_hash, "sig-swap");
        let row = h.ledger.get(transaction_id).await.unwrap().unwrap();
        assert_eq!(row.operation_type, OperationType::Swap);
        assert_eq!(row.status, TransactionStatus::SwapCompleted);
        assert_eq!(step(&h).await, Step::Idle);

        // Only the unswapped half is offered again
        assert_eq!(
            h.machine.handle("u1", UserEvent::StartSwap).await,
            Reply::SwapOptions {
                available: dec!(50),
                destination_wallet: DEST.into(),
                output_asset: "MEME".into()
            }
        );
    }

    #[tokio::test]
    async fn test_swap_provider_failure_clears_session() {
        let mut swap = MockSwapApi::new();
        swap.expect_request_quote()
            .returning(|_, _| Err(OrchestratorError::swap("no route")));
        let h = harness(MockBridgeApi::new(), swap).await;
        completed_bridge(&h.ledger, dec!(20)).await;

        h.machine.handle("u1", UserEvent::StartSwap).await;
        let reply = h
            .machine
            .handle("u1", UserEvent::SwapChoice { choice: SwapChoice::All })
            .await;

        assert!(matches!(reply, Reply::Failed { .. }));
        assert_eq!(step(&h).await, Step::Idle);
        assert_eq!(h.ledger.stats().await.unwrap().swap_completed, 0);
    }

    #[tokio::test]
    async fn test_swap_later_clears_session() {
        let h = harness(MockBridgeApi::new(), MockSwapApi::new()).await;
        completed_bridge(&h.ledger, dec!(20)).await;

        h.machine.handle("u1", UserEvent::StartSwap).await;
        let reply = h
            .machine
            .handle("u1", UserEvent::SwapChoice { choice: SwapChoice::Later })
            .await;

        assert_eq!(reply, Reply::SwapPostponed);
        assert_eq!(step(&h).await, Step::Idle);
    }

    #[tokio::test]
    async fn test_confirm_after_bridge_timed_out_never_commits() {
        let mut bridge = quoting_bridge();
        bridge.expect_commit().times(0);
        bridge.expect_poll_status().times(0);
        let h = harness(bridge, MockSwapApi::new()).await;

        let tx_id = to_quote(&h).await;
        h.ledger
            .backdate(tx_id, chrono::Utc::now() - chrono::Duration::hours(2))
            .await;
        h.reconciler.tick().await.unwrap();

        let reply = h.machine.handle("u1", UserEvent::Confirm).await;

        assert_eq!(reply, Reply::ConfirmationExpired { transaction_id: tx_id });
        assert_eq!(step(&h).await, Step::Idle);
        assert!(h.store.get("quote:u1").await.unwrap().is_none());
        let row = h.ledger.get(tx_id).await.unwrap().unwrap();
        assert_eq!(row.status, TransactionStatus::FailedBridge);
        assert_eq!(row.failure_reason.as_deref(), Some("timed_out"));
    }

    #[tokio::test]
    async fn test_repeated_confirm_commits_once() {
        let bridge = Arc::new(SlowCommitBridge::default());
        let h = harness_with(bridge.clone(), MockSwapApi::new()).await;
        let tx_id = to_quote(&h).await;

        let (first, second) = tokio::join!(
            h.machine.handle("u1", UserEvent::Confirm),
            h.machine.handle("u1", UserEvent::Confirm)
        );

        assert_eq!(bridge.commits.load(Ordering::SeqCst), 1);
        let approvals = [&first, &second]
            .iter()
            .filter(|r| {
                matches!(r, Reply::ApproveInWallet { transaction_id, .. } if *transaction_id == tx_id)
            })
            .count();
        assert_eq!(approvals, 1);
        assert!(
            [&first, &second]
                .iter()
                .any(|r| matches!(r, Reply::Unexpected { .. })),
            "replies {:?} / {:?}",
            first,
            second
        );
        assert_eq!(step(&h).await, Step::AwaitingExternalSettlement);
    }

    #[tokio::test]
    async fn test_repeated_swap_confirm_executes_once() {
        let mut swap = MockSwapApi::new();
        swap.expect_request_quote().returning(|_, _| {
            Ok(Quote {
                external_ref: None,
                priced_amount_out: dec!(600),
                raw_terms: serde_json::json!({ "route": {} }),
            })
        });
        swap.expect_execute()
            .times(1)
            .returning(|_, _, _| Ok("sig-swap".to_string()));
        let h = harness(MockBridgeApi::new(), swap).await;
        completed_bridge(&h.ledger, dec!(20)).await;

        h.machine.handle("u1", UserEvent::StartSwap).await;
        h.machine
            .handle("u1", UserEvent::SwapChoice { choice: SwapChoice::All })
            .await;
        let (first, second) = tokio::join!(
            h.machine.handle("u1", UserEvent::Confirm),
            h.machine.handle("u1", UserEvent::Confirm)
        );

        let completed = [&first, &second]
            .iter()
            .filter(|r| matches!(r, Reply::SwapCompleted { .. }))
            .count();
        assert_eq!(completed, 1);
        assert_eq!(h.ledger.stats().await.unwrap().swap_completed, 1);
    }

    #[tokio::test]
    async fn test_fully_swapped_bridge_offers_nothing() {
        let mut swap = MockSwapApi::new();
        swap.expect_request_quote().returning(|_, _| {
            Ok(Quote {
                external_ref: None,
                priced_amount_out: dec!(600),
                raw_terms: serde_json::json!({ "route": {} }),
            })
        });
        swap.expect_execute()
            .times(1)
            .returning(|_, _, _| Ok("sig-swap".to_string()));
        let h = harness(MockBridgeApi::new(), swap).await;
        let bridged = completed_bridge(&h.ledger, dec!(20)).await;

        h.machine.handle("u1", UserEvent::StartSwap).await;
        h.machine
            .handle("u1", UserEvent::SwapChoice { choice: SwapChoice::All })
            .await;
        let reply = h.machine.handle("u1", UserEvent::Confirm).await;
        let Reply::SwapCompleted { transaction_id, .. } = reply else {
            panic!("expected swap completion, got {:?}", reply);
        };

        let row = h.ledger.get(transaction_id).await.unwrap().unwrap();
        assert_eq!(row.source_transaction_id, Some(bridged.id));
        assert_eq!(h.machine.handle("u1", UserEvent::StartSwap).await, Reply::NothingToSwap);
    }

    #[tokio::test]
    async fn test_confirmed_wait_is_never_expired() {
        let mut bridge = quoting_bridge();
        bridge.expect_commit().returning(|_| Ok(()));
        let h = harness(bridge, MockSwapApi::new()).await;

        let tx_id = to_quote(&h).await;
        h.machine.handle("u1", UserEvent::Confirm).await;
        assert!(h.machine.watch.confirm(tx_id, "te6cc".into()));

        // The watcher's timer firing late must not fail the signed bridge
        h.machine.watch.expire("u1", tx_id).await;

        let row = h.ledger.get(tx_id).await.unwrap().unwrap();
        assert_eq!(row.status, TransactionStatus::Pending);
        assert!(h.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn test_expired_wait_rejects_late_confirmation() {
        let mut bridge = quoting_bridge();
        bridge.expect_commit().returning(|_| Ok(()));
        let h = harness(bridge, MockSwapApi::new()).await;

        let tx_id = to_quote(&h).await;
        h.machine.handle("u1", UserEvent::Confirm).await;
        h.machine.watch.expire("u1", tx_id).await;

        assert!(!h.machine.watch.confirm(tx_id, "te6cc".into()));
        let row = h.ledger.get(tx_id).await.unwrap().unwrap();
        assert_eq!(row.failure_reason.as_deref(), Some("wallet_timeout"));
    }
}
