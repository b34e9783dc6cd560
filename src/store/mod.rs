//! Key-value store for ephemeral per-user state
//!
//! Backs the quote cache, the conversation sessions and the wallet
//! directory. No ordering or transactional guarantees across keys.

mod memory;
mod postgres;
mod quotes;
mod wallets;

pub use memory::MemoryStore;
pub use postgres::PgKeyValueStore;
pub use quotes::QuoteCache;
pub use wallets::WalletDirectory;

use crate::error::OrchestratorResult;

use async_trait::async_trait;
use std::time::Duration;

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> OrchestratorResult<Option<String>>;

    /// Write `value`, replacing any previous one. Expires after `ttl` if given.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> OrchestratorResult<()>;

    async fn delete(&self, key: &str) -> OrchestratorResult<()>;
}
