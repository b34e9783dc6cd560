use super::KeyValueStore;
use crate::error::OrchestratorResult;

use std::sync::Arc;

/// Source-chain wallets connected through the wallet-connect flow.
///
/// The wallet-connect collaborator keeps its session blobs under
/// `tc:{user_id}:*`; the address is the only entry read here.
#[derive(Clone)]
pub struct WalletDirectory {
    store: Arc<dyn KeyValueStore>,
}

impl WalletDirectory {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    fn key(user_id: &str) -> String {
        format!("tc:{}:wallet_address", user_id)
    }

    pub async fn connected_wallet(&self, user_id: &str) -> OrchestratorResult<Option<String>> {
        Ok(self
            .store
            .get(&Self::key(user_id))
            .await?
            .filter(|address| !address.trim().is_empty()))
    }

    pub async fn connect(&self, user_id: &str, address: &str) -> OrchestratorResult<()> {
        self.store.set(&Self::key(user_id), address, None).await
    }

    pub async fn disconnect(&self, user_id: &str) -> OrchestratorResult<()> {
        self.store.delete(&Self::key(user_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_connect_and_disconnect() {
        let wallets = WalletDirectory::new(Arc::new(MemoryStore::new()));
        assert!(wallets.connected_wallet("7").await.unwrap().is_none());

        wallets.connect("7", "EQsource").await.unwrap();
        assert_eq!(
            wallets.connected_wallet("7").await.unwrap().as_deref(),
            Some("EQsource")
        );

        wallets.disconnect("7").await.unwrap();
        assert!(wallets.connected_wallet("7").await.unwrap().is_none());
    }
}
