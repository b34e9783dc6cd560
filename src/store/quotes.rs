use super::KeyValueStore;
use crate::error::OrchestratorResult;

use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Maps a user to the bridge quote they are currently confirming
#[derive(Clone)]
pub struct QuoteCache {
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl QuoteCache {
    pub fn new(store: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    fn key(user_id: &str) -> String {
        format!("quote:{}", user_id)
    }

    pub async fn put(&self, user_id: &str, external_ref: &str) -> OrchestratorResult<()> {
        self.store
            .set(&Self::key(user_id), external_ref, Some(self.ttl))
            .await?;
        debug!("Cached quote {} for user {}", external_ref, user_id);
        Ok(())
    }

    pub async fn get(&self, user_id: &str) -> OrchestratorResult<Option<String>> {
        self.store.get(&Self::key(user_id)).await
    }

    pub async fn clear(&self, user_id: &str) -> OrchestratorResult<()> {
        self.store.delete(&Self::key(user_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_quotes_are_namespaced_per_user() {
        let store = Arc::new(MemoryStore::new());
        let cache = QuoteCache::new(store.clone(), Duration::from_secs(60));

        cache.put("42", "q-abc").await.unwrap();
        assert_eq!(store.get("quote:42").await.unwrap().as_deref(), Some("q-abc"));
        assert!(cache.get("43").await.unwrap().is_none());

        cache.clear("42").await.unwrap();
        assert!(cache.get("42").await.unwrap().is_none());
    }
}
