//! String-keyed TTL cache.
//!
//! The pipeline caches memory-context blocks and RAG result lists under
//! project-prefixed keys, so invalidation on approval scans only the
//! project's own prefix.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

/// Minimal KV interface: get / set-with-TTL / delete / prefix scan.
#[async_trait]
pub trait KvCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;
    async fn set(&self, key: &str, value: String, ttl: Duration);
    async fn delete(&self, key: &str);
    async fn scan_prefix(&self, prefix: &str) -> Vec<String>;

    async fn delete_prefix(&self, prefix: &str) -> usize {
        let keys = self.scan_prefix(prefix).await;
        let count = keys.len();
        for key in keys {
            self.delete(&key).await;
        }
        count
    }
}

/// In-process cache with lazy expiry.
#[derive(Default)]
pub struct InMemoryKvCache {
    entries: DashMap<String, (String, Instant)>,
}

impl InMemoryKvCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvCache for InMemoryKvCache {
    async fn get(&self, key: &str) -> Option<String> {
        let expired = match self.entries.get(key) {
            Some(entry) => {
                if entry.value().1 > Instant::now() {
                    return Some(entry.value().0.clone());
                }
                true
            }
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        None
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) {
        self.entries
            .insert(key.to_string(), (value, Instant::now() + ttl));
    }

    async fn delete(&self, key: &str) {
        self.entries.remove(key);
    }

    async fn scan_prefix(&self, prefix: &str) -> Vec<String> {
        self.entries
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect()
    }
}

fn content_hash(content: &str) -> String {
    let mut hasher = DefaultHasher::new();
    content.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// Cache facade with the key schema the pipeline relies on.
pub struct CacheService {
    cache: std::sync::Arc<dyn KvCache>,
    memory_ttl: Duration,
    rag_ttl: Duration,
}

impl CacheService {
    #[must_use]
    pub fn new(
        cache: std::sync::Arc<dyn KvCache>,
        memory_ttl: Duration,
        rag_ttl: Duration,
    ) -> Self {
        Self {
            cache,
            memory_ttl,
            rag_ttl,
        }
    }

    fn memory_key(project_id: Uuid, identity: &str) -> String {
        format!("memory_ctx:{project_id}:{}", content_hash(identity))
    }

    fn rag_key(project_id: Uuid, query: &str) -> String {
        format!("rag:{project_id}:{}", content_hash(query))
    }

    pub async fn get_memory_context(&self, project_id: Uuid, identity: &str) -> Option<String> {
        self.cache.get(&Self::memory_key(project_id, identity)).await
    }

    pub async fn set_memory_context(&self, project_id: Uuid, identity: &str, context: String) {
        self.cache
            .set(&Self::memory_key(project_id, identity), context, self.memory_ttl)
            .await;
    }

    pub async fn get_rag_results(&self, project_id: Uuid, query: &str) -> Option<Vec<String>> {
        let raw = self.cache.get(&Self::rag_key(project_id, query)).await?;
        serde_json::from_str(&raw).ok()
    }

    pub async fn set_rag_results(&self, project_id: Uuid, query: &str, results: &[String]) {
        if let Ok(raw) = serde_json::to_string(results) {
            self.cache
                .set(&Self::rag_key(project_id, query), raw, self.rag_ttl)
                .await;
        }
    }

    /// Drop every cached entry belonging to the project. Called on approval;
    /// TTLs remain the safety net.
    pub async fn invalidate_project(&self, project_id: Uuid) -> usize {
        let memory = self
            .cache
            .delete_prefix(&format!("memory_ctx:{project_id}:"))
            .await;
        let rag = self.cache.delete_prefix(&format!("rag:{project_id}:")).await;
        let total = memory + rag;
        if total > 0 {
            tracing::info!(%project_id, entries = total, "invalidated project cache");
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ttl_expiry() {
        let cache = InMemoryKvCache::new();
        cache
            .set("k", "v".to_string(), Duration::from_millis(20))
            .await;
        assert_eq!(cache.get("k").await.as_deref(), Some("v"));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn invalidation_only_touches_the_project() {
        let service = CacheService::new(
            std::sync::Arc::new(InMemoryKvCache::new()),
            Duration::from_secs(60),
            Duration::from_secs(60),
        );
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        service.set_memory_context(a, "id", "ctx-a".to_string()).await;
        service.set_memory_context(b, "id", "ctx-b".to_string()).await;
        service
            .set_rag_results(a, "query", &["chunk".to_string()])
            .await;

        let removed = service.invalidate_project(a).await;
        assert_eq!(removed, 2);
        assert_eq!(service.get_memory_context(a, "id").await, None);
        assert_eq!(
            service.get_memory_context(b, "id").await.as_deref(),
            Some("ctx-b")
        );
    }

    #[tokio::test]
    async fn rag_results_round_trip() {
        let service = CacheService::new(
            std::sync::Arc::new(InMemoryKvCache::new()),
            Duration::from_secs(60),
            Duration::from_secs(60),
        );
        let project = Uuid::new_v4();
        let chunks = vec!["un".to_string(), "deux".to_string()];
        service.set_rag_results(project, "q", &chunks).await;
        assert_eq!(service.get_rag_results(project, "q").await, Some(chunks));
        assert_eq!(service.get_rag_results(project, "autre").await, None);
    }
}
