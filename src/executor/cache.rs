//! `ResultCacheProvider`: the optional external result cache a consumer may
//! supply. Per §7, cache failures never fail a request — `get`/`set` return
//! a `Result` only so `QueryExecutor` can log a `warn!` on failure before
//! falling through to the database.

use async_trait::async_trait;

use super::result::QueryResult;

#[derive(Debug, thiserror::Error)]
#[error("result cache error: {0}")]
pub struct CacheError(pub String);

#[async_trait]
pub trait ResultCacheProvider: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<QueryResult>, CacheError>;
    async fn set(&self, key: &str, value: &QueryResult, ttl_ms: u64) -> Result<(), CacheError>;
}

/// A deterministic cache key from the query and security context, so
/// identical requests from the same tenant share a cache entry.
pub fn cache_key(query: &crate::model::SemanticQuery, security: &crate::model::SecurityContext) -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let query_json = serde_json::to_string(query).unwrap_or_default();
    let mut security_pairs: Vec<(&String, &String)> = security.iter().collect();
    security_pairs.sort_by_key(|(k, _)| k.as_str());

    let mut hasher = DefaultHasher::new();
    query_json.hash(&mut hasher);
    security_pairs.hash(&mut hasher);
    format!("cubeplan:{:016x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SemanticQuery;
    use std::collections::HashMap;

    #[test]
    fn cache_key_is_deterministic() {
        let query = SemanticQuery {
            measures: vec!["Orders.count".into()],
            ..Default::default()
        };
        let security = HashMap::new();
        assert_eq!(cache_key(&query, &security), cache_key(&query, &security));
    }

    #[test]
    fn cache_key_differs_by_security_context() {
        let query = SemanticQuery {
            measures: vec!["Orders.count".into()],
            ..Default::default()
        };
        let mut a = HashMap::new();
        a.insert("tenant_id".to_string(), "1".to_string());
        let mut b = HashMap::new();
        b.insert("tenant_id".to_string(), "2".to_string());
        assert_ne!(cache_key(&query, &a), cache_key(&query, &b));
    }
}
