//! Property-schema cache keyed by container id.
//!
//! Entries go stale after a TTL. Callers validating property names refresh
//! at most once per check: a name missing from a cached schema may only mean
//! the schema changed since it was fetched.

use std::collections::HashMap;
use std::time::Duration;

use folio_types::Clock;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::FolioResult;
use crate::remote::{DocumentService, PropertySchema};

#[derive(Debug, Clone)]
struct Cached {
    schema: PropertySchema,
    fetched_at: u64,
}

/// TTL cache of container property schemas.
#[derive(Debug)]
pub struct SchemaCache {
    ttl: Duration,
    clock: Clock,
    entries: Mutex<HashMap<String, Cached>>,
}

impl SchemaCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            clock: Clock::system(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Cached schema if still fresh, else fetched.
    pub async fn get(
        &self,
        service: &dyn DocumentService,
        container_id: &str,
    ) -> FolioResult<PropertySchema> {
        let now = self.clock.now_millis();
        let fresh = self.entries.lock().get(container_id).and_then(|cached| {
            let age = now.saturating_sub(cached.fetched_at);
            (age < self.ttl.as_millis() as u64).then(|| cached.schema.clone())
        });
        match fresh {
            Some(schema) => Ok(schema),
            None => self.refresh(service, container_id).await,
        }
    }

    /// Fetch and cache, ignoring any cached copy.
    pub async fn refresh(
        &self,
        service: &dyn DocumentService,
        container_id: &str,
    ) -> FolioResult<PropertySchema> {
        let schema = service.retrieve_schema(container_id).await?;
        debug!(container_id, properties = schema.properties.len(), "schema refreshed");
        self.entries.lock().insert(
            container_id.to_string(),
            Cached {
                schema: schema.clone(),
                fetched_at: self.clock.now_millis(),
            },
        );
        Ok(schema)
    }

    /// Names the container does not define, refreshing once if the cached
    /// schema is missing any of them.
    pub async fn unknown_properties(
        &self,
        service: &dyn DocumentService,
        container_id: &str,
        names: &[String],
    ) -> FolioResult<Vec<String>> {
        let schema = self.get(service, container_id).await?;
        let unknown = schema.unknown(names.iter().map(String::as_str));
        if unknown.is_empty() {
            return Ok(unknown);
        }
        let schema = self.refresh(service, container_id).await?;
        Ok(schema.unknown(names.iter().map(String::as_str)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{MemoryWorkspace, RemoteOp};

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_cached_within_ttl() {
        let ws = MemoryWorkspace::new();
        ws.define_schema("db", &[("Name", "title")]);
        let clock = Clock::manual(0);
        let cache = SchemaCache::new(Duration::from_secs(60)).with_clock(clock.clone());

        cache.get(&ws, "db").await.unwrap();
        cache.get(&ws, "db").await.unwrap();
        assert_eq!(ws.calls(RemoteOp::RetrieveSchema), 1);

        clock.advance(Duration::from_secs(61));
        cache.get(&ws, "db").await.unwrap();
        assert_eq!(ws.calls(RemoteOp::RetrieveSchema), 2);
    }

    #[tokio::test]
    async fn test_unknown_name_refreshes_once() {
        let ws = MemoryWorkspace::new();
        ws.define_schema("db", &[("Name", "title")]);
        let cache = SchemaCache::new(Duration::from_secs(600));
        cache.get(&ws, "db").await.unwrap();

        ws.add_property("db", "Status", "select");
        let unknown = cache
            .unknown_properties(&ws, "db", &names(&["Name", "Status"]))
            .await
            .unwrap();
        assert!(unknown.is_empty());
        assert_eq!(ws.calls(RemoteOp::RetrieveSchema), 2);

        let unknown = cache
            .unknown_properties(&ws, "db", &names(&["Owner"]))
            .await
            .unwrap();
        assert_eq!(unknown, names(&["Owner"]));
        assert_eq!(ws.calls(RemoteOp::RetrieveSchema), 3);
    }
}
