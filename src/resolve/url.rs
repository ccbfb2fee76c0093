//! URL references, cached as URLArtifact relations.
//!
//! The first fetch stores the body as an object and records a `URLArtifact`
//! relation keyed by the URL hash; later fetches of the same URL are served
//! from that cache without touching the network. A small lru layer keeps
//! repeat hits off the disk too.

use crate::core::{DaemonError, Reference, Relation, RelationType, ResolvedContext, Result};
use crate::storage::{MetadataIndex, RelationStore, hash_bytes};
use lru::LruCache;
use serde_json::json;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const LRU_CAPACITY: NonZeroUsize = NonZeroUsize::new(64).unwrap();

pub struct UrlResolver {
    http: reqwest::Client,
    relations: Arc<RelationStore>,
    metadata: Arc<MetadataIndex>,
    /// relation id → body, for repeat hits inside one process
    hot: Mutex<LruCache<String, String>>,
}

impl UrlResolver {
    pub fn new(
        relations: Arc<RelationStore>,
        metadata: Arc<MetadataIndex>,
        fetch_timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(fetch_timeout)
            .build()
            .map_err(|e| DaemonError::Io(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            relations,
            metadata,
            hot: Mutex::new(LruCache::new(LRU_CAPACITY)),
        })
    }

    /// Relation id a URL caches under, stable across processes.
    pub fn artifact_id(url: &str) -> String {
        format!("url-artifact-{}", &hash_bytes(url.as_bytes())[..16])
    }

    pub async fn resolve(&self, reference: &Reference) -> Result<ResolvedContext> {
        let url = reference.target.trim();
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(DaemonError::Validation(format!(
                "URL reference '{}' rejected: only http and https are supported.\nExample: --ref url:https://example.com/spec.json",
                url
            )));
        }

        let artifact_id = Self::artifact_id(url);

        if let Some(body) = self.hot.lock().ok().and_then(|mut c| c.get(&artifact_id).cloned()) {
            log::debug!("URL cache hit (hot) for {}", url);
            return Ok(self.cached_context(reference, body, &artifact_id));
        }

        if let Ok(relation) = self.relations.load(&artifact_id) {
            if let Some(content_id) = relation
                .properties
                .extra
                .get("content_id")
                .and_then(|v| v.as_str())
            {
                if let Ok(bytes) = self.metadata.objects().read(content_id) {
                    let body = String::from_utf8_lossy(&bytes).into_owned();
                    log::info!("URL cache hit for {} ({})", url, artifact_id);
                    if let Ok(mut hot) = self.hot.lock() {
                        hot.put(artifact_id.clone(), body.clone());
                    }
                    return Ok(self.cached_context(reference, body, &artifact_id));
                }
            }
        }

        log::info!("Fetching {}", url);
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| DaemonError::Resolution(format!("Fetch of '{}' failed: {}", url, e)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(DaemonError::Resolution(format!(
                "Fetch of '{}' returned {}",
                url, status
            )));
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("text/plain")
            .to_string();
        let body = response
            .text()
            .await
            .map_err(|e| DaemonError::Resolution(format!("Reading body of '{}' failed: {}", url, e)))?;
        if body.len() > 1024 * 1024 {
            log::warn!("URL {} returned {} bytes; caching anyway", url, body.len());
        }

        let content_id = self.metadata.objects().store(body.as_bytes())?;
        let mut relation = Relation::new(artifact_id.clone(), RelationType::UrlArtifact);
        relation.properties.name = Some(url.to_string());
        relation
            .properties
            .extra
            .insert("url".to_string(), json!(url));
        relation
            .properties
            .extra
            .insert("content_id".to_string(), json!(content_id));
        relation
            .properties
            .extra
            .insert("content_type".to_string(), json!(content_type.clone()));
        self.relations.save(&relation)?;

        if let Ok(mut hot) = self.hot.lock() {
            hot.put(artifact_id.clone(), body.clone());
        }

        Ok(
            ResolvedContext::new(reference.clone(), body, "url")
                .with_metadata("artifact_id", json!(artifact_id))
                .with_metadata("content_type", json!(content_type))
                .with_metadata("cache_hit", json!(false)),
        )
    }

    fn cached_context(&self, reference: &Reference, body: String, artifact_id: &str) -> ResolvedContext {
        ResolvedContext::new(reference.clone(), body, "url")
            .with_metadata("artifact_id", json!(artifact_id))
            .with_metadata("cache_hit", json!(true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ReferenceType;
    use crate::storage::ObjectStore;
    use tempfile::TempDir;

    fn resolver_in(dir: &TempDir) -> UrlResolver {
        let relations = Arc::new(RelationStore::new(dir.path().join("relations")).unwrap());
        let objects = Arc::new(ObjectStore::new(dir.path().join("objects")).unwrap());
        let metadata =
            Arc::new(MetadataIndex::new(dir.path().join("metadata"), objects).unwrap());
        UrlResolver::new(relations, metadata, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_artifact_id_is_stable() {
        let a = UrlResolver::artifact_id("https://example.com/data");
        let b = UrlResolver::artifact_id("https://example.com/data");
        assert_eq!(a, b);
        assert!(a.starts_with("url-artifact-"));
        assert_ne!(a, UrlResolver::artifact_id("https://example.com/other"));
    }

    #[tokio::test]
    async fn test_invalid_scheme_rejected() {
        let dir = TempDir::new().unwrap();
        let resolver = resolver_in(&dir);
        let reference = Reference::new(ReferenceType::Url, "ftp://example.com/file");
        assert!(matches!(
            resolver.resolve(&reference).await,
            Err(DaemonError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_cached_artifact_served_without_fetch() {
        let dir = TempDir::new().unwrap();
        let relations = Arc::new(RelationStore::new(dir.path().join("relations")).unwrap());
        let objects = Arc::new(ObjectStore::new(dir.path().join("objects")).unwrap());
        let metadata =
            Arc::new(MetadataIndex::new(dir.path().join("metadata"), Arc::clone(&objects)).unwrap());

        // Seed the cache by hand: an unroutable URL would otherwise fail.
        let url = "https://192.0.2.1/unreachable.json";
        let content_id = objects.store(b"{\"cached\": true}").unwrap();
        let artifact_id = UrlResolver::artifact_id(url);
        let mut relation = Relation::new(artifact_id.clone(), RelationType::UrlArtifact);
        relation
            .properties
            .extra
            .insert("content_id".to_string(), json!(content_id));
        relations.save(&relation).unwrap();

        let resolver = UrlResolver::new(relations, metadata, Duration::from_secs(1)).unwrap();
        let reference = Reference::new(ReferenceType::Url, url);
        let resolved = resolver.resolve(&reference).await.unwrap();
        assert!(resolved.content.contains("cached"));
        assert_eq!(resolved.metadata.get("cache_hit").unwrap(), &json!(true));
    }
}
