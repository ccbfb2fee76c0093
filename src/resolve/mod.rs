//! Reference resolution: turn heterogeneous references into the unified
//! context payload handed to the materializer.
//!
//! Resolution is best-effort: individual failures are logged and skipped,
//! and an aggregate resolved/total statistic is reported.

pub mod file;
pub mod url;
pub mod vfs_path;

pub use file::FileGuard;
pub use url::UrlResolver;
pub use vfs_path::VfsPathResolver;

use crate::core::{
    DaemonError, Reference, ReferenceType, RelationType, ResolvedContext, Result,
};
use crate::storage::RelationStore;
use crate::vfs::{SearchMode, VirtualFs};
use serde_json::json;
use std::sync::Arc;

/// Hits injected for a search reference.
const SEARCH_TOP_N: usize = 5;

pub struct ReferenceResolver {
    files: FileGuard,
    urls: UrlResolver,
    vfs_paths: VfsPathResolver,
    vfs: Arc<VirtualFs>,
    relations: Arc<RelationStore>,
}

impl ReferenceResolver {
    pub fn new(
        files: FileGuard,
        urls: UrlResolver,
        vfs_paths: VfsPathResolver,
        vfs: Arc<VirtualFs>,
        relations: Arc<RelationStore>,
    ) -> Self {
        Self {
            files,
            urls,
            vfs_paths,
            vfs,
            relations,
        }
    }

    pub async fn resolve(&self, reference: &Reference) -> Result<ResolvedContext> {
        match reference.ref_type {
            ReferenceType::File => self.files.resolve(reference),
            ReferenceType::Url => self.urls.resolve(reference).await,
            ReferenceType::P42 => self.vfs_paths.resolve(reference),
            ReferenceType::Search => self.resolve_search(reference),
            ReferenceType::Tool => self.resolve_tool(reference),
        }
    }

    /// Resolve every reference and compose the single text block the
    /// materializer consumes. References resolve concurrently but the block
    /// keeps their declared order; failures are logged and skipped.
    pub async fn resolve_for_ai(
        &self,
        references: &[Reference],
    ) -> (String, Vec<ResolvedContext>) {
        let mut contexts = Vec::new();
        let mut block = String::new();

        let resolutions =
            futures::future::join_all(references.iter().map(|r| self.resolve(r))).await;

        for (reference, resolution) in references.iter().zip(resolutions) {
            match resolution {
                Ok(resolved) => {
                    block.push_str(&format!(
                        "=== Reference {}:{} ===\n",
                        reference.ref_type.as_str(),
                        reference.target
                    ));
                    if let Some(context) = &reference.context {
                        block.push_str(&format!("({})\n", context));
                    }
                    block.push_str(&resolved.content);
                    if !block.ends_with('\n') {
                        block.push('\n');
                    }
                    block.push('\n');
                    contexts.push(resolved);
                }
                Err(e) => {
                    log::warn!(
                        "Reference {}:{} failed to resolve: {}",
                        reference.ref_type.as_str(),
                        reference.target,
                        e
                    );
                }
            }
        }

        let total = references.len();
        let resolved = contexts.len();
        if resolved < total {
            log::warn!("Resolved {}/{} references", resolved, total);
        } else if total > 0 {
            log::info!("Resolved {}/{} references", resolved, total);
        }

        (block, contexts)
    }

    /// Search references never fail; an empty result list resolves to an
    /// empty note.
    fn resolve_search(&self, reference: &Reference) -> Result<ResolvedContext> {
        let hits = self
            .vfs
            .search(&reference.target, SearchMode::Or, SEARCH_TOP_N)?;
        let mut content = format!("Search results for \"{}\":\n", reference.target);
        if hits.is_empty() {
            content.push_str("(no hits)\n");
        }
        for hit in &hits {
            content.push_str(&format!(
                "- {} [{}]: {}\n",
                hit.title, hit.source, hit.snippet
            ));
        }
        Ok(
            ResolvedContext::new(reference.clone(), content, "search")
                .with_metadata("hits", json!(hits.len())),
        )
    }

    /// Tool references look up a relation by case-insensitive id substring
    /// and inject a definition view.
    fn resolve_tool(&self, reference: &Reference) -> Result<ResolvedContext> {
        let matches = self.relations.find_by_id_substring(&reference.target)?;
        let tool = matches
            .into_iter()
            .filter(|r| r.kind == RelationType::Tool)
            .max_by_key(|r| r.created_at)
            .ok_or_else(|| {
                DaemonError::NotFound(format!("Tool '{}' not found", reference.target))
            })?;

        let mut content = format!("Tool definition: {}\n", tool.name().unwrap_or(&tool.id));
        if !tool.properties.transforms.is_empty() {
            content.push_str(&format!(
                "Transforms: {}\n",
                tool.properties.transforms.join(", ")
            ));
        }
        if let Some(prompt) = &tool.properties.user_prompt {
            content.push_str(&format!("Declared with prompt: {}\n", prompt));
        }
        content.push_str(&format!(
            "Materialized: {}\n",
            tool.properties.executable_id.is_some()
        ));

        Ok(
            ResolvedContext::new(reference.clone(), content, "tool")
                .with_metadata("relation_id", json!(tool.id)),
        )
    }
}
