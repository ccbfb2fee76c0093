//! Weighted full-text search across the metadata index and the relation
//! store.

use crate::core::{ObjectMetadata, Relation, Result};
use crate::storage::{MetadataIndex, RelationStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default result cap when the request carries no limit.
pub const DEFAULT_LIMIT: usize = 20;

/// Objects above this size are skipped by the content-body scan.
const MAX_BODY_SCAN: u64 = 100 * 1024;

// Field weights.
const WEIGHT_NAME: f64 = 1.0;
const WEIGHT_MEDIUM: f64 = 0.6;
const WEIGHT_LOW: f64 = 0.4;
/// Body matches score at 0.8× of a medium metadata match.
const WEIGHT_BODY: f64 = 0.8 * WEIGHT_MEDIUM;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Phrase,
    Exact,
    And,
    #[default]
    Or,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub title: String,
    pub snippet: String,
    pub score: f64,
    pub source: &'static str,
    pub created: DateTime<Utc>,
}

struct FieldHit {
    weight: f64,
    text: String,
}

pub fn run_search(
    metadata: &MetadataIndex,
    relations: &RelationStore,
    query: &str,
    mode: SearchMode,
    limit: usize,
) -> Result<Vec<SearchResult>> {
    let query = query.trim().to_lowercase();
    let terms: Vec<&str> = query.split_whitespace().collect();
    if terms.is_empty() {
        return Ok(Vec::new());
    }
    let limit = if limit == 0 { DEFAULT_LIMIT } else { limit };
    let now = Utc::now();
    let mut results = Vec::new();

    for meta in metadata.load_all()? {
        if let Some(result) = score_metadata(metadata, &meta, &query, &terms, mode, now) {
            results.push(result);
        }
    }
    for relation in relations.list()? {
        if let Some(result) = score_relation(&relation, &query, &terms, mode, now) {
            results.push(result);
        }
    }

    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.created.cmp(&a.created))
    });
    results.truncate(limit);
    Ok(results)
}

fn score_metadata(
    index: &MetadataIndex,
    meta: &ObjectMetadata,
    query: &str,
    terms: &[&str],
    mode: SearchMode,
    now: DateTime<Utc>,
) -> Option<SearchResult> {
    let mut fields = vec![FieldHit {
        weight: WEIGHT_NAME,
        text: meta.title.clone().unwrap_or_default(),
    }];
    fields.push(FieldHit {
        weight: WEIGHT_MEDIUM,
        text: format!(
            "{} {}",
            meta.description.clone().unwrap_or_default(),
            meta.tags.join(" ")
        ),
    });
    fields.push(FieldHit {
        weight: WEIGHT_LOW,
        text: format!(
            "{} {} {}",
            meta.object_type,
            meta.agent.clone().unwrap_or_default(),
            meta.paths.join(" ")
        ),
    });
    if meta.size > 0 && meta.size < MAX_BODY_SCAN {
        if let Ok(bytes) = index.objects().read(&meta.id) {
            if let Ok(body) = String::from_utf8(bytes) {
                fields.push(FieldHit {
                    weight: WEIGHT_BODY,
                    text: body,
                });
            }
        }
    }

    let (score, snippet) = score_fields(&fields, query, terms, mode)?;
    Some(SearchResult {
        id: meta.id.clone(),
        path: meta.paths.first().cloned(),
        title: meta
            .title
            .clone()
            .unwrap_or_else(|| meta.paths.first().cloned().unwrap_or_else(|| meta.id.clone())),
        snippet,
        score: apply_recency(score, meta.created, now),
        source: "metadata",
        created: meta.created,
    })
}

fn score_relation(
    relation: &Relation,
    query: &str,
    terms: &[&str],
    mode: SearchMode,
    now: DateTime<Utc>,
) -> Option<SearchResult> {
    let props = &relation.properties;
    let property_strings: String = props
        .extra
        .values()
        .filter_map(|v| v.as_str())
        .collect::<Vec<_>>()
        .join(" ");

    let fields = vec![
        FieldHit {
            weight: WEIGHT_NAME,
            text: props.name.clone().unwrap_or_default(),
        },
        FieldHit {
            weight: WEIGHT_MEDIUM,
            text: props.transforms.join(" "),
        },
        FieldHit {
            weight: WEIGHT_LOW,
            text: format!(
                "{} {} {} {}",
                props.parent.clone().unwrap_or_default(),
                props.spawned_by.clone().unwrap_or_default(),
                props.user_prompt.clone().unwrap_or_default(),
                property_strings
            ),
        },
    ];

    let (score, snippet) = score_fields(&fields, query, terms, mode)?;
    Some(SearchResult {
        id: relation.id.clone(),
        path: props.name.as_deref().map(|n| format!("/tools/{}", n)),
        title: props.name.clone().unwrap_or_else(|| relation.id.clone()),
        snippet,
        score: apply_recency(score, relation.created_at, now),
        source: "relation",
        created: relation.created_at,
    })
}

/// Best single-field score under the given mode, with a snippet around the
/// first hit.
fn score_fields(
    fields: &[FieldHit],
    query: &str,
    terms: &[&str],
    mode: SearchMode,
) -> Option<(f64, String)> {
    let mut best: Option<(f64, String)> = None;

    for field in fields {
        let haystack = field.text.to_lowercase();
        if haystack.is_empty() {
            continue;
        }
        let field_score = match mode {
            SearchMode::Phrase | SearchMode::Exact => {
                haystack.contains(query).then_some(field.weight)
            }
            SearchMode::And => terms
                .iter()
                .all(|t| haystack.contains(t))
                .then_some(field.weight),
            SearchMode::Or => {
                let matched = terms.iter().filter(|t| haystack.contains(*t)).count();
                (matched > 0).then(|| field.weight * matched as f64 / terms.len() as f64)
            }
        };
        if let Some(score) = field_score {
            let snippet = snippet_around(&field.text, &haystack, query, terms);
            match &best {
                Some((existing, _)) if *existing >= score => {}
                _ => best = Some((score, snippet)),
            }
        }
    }
    best
}

fn snippet_around(original: &str, haystack: &str, query: &str, terms: &[&str]) -> String {
    let position = haystack
        .find(query)
        .or_else(|| terms.iter().find_map(|t| haystack.find(t)))
        .unwrap_or(0);
    let start = original
        .char_indices()
        .map(|(i, _)| i)
        .take_while(|i| *i <= position.saturating_sub(40))
        .last()
        .unwrap_or(0);
    let slice: String = original[start..].chars().take(120).collect();
    slice.replace('\n', " ").trim().to_string()
}

/// Recent items rank higher: ×1.2 inside 24 h, ×1.1 inside 7 days.
fn apply_recency(score: f64, created: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let age = now.signed_duration_since(created);
    if age <= chrono::Duration::hours(24) {
        score * 1.2
    } else if age <= chrono::Duration::days(7) {
        score * 1.1
    } else {
        score
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ObjectMetadata, Relation};
    use crate::storage::ObjectStore;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn stores(dir: &TempDir) -> (Arc<MetadataIndex>, Arc<RelationStore>) {
        let objects = Arc::new(ObjectStore::new(dir.path().join("objects")).unwrap());
        let metadata = Arc::new(MetadataIndex::new(dir.path().join("metadata"), objects).unwrap());
        let relations = Arc::new(RelationStore::new(dir.path().join("relations")).unwrap());
        (metadata, relations)
    }

    #[test]
    fn test_or_mode_scores_by_matched_ratio() {
        let dir = TempDir::new().unwrap();
        let (metadata, relations) = stores(&dir);
        let mut full = Relation::tool("log-analyzer", vec![]);
        full.properties.name = Some("log analyzer".to_string());
        relations.save(&full).unwrap();
        let mut partial = Relation::tool("log-viewer", vec![]);
        partial.properties.name = Some("log viewer".to_string());
        relations.save(&partial).unwrap();

        let results =
            run_search(&metadata, &relations, "log analyzer", SearchMode::Or, 10).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].title, "log analyzer");
        assert!(results[0].score > results[1].score);
    }

    #[test]
    fn test_and_mode_requires_all_terms() {
        let dir = TempDir::new().unwrap();
        let (metadata, relations) = stores(&dir);
        let mut tool = Relation::tool("log-viewer", vec![]);
        tool.properties.name = Some("log viewer".to_string());
        relations.save(&tool).unwrap();

        let hits =
            run_search(&metadata, &relations, "log analyzer", SearchMode::And, 10).unwrap();
        assert!(hits.is_empty());
        let hits = run_search(&metadata, &relations, "log viewer", SearchMode::And, 10).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_phrase_mode_is_substring() {
        let dir = TempDir::new().unwrap();
        let (metadata, relations) = stores(&dir);
        let mut tool = Relation::tool("x", vec![]);
        tool.properties.name = Some("Streaming Log Analyzer".to_string());
        relations.save(&tool).unwrap();

        let hits =
            run_search(&metadata, &relations, "log analyzer", SearchMode::Phrase, 10).unwrap();
        assert_eq!(hits.len(), 1);
        let none = run_search(&metadata, &relations, "analyzer log", SearchMode::Phrase, 10).unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_body_scan_finds_object_content() {
        let dir = TempDir::new().unwrap();
        let (metadata, relations) = stores(&dir);
        let mut meta = ObjectMetadata::new("", "document");
        meta.add_path("/artifacts/note");
        metadata
            .store_with_metadata(b"the needle is in this body", meta)
            .unwrap();

        let hits = run_search(&metadata, &relations, "needle", SearchMode::Or, 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].source, "metadata");
        assert!(hits[0].snippet.contains("needle"));
    }

    #[test]
    fn test_empty_query_returns_empty() {
        let dir = TempDir::new().unwrap();
        let (metadata, relations) = stores(&dir);
        assert!(run_search(&metadata, &relations, "  ", SearchMode::Or, 10)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_limit_caps_results() {
        let dir = TempDir::new().unwrap();
        let (metadata, relations) = stores(&dir);
        for i in 0..5 {
            let mut tool = Relation::tool(&format!("log-{}", i), vec![]);
            tool.id = format!("tool-log-{}-{}", i, i);
            tool.properties.name = Some(format!("log tool {}", i));
            relations.save(&tool).unwrap();
        }
        let hits = run_search(&metadata, &relations, "log", SearchMode::Or, 3).unwrap();
        assert_eq!(hits.len(), 3);
    }
}
