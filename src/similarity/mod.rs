//! Transform-set similarity: Jaccard over normalized transform tags plus a
//! bounded semantic boost, and the bidirectional `similar_to` relationship
//! records built from it.

use crate::core::{Relation, RelationType, Result};
use crate::storage::RelationStore;
use lazy_static::lazy_static;
use std::collections::HashSet;
use std::sync::Arc;

/// Boost granted per ordered cross-set pair landing in one semantic group.
const SEMANTIC_BOOST_STEP: f64 = 0.15;
/// Total boost cap.
const SEMANTIC_BOOST_CAP: f64 = 0.30;
/// Score needed before a similar_to relationship is recorded.
pub const LINK_THRESHOLD: f64 = 0.5;
/// Score needed to show up under `/similar/`.
pub const VIEW_THRESHOLD: f64 = 0.2;

lazy_static! {
    /// Semantic groups: a base word plus synonyms. Groups may overlap; a
    /// word like "parse" sits in its own group and among the analyze
    /// synonyms.
    static ref SEMANTIC_GROUPS: Vec<(&'static str, HashSet<&'static str>)> = {
        let groups: &[(&str, &[&str])] = &[
            ("analyze", &["analyze", "analysis", "analyse", "parse", "inspect", "examine"]),
            ("parse", &["parse", "parsing", "extract", "tokenize", "scan"]),
            ("format", &["format", "formatting", "pretty", "beautify", "style"]),
            ("test", &["test", "testing", "check", "verify", "validate"]),
            ("log", &["log", "logs", "logging", "trace", "audit"]),
            ("data", &["data", "dataset", "records", "csv", "json"]),
            ("file", &["file", "files", "filesystem", "directory", "path"]),
            ("network", &["network", "http", "url", "fetch", "request"]),
            ("security", &["security", "secure", "encrypt", "auth", "secret"]),
            ("config", &["config", "configuration", "settings", "env"]),
        ];
        groups
            .iter()
            .map(|(name, words)| (*name, words.iter().copied().collect()))
            .collect()
    };
}

/// Two distinct words are semantically related when any group holds both.
fn share_group(a: &str, b: &str) -> bool {
    SEMANTIC_GROUPS
        .iter()
        .any(|(_, words)| words.contains(a) && words.contains(b))
}

fn normalize(transforms: &[String]) -> HashSet<String> {
    transforms
        .iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Similarity of two transform sets in [0, 1].
///
/// Base score is Jaccard; every ordered pair of distinct words sharing a
/// semantic group adds `SEMANTIC_BOOST_STEP`, capped at
/// `SEMANTIC_BOOST_CAP`. Returns the score and whether any boost applied.
pub fn transform_similarity(a: &[String], b: &[String]) -> (f64, bool) {
    let set_a = normalize(a);
    let set_b = normalize(b);
    if set_a.is_empty() || set_b.is_empty() {
        return (0.0, false);
    }

    let intersection = set_a.intersection(&set_b).count() as f64;
    let union = set_a.union(&set_b).count() as f64;
    let base = intersection / union;

    let mut boost = 0.0;
    for word_a in &set_a {
        for word_b in &set_b {
            if word_a == word_b {
                continue;
            }
            if share_group(word_a, word_b) {
                boost += SEMANTIC_BOOST_STEP;
            }
        }
    }
    let boost = boost.min(SEMANTIC_BOOST_CAP);
    ((base + boost).min(1.0), boost > 0.0)
}

fn score_band(score: f64) -> &'static str {
    if score >= 0.8 {
        "very-high"
    } else if score >= 0.6 {
        "high"
    } else if score >= 0.4 {
        "moderate"
    } else {
        "low"
    }
}

#[derive(Debug, Clone)]
pub struct SimilarTool {
    pub relation: Relation,
    pub score: f64,
    pub reasons: Vec<String>,
}

pub struct SimilarityEngine {
    relations: Arc<RelationStore>,
}

impl SimilarityEngine {
    pub fn new(relations: Arc<RelationStore>) -> Self {
        Self { relations }
    }

    /// Score every other Tool relation against `target`, keep matches at or
    /// above `threshold`, highest first.
    pub fn find_similar_tools(&self, target: &Relation, threshold: f64) -> Result<Vec<SimilarTool>> {
        let target_transforms = &target.properties.transforms;
        let mut matches = Vec::new();

        for candidate in self.relations.load_by_type(RelationType::Tool)? {
            if candidate.id == target.id || candidate.name() == target.name() {
                continue;
            }
            let (score, boosted) =
                transform_similarity(target_transforms, &candidate.properties.transforms);
            if score < threshold {
                continue;
            }

            let shared: Vec<String> = normalize(target_transforms)
                .intersection(&normalize(&candidate.properties.transforms))
                .cloned()
                .collect();
            let mut reasons = Vec::new();
            if !shared.is_empty() {
                let mut shared = shared;
                shared.sort();
                reasons.push(format!("shared transforms: {}", shared.join(", ")));
            }
            reasons.push(format!("{} similarity", score_band(score)));
            if boosted {
                reasons.push("semantic boost applied".to_string());
            }

            matches.push(SimilarTool {
                relation: candidate,
                score,
                reasons,
            });
        }

        matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        Ok(matches)
    }

    /// Record bidirectional similar_to relationships for every partner at or
    /// above `LINK_THRESHOLD`. Returns how many pairs were linked.
    pub fn link_similar(&self, target: &Relation) -> Result<usize> {
        let partners = self.find_similar_tools(target, LINK_THRESHOLD)?;
        let mut linked = 0;
        for partner in &partners {
            self.save_link(target, &partner.relation, partner.score, &partner.reasons)?;
            self.save_link(&partner.relation, target, partner.score, &partner.reasons)?;
            linked += 1;
        }
        Ok(linked)
    }

    fn save_link(&self, from: &Relation, to: &Relation, score: f64, reasons: &[String]) -> Result<()> {
        let id = format!("similarity-{}-{}", from.id, to.id);
        if self.relations.exists(&id) {
            return Ok(());
        }
        let mut link = Relation::new(id, RelationType::Relationship);
        link.properties.relationship_type = Some("similar_to".to_string());
        link.properties.from = Some(from.id.clone());
        link.properties.to = Some(to.id.clone());
        link.properties.similarity_score = Some(score);
        link.properties.reasons = reasons.to_vec();
        link.properties.auto_generated = Some(true);
        self.relations.save(&link)
    }

    /// Tool names that have at least one partner at `VIEW_THRESHOLD`, for
    /// the `/similar/` root listing.
    pub fn tools_with_partners(&self) -> Result<Vec<String>> {
        let tools = self.relations.load_by_type(RelationType::Tool)?;
        let mut names = Vec::new();
        for tool in &tools {
            let Some(name) = tool.name() else { continue };
            if names.iter().any(|n| n == name) {
                continue;
            }
            if !self.find_similar_tools(tool, VIEW_THRESHOLD)?.is_empty() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Partners of a named tool for the `/similar/<tool>/` view.
    pub fn partners_of(&self, name: &str) -> Result<Vec<SimilarTool>> {
        let target = self
            .relations
            .latest_tool(name)?
            .ok_or_else(|| crate::core::DaemonError::NotFound(format!("Tool '{}' not found", name)))?;
        self.find_similar_tools(&target, VIEW_THRESHOLD)
    }
}
