//! Auto-spawn rules, run after a relation materializes.
//!
//! A rule is a condition over the stored relation plus an action that
//! synthesizes further relations; spawned relations are declared through the
//! same reality compiler. Conditions must not match their own outputs, so
//! every shipped rule guards on `spawned_by`.

use crate::compiler::RealityCompiler;
use crate::core::{Relation, RelationType};
use chrono::Utc;
use serde_json::json;

type Condition = Box<dyn Fn(&Relation) -> bool + Send + Sync>;
type Action = Box<dyn Fn(&Relation) -> Vec<Relation> + Send + Sync>;

pub struct Rule {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    condition: Condition,
    action: Action,
}

impl Rule {
    pub fn new(
        id: &str,
        name: &str,
        condition: impl Fn(&Relation) -> bool + Send + Sync + 'static,
        action: impl Fn(&Relation) -> Vec<Relation> + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            enabled: true,
            condition: Box::new(condition),
            action: Box::new(action),
        }
    }

    pub fn matches(&self, relation: &Relation) -> bool {
        self.enabled && (self.condition)(relation)
    }

    pub fn run(&self, relation: &Relation) -> Vec<Relation> {
        (self.action)(relation)
    }
}

#[derive(Default)]
pub struct RuleEngine {
    rules: Vec<Rule>,
}

impl RuleEngine {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    pub fn with_default_rules() -> Self {
        Self::new(vec![install_deps_rule()])
    }

    /// Run every enabled rule against the stored relation. Errors in one
    /// rule are isolated and logged; processing continues.
    pub async fn process_relation(&self, relation: &Relation, compiler: &RealityCompiler) {
        for rule in &self.rules {
            if !rule.matches(relation) {
                continue;
            }
            log::debug!("Rule '{}' matched relation {}", rule.name, relation.id);
            for spawned in rule.run(relation) {
                let spawned_id = spawned.id.clone();
                if let Err(e) = compiler.declare_relation(spawned).await {
                    log::error!(
                        "Rule '{}' failed to declare spawned relation {}: {}",
                        rule.name,
                        spawned_id,
                        e
                    );
                }
            }
        }
    }
}

/// Tools declaring package dependencies get a companion artifact describing
/// what to install.
fn install_deps_rule() -> Rule {
    Rule::new(
        "install-deps",
        "spawn dependency installer artifact",
        |relation| {
            relation.kind == RelationType::Tool
                && relation.properties.spawned_by.is_none()
                && relation
                    .properties
                    .extra
                    .get("dependencies")
                    .and_then(|v| v.as_array())
                    .is_some_and(|deps| !deps.is_empty())
        },
        |relation| {
            let name = relation.name().unwrap_or("tool");
            let deps = relation
                .properties
                .extra
                .get("dependencies")
                .cloned()
                .unwrap_or_else(|| json!([]));
            let mut artifact = Relation::new(
                format!("artifact-{}-deps-{}", name, Utc::now().timestamp()),
                RelationType::Artifact,
            );
            artifact.properties.name = Some(format!("{}-deps", name));
            artifact.properties.spawned_by = Some(relation.id.clone());
            artifact.properties.parent = Some(relation.id.clone());
            artifact
                .properties
                .extra
                .insert("dependencies".to_string(), deps);
            vec![artifact]
        },
    )
}
