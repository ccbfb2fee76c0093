//! Request validation, run before any mutation.
//!
//! A request that fails validation produces no writes anywhere; errors carry
//! the what/why/fix/example shape verbatim to the caller.

use crate::core::{DaemonError, Reference, ReferenceType, Result};
use crate::resolve::FileGuard;
use lazy_static::lazy_static;
use regex::Regex;

const MIN_SEARCH_LEN: usize = 2;
const MAX_SEARCH_LEN: usize = 200;

lazy_static! {
    /// Prompt fragments that read as injection attempts.
    static ref INJECTION_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"(?i)ignore\s+(all\s+)?previous").unwrap(),
        Regex::new(r"(?i)disregard\s+(all\s+)?(prior|previous)").unwrap(),
        Regex::new(r"(?i)^\s*system\s*:").unwrap(),
        Regex::new(r"(?i)\bsystem:\s").unwrap(),
        Regex::new(r"(?i)you\s+are\s+now\s+in\s+developer\s+mode").unwrap(),
    ];
}

pub struct Validator {
    files: FileGuard,
    max_prompt_len: usize,
}

impl Validator {
    pub fn new(files: FileGuard, max_prompt_len: usize) -> Self {
        Self {
            files,
            max_prompt_len,
        }
    }

    pub fn validate_declare(&self, references: &[Reference], prompt: Option<&str>) -> Result<()> {
        self.validate_references(references)?;
        self.validate_prompt(prompt)
    }

    pub fn validate_references(&self, references: &[Reference]) -> Result<()> {
        for reference in references {
            if reference.target.trim().is_empty() {
                return Err(DaemonError::Validation(format!(
                    "Reference of type '{}' rejected: the target is empty.\nSuggestion: every reference needs a target.\nExample: --ref {}:<target>",
                    reference.ref_type.as_str(),
                    reference.ref_type.as_str()
                )));
            }
            match reference.ref_type {
                ReferenceType::File => {
                    self.files.check(&reference.target)?;
                }
                ReferenceType::Url => {
                    let target = reference.target.trim();
                    if !target.starts_with("http://") && !target.starts_with("https://") {
                        return Err(DaemonError::Validation(format!(
                            "URL reference '{}' rejected: only http and https are supported.\nSuggestion: pass a full URL.\nExample: --ref url:https://example.com/data.json",
                            target
                        )));
                    }
                }
                ReferenceType::Search => {
                    let len = reference.target.trim().chars().count();
                    if !(MIN_SEARCH_LEN..=MAX_SEARCH_LEN).contains(&len) {
                        return Err(DaemonError::Validation(format!(
                            "Search reference rejected: query must be {}-{} characters, got {}.\nExample: --ref search:\"error handling\"",
                            MIN_SEARCH_LEN, MAX_SEARCH_LEN, len
                        )));
                    }
                }
                // p42 paths and tool names resolve lazily; a miss there is a
                // resolution error, not a validation error.
                ReferenceType::P42 | ReferenceType::Tool => {}
            }
        }
        Ok(())
    }

    pub fn validate_prompt(&self, prompt: Option<&str>) -> Result<()> {
        let Some(prompt) = prompt else {
            return Ok(());
        };
        if prompt.chars().count() > self.max_prompt_len {
            return Err(DaemonError::Validation(format!(
                "Prompt rejected: {} characters exceeds the {} character limit.\nSuggestion: move large content into a file reference.\nExample: --ref file:./context.md",
                prompt.chars().count(),
                self.max_prompt_len
            )));
        }
        for pattern in INJECTION_PATTERNS.iter() {
            if pattern.is_match(prompt) {
                return Err(DaemonError::Validation(
                    "Prompt rejected: it contains an instruction-override pattern.\nSuggestion: describe what the tool should do instead of addressing the model.\nExample: \"summarize failing tests from the log\"".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn validate_search_query(&self, query: &str) -> Result<()> {
        let len = query.trim().chars().count();
        if !(MIN_SEARCH_LEN..=MAX_SEARCH_LEN).contains(&len) {
            return Err(DaemonError::Validation(format!(
                "Search query must be {}-{} characters, got {}.",
                MIN_SEARCH_LEN, MAX_SEARCH_LEN, len
            )));
        }
        Ok(())
    }
}
