//! Local-file references and their safety boundary.
//!
//! File targets may only come from an allowed root (the current working
//! tree, the home directory minus credential stores, `.port42/`); system
//! roots and traversal are rejected before any read happens.

use crate::core::{DaemonError, Reference, ResolvedContext, Result};
use serde_json::json;
use std::path::{Component, Path, PathBuf};

/// Roots never readable through a file reference, whitelisted or not.
const FORBIDDEN_PREFIXES: &[&str] = &["/etc", "/usr", "/var", "/bin", "/sbin", "/sys", "/proc"];

/// Home subdirectories excluded from the whitelist.
const FORBIDDEN_HOME_DIRS: &[&str] = &[".ssh", ".gnupg", ".aws"];

/// Extensions a file reference may carry.
const ALLOWED_EXTENSIONS: &[&str] = &[
    "txt", "md", "markdown", "json", "yaml", "yml", "toml", "csv", "xml", "html", "css", "sql",
    "rs", "py", "js", "ts", "go", "c", "h", "cpp", "sh", "bash", "rb", "java", "conf", "cfg",
    "ini", "env", "log", "lock",
];

/// Path-safety gate for file references.
pub struct FileGuard {
    allowed_roots: Vec<PathBuf>,
    max_size: u64,
}

impl FileGuard {
    /// Default whitelist: working tree, home directory, `~/.port42`.
    pub fn new(max_size: u64) -> Self {
        let mut allowed_roots = Vec::new();
        if let Ok(cwd) = std::env::current_dir() {
            allowed_roots.push(cwd);
        }
        if let Ok(home) = std::env::var("HOME") {
            let home = PathBuf::from(home);
            allowed_roots.push(home.join(".port42"));
            allowed_roots.push(home);
        }
        Self {
            allowed_roots,
            max_size,
        }
    }

    pub fn with_roots(allowed_roots: Vec<PathBuf>, max_size: u64) -> Self {
        Self {
            allowed_roots,
            max_size,
        }
    }

    pub fn resolve(&self, reference: &Reference) -> Result<ResolvedContext> {
        let path = self.check(&reference.target)?;
        let content = std::fs::read_to_string(&path).map_err(|e| {
            DaemonError::Resolution(format!("Failed to read '{}': {}", reference.target, e))
        })?;
        let content_type = content_type_of(&path);
        let size = content.len();

        Ok(
            ResolvedContext::new(reference.clone(), content, "file")
                .with_metadata("path", json!(path.to_string_lossy()))
                .with_metadata("content_type", json!(content_type))
                .with_metadata("size", json!(size)),
        )
    }

    /// Validate a file target without reading it; the request validator
    /// calls this before any mutation.
    pub fn check(&self, target: &str) -> Result<PathBuf> {
        let expanded = expand_home(target)?;

        if expanded
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(DaemonError::Validation(format!(
                "File reference '{}' rejected: path traversal ('..') is not allowed.\nSuggestion: pass a path inside your working tree or home directory.\nExample: --ref file:./notes/config.json",
                target
            )));
        }

        let absolute = if expanded.is_absolute() {
            expanded.clone()
        } else {
            std::env::current_dir()
                .map_err(|e| DaemonError::Io(format!("Cannot determine working directory: {}", e)))?
                .join(&expanded)
        };

        for prefix in FORBIDDEN_PREFIXES {
            if absolute.starts_with(prefix) {
                return Err(DaemonError::Validation(format!(
                    "File reference '{}' rejected: system location {} is off limits.\nSuggestion: copy the file into your project first.\nExample: --ref file:./copied-config.conf",
                    target, prefix
                )));
            }
        }

        if let Ok(home) = std::env::var("HOME") {
            let home = PathBuf::from(home);
            for dir in FORBIDDEN_HOME_DIRS {
                if absolute.starts_with(home.join(dir)) {
                    return Err(DaemonError::Validation(format!(
                        "File reference '{}' rejected: credential directory ~/{} is off limits.",
                        target, dir
                    )));
                }
            }
        }

        if !self
            .allowed_roots
            .iter()
            .any(|root| absolute.starts_with(root))
        {
            return Err(DaemonError::Validation(format!(
                "File reference '{}' rejected: outside the allowed locations (working tree, home, .port42).\nSuggestion: copy the file into your project first.",
                target
            )));
        }

        let metadata = std::fs::metadata(&absolute).map_err(|_| {
            DaemonError::Validation(format!(
                "File reference '{}' rejected: file does not exist.\nSuggestion: check the path and try again.\nExample: --ref file:./cfg.json",
                target
            ))
        })?;
        if !metadata.is_file() {
            return Err(DaemonError::Validation(format!(
                "File reference '{}' rejected: not a regular file.",
                target
            )));
        }
        if metadata.len() > self.max_size {
            return Err(DaemonError::Validation(format!(
                "File reference '{}' rejected: {} bytes exceeds the {} byte limit.\nSuggestion: reference a smaller excerpt.",
                target,
                metadata.len(),
                self.max_size
            )));
        }

        let extension = absolute
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase);
        match extension {
            Some(ext) if ALLOWED_EXTENSIONS.contains(&ext.as_str()) => {}
            _ => {
                return Err(DaemonError::Validation(format!(
                    "File reference '{}' rejected: extension is not on the allowed list.\nSuggestion: use text-like files ({} ...).",
                    target,
                    ALLOWED_EXTENSIONS[..6].join(", ")
                )));
            }
        }

        Ok(absolute)
    }
}

fn expand_home(target: &str) -> Result<PathBuf> {
    if let Some(rest) = target.strip_prefix("~/") {
        let home = std::env::var("HOME")
            .map_err(|_| DaemonError::Internal("HOME environment variable is not set".to_string()))?;
        return Ok(PathBuf::from(home).join(rest));
    }
    Ok(PathBuf::from(target))
}

fn content_type_of(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => "application/json",
        Some("yaml") | Some("yml") => "application/yaml",
        Some("toml") => "application/toml",
        Some("md") | Some("markdown") => "text/markdown",
        Some("html") => "text/html",
        Some("csv") => "text/csv",
        Some("rs") | Some("py") | Some("js") | Some("ts") | Some("go") | Some("c") | Some("h")
        | Some("cpp") | Some("sh") | Some("bash") | Some("rb") | Some("java") => "text/x-source",
        _ => "text/plain",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ReferenceType;
    use tempfile::TempDir;

    const MAX: u64 = 1024 * 1024;

    fn guard_for(dir: &TempDir) -> FileGuard {
        FileGuard::with_roots(vec![dir.path().to_path_buf()], MAX)
    }

    #[test]
    fn test_traversal_rejected() {
        let dir = TempDir::new().unwrap();
        let err = guard_for(&dir).check("../../../../etc/passwd").unwrap_err();
        assert!(matches!(err, DaemonError::Validation(_)));
        assert!(err.to_string().contains("traversal"));
    }

    #[test]
    fn test_system_roots_rejected() {
        let dir = TempDir::new().unwrap();
        let guard = guard_for(&dir);
        for target in ["/etc/passwd", "/usr/bin/env", "/proc/self/environ"] {
            assert!(matches!(
                guard.check(target),
                Err(DaemonError::Validation(_))
            ));
        }
    }

    #[test]
    fn test_outside_whitelist_rejected() {
        let dir = TempDir::new().unwrap();
        let other = TempDir::new().unwrap();
        let path = other.path().join("notes.txt");
        std::fs::write(&path, b"hello").unwrap();
        let err = guard_for(&dir).check(path.to_str().unwrap()).unwrap_err();
        assert!(err.to_string().contains("allowed locations"));
    }

    #[test]
    fn test_missing_file_rejected() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("absent.json");
        assert!(matches!(
            guard_for(&dir).check(target.to_str().unwrap()),
            Err(DaemonError::Validation(_))
        ));
    }

    #[test]
    fn test_oversized_file_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("big.txt");
        std::fs::write(&path, vec![b'x'; 64]).unwrap();
        let guard = FileGuard::with_roots(vec![dir.path().to_path_buf()], 10);
        assert!(matches!(
            guard.check(path.to_str().unwrap()),
            Err(DaemonError::Validation(_))
        ));
    }

    #[test]
    fn test_disallowed_extension_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tool.bin");
        std::fs::write(&path, b"binary").unwrap();
        assert!(matches!(
            guard_for(&dir).check(path.to_str().unwrap()),
            Err(DaemonError::Validation(_))
        ));
    }

    #[test]
    fn test_resolve_reads_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cfg.json");
        std::fs::write(&path, br#"{"api":"x"}"#).unwrap();
        let reference = Reference::new(ReferenceType::File, path.to_str().unwrap().to_string());
        let resolved = guard_for(&dir).resolve(&reference).unwrap();
        assert!(resolved.content.contains("api"));
        assert_eq!(
            resolved.metadata.get("content_type").unwrap(),
            "application/json"
        );
    }
}
