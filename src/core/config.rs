use std::path::PathBuf;
use std::time::Duration;

/// Daemon configuration
///
/// Everything lives under `<home>/.port42/`; the listener binds the loopback
/// interface only.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Host to bind
    pub host: String,

    /// Primary port; `fallback_port` is tried on a permission error
    pub port: u16,

    /// Fallback port for non-root runs
    pub fallback_port: u16,

    /// Base directory, `<home>/.port42`
    pub base_dir: PathBuf,

    /// Session idle timeout (active → idle)
    pub idle_timeout: Duration,

    /// Period of the session lifecycle sweep
    pub sweep_interval: Duration,

    /// Timeout for URL reference fetches
    pub fetch_timeout: Duration,

    /// Maximum size of a file reference
    pub max_file_size: u64,

    /// Maximum length of a user prompt
    pub max_prompt_len: usize,

    /// Objects larger than this are skipped by content-body search
    pub max_search_body: u64,
}

impl DaemonConfig {
    /// Configuration rooted at `$HOME/.port42`, with env overrides applied.
    ///
    /// `PORT42_PORT` and `PORT42_IDLE_TIMEOUT` (seconds) override the
    /// defaults when set to something parseable.
    pub fn from_env() -> crate::core::Result<Self> {
        let home = std::env::var("HOME").map_err(|_| {
            crate::core::DaemonError::Internal("HOME environment variable is not set".to_string())
        })?;
        let mut config = Self::with_base_dir(PathBuf::from(home).join(".port42"));

        if let Some(port) = std::env::var("PORT42_PORT")
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
        {
            config.port = port;
        }
        if let Some(secs) = std::env::var("PORT42_IDLE_TIMEOUT")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|v| *v > 0)
        {
            config.idle_timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }

    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 42,
            fallback_port: 4242,
            base_dir,
            idle_timeout: Duration::from_secs(30 * 60),
            sweep_interval: Duration::from_secs(5 * 60),
            fetch_timeout: Duration::from_secs(30),
            max_file_size: 1024 * 1024,
            max_prompt_len: 5000,
            max_search_body: 100 * 1024,
        }
    }

    /// Set the host
    pub fn host(mut self, host: &str) -> Self {
        self.host = host.to_string();
        self
    }

    /// Set the port
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the session idle timeout
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the lifecycle sweep interval
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn objects_dir(&self) -> PathBuf {
        self.base_dir.join("objects")
    }

    pub fn metadata_dir(&self) -> PathBuf {
        self.base_dir.join("metadata")
    }

    pub fn relations_dir(&self) -> PathBuf {
        self.base_dir.join("relations")
    }

    pub fn materializations_dir(&self) -> PathBuf {
        self.base_dir.join("materializations")
    }

    pub fn commands_dir(&self) -> PathBuf {
        self.base_dir.join("commands")
    }

    pub fn debug_dir(&self) -> PathBuf {
        self.base_dir.join("debug")
    }

    pub fn session_index_path(&self) -> PathBuf {
        self.base_dir.join("session-index.json")
    }

    pub fn agent_sessions_path(&self) -> PathBuf {
        self.base_dir.join("agent_sessions.json")
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.base_dir.as_os_str().is_empty() {
            return Err("base_dir cannot be empty".to_string());
        }
        if self.port == self.fallback_port {
            return Err("fallback_port must differ from port".to_string());
        }
        if self.idle_timeout.is_zero() {
            return Err("idle_timeout must be > 0".to_string());
        }
        if self.max_file_size == 0 {
            return Err("max_file_size must be > 0".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout() {
        let config = DaemonConfig::with_base_dir(PathBuf::from("/tmp/p42"));
        assert_eq!(config.port, 42);
        assert_eq!(config.fallback_port, 4242);
        assert_eq!(config.objects_dir(), PathBuf::from("/tmp/p42/objects"));
        assert_eq!(
            config.session_index_path(),
            PathBuf::from("/tmp/p42/session-index.json")
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let config = DaemonConfig::with_base_dir(PathBuf::from("/tmp/p42"))
            .host("0.0.0.0")
            .port(4343)
            .idle_timeout(Duration::from_secs(60));
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 4343);
        assert_eq!(config.idle_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_validate_rejects_equal_ports() {
        let mut config = DaemonConfig::with_base_dir(PathBuf::from("/tmp/p42"));
        config.fallback_port = config.port;
        assert!(config.validate().is_err());
    }
}
