//! Daemon wiring and the TCP accept loop.

use crate::ai::AIClient;
use crate::compiler::{MaterializationRegistry, RealityCompiler, RuleEngine, ToolMaterializer};
use crate::context::ContextCollector;
use crate::core::{DaemonConfig, DaemonError, Result};
use crate::memory::{SessionManager, spawn_sweeper};
use crate::resolve::{FileGuard, ReferenceResolver, UrlResolver, VfsPathResolver};
use crate::server::handlers;
use crate::server::protocol::{Request, Response};
use crate::server::validate::Validator;
use crate::similarity::SimilarityEngine;
use crate::storage::{MetadataIndex, ObjectStore, RelationStore, SessionIndex};
use crate::vfs::VirtualFs;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

/// Requests larger than this are refused outright.
const MAX_REQUEST_BYTES: u64 = 16 * 1024 * 1024;

const INSTALL_DEPS_SCRIPT: &str = r#"#!/bin/bash
# Installs packages a generated tool depends on, using whichever package
# manager this host has.
set -e
if [ $# -eq 0 ]; then
    echo "usage: install-deps.sh <package> [package...]" >&2
    exit 1
fi
if command -v apt-get >/dev/null 2>&1; then
    sudo apt-get install -y "$@"
elif command -v brew >/dev/null 2>&1; then
    brew install "$@"
elif command -v dnf >/dev/null 2>&1; then
    sudo dnf install -y "$@"
elif command -v pacman >/dev/null 2>&1; then
    sudo pacman -S --noconfirm "$@"
else
    echo "No supported package manager found; install manually: $*" >&2
    exit 1
fi
"#;

pub struct Daemon {
    pub config: DaemonConfig,
    pub metadata: Arc<MetadataIndex>,
    pub relations: Arc<RelationStore>,
    pub session_index: Arc<SessionIndex>,
    pub sessions: Arc<SessionManager>,
    pub compiler: RealityCompiler,
    pub resolver: ReferenceResolver,
    pub vfs: Arc<VirtualFs>,
    pub collector: ContextCollector,
    pub validator: Validator,
    pub ai: Arc<dyn AIClient>,
    started_at: Instant,
    bound: Mutex<Option<String>>,
}

impl Daemon {
    pub fn new(config: DaemonConfig, ai: Arc<dyn AIClient>) -> Result<Arc<Self>> {
        config
            .validate()
            .map_err(DaemonError::Validation)?;
        std::fs::create_dir_all(&config.base_dir)
            .map_err(|e| DaemonError::Io(format!("Failed to create base dir: {}", e)))?;
        std::fs::create_dir_all(config.commands_dir())
            .map_err(|e| DaemonError::Io(format!("Failed to create commands dir: {}", e)))?;
        std::fs::create_dir_all(config.debug_dir())
            .map_err(|e| DaemonError::Io(format!("Failed to create debug dir: {}", e)))?;
        write_install_deps_helper(&config)?;

        let relations = Arc::new(RelationStore::new(config.relations_dir())?);
        let objects = Arc::new(ObjectStore::with_relations(
            config.objects_dir(),
            Arc::clone(&relations),
        )?);
        let metadata = Arc::new(MetadataIndex::new(config.metadata_dir(), objects)?);
        let session_index = Arc::new(SessionIndex::new(
            config.session_index_path(),
            config.agent_sessions_path(),
            Arc::clone(&metadata),
        )?);
        let sessions = Arc::new(SessionManager::new(
            Arc::clone(&session_index),
            config.idle_timeout,
        ));
        let similarity = Arc::new(SimilarityEngine::new(Arc::clone(&relations)));
        let vfs = Arc::new(VirtualFs::new(
            Arc::clone(&metadata),
            Arc::clone(&relations),
            Arc::clone(&session_index),
            Arc::clone(&similarity),
            config.commands_dir(),
        ));
        let resolver = ReferenceResolver::new(
            FileGuard::new(config.max_file_size),
            UrlResolver::new(
                Arc::clone(&relations),
                Arc::clone(&metadata),
                config.fetch_timeout,
            )?,
            VfsPathResolver::new(Arc::clone(&vfs), Arc::clone(&session_index)),
            Arc::clone(&vfs),
            Arc::clone(&relations),
        );

        let mut registry = MaterializationRegistry::new(config.materializations_dir())?;
        registry.register(Box::new(ToolMaterializer::new(
            Arc::clone(&ai),
            Arc::clone(&metadata),
            Arc::clone(&relations),
            config.commands_dir(),
            config.debug_dir(),
        )));
        let compiler = RealityCompiler::new(
            Arc::clone(&relations),
            registry,
            RuleEngine::with_default_rules(),
            Arc::clone(&similarity),
        );
        let validator = Validator::new(
            FileGuard::new(config.max_file_size),
            config.max_prompt_len,
        );

        Ok(Arc::new(Self {
            config,
            metadata,
            relations,
            session_index,
            sessions,
            compiler,
            resolver,
            vfs,
            collector: ContextCollector::new(),
            validator,
            ai,
            started_at: Instant::now(),
            bound: Mutex::new(None),
        }))
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn bound_address(&self) -> String {
        self.bound
            .lock()
            .ok()
            .and_then(|b| b.clone())
            .unwrap_or_else(|| format!("{}:{}", self.config.host, self.config.port))
    }

    /// Bind the listener, preferring the configured port and falling back
    /// on a permission error (port 42 needs privileges).
    pub async fn bind(&self) -> Result<TcpListener> {
        let primary = format!("{}:{}", self.config.host, self.config.port);
        match TcpListener::bind(&primary).await {
            Ok(listener) => self.register_listener(listener),
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                let fallback = format!("{}:{}", self.config.host, self.config.fallback_port);
                log::warn!(
                    "Binding {} needs privileges ({}), falling back to {}",
                    primary,
                    e,
                    fallback
                );
                let listener = TcpListener::bind(&fallback)
                    .await
                    .map_err(|e| DaemonError::Io(format!("Failed to bind {}: {}", fallback, e)))?;
                self.register_listener(listener)
            }
            Err(e) => Err(DaemonError::Io(format!(
                "Failed to bind {}: {}",
                primary, e
            ))),
        }
    }

    fn register_listener(&self, listener: TcpListener) -> Result<TcpListener> {
        if let Ok(addr) = listener.local_addr() {
            if let Ok(mut bound) = self.bound.lock() {
                *bound = Some(addr.to_string());
            }
            log::info!("Listening on {}", addr);
        }
        Ok(listener)
    }

    /// Bind, start the lifecycle sweeper, serve until SIGINT/SIGTERM, then
    /// flush every live session.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener, shutdown_signal()).await
    }

    /// Accept loop with an injectable shutdown future, one spawned task per
    /// connection.
    pub async fn serve(
        self: Arc<Self>,
        listener: TcpListener,
        shutdown: impl std::future::Future<Output = ()>,
    ) -> Result<()> {
        let sweeper = spawn_sweeper(Arc::clone(&self.sessions), self.config.sweep_interval);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((socket, peer)) => {
                            let conn_id = uuid::Uuid::new_v4();
                            log::debug!("Accepted connection {} from {}", conn_id, peer);
                            let daemon = Arc::clone(&self);
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(daemon, socket).await {
                                    log::debug!("Connection {} ended with error: {}", conn_id, e);
                                }
                            });
                        }
                        Err(e) => log::error!("Accept failed: {}", e),
                    }
                }
                _ = &mut shutdown => {
                    log::info!("Shutdown requested");
                    break;
                }
            }
        }

        sweeper.abort();
        let flushed = self.sessions.flush_all().await;
        log::info!("Flushed {} session(s) on shutdown", flushed);
        Ok(())
    }
}

/// One request per connection: read a JSON object (newline or EOF
/// terminated), answer, close.
async fn handle_connection(daemon: Arc<Daemon>, socket: TcpStream) -> Result<()> {
    let mut reader = BufReader::new(socket);
    let mut line = Vec::new();
    (&mut reader)
        .take(MAX_REQUEST_BYTES)
        .read_until(b'\n', &mut line)
        .await
        .map_err(|e| DaemonError::Io(format!("Read failed: {}", e)))?;

    let response = match serde_json::from_slice::<Request>(&line) {
        Ok(request) => handlers::handle(&daemon, request).await,
        Err(e) => Response::error(
            "",
            format!(
                "Malformed request JSON: {}.\nSuggestion: send one JSON object per connection.\nExample: {{\"type\": \"ping\", \"id\": \"1\"}}",
                e
            ),
        ),
    };

    let mut payload = serde_json::to_vec(&response)
        .map_err(|e| DaemonError::Serialization(format!("Failed to serialize response: {}", e)))?;
    if payload.len() > 1024 * 1024 {
        log::warn!("Large response: {} bytes", payload.len());
    }
    payload.push(b'\n');

    let socket = reader.get_mut();
    socket
        .write_all(&payload)
        .await
        .map_err(|e| DaemonError::Io(format!("Write failed: {}", e)))?;
    socket
        .shutdown()
        .await
        .map_err(|e| DaemonError::Io(format!("Shutdown failed: {}", e)))?;
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                log::error!("Cannot install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

fn write_install_deps_helper(config: &DaemonConfig) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let path = config.base_dir.join("install-deps.sh");
    if path.exists() {
        return Ok(());
    }
    std::fs::write(&path, INSTALL_DEPS_SCRIPT)
        .map_err(|e| DaemonError::Io(format!("Failed to write install-deps.sh: {}", e)))?;
    let mut perms = std::fs::metadata(&path)
        .map_err(|e| DaemonError::Io(format!("Failed to stat install-deps.sh: {}", e)))?
        .permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms)
        .map_err(|e| DaemonError::Io(format!("Failed to chmod install-deps.sh: {}", e)))?;
    Ok(())
}
