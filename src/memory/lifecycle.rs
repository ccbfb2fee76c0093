//! Periodic session lifecycle sweep.

use crate::memory::manager::SessionManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Spawn the background sweep task. The handle is aborted at shutdown,
/// after which `SessionManager::flush_all` does the final persist.
pub fn spawn_sweeper(manager: Arc<SessionManager>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick fires immediately; skip it so a fresh daemon does
        // not sweep an empty map.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let (transitioned, evicted) = manager.sweep().await;
            if transitioned > 0 || evicted > 0 {
                log::info!(
                    "Session sweep: {} transitioned, {} evicted",
                    transitioned,
                    evicted
                );
            }
        }
    })
}
