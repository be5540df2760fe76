//! Per-session directory watching.
//!
//! Each watched working directory gets a recursive [`notify`] watcher whose
//! events are bridged onto the runtime, debounced, and turned into a fresh
//! file count. Metrics fan out over a broadcast channel shared by every
//! connected client and stay cached for connect-time replay.

use notify::{RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::WatcherConfig;
use crate::scan;

/// Snapshot of a watched directory, sent after each settled change burst.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryMetrics {
    pub session_id: String,
    pub file_count: u64,
    /// Rough context-size proxy derived from the file count.
    pub context_estimate: u64,
}

struct WatchEntry {
    // Dropping the watcher tears down the OS-level subscription.
    _watcher: notify::RecommendedWatcher,
    cancel: CancellationToken,
    latest: Option<DirectoryMetrics>,
}

/// Registry of active directory watches, one per session.
#[derive(Clone)]
pub struct WatchRegistry {
    watches: Arc<RwLock<HashMap<String, WatchEntry>>>,
    metrics_tx: broadcast::Sender<DirectoryMetrics>,
    config: WatcherConfig,
}

impl WatchRegistry {
    pub fn new(config: WatcherConfig) -> Self {
        let (metrics_tx, _) = broadcast::channel(64);
        Self {
            watches: Arc::new(RwLock::new(HashMap::new())),
            metrics_tx,
            config,
        }
    }

    /// Receive metrics updates for all watched directories.
    pub fn subscribe(&self) -> broadcast::Receiver<DirectoryMetrics> {
        self.metrics_tx.subscribe()
    }

    /// Last computed metrics for a session, if it is being watched.
    pub async fn latest_metrics(&self, session_id: &str) -> Option<DirectoryMetrics> {
        self.watches
            .read()
            .await
            .get(session_id)
            .and_then(|e| e.latest.clone())
    }

    /// Start watching `dir` on behalf of `session_id`. Re-watching an
    /// already-watched session replaces the previous watch.
    pub async fn watch(&self, session_id: &str, dir: &Path) -> notify::Result<()> {
        // notify's callback runs on its own thread; an unbounded channel
        // bridges it to the async debounce task without blocking it.
        let (event_tx, event_rx) = mpsc::unbounded_channel::<()>();
        let root = dir.to_path_buf();
        let filter_root = root.clone();

        let mut watcher = notify::recommended_watcher(
            move |res: notify::Result<notify::Event>| match res {
                Ok(event) => {
                    let relevant = event.paths.iter().any(|p| {
                        let rel = p.strip_prefix(&filter_root).unwrap_or(p);
                        !scan::path_is_excluded(rel)
                    });
                    if relevant {
                        let _ = event_tx.send(());
                    }
                }
                Err(e) => warn!(error = %e, "directory watch error"),
            },
        )?;
        watcher.watch(&root, RecursiveMode::Recursive)?;

        let cancel = CancellationToken::new();
        let entry = WatchEntry {
            _watcher: watcher,
            cancel: cancel.clone(),
            latest: None,
        };
        if let Some(old) = self.watches.write().await.insert(session_id.to_string(), entry) {
            old.cancel.cancel();
        }

        let registry = self.clone();
        let id = session_id.to_string();
        tokio::spawn(async move {
            registry.run_watch(id, root, event_rx, cancel).await;
        });

        Ok(())
    }

    /// Stop watching a session's directory. Idempotent.
    pub async fn unwatch(&self, session_id: &str) {
        if let Some(entry) = self.watches.write().await.remove(session_id) {
            entry.cancel.cancel();
            debug!(session_id, "stopped directory watch");
        }
    }

    /// Tear down every watch. Used on shutdown.
    pub async fn shutdown(&self) {
        let mut watches = self.watches.write().await;
        for (_, entry) in watches.drain() {
            entry.cancel.cancel();
        }
    }

    async fn run_watch(
        &self,
        session_id: String,
        root: PathBuf,
        mut events: mpsc::UnboundedReceiver<()>,
        cancel: CancellationToken,
    ) {
        // Initial count so observers see metrics before anything changes.
        self.recount(&session_id, &root).await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => {
                    if event.is_none() {
                        break;
                    }
                    // Coalesce the burst: keep draining until the directory
                    // has been quiet for one debounce window.
                    loop {
                        tokio::select! {
                            _ = cancel.cancelled() => return,
                            _ = tokio::time::sleep(self.config.debounce) => break,
                            more = events.recv() => {
                                if more.is_none() {
                                    return;
                                }
                            }
                        }
                    }
                    self.recount(&session_id, &root).await;
                }
            }
        }
    }

    async fn recount(&self, session_id: &str, root: &Path) {
        let file_count = match scan::count_files(root).await {
            Ok(n) => n,
            Err(e) => {
                warn!(session_id, error = %e, "file count failed");
                return;
            }
        };
        let metrics = DirectoryMetrics {
            session_id: session_id.to_string(),
            file_count,
            context_estimate: file_count / self.config.file_ratio,
        };

        let mut watches = self.watches.write().await;
        match watches.get_mut(session_id) {
            // The watch may have been removed while the count ran.
            None => return,
            Some(entry) => entry.latest = Some(metrics.clone()),
        }
        drop(watches);

        debug!(session_id, file_count, "directory metrics updated");
        let _ = self.metrics_tx.send(metrics);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_config() -> WatcherConfig {
        WatcherConfig {
            debounce: Duration::from_millis(50),
            file_ratio: 10,
        }
    }

    async fn recv_metrics(
        rx: &mut broadcast::Receiver<DirectoryMetrics>,
    ) -> DirectoryMetrics {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for metrics")
            .expect("metrics channel closed")
    }

    #[tokio::test]
    async fn initial_count_is_broadcast() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("a.txt"), "a").unwrap();
        std::fs::write(tmp.path().join("b.txt"), "b").unwrap();

        let registry = WatchRegistry::new(test_config());
        let mut rx = registry.subscribe();
        registry.watch("s1", tmp.path()).await.unwrap();

        let metrics = recv_metrics(&mut rx).await;
        assert_eq!(metrics.session_id, "s1");
        assert_eq!(metrics.file_count, 2);
        assert_eq!(metrics.context_estimate, 0);

        assert_eq!(
            registry.latest_metrics("s1").await.unwrap().file_count,
            2
        );
    }

    #[tokio::test]
    async fn change_triggers_recount_after_debounce() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = WatchRegistry::new(test_config());
        let mut rx = registry.subscribe();
        registry.watch("s1", tmp.path()).await.unwrap();

        let initial = recv_metrics(&mut rx).await;
        assert_eq!(initial.file_count, 0);

        std::fs::write(tmp.path().join("new.txt"), "x").unwrap();
        let updated = recv_metrics(&mut rx).await;
        assert_eq!(updated.file_count, 1);
    }

    #[tokio::test]
    async fn unwatch_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = WatchRegistry::new(test_config());
        registry.watch("s1", tmp.path()).await.unwrap();

        registry.unwatch("s1").await;
        registry.unwatch("s1").await;
        registry.unwatch("never-watched").await;

        assert!(registry.latest_metrics("s1").await.is_none());
    }
}
