//! Shared application state wired into every handler.

use std::path::Path;
use tracing::{debug, warn};

use crate::agent::AgentType;
use crate::config::{FileConfig, GatewayConfig, SessionConfig, WatcherConfig};
use crate::error::SessionError;
use crate::session_manager::{SessionEvent, SessionManager, SessionMeta};
use crate::watcher::WatchRegistry;

#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionManager,
    pub watches: WatchRegistry,
    pub gateway: GatewayConfig,
}

impl AppState {
    pub fn new(config: &FileConfig) -> Self {
        Self {
            sessions: SessionManager::new(SessionConfig::from_file(&config.sessions)),
            watches: WatchRegistry::new(WatcherConfig::from_file(&config.watcher)),
            gateway: GatewayConfig::from_file(&config.gateway),
        }
    }

    /// Create a session and start watching its working directory. A watch
    /// failure is logged, not fatal: the session is usable without metrics.
    pub async fn create_session(
        &self,
        work_dir: &str,
        label: &str,
        agent_type: AgentType,
    ) -> Result<SessionMeta, SessionError> {
        let meta = self.sessions.create(work_dir, label, agent_type).await?;
        if let Err(e) = self.watches.watch(&meta.id, Path::new(&meta.work_dir)).await {
            warn!(session_id = %meta.id, error = %e, "directory watch failed to start");
        }
        Ok(meta)
    }

    /// Background task that tears down a session's directory watch once the
    /// session terminates. Runs for the life of the process.
    pub fn spawn_watch_reaper(&self) {
        let state = self.clone();
        tokio::spawn(async move {
            let mut events = state.sessions.subscribe();
            loop {
                match events.recv().await {
                    Ok(SessionEvent::Terminated { session_id, .. }) => {
                        state.watches.unwatch(&session_id).await;
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        debug!("session event channel closed, watch reaper exiting");
                        break;
                    }
                }
            }
        });
    }
}
