//! Session registry and lifecycle.
//!
//! Each session owns one PTY-backed shell plus three buffers: a line-history
//! ring, a byte-capped raw replay buffer, and the line-assembly state that
//! feeds the ring. A pump task per session carries PTY output into the
//! buffers and onto the shared event channel, preserving byte-arrival order
//! within the session.

use chrono::{DateTime, Utc};
use pty_host::{OutputChunk, PtyActor, PtyError, PtyHandle, SpawnSpec};
use scrollback::{LineBuffer, RawReplayBuffer, RingBuffer};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::agent::{self, AgentType};
use crate::config::SessionConfig;
use crate::error::SessionError;

/// Stream key for the PTY's combined output.
const OUTPUT_STREAM: &str = "stdout";

const DEFAULT_COLS: u16 = 80;
const DEFAULT_ROWS: u16 = 24;

/// Monotonic session state. Terminated sessions are never revived.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Active,
    Terminated,
}

/// Wire-facing session snapshot.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMeta {
    pub id: String,
    pub work_dir: String,
    pub label: String,
    pub agent_type: AgentType,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub exit_code: Option<i32>,
    pub cols: u16,
    pub rows: u16,
}

/// One cleaned line of session output, as stored in the history ring.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineRecord {
    pub stream: String,
    pub data: String,
    pub timestamp: i64,
}

/// Events fanned out to every gateway connection.
#[derive(Clone, Debug)]
pub enum SessionEvent {
    /// Session created, resized, or state-changed.
    Update(SessionMeta),
    /// One cleaned output line, already appended to the session's ring.
    Line {
        session_id: String,
        record: LineRecord,
    },
    /// Raw PTY bytes, identical to what the replay buffer stored.
    RawOutput {
        session_id: String,
        data: Vec<u8>,
        timestamp: i64,
    },
    Terminated {
        session_id: String,
        exit_code: Option<i32>,
    },
}

struct Session {
    meta: SessionMeta,
    handle: PtyHandle,
    lines: RingBuffer<LineRecord>,
    raw: RawReplayBuffer,
    assembler: LineBuffer,
    /// Cancels the pump task plus any pending flush deadline.
    cancel: CancellationToken,
    /// Guard for the forced-kill fallback; cancelled once exit is observed.
    kill_timer: Option<CancellationToken>,
}

/// Owns every session and its buffers. Cheap to clone; all clones share the
/// same registry.
#[derive(Clone)]
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
    events_tx: broadcast::Sender<SessionEvent>,
    config: SessionConfig,
}

impl SessionManager {
    pub fn new(config: SessionConfig) -> Self {
        let (events_tx, _) = broadcast::channel(1024);
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            events_tx,
            config,
        }
    }

    /// Receive all session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events_tx.subscribe()
    }

    /// Spawn a new agent session in `work_dir`.
    ///
    /// Validation order: working directory, then quota. The quota counts
    /// non-terminated sessions only, and is checked under the same lock that
    /// registers the session so parallel creates cannot both slip under it.
    pub async fn create(
        &self,
        work_dir: &str,
        label: &str,
        agent_type: AgentType,
    ) -> Result<SessionMeta, SessionError> {
        let dir = PathBuf::from(work_dir);
        let is_dir = tokio::fs::metadata(&dir)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if !dir.is_absolute() || !is_dir {
            return Err(SessionError::InvalidWorkDir(work_dir.to_string()));
        }

        let mut sessions = self.sessions.write().await;
        let active = sessions
            .values()
            .filter(|s| s.meta.state == SessionState::Active)
            .count();
        if active >= self.config.max_sessions {
            return Err(SessionError::QuotaExceeded {
                active,
                max: self.config.max_sessions,
            });
        }

        let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/bash".to_string());
        let spec = SpawnSpec {
            shell,
            args: Vec::new(),
            working_dir: dir,
            env: vec![("PATH".to_string(), agent::widened_path())],
            cols: DEFAULT_COLS,
            rows: DEFAULT_ROWS,
        };
        let handle = PtyActor::spawn(spec).map_err(|e| match e {
            PtyError::SpawnFailed(msg) => SessionError::SpawnFailed(msg),
            other => SessionError::SpawnFailed(other.to_string()),
        })?;

        let id = Uuid::new_v4().to_string();
        let meta = SessionMeta {
            id: id.clone(),
            work_dir: work_dir.to_string(),
            label: label.to_string(),
            agent_type,
            state: SessionState::Active,
            created_at: Utc::now(),
            exit_code: None,
            cols: DEFAULT_COLS,
            rows: DEFAULT_ROWS,
        };
        let cancel = CancellationToken::new();
        sessions.insert(
            id.clone(),
            Session {
                meta: meta.clone(),
                handle: handle.clone(),
                lines: RingBuffer::new(self.config.ring_capacity),
                raw: RawReplayBuffer::new(self.config.replay_max_bytes),
                assembler: LineBuffer::new(),
                cancel: cancel.clone(),
                kill_timer: None,
            },
        );
        drop(sessions);

        info!(session_id = %id, agent = %agent_type, work_dir, "session created");
        let _ = self.events_tx.send(SessionEvent::Update(meta.clone()));

        let manager = self.clone();
        let pump_id = id.clone();
        let pump_handle = handle.clone();
        tokio::spawn(async move {
            manager.pump(pump_id, pump_handle, cancel).await;
        });

        if self.config.auto_launch {
            self.spawn_auto_launch(id.clone(), agent_type, handle);
        }

        Ok(meta)
    }

    /// Inject the agent launch command once the shell has settled, unless
    /// the session was killed in the meantime.
    fn spawn_auto_launch(&self, id: String, agent_type: AgentType, handle: PtyHandle) {
        let manager = self.clone();
        let delay = self.config.launch_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let still_active = manager
                .get(&id)
                .await
                .map(|m| m.state == SessionState::Active)
                .unwrap_or(false);
            if !still_active {
                debug!(session_id = %id, "skipping auto-launch, session gone");
                return;
            }
            let command = format!("{}\n", agent_type.launch_command());
            if let Err(e) = handle.write(command.as_bytes()).await {
                warn!(session_id = %id, error = %e, "auto-launch write failed");
            }
        });
    }

    /// Request termination. Returns whether the session record exists;
    /// unknown and already-terminated ids are no-ops.
    ///
    /// Graceful first; a fallback timer forces the kill if the process has
    /// not exited within the configured grace. The exit path cancels the
    /// timer when the process goes down on its own.
    pub async fn kill(&self, id: &str) -> bool {
        let handle = {
            let mut sessions = self.sessions.write().await;
            let Some(session) = sessions.get_mut(id) else {
                return false;
            };
            if session.meta.state == SessionState::Terminated {
                return true;
            }
            if session.kill_timer.is_some() {
                // Kill already in flight.
                return true;
            }
            let guard = CancellationToken::new();
            session.kill_timer = Some(guard.clone());

            let handle = session.handle.clone();
            let force_handle = handle.clone();
            let grace = self.config.kill_grace;
            let timer_id = id.to_string();
            tokio::spawn(async move {
                tokio::select! {
                    _ = guard.cancelled() => {}
                    _ = tokio::time::sleep(grace) => {
                        warn!(session_id = %timer_id, "graceful kill timed out, forcing");
                        if let Err(e) = force_handle.kill(true).await {
                            debug!(session_id = %timer_id, error = %e, "forced kill failed");
                        }
                    }
                }
            });
            handle
        };

        if let Err(e) = handle.kill(false).await {
            // The fallback timer still fires; report nothing fatal here.
            debug!(session_id = %id, error = %e, "graceful kill failed");
        }
        true
    }

    /// Resize the PTY and cache the dimensions for replay headers.
    pub async fn resize(&self, id: &str, cols: u16, rows: u16) -> Result<(), SessionError> {
        let handle = {
            let mut sessions = self.sessions.write().await;
            let session = sessions
                .get_mut(id)
                .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
            if session.meta.state == SessionState::Terminated {
                return Err(SessionError::Terminated(id.to_string()));
            }
            session.meta.cols = cols;
            session.meta.rows = rows;
            session.handle.clone()
        };
        handle
            .resize(cols, rows)
            .await
            .map_err(|e| SessionError::Pty(e.to_string()))?;
        if let Some(meta) = self.get(id).await {
            let _ = self.events_tx.send(SessionEvent::Update(meta));
        }
        Ok(())
    }

    /// Line-oriented input: a newline is appended for the shell.
    pub async fn send_prompt(&self, id: &str, text: &str) -> Result<(), SessionError> {
        let mut data = text.as_bytes().to_vec();
        data.push(b'\n');
        self.write_input(id, &data).await
    }

    /// Raw keystroke input, forwarded verbatim.
    pub async fn write_raw(&self, id: &str, data: &[u8]) -> Result<(), SessionError> {
        self.write_input(id, data).await
    }

    async fn write_input(&self, id: &str, data: &[u8]) -> Result<(), SessionError> {
        let handle = self.active_handle(id).await?;
        handle
            .write(data)
            .await
            .map_err(|e| SessionError::Pty(e.to_string()))
    }

    async fn active_handle(&self, id: &str) -> Result<PtyHandle, SessionError> {
        let sessions = self.sessions.read().await;
        let session = sessions
            .get(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        if session.meta.state == SessionState::Terminated {
            return Err(SessionError::Terminated(id.to_string()));
        }
        Ok(session.handle.clone())
    }

    /// Active sessions only.
    pub async fn list(&self) -> Vec<SessionMeta> {
        let sessions = self.sessions.read().await;
        let mut metas: Vec<SessionMeta> = sessions
            .values()
            .filter(|s| s.meta.state == SessionState::Active)
            .map(|s| s.meta.clone())
            .collect();
        metas.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        metas
    }

    /// All sessions, including terminated ones still inside the grace
    /// window. Diagnostic surface.
    pub async fn list_all(&self) -> Vec<SessionMeta> {
        let sessions = self.sessions.read().await;
        let mut metas: Vec<SessionMeta> = sessions.values().map(|s| s.meta.clone()).collect();
        metas.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        metas
    }

    pub async fn get(&self, id: &str) -> Option<SessionMeta> {
        self.sessions.read().await.get(id).map(|s| s.meta.clone())
    }

    /// Snapshot of the line-history ring, oldest first.
    pub async fn history(&self, id: &str) -> Result<Vec<LineRecord>, SessionError> {
        let sessions = self.sessions.read().await;
        sessions
            .get(id)
            .map(|s| s.lines.read_all())
            .ok_or_else(|| SessionError::NotFound(id.to_string()))
    }

    /// Raw replay bytes plus the PTY dimensions they were recorded under.
    pub async fn raw_replay(&self, id: &str) -> Result<(Vec<u8>, u16, u16), SessionError> {
        let sessions = self.sessions.read().await;
        sessions
            .get(id)
            .map(|s| (s.raw.read(), s.meta.cols, s.meta.rows))
            .ok_or_else(|| SessionError::NotFound(id.to_string()))
    }

    pub async fn active_count(&self) -> usize {
        self.sessions
            .read()
            .await
            .values()
            .filter(|s| s.meta.state == SessionState::Active)
            .count()
    }

    /// Kill every active session and wait for the registry to drain. The
    /// caller bounds this with the configured drain timeout.
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.list().await.into_iter().map(|m| m.id).collect();
        for id in &ids {
            self.kill(id).await;
        }
        while self.active_count().await > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
    }

    /// Per-session pump: raw PTY chunks into the replay buffer and the
    /// line assembler, cleaned lines into the ring, everything onto the
    /// event channel. Ends when the PTY closes or the session is torn down.
    async fn pump(&self, id: String, handle: PtyHandle, cancel: CancellationToken) {
        let mut chunks = handle.subscribe();
        // The session record and this task both hold the output sender via
        // the handle, so the chunk channel never closes on its own; exit is
        // observed through the watch channel instead.
        let mut exit = handle.exit_watch();
        // Deadline for flushing a pending partial line after output goes
        // quiet. Heuristic: a very slow writer can have one logical line
        // split across two emitted records.
        let mut flush_at: Option<tokio::time::Instant> = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = async move {
                    match flush_at {
                        Some(at) => tokio::time::sleep_until(at).await,
                        None => std::future::pending().await,
                    }
                } => {
                    flush_at = None;
                    self.flush_partial(&id).await;
                }
                chunk = chunks.recv() => match chunk {
                    Ok(chunk) => {
                        let idle = self.ingest(&id, &chunk.data, chunk.timestamp).await;
                        flush_at = if idle {
                            Some(tokio::time::Instant::now() + self.config.flush_debounce)
                        } else {
                            None
                        };
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(session_id = %id, missed, "pump lagged behind PTY output");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                // wait_for checks the current value first, covering a child
                // that exited before this task subscribed. An Err means the
                // actor is gone, which is just as final.
                // The returned watch::Ref is dropped inside the block so the
                // select future stays Send.
                _ = async { let _ = exit.wait_for(|code| code.is_some()).await; } => {
                    self.drain_remaining(&id, &mut chunks).await;
                    break;
                }
            }
        }

        self.finalize(&id, &handle).await;
    }

    /// The reader thread can still be delivering the last output when exit
    /// is observed. Keep consuming until the channel stays quiet briefly.
    async fn drain_remaining(&self, id: &str, chunks: &mut broadcast::Receiver<OutputChunk>) {
        let quiet = std::time::Duration::from_millis(200);
        loop {
            match tokio::time::timeout(quiet, chunks.recv()).await {
                Ok(Ok(chunk)) => {
                    self.ingest(id, &chunk.data, chunk.timestamp).await;
                }
                Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
                Ok(Err(broadcast::error::RecvError::Closed)) | Err(_) => break,
            }
        }
    }

    /// Store one raw chunk and any complete lines it produced, emitting
    /// both event kinds. Returns whether a partial line is pending.
    async fn ingest(&self, id: &str, data: &[u8], timestamp: i64) -> bool {
        let mut sessions = self.sessions.write().await;
        let Some(session) = sessions.get_mut(id) else {
            return false;
        };

        session.raw.write(data);
        let lines = session.assembler.feed(OUTPUT_STREAM, data);
        let pending = session.assembler.has_partial(OUTPUT_STREAM);

        let mut records = Vec::with_capacity(lines.len());
        for line in lines {
            let record = LineRecord {
                stream: OUTPUT_STREAM.to_string(),
                data: line,
                timestamp,
            };
            session.lines.write(record.clone());
            records.push(record);
        }
        drop(sessions);

        let _ = self.events_tx.send(SessionEvent::RawOutput {
            session_id: id.to_string(),
            data: data.to_vec(),
            timestamp,
        });
        for record in records {
            let _ = self.events_tx.send(SessionEvent::Line {
                session_id: id.to_string(),
                record,
            });
        }
        pending
    }

    /// Flush a pending partial line through the same pipeline.
    async fn flush_partial(&self, id: &str) {
        let mut sessions = self.sessions.write().await;
        let Some(session) = sessions.get_mut(id) else {
            return;
        };
        let Some(line) = session.assembler.flush(OUTPUT_STREAM) else {
            return;
        };
        let record = LineRecord {
            stream: OUTPUT_STREAM.to_string(),
            data: line,
            timestamp: Utc::now().timestamp_millis(),
        };
        session.lines.write(record.clone());
        drop(sessions);

        let _ = self.events_tx.send(SessionEvent::Line {
            session_id: id.to_string(),
            record,
        });
    }

    /// Exit path: record the code, flush leftovers, cancel the forced-kill
    /// timer, announce termination, and purge after the grace window.
    async fn finalize(&self, id: &str, handle: &PtyHandle) {
        let exit_code = wait_exit_code(handle).await;
        self.flush_partial(id).await;

        let meta = {
            let mut sessions = self.sessions.write().await;
            let Some(session) = sessions.get_mut(id) else {
                return;
            };
            session.meta.state = SessionState::Terminated;
            session.meta.exit_code = exit_code;
            session.assembler.clear();
            if let Some(timer) = session.kill_timer.take() {
                timer.cancel();
            }
            session.meta.clone()
        };

        info!(session_id = %id, ?exit_code, "session terminated");
        let _ = self.events_tx.send(SessionEvent::Update(meta));
        let _ = self.events_tx.send(SessionEvent::Terminated {
            session_id: id.to_string(),
            exit_code,
        });

        // Keep the terminated record queryable while notifications land.
        tokio::time::sleep(self.config.grace_window).await;
        let removed = self.sessions.write().await.remove(id);
        if let Some(session) = removed {
            session.cancel.cancel();
            debug!(session_id = %id, "session purged");
        }
    }

    /// Working directory of a session, for the watcher and file surface.
    pub async fn work_dir(&self, id: &str) -> Result<PathBuf, SessionError> {
        let sessions = self.sessions.read().await;
        sessions
            .get(id)
            .map(|s| Path::new(&s.meta.work_dir).to_path_buf())
            .ok_or_else(|| SessionError::NotFound(id.to_string()))
    }
}

/// Wait for the actor to publish the exit code. The actor polls the child
/// every 200ms, so this resolves quickly after the PTY closes; the timeout
/// covers a wedged child.
async fn wait_exit_code(handle: &PtyHandle) -> Option<i32> {
    let mut rx = handle.exit_watch();
    let wait = async {
        loop {
            if let Some(code) = *rx.borrow() {
                return Some(code);
            }
            if rx.changed().await.is_err() {
                return *rx.borrow();
            }
        }
    };
    tokio::time::timeout(std::time::Duration::from_secs(5), wait)
        .await
        .unwrap_or(None)
}
