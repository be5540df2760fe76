use anyhow::Context;
use portable_pty::{Child, CommandBuilder, MasterPty, PtySize, native_pty_system};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::error::PtyError;

/// How often the actor polls the child for exit while idle.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Everything needed to spawn a shell on a fresh PTY.
#[derive(Clone, Debug)]
pub struct SpawnSpec {
    pub shell: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    /// Extra environment, applied after the terminal defaults. A `PATH`
    /// entry here replaces the inherited one.
    pub env: Vec<(String, String)>,
    pub cols: u16,
    pub rows: u16,
}

impl Default for SpawnSpec {
    fn default() -> Self {
        Self {
            shell: "/bin/bash".to_string(),
            args: Vec::new(),
            working_dir: PathBuf::from("/"),
            env: Vec::new(),
            cols: 80,
            rows: 24,
        }
    }
}

/// A raw output chunk read from the PTY.
#[derive(Clone, Debug)]
pub struct OutputChunk {
    pub data: Vec<u8>,
    pub timestamp: i64,
}

enum PtyCommand {
    Write {
        data: Vec<u8>,
        respond_to: oneshot::Sender<Result<(), PtyError>>,
    },
    Resize {
        cols: u16,
        rows: u16,
        respond_to: oneshot::Sender<Result<(), PtyError>>,
    },
    Kill {
        force: bool,
        respond_to: oneshot::Sender<Result<(), PtyError>>,
    },
}

/// Handle to a running PTY actor. Cheap to clone.
#[derive(Clone)]
pub struct PtyHandle {
    sender: mpsc::Sender<PtyCommand>,
    output_tx: broadcast::Sender<OutputChunk>,
    exit_rx: watch::Receiver<Option<i32>>,
}

impl PtyHandle {
    /// Write bytes to the PTY's input.
    pub async fn write(&self, data: &[u8]) -> Result<(), PtyError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(PtyCommand::Write {
                data: data.to_vec(),
                respond_to: tx,
            })
            .await
            .map_err(|_| PtyError::Channel("write command not delivered".into()))?;
        rx.await
            .map_err(|_| PtyError::Channel("write response dropped".into()))?
    }

    /// Resize the PTY.
    pub async fn resize(&self, cols: u16, rows: u16) -> Result<(), PtyError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(PtyCommand::Resize {
                cols,
                rows,
                respond_to: tx,
            })
            .await
            .map_err(|_| PtyError::Channel("resize command not delivered".into()))?;
        rx.await
            .map_err(|_| PtyError::Channel("resize response dropped".into()))?
    }

    /// Terminate the child. Graceful kill sends SIGTERM on unix; `force`
    /// uses the hard process kill on every platform.
    pub async fn kill(&self, force: bool) -> Result<(), PtyError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(PtyCommand::Kill {
                force,
                respond_to: tx,
            })
            .await
            .map_err(|_| PtyError::Channel("kill command not delivered".into()))?;
        rx.await
            .map_err(|_| PtyError::Channel("kill response dropped".into()))?
    }

    /// Subscribe to raw output chunks.
    pub fn subscribe(&self) -> broadcast::Receiver<OutputChunk> {
        self.output_tx.subscribe()
    }

    /// Watch for process exit; holds `Some(code)` once the child is gone.
    pub fn exit_watch(&self) -> watch::Receiver<Option<i32>> {
        self.exit_rx.clone()
    }

    pub fn is_running(&self) -> bool {
        self.exit_rx.borrow().is_none()
    }
}

/// Actor owning one PTY pair and its child process.
pub struct PtyActor {
    master: Box<dyn MasterPty + Send>,
    writer: Option<Box<dyn Write + Send>>,
    child: Box<dyn Child + Send + Sync>,
    pid: Option<u32>,
    receiver: mpsc::Receiver<PtyCommand>,
    exit_tx: watch::Sender<Option<i32>>,
}

impl PtyActor {
    /// Open a PTY, spawn the shell, and start the actor plus a blocking
    /// reader thread. Returns a handle for all further interaction.
    pub fn spawn(spec: SpawnSpec) -> Result<PtyHandle, PtyError> {
        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(PtySize {
                rows: spec.rows,
                cols: spec.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .context("failed to open PTY")
            .map_err(PtyError::from)?;

        let mut cmd = CommandBuilder::new(&spec.shell);
        for arg in &spec.args {
            cmd.arg(arg);
        }
        cmd.cwd(&spec.working_dir);

        // Terminal defaults, then inherited basics, then caller overrides.
        cmd.env("TERM", "xterm-256color");
        cmd.env("COLORTERM", "truecolor");
        for key in ["PATH", "HOME", "USER", "LANG"] {
            if let Ok(value) = std::env::var(key) {
                cmd.env(key, value);
            }
        }
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        debug!(
            shell = %spec.shell,
            cwd = %spec.working_dir.display(),
            "spawning PTY shell"
        );

        let child = pair.slave.spawn_command(cmd).map_err(|e| {
            error!(
                shell = %spec.shell,
                args = ?spec.args,
                cwd = %spec.working_dir.display(),
                platform = std::env::consts::OS,
                "failed to spawn shell: {}", e
            );
            PtyError::SpawnFailed(e.to_string())
        })?;

        let pid = child.process_id();
        info!(?pid, shell = %spec.shell, "PTY process started");

        let (output_tx, _) = broadcast::channel(1024);
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (exit_tx, exit_rx) = watch::channel(None);

        let mut actor = Self {
            master: pair.master,
            writer: None,
            child,
            pid,
            receiver: cmd_rx,
            exit_tx,
        };

        let mut reader = actor
            .master
            .try_clone_reader()
            .context("failed to clone PTY reader")
            .map_err(PtyError::from)?;

        // Blocking reader thread; ends at EOF when the child exits.
        let output_tx_reader = output_tx.clone();
        std::thread::spawn(move || {
            let mut buffer = vec![0u8; 4096];
            loop {
                match reader.read(&mut buffer) {
                    Ok(0) => break,
                    Ok(n) => {
                        let _ = output_tx_reader.send(OutputChunk {
                            data: buffer[..n].to_vec(),
                            timestamp: chrono::Utc::now().timestamp_millis(),
                        });
                    }
                    Err(e) => {
                        debug!("PTY read ended: {}", e);
                        break;
                    }
                }
            }
        });

        tokio::spawn(async move {
            actor.run().await;
        });

        Ok(PtyHandle {
            sender: cmd_tx,
            output_tx,
            exit_rx,
        })
    }

    async fn run(&mut self) {
        // Take the writer up front so the PTY's input side stays open even
        // before the first write.
        match self.master.take_writer() {
            Ok(writer) => self.writer = Some(writer),
            Err(e) => error!("failed to obtain PTY writer: {}", e),
        }

        let mut poll = tokio::time::interval(EXIT_POLL_INTERVAL);
        loop {
            tokio::select! {
                cmd = self.receiver.recv() => match cmd {
                    Some(PtyCommand::Write { data, respond_to }) => {
                        let _ = respond_to.send(self.handle_write(&data));
                    }
                    Some(PtyCommand::Resize { cols, rows, respond_to }) => {
                        let _ = respond_to.send(self.handle_resize(cols, rows));
                    }
                    Some(PtyCommand::Kill { force, respond_to }) => {
                        let _ = respond_to.send(self.handle_kill(force));
                        // Keep running until try_wait observes the exit so
                        // the code is published.
                    }
                    None => {
                        // All handles dropped: tear the child down.
                        if let Err(e) = self.handle_kill(true) {
                            warn!("kill on handle drop failed: {}", e);
                        }
                        match self.child.wait() {
                            Ok(status) => {
                                let _ = self.exit_tx.send(Some(status.exit_code() as i32));
                            }
                            Err(e) => warn!("wait after kill failed: {}", e),
                        }
                        break;
                    }
                },
                _ = poll.tick() => {
                    if let Ok(Some(status)) = self.child.try_wait() {
                        let code = status.exit_code() as i32;
                        info!(pid = ?self.pid, code, "PTY process exited");
                        let _ = self.exit_tx.send(Some(code));
                        break;
                    }
                }
            }
        }

        debug!(pid = ?self.pid, "PTY actor shutting down");
    }

    fn handle_write(&mut self, data: &[u8]) -> Result<(), PtyError> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| PtyError::WriteFailed("no PTY writer available".into()))?;
        writer
            .write_all(data)
            .and_then(|_| writer.flush())
            .map_err(|e| PtyError::WriteFailed(e.to_string()))
    }

    fn handle_resize(&mut self, cols: u16, rows: u16) -> Result<(), PtyError> {
        self.master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::ResizeFailed(e.to_string()))
    }

    /// The one place platform-specific termination lives.
    fn handle_kill(&mut self, force: bool) -> Result<(), PtyError> {
        if force {
            return self
                .child
                .kill()
                .map_err(|e| PtyError::KillFailed(e.to_string()));
        }

        #[cfg(unix)]
        {
            use nix::sys::signal::{Signal, kill};
            use nix::unistd::Pid;

            if let Some(pid) = self.pid {
                return kill(Pid::from_raw(pid as i32), Signal::SIGTERM)
                    .map_err(|e| PtyError::KillFailed(e.to_string()));
            }
        }

        // No pid or non-unix: fall back to the hard kill.
        self.child
            .kill()
            .map_err(|e| PtyError::KillFailed(e.to_string()))
    }
}
