//! PTY host - pseudo-terminal spawning and lifecycle.
//!
//! One actor per PTY: commands (write/resize/kill) arrive over an mpsc
//! channel with oneshot replies, raw output is fanned out on a broadcast
//! channel, and the child's exit code is published on a watch channel. No
//! HTTP and no session semantics; callers compose those on top.
//!
//! # Example
//!
//! ```no_run
//! use pty_host::{PtyActor, SpawnSpec};
//!
//! #[tokio::main]
//! async fn main() {
//!     let handle = PtyActor::spawn(SpawnSpec {
//!         shell: "/bin/bash".to_string(),
//!         working_dir: "/tmp".into(),
//!         ..Default::default()
//!     })
//!     .unwrap();
//!
//!     handle.write(b"echo hello\n").await.unwrap();
//!
//!     let mut rx = handle.subscribe();
//!     while let Ok(chunk) = rx.recv().await {
//!         print!("{}", String::from_utf8_lossy(&chunk.data));
//!     }
//! }
//! ```

mod actor;
mod error;

pub use actor::{OutputChunk, PtyActor, PtyHandle, SpawnSpec};
pub use error::PtyError;
