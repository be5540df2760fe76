//! Shared test scaffolding. Compiled only for tests.

use crate::config::FileConfig;
use crate::state::AppState;

/// App state with fast timings, a two-session quota, and auto-launch off,
/// plus a scratch working directory for sessions to live in.
pub fn test_state() -> (AppState, tempfile::TempDir) {
    let tmp = tempfile::tempdir().unwrap();

    let mut config = FileConfig::default();
    config.sessions.max_sessions = 2;
    config.sessions.auto_launch = false;
    config.sessions.flush_debounce_ms = 50;
    config.sessions.grace_window_ms = 200;
    config.sessions.kill_grace_ms = 500;
    config.watcher.debounce_ms = 50;

    (AppState::new(&config), tmp)
}
