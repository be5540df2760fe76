//! Agent CLI integration: the closed set of supported agent types and the
//! PATH widening applied to every session shell so those CLIs resolve even
//! when the server was launched from a minimal environment.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use tracing::debug;

/// The CLI agents a session can host. Closed set; anything else is an
/// `unknown_agent_type` error at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentType {
    Claude,
    Codex,
    Opencode,
}

impl AgentType {
    pub const ALL: [AgentType; 3] = [AgentType::Claude, AgentType::Codex, AgentType::Opencode];

    /// The command injected into the shell when auto-launch is enabled.
    pub fn launch_command(&self) -> &'static str {
        match self {
            AgentType::Claude => "claude",
            AgentType::Codex => "codex",
            AgentType::Opencode => "opencode",
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.launch_command()
    }
}

impl FromStr for AgentType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "claude" => Ok(AgentType::Claude),
            "codex" => Ok(AgentType::Codex),
            "opencode" => Ok(AgentType::Opencode),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for AgentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build a PATH for session shells: the inherited PATH plus the usual
/// agent-CLI install locations plus wherever `which` finds each known agent.
pub fn widened_path() -> String {
    let mut entries: Vec<String> = std::env::var("PATH")
        .unwrap_or_default()
        .split(':')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Some(home) = std::env::var_os("HOME").map(PathBuf::from) {
        for rel in [".local/bin", ".npm-global/bin", ".bun/bin", ".cargo/bin", "bin"] {
            candidates.push(home.join(rel));
        }
    }
    candidates.push(PathBuf::from("/usr/local/bin"));
    candidates.push(PathBuf::from("/opt/homebrew/bin"));
    for agent in AgentType::ALL {
        if let Some(dir) = which_dir(agent.launch_command()) {
            candidates.push(dir);
        }
    }

    for dir in candidates {
        if !dir.is_dir() {
            continue;
        }
        let dir = dir.to_string_lossy().to_string();
        if !entries.contains(&dir) {
            debug!(dir = %dir, "widening session PATH");
            entries.push(dir);
        }
    }

    entries.join(":")
}

/// Directory containing `bin` according to `which`, if it resolves.
fn which_dir(bin: &str) -> Option<PathBuf> {
    let output = std::process::Command::new("which").arg(bin).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if path.is_empty() {
        return None;
    }
    PathBuf::from(path).parent().map(|p| p.to_path_buf())
}
