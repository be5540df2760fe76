//! Wire protocol for the multiplexed WebSocket.
//!
//! Every message travels inside a three-field envelope: `type`, `payload`,
//! `timestamp`. Both directions use the same shape; kinds are kebab-case,
//! payload fields camelCase. The command set is closed: anything that does
//! not parse into [`ClientCommand`] is answered with an `invalid_message`
//! error rather than ignored.

use serde::{Deserialize, Serialize};

use crate::files::FileEntry;
use crate::scan::TreeNode;
use crate::session_manager::SessionMeta;

/// Messages sent FROM the client TO the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ClientCommand {
    CreateSession {
        work_dir: String,
        #[serde(default)]
        label: Option<String>,
        agent_type: String,
    },
    /// Line-oriented input; the server appends the newline.
    SendPrompt { session_id: String, text: String },
    /// Raw keystrokes, forwarded to the PTY verbatim.
    RawInput { session_id: String, data: String },
    Resize {
        session_id: String,
        cols: u16,
        rows: u16,
    },
    KillSession { session_id: String },
    RequestFileTree { session_id: String },
    BrowseDirectory {
        session_id: String,
        #[serde(default)]
        path: Option<String>,
    },
    ReadFile { session_id: String, path: String },
    WriteFile {
        session_id: String,
        path: String,
        content: String,
    },
    CreateFile {
        session_id: String,
        path: String,
        #[serde(default)]
        is_directory: bool,
    },
    DeleteFile { session_id: String, path: String },
    RequestConfig { session_id: String },
}

/// Messages sent FROM the server TO clients. Everything except direct
/// command responses is broadcast to every connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ServerMessage {
    SessionUpdate { session: SessionMeta },
    /// One cleaned line of output.
    SessionOutput {
        session_id: String,
        stream: String,
        data: String,
        timestamp: i64,
    },
    /// Raw terminal bytes for live rendering, lossily decoded.
    TerminalOutput {
        session_id: String,
        data: String,
        timestamp: i64,
    },
    /// Connect-time replay of the raw buffer, tagged with the PTY
    /// dimensions it was recorded under.
    TerminalReplay {
        session_id: String,
        data: String,
        cols: u16,
        rows: u16,
    },
    SessionTerminated {
        session_id: String,
        exit_code: Option<i32>,
    },
    DirectoryMetricsUpdate {
        session_id: String,
        file_count: u64,
        context_estimate: u64,
    },
    FileTree {
        session_id: String,
        tree: Vec<TreeNode>,
    },
    BrowseResult {
        session_id: String,
        path: String,
        entries: Vec<FileEntry>,
    },
    FileContent {
        session_id: String,
        path: String,
        content: String,
    },
    FileSaved { session_id: String, path: String },
    FileCreated { session_id: String, path: String },
    FileDeleted { session_id: String, path: String },
    ConfigFiles {
        session_id: String,
        files: Vec<FileEntry>,
    },
    Error { code: String, message: String },
}

/// Outbound envelope. The flattened message contributes `type` and
/// `payload`; the timestamp is stamped at send time.
#[derive(Debug, Serialize)]
pub struct Envelope {
    #[serde(flatten)]
    pub message: ServerMessage,
    pub timestamp: i64,
}

impl Envelope {
    pub fn now(message: ServerMessage) -> Self {
        Self {
            message,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Serialize a message into its envelope JSON.
pub fn encode(message: ServerMessage) -> String {
    // ServerMessage contains only JSON-safe types; serialization cannot fail.
    serde_json::to_string(&Envelope::now(message)).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_parse_from_envelope_json() {
        let json = r#"{
            "type": "create-session",
            "payload": {"workDir": "/tmp/proj", "agentType": "claude"},
            "timestamp": 1700000000000
        }"#;
        let cmd: ClientCommand = serde_json::from_str(json).unwrap();
        match cmd {
            ClientCommand::CreateSession {
                work_dir,
                label,
                agent_type,
            } => {
                assert_eq!(work_dir, "/tmp/proj");
                assert!(label.is_none());
                assert_eq!(agent_type, "claude");
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let json = r#"{"type": "do-something-else", "payload": {}}"#;
        assert!(serde_json::from_str::<ClientCommand>(json).is_err());
    }

    #[test]
    fn missing_required_field_is_rejected() {
        let json = r#"{"type": "send-prompt", "payload": {"sessionId": "abc"}}"#;
        assert!(serde_json::from_str::<ClientCommand>(json).is_err());
    }

    #[test]
    fn envelope_carries_type_payload_timestamp() {
        let encoded = encode(ServerMessage::SessionTerminated {
            session_id: "s1".into(),
            exit_code: Some(0),
        });
        let value: serde_json::Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(value["type"], "session-terminated");
        assert_eq!(value["payload"]["sessionId"], "s1");
        assert_eq!(value["payload"]["exitCode"], 0);
        assert!(value["timestamp"].is_i64());
    }

    #[test]
    fn kebab_case_kinds_round_trip() {
        let encoded = encode(ServerMessage::DirectoryMetricsUpdate {
            session_id: "s1".into(),
            file_count: 42,
            context_estimate: 4,
        });
        let value: serde_json::Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(value["type"], "directory-metrics-update");
        assert_eq!(value["payload"]["fileCount"], 42);
        assert_eq!(value["payload"]["contextEstimate"], 4);
    }
}
