//! Command dispatch: one validated inbound command in, at most one direct
//! response out. Effects of session mutations (creation, output,
//! termination, metrics) arrive on the broadcast channels instead, so every
//! observer sees them, not just the originator.

use crate::files;
use crate::scan;
use crate::state::AppState;

use super::protocol::{ClientCommand, ServerMessage};

/// Wire error: stable code plus a human-readable message.
pub type WireError = (String, String);

fn session_err(e: crate::error::SessionError) -> WireError {
    (e.wire_code().to_string(), e.to_string())
}

fn fs_err(e: files::FsError) -> WireError {
    (e.wire_code().to_string(), e.to_string())
}

/// Execute one command. `Ok(None)` means the command's result is delivered
/// via broadcast; `Ok(Some(_))` is a direct response to this connection.
pub async fn dispatch(
    state: &AppState,
    command: ClientCommand,
) -> Result<Option<ServerMessage>, WireError> {
    match command {
        ClientCommand::CreateSession {
            work_dir,
            label,
            agent_type,
        } => {
            let agent: crate::agent::AgentType = agent_type.parse().map_err(|()| {
                session_err(crate::error::SessionError::UnknownAgentType(
                    agent_type.clone(),
                ))
            })?;
            let label = label.unwrap_or_else(|| agent.as_str().to_string());
            state
                .create_session(&work_dir, &label, agent)
                .await
                .map_err(session_err)?;
            Ok(None)
        }

        ClientCommand::SendPrompt { session_id, text } => {
            state
                .sessions
                .send_prompt(&session_id, &text)
                .await
                .map_err(session_err)?;
            Ok(None)
        }

        ClientCommand::RawInput { session_id, data } => {
            state
                .sessions
                .write_raw(&session_id, data.as_bytes())
                .await
                .map_err(session_err)?;
            Ok(None)
        }

        ClientCommand::Resize {
            session_id,
            cols,
            rows,
        } => {
            state
                .sessions
                .resize(&session_id, cols, rows)
                .await
                .map_err(session_err)?;
            Ok(None)
        }

        ClientCommand::KillSession { session_id } => {
            // Idempotent: unknown and already-terminated ids are no-ops.
            state.sessions.kill(&session_id).await;
            Ok(None)
        }

        ClientCommand::RequestFileTree { session_id } => {
            let root = state
                .sessions
                .work_dir(&session_id)
                .await
                .map_err(session_err)?;
            let tree = scan::build_tree(&root, &root)
                .await
                .map_err(|e| fs_err(e.into()))?;
            Ok(Some(ServerMessage::FileTree { session_id, tree }))
        }

        ClientCommand::BrowseDirectory { session_id, path } => {
            let root = state
                .sessions
                .work_dir(&session_id)
                .await
                .map_err(session_err)?;
            let path = path.unwrap_or_default();
            let entries = files::browse(&root, &path).await.map_err(fs_err)?;
            Ok(Some(ServerMessage::BrowseResult {
                session_id,
                path,
                entries,
            }))
        }

        ClientCommand::ReadFile { session_id, path } => {
            let root = state
                .sessions
                .work_dir(&session_id)
                .await
                .map_err(session_err)?;
            let content = files::read(&root, &path, state.gateway.max_read_bytes)
                .await
                .map_err(fs_err)?;
            Ok(Some(ServerMessage::FileContent {
                session_id,
                path,
                content,
            }))
        }

        ClientCommand::WriteFile {
            session_id,
            path,
            content,
        } => {
            let root = state
                .sessions
                .work_dir(&session_id)
                .await
                .map_err(session_err)?;
            files::write(&root, &path, &content).await.map_err(fs_err)?;
            Ok(Some(ServerMessage::FileSaved { session_id, path }))
        }

        ClientCommand::CreateFile {
            session_id,
            path,
            is_directory,
        } => {
            let root = state
                .sessions
                .work_dir(&session_id)
                .await
                .map_err(session_err)?;
            files::create(&root, &path, is_directory)
                .await
                .map_err(fs_err)?;
            Ok(Some(ServerMessage::FileCreated { session_id, path }))
        }

        ClientCommand::DeleteFile { session_id, path } => {
            let root = state
                .sessions
                .work_dir(&session_id)
                .await
                .map_err(session_err)?;
            files::delete(&root, &path).await.map_err(fs_err)?;
            Ok(Some(ServerMessage::FileDeleted { session_id, path }))
        }

        ClientCommand::RequestConfig { session_id } => {
            let root = state
                .sessions
                .work_dir(&session_id)
                .await
                .map_err(session_err)?;
            let files = files::config_files(&root).await.map_err(fs_err)?;
            Ok(Some(ServerMessage::ConfigFiles { session_id, files }))
        }
    }
}
