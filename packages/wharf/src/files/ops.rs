use chrono::{DateTime, Utc};
use std::path::Path;

use super::resolve::resolve_within;
use super::types::FileEntry;
use super::FsError;
use crate::scan;

/// One-level directory listing, dot-entries hidden (except the agent config
/// directory), directories first then case-insensitive alphabetical.
pub async fn browse(root: &Path, rel: &str) -> Result<Vec<FileEntry>, FsError> {
    let target = resolve_within(root, rel)?;
    if !target.is_dir() {
        return Err(FsError::NotFound(rel.to_string()));
    }

    let mut out = Vec::new();
    let mut entries = tokio::fs::read_dir(&target).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        if name != scan::AGENT_CONFIG_DIR && name.starts_with('.') {
            continue;
        }

        let path = entry.path();
        let rel_path = path
            .strip_prefix(root)
            .unwrap_or(&path)
            .to_string_lossy()
            .to_string();
        let metadata = entry.metadata().await.ok();
        let is_directory = metadata.as_ref().map(|m| m.is_dir()).unwrap_or(false);
        let size = metadata
            .as_ref()
            .and_then(|m| if m.is_file() { Some(m.len()) } else { None });
        let modified_at = metadata.and_then(|m| {
            m.modified().ok().map(|t| {
                let datetime: DateTime<Utc> = t.into();
                datetime.to_rfc3339()
            })
        });

        out.push(FileEntry {
            name,
            path: rel_path,
            is_directory,
            size,
            modified_at,
        });
    }

    out.sort_by(|a, b| match (a.is_directory, b.is_directory) {
        (true, false) => std::cmp::Ordering::Less,
        (false, true) => std::cmp::Ordering::Greater,
        _ => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
    });

    Ok(out)
}

/// Read a UTF-8 text file, bounded by `max_bytes`. The size check runs
/// before the read so an oversized file never enters memory.
pub async fn read(root: &Path, rel: &str, max_bytes: u64) -> Result<String, FsError> {
    let target = resolve_within(root, rel)?;
    let metadata = tokio::fs::metadata(&target)
        .await
        .map_err(|_| FsError::NotFound(rel.to_string()))?;
    if metadata.is_dir() {
        return Err(FsError::NotFound(rel.to_string()));
    }
    if metadata.len() > max_bytes {
        return Err(FsError::TooLarge {
            size: metadata.len(),
            limit: max_bytes,
        });
    }

    match tokio::fs::read_to_string(&target).await {
        Ok(content) => Ok(content),
        Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
            Err(FsError::NotUtf8(rel.to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

/// Overwrite (or create) a file with the given content.
pub async fn write(root: &Path, rel: &str, content: &str) -> Result<(), FsError> {
    let target = resolve_within(root, rel)?;
    if target == root {
        return Err(FsError::PathEscape(rel.to_string()));
    }
    tokio::fs::write(&target, content).await?;
    Ok(())
}

/// Create a new file (empty, failing if it already exists) or directory
/// (with parents).
pub async fn create(root: &Path, rel: &str, is_directory: bool) -> Result<(), FsError> {
    let target = resolve_within(root, rel)?;
    if target == root {
        return Err(FsError::PathEscape(rel.to_string()));
    }
    if is_directory {
        tokio::fs::create_dir_all(&target).await?;
    } else {
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
            .await?;
    }
    Ok(())
}

/// Delete a file or a directory tree. The working directory itself is not
/// deletable.
pub async fn delete(root: &Path, rel: &str) -> Result<(), FsError> {
    let target = resolve_within(root, rel)?;
    if target == root {
        return Err(FsError::PathEscape(rel.to_string()));
    }
    let metadata = tokio::fs::metadata(&target)
        .await
        .map_err(|_| FsError::NotFound(rel.to_string()))?;
    if metadata.is_dir() {
        tokio::fs::remove_dir_all(&target).await?;
    } else {
        tokio::fs::remove_file(&target).await?;
    }
    Ok(())
}

/// Inventory of files under the agent configuration directory. Missing
/// directory means an empty inventory, not an error.
pub async fn config_files(root: &Path) -> Result<Vec<FileEntry>, FsError> {
    let config_dir = root.join(scan::AGENT_CONFIG_DIR);
    if !config_dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut out = Vec::new();
    let mut pending = vec![config_dir];
    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let file_type = match entry.file_type().await {
                Ok(ft) => ft,
                Err(_) => continue,
            };
            if file_type.is_dir() {
                pending.push(path);
                continue;
            }
            if !file_type.is_file() {
                continue;
            }
            let metadata = entry.metadata().await.ok();
            out.push(FileEntry {
                name: entry.file_name().to_string_lossy().to_string(),
                path: path
                    .strip_prefix(root)
                    .unwrap_or(&path)
                    .to_string_lossy()
                    .to_string(),
                is_directory: false,
                size: metadata.map(|m| m.len()),
                modified_at: None,
            });
        }
    }

    out.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch() -> tempfile::TempDir {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        std::fs::write(root.join("hello.txt"), "hello").unwrap();
        std::fs::write(root.join(".hidden"), "x").unwrap();
        std::fs::create_dir(root.join("sub")).unwrap();
        std::fs::write(root.join("sub/inner.txt"), "inner").unwrap();
        tmp
    }

    #[tokio::test]
    async fn browse_lists_one_level() {
        let tmp = scratch();
        let entries = browse(tmp.path(), "").await.unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["sub", "hello.txt"]);
        assert!(entries[0].is_directory);
        assert_eq!(entries[1].size, Some(5));
    }

    #[tokio::test]
    async fn browse_rejects_escape_before_io() {
        let tmp = scratch();
        assert!(matches!(
            browse(tmp.path(), "../..").await,
            Err(FsError::PathEscape(_))
        ));
    }

    #[tokio::test]
    async fn read_returns_content() {
        let tmp = scratch();
        assert_eq!(read(tmp.path(), "hello.txt", 1024).await.unwrap(), "hello");
        assert_eq!(
            read(tmp.path(), "sub/inner.txt", 1024).await.unwrap(),
            "inner"
        );
    }

    #[tokio::test]
    async fn read_enforces_size_ceiling() {
        let tmp = scratch();
        std::fs::write(tmp.path().join("big.bin"), vec![b'a'; 4096]).unwrap();
        assert!(matches!(
            read(tmp.path(), "big.bin", 1024).await,
            Err(FsError::TooLarge { size: 4096, .. })
        ));
    }

    #[tokio::test]
    async fn read_outside_root_rejected() {
        let tmp = scratch();
        assert!(matches!(
            read(tmp.path(), "../../etc/passwd", 1024).await,
            Err(FsError::PathEscape(_))
        ));
    }

    #[tokio::test]
    async fn write_create_delete_roundtrip() {
        let tmp = scratch();
        write(tmp.path(), "new.txt", "content").await.unwrap();
        assert_eq!(read(tmp.path(), "new.txt", 1024).await.unwrap(), "content");

        create(tmp.path(), "made/nested", true).await.unwrap();
        assert!(tmp.path().join("made/nested").is_dir());

        create(tmp.path(), "made/file.txt", false).await.unwrap();
        assert!(tmp.path().join("made/file.txt").is_file());
        // Creating an existing file is an error, not a truncation
        assert!(create(tmp.path(), "made/file.txt", false).await.is_err());

        delete(tmp.path(), "made").await.unwrap();
        assert!(!tmp.path().join("made").exists());
        assert!(matches!(
            delete(tmp.path(), "made").await,
            Err(FsError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn root_itself_is_protected() {
        let tmp = scratch();
        assert!(matches!(
            delete(tmp.path(), ".").await,
            Err(FsError::PathEscape(_))
        ));
        assert!(matches!(
            write(tmp.path(), "", "x").await,
            Err(FsError::PathEscape(_))
        ));
    }

    #[tokio::test]
    async fn config_inventory_lists_agent_dir_only() {
        let tmp = scratch();
        assert!(config_files(tmp.path()).await.unwrap().is_empty());

        std::fs::create_dir_all(tmp.path().join(".claude/commands")).unwrap();
        std::fs::write(tmp.path().join(".claude/settings.json"), "{}").unwrap();
        std::fs::write(tmp.path().join(".claude/commands/fix.md"), "fix").unwrap();

        let files = config_files(tmp.path()).await.unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![".claude/commands/fix.md", ".claude/settings.json"]
        );
    }
}
