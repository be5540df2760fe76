//! Shared directory-walk rules: which entries the watcher and file-tree
//! surface ignore, plus the async recursive walkers built on them.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

/// VCS/build/dependency directories never watched, counted, or listed.
const EXCLUDED_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    "node_modules",
    "target",
    "dist",
    "build",
    "__pycache__",
    ".venv",
];

/// The one dot-directory that stays visible: agent configuration.
pub const AGENT_CONFIG_DIR: &str = ".claude";

/// Exclusion rule applied to a single entry name. Dot-entries are excluded
/// wholesale except the agent config directory.
pub fn is_excluded(name: &str) -> bool {
    if name == AGENT_CONFIG_DIR {
        return false;
    }
    name.starts_with('.') || EXCLUDED_DIRS.contains(&name)
}

/// Whether any component of `path` is excluded. Used to drop watch events
/// originating inside ignored trees before they cost a debounce cycle.
pub fn path_is_excluded(path: &Path) -> bool {
    path.components().any(|c| match c {
        std::path::Component::Normal(name) => {
            name.to_str().map(is_excluded).unwrap_or(false)
        }
        _ => false,
    })
}

/// Count regular files under `root`, applying the exclusion rule, without
/// blocking the runtime. Iterative so arbitrarily deep trees cannot blow
/// the stack.
pub async fn count_files(root: &Path) -> std::io::Result<u64> {
    let mut pending = vec![root.to_path_buf()];
    let mut count = 0u64;

    while let Some(dir) = pending.pop() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            // Directories can vanish mid-walk (build churn); skip them.
            Err(_) => continue,
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if is_excluded(name) {
                continue;
            }
            let file_type = match entry.file_type().await {
                Ok(ft) => ft,
                Err(_) => continue,
            };
            if file_type.is_dir() {
                pending.push(entry.path());
            } else if file_type.is_file() {
                count += 1;
            }
        }
    }

    Ok(count)
}

/// One node of the recursive file tree sent to observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeNode {
    pub name: String,
    /// Path relative to the session working directory.
    pub path: String,
    pub is_directory: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<TreeNode>>,
}

/// Build the recursive tree under `dir`, with paths relative to `root` and
/// the shared exclusion rule applied. Directories sort first, then
/// case-insensitive alphabetical, matching the browse surface.
pub fn build_tree<'a>(
    root: &'a Path,
    dir: &'a Path,
) -> Pin<Box<dyn Future<Output = std::io::Result<Vec<TreeNode>>> + Send + 'a>> {
    Box::pin(async move {
        let mut nodes = Vec::new();
        let mut entries = tokio::fs::read_dir(dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str().map(str::to_string) else {
                continue;
            };
            if is_excluded(&name) {
                continue;
            }
            let path = entry.path();
            let rel = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .to_string_lossy()
                .to_string();
            let file_type = match entry.file_type().await {
                Ok(ft) => ft,
                Err(_) => continue,
            };

            if file_type.is_dir() {
                let children = build_tree(root, &path).await.unwrap_or_default();
                nodes.push(TreeNode {
                    name,
                    path: rel,
                    is_directory: true,
                    children: Some(children),
                });
            } else if file_type.is_file() {
                nodes.push(TreeNode {
                    name,
                    path: rel,
                    is_directory: false,
                    children: None,
                });
            }
        }

        nodes.sort_by(|a, b| match (a.is_directory, b.is_directory) {
            (true, false) => std::cmp::Ordering::Less,
            (false, true) => std::cmp::Ordering::Greater,
            _ => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
        });

        Ok(nodes)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scaffold() -> tempfile::TempDir {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        std::fs::write(root.join("main.rs"), "fn main() {}").unwrap();
        std::fs::write(root.join("README.md"), "# hi").unwrap();
        std::fs::write(root.join(".env"), "SECRET=1").unwrap();
        std::fs::create_dir_all(root.join(".git/objects")).unwrap();
        std::fs::write(root.join(".git/config"), "[core]").unwrap();
        std::fs::create_dir(root.join("node_modules")).unwrap();
        std::fs::write(root.join("node_modules/pkg.js"), "x").unwrap();
        std::fs::create_dir(root.join("src")).unwrap();
        std::fs::write(root.join("src/lib.rs"), "").unwrap();
        std::fs::create_dir(root.join(".claude")).unwrap();
        std::fs::write(root.join(".claude/settings.json"), "{}").unwrap();
        tmp
    }

    #[test]
    fn exclusion_rule() {
        assert!(is_excluded(".git"));
        assert!(is_excluded(".env"));
        assert!(is_excluded("node_modules"));
        assert!(is_excluded("target"));
        assert!(!is_excluded(".claude"));
        assert!(!is_excluded("src"));
        assert!(!is_excluded("main.rs"));
    }

    #[test]
    fn path_exclusion_checks_all_components() {
        assert!(path_is_excluded(Path::new("proj/.git/HEAD")));
        assert!(path_is_excluded(Path::new("node_modules/left-pad/index.js")));
        assert!(!path_is_excluded(Path::new("src/deeply/nested/file.rs")));
        assert!(!path_is_excluded(Path::new(".claude/settings.json")));
    }

    #[tokio::test]
    async fn counts_skip_excluded_but_keep_config_dir() {
        let tmp = scaffold();
        // main.rs, README.md, src/lib.rs, .claude/settings.json
        assert_eq!(count_files(tmp.path()).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn count_of_missing_dir_is_zero() {
        assert_eq!(count_files(Path::new("/nonexistent/nowhere")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn tree_is_sorted_dirs_first_and_relative() {
        let tmp = scaffold();
        let tree = build_tree(tmp.path(), tmp.path()).await.unwrap();

        let names: Vec<&str> = tree.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec![".claude", "src", "main.rs", "README.md"]);

        let src = tree.iter().find(|n| n.name == "src").unwrap();
        let children = src.children.as_ref().unwrap();
        assert_eq!(children[0].path, "src/lib.rs");
        assert!(!children[0].is_directory);
    }
}
