use std::path::{Component, Path, PathBuf};

use super::FsError;

/// Resolve a client-supplied relative path against a session's working
/// directory, rejecting anything that would escape it.
///
/// Purely lexical so targets that do not exist yet (write/create) are still
/// confined: `..` components pop within the relative part only, and popping
/// past the root is an escape. Absolute inputs are escapes outright.
pub fn resolve_within(root: &Path, rel: &str) -> Result<PathBuf, FsError> {
    let rel_path = Path::new(rel);
    if rel_path.is_absolute() {
        return Err(FsError::PathEscape(rel.to_string()));
    }

    let mut within = PathBuf::new();
    for component in rel_path.components() {
        match component {
            Component::Normal(part) => within.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !within.pop() {
                    return Err(FsError::PathEscape(rel.to_string()));
                }
            }
            // Prefix/RootDir only appear in absolute paths, handled above.
            _ => return Err(FsError::PathEscape(rel.to_string())),
        }
    }

    Ok(root.join(within))
}
