use std::path::{Path, PathBuf};

use aria_core::error::SecurityError;

/// Resolve a path value from tool input: make it absolute, resolve symlinks,
/// and eliminate `..`. The target itself may not exist yet (a write target);
/// in that case the longest existing ancestor is canonicalized and the
/// remaining plain components are re-appended. Any `..` that cannot be
/// resolved against a real directory is rejected.
pub fn resolve_path(raw: &str) -> Result<PathBuf, SecurityError> {
    let path = Path::new(raw);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|e| traversal(raw, format!("cannot resolve working directory: {e}")))?
            .join(path)
    };

    resolve_existing_prefix(&absolute)
        .map_err(|detail| traversal(raw, detail))
}

fn resolve_existing_prefix(path: &Path) -> Result<PathBuf, String> {
    match std::fs::canonicalize(path) {
        Ok(resolved) => Ok(resolved),
        Err(_) => {
            let parent = path
                .parent()
                .ok_or_else(|| "path has no resolvable ancestor".to_string())?;
            // `file_name` is None for `..` and `.` tails; a parent reference
            // that cannot be canonicalized against the filesystem is unsafe.
            let name = path
                .file_name()
                .ok_or_else(|| "unresolvable parent reference in path".to_string())?;
            Ok(resolve_existing_prefix(parent)?.join(name))
        }
    }
}

/// Check that a resolved path is the prefix-descendant of at least one
/// allowed root. Roots are resolved at check time so symlinked allowlist
/// entries behave consistently.
pub fn ensure_allowed(
    raw: &str,
    resolved: &Path,
    allowed_paths: &[PathBuf],
) -> Result<(), SecurityError> {
    for root in allowed_paths {
        let root = match std::fs::canonicalize(root) {
            Ok(resolved_root) => resolved_root,
            Err(_) => root.clone(),
        };
        if resolved.starts_with(&root) {
            return Ok(());
        }
    }
    Err(traversal(
        raw,
        format!(
            "resolved to '{}', outside {:?}",
            resolved.display(),
            allowed_paths
        ),
    ))
}

fn traversal(path: &str, detail: String) -> SecurityError {
    SecurityError::PathTraversal {
        path: path.to_string(),
        detail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_root() -> tempfile::TempDir {
        tempfile::tempdir().expect("tempdir")
    }

    #[test]
    fn resolves_existing_file() {
        let root = temp_root();
        let file = root.path().join("data.txt");
        std::fs::write(&file, "hello").expect("write");

        let resolved = resolve_path(file.to_str().expect("utf8")).expect("resolve");
        assert_eq!(resolved, std::fs::canonicalize(&file).expect("canonical"));
    }

    #[test]
    fn resolves_nonexistent_target_through_existing_parent() {
        let root = temp_root();
        let target = root.path().join("new-file.txt");

        let resolved = resolve_path(target.to_str().expect("utf8")).expect("resolve");
        assert_eq!(
            resolved,
            std::fs::canonicalize(root.path()).expect("canonical").join("new-file.txt")
        );
    }

    #[test]
    fn eliminates_parent_references_through_real_directories() {
        let root = temp_root();
        let inner = root.path().join("allowed");
        std::fs::create_dir_all(&inner).expect("mkdir");
        let sneaky = format!("{}/allowed/../allowed/file.txt", root.path().display());

        let resolved = resolve_path(&sneaky).expect("resolve");
        assert!(resolved.ends_with("allowed/file.txt"));
        assert!(!resolved.to_string_lossy().contains(".."));
    }

    #[test]
    fn rejects_parent_reference_in_nonexistent_tail() {
        let root = temp_root();
        let sneaky = format!("{}/ghost/../escape.txt", root.path().display());
        assert!(resolve_path(&sneaky).is_err());
    }

    #[test]
    fn traversal_outside_allowlist_is_rejected() {
        let root = temp_root();
        let allowed = root.path().join("allowed");
        std::fs::create_dir_all(&allowed).expect("mkdir");

        let escape = format!("{}/allowed/../../etc/passwd", root.path().display());
        // The `..` components resolve against real directories, landing
        // outside the allowlist.
        if let Ok(resolved) = resolve_path(&escape) {
            let err = ensure_allowed(&escape, &resolved, &[allowed.clone()])
                .expect_err("escape must be rejected");
            assert!(matches!(err, SecurityError::PathTraversal { .. }));
        }

        let inside = allowed.join("ok.txt");
        std::fs::write(&inside, "x").expect("write");
        let resolved = resolve_path(inside.to_str().expect("utf8")).expect("resolve");
        ensure_allowed("ok.txt", &resolved, &[allowed]).expect("inside allowlist");
    }

    #[cfg(unix)]
    #[test]
    fn symlink_escape_is_rejected() {
        let root = temp_root();
        let allowed = root.path().join("allowed");
        let outside = root.path().join("outside");
        std::fs::create_dir_all(&allowed).expect("mkdir");
        std::fs::create_dir_all(&outside).expect("mkdir");
        std::fs::write(outside.join("secret.txt"), "top secret").expect("write");
        std::os::unix::fs::symlink(outside.join("secret.txt"), allowed.join("link.txt"))
            .expect("symlink");

        let raw = allowed.join("link.txt");
        let resolved = resolve_path(raw.to_str().expect("utf8")).expect("resolve");
        let err = ensure_allowed("link.txt", &resolved, &[allowed])
            .expect_err("symlink target is outside the allowlist");
        assert!(matches!(err, SecurityError::PathTraversal { .. }));
    }
}
