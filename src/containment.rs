//! Path containment: resolve user-supplied paths and decide whether they stay under an approved root.
//!
//! Containment compares whole path components, so `/data` never contains `/data2`.

use std::path::{Component, Path, PathBuf};

/// Symlink hops followed before a path is treated as unresolvable.
const MAX_SYMLINK_HOPS: usize = 40;

/// Outcome of resolving one command argument. Computed per command, never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathDecision {
    /// Absolute, normalized target.
    pub path: PathBuf,
    /// Whether `path` lies under an approved root.
    pub contained: bool,
}

/// Resolve `input` against the session's current directory.
///
/// Relative input is joined onto `current_dir`, absolute input is used as is, and
/// `~` / `~/...` expand to `base_root`. The result has `.` and `..` resolved and
/// symlinks of every existing prefix followed; a tail that does not exist yet
/// (e.g. the target of `mkdir`) is normalized lexically.
pub fn resolve(base_root: &Path, current_dir: &Path, input: &str) -> PathBuf {
    let joined = if input.is_empty() {
        current_dir.to_path_buf()
    } else if input == "~" {
        base_root.to_path_buf()
    } else if let Some(rest) = input.strip_prefix("~/") {
        base_root.join(rest)
    } else {
        let p = Path::new(input);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            current_dir.join(p)
        }
    };
    canonicalize_lenient(&joined, 0).unwrap_or_default()
}

/// True iff `path` equals, or is a component-bounded descendant of, some root.
///
/// Roots are expected in canonical form (see [`crate::policy::ServerPolicy`]).
pub fn is_contained(path: &Path, approved_roots: &[PathBuf]) -> bool {
    path.is_absolute() && approved_roots.iter().any(|root| path.starts_with(root))
}

/// Resolve then check. NUL bytes in the input are never contained.
pub fn check(
    base_root: &Path,
    current_dir: &Path,
    input: &str,
    approved_roots: &[PathBuf],
) -> PathDecision {
    if input.contains('\0') {
        return PathDecision {
            path: current_dir.join(input.replace('\0', "")),
            contained: false,
        };
    }
    let path = resolve(base_root, current_dir, input);
    let contained = is_contained(&path, approved_roots);
    PathDecision { path, contained }
}

/// Like [`check`], but the last component is kept as typed instead of followed.
///
/// Used by commands that act on a directory entry itself (`rm`, `rmdir`): a symlink
/// named as the final component is the link, not its target. Both the entry and
/// whatever it points to must be contained.
pub fn check_entry(
    base_root: &Path,
    current_dir: &Path,
    input: &str,
    approved_roots: &[PathBuf],
) -> PathDecision {
    let target = check(base_root, current_dir, input, approved_roots);
    let literal = Path::new(input);
    let (Some(name), Some(parent)) = (literal.file_name(), literal.parent()) else {
        return target;
    };
    if input == "~" || input.ends_with("/.") || input.ends_with('/') {
        return target;
    }
    let Some(parent) = parent.to_str() else {
        return target;
    };
    let entry = resolve(base_root, current_dir, parent).join(name);
    let contained = target.contained && is_contained(&entry, approved_roots);
    PathDecision {
        path: entry,
        contained,
    }
}

/// Lexically and physically normalize an absolute path that may not exist yet.
pub fn normalize(path: &Path) -> PathBuf {
    canonicalize_lenient(path, 0).unwrap_or_else(|| path.to_path_buf())
}

fn canonicalize_lenient(path: &Path, hops: usize) -> Option<PathBuf> {
    if hops > MAX_SYMLINK_HOPS {
        return None;
    }
    let mut resolved = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => resolved.push(prefix.as_os_str()),
            Component::RootDir => resolved.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                resolved.pop();
            }
            Component::Normal(part) => {
                resolved.push(part);
                match std::fs::canonicalize(&resolved) {
                    Ok(real) => resolved = real,
                    Err(_) => {
                        // Dangling link: follow it by hand so a later create
                        // cannot land outside the sandbox through it.
                        let is_link = std::fs::symlink_metadata(&resolved)
                            .map(|m| m.file_type().is_symlink())
                            .unwrap_or(false);
                        if is_link {
                            let target = std::fs::read_link(&resolved).ok()?;
                            resolved.pop();
                            let next = if target.is_absolute() {
                                target
                            } else {
                                resolved.join(target)
                            };
                            resolved = canonicalize_lenient(&next, hops + 1)?;
                        }
                    }
                }
            }
        }
    }
    Some(resolved)
}
