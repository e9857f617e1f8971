//! Path normalization for capability-key targets. This is the critical
//! security invariant from §4.2: any request using `./a/../b`, `./a/./b`,
//! `~/x`, or redundant separators must resolve to the same canonical string
//! that team overrides use as keys.
//!
//! Unlike the VFS snapshotter's `canonicalize` (which touches disk to
//! resolve symlinks), this is a *lexical* clean: permission targets name
//! paths that may not exist yet (e.g. a glob over files a tool has not
//! created), so normalization only expands `~` and collapses `.`/`..`
//! components.

use std::path::Component;
use std::path::Path;
use std::path::PathBuf;

/// Expand a leading `~` against `home`, then lexically clean `.`/`..` and
/// redundant separators. Non-fs resources should not be passed through this
/// function (the caller is responsible for only normalizing `fs:*` targets).
pub fn normalize_fs_target(raw: &str, home: &Path) -> String {
    let expanded = expand_tilde(raw, home);
    let cleaned = clean_path(&expanded);
    cleaned.to_string_lossy().into_owned()
}

fn expand_tilde(raw: &str, home: &Path) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/") {
        home.join(rest)
    } else if raw == "~" {
        home.to_path_buf()
    } else {
        PathBuf::from(raw)
    }
}

/// Lexically clean `.`/`..` components. A leading `..` with no preceding
/// component to cancel is kept as-is (no parent to pop).
fn clean_path(path: &Path) -> PathBuf {
    let mut out = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.last() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                _ => out.push(component),
            },
            other => out.push(other),
        }
    }
    out.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_tilde() {
        let home = Path::new("/home/u");
        assert_eq!(normalize_fs_target("~/.config/a.toml", home), "/home/u/.config/a.toml");
    }

    #[test]
    fn cleans_dot_and_dotdot() {
        let home = Path::new("/home/u");
        assert_eq!(normalize_fs_target("./a/../b", home), "b");
        assert_eq!(normalize_fs_target("./a/./b", home), "a/b");
    }

    #[test]
    fn absolute_path_unaffected_by_home() {
        let home = Path::new("/home/u");
        assert_eq!(normalize_fs_target("/a/b", home), "/a/b");
    }

    #[test]
    fn redundant_separators_do_not_change_result() {
        let home = Path::new("/home/u");
        assert_eq!(
            normalize_fs_target("~/.config/a.toml", home),
            normalize_fs_target("~/.config//a.toml", home)
        );
    }
}
