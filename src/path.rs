//! Location normalization and archive entry path sanitization.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Strip a `file://` or `file:` scheme and collapse repeated `/` separators.
///
/// Never fails; malformed input is returned in its best-effort canonical form.
pub fn normalize(path: &str) -> String {
    let mut stripped = path;
    while let Some(rest) = stripped
        .strip_prefix("file://")
        .or_else(|| stripped.strip_prefix("file:"))
    {
        stripped = rest;
    }

    let mut out = String::with_capacity(stripped.len());
    let mut prev_sep = false;
    for c in stripped.chars() {
        if c == '/' {
            if prev_sep {
                continue;
            }
            prev_sep = true;
        } else {
            prev_sep = false;
        }
        out.push(c);
    }
    out
}

/// Resolve an archive entry name against the extraction root.
///
/// Both `/` and `\` are treated as separators. Absolute names, drive
/// prefixes and `..` components that climb above `root` are rejected.
pub fn resolve_entry_path(root: &Path, entry_name: &str) -> Result<PathBuf> {
    let unsafe_path = || Error::UnsafeEntryPath {
        entry: entry_name.to_string(),
    };

    if entry_name.starts_with('/')
        || entry_name.starts_with('\\')
        || has_drive_prefix(entry_name)
    {
        return Err(unsafe_path());
    }

    let mut parts: Vec<&str> = Vec::new();
    for part in entry_name.split(['/', '\\']) {
        match part {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    return Err(unsafe_path());
                }
            }
            p if p.contains('\0') => return Err(unsafe_path()),
            // Windows reads any colon as a drive or stream separator.
            p if cfg!(windows) && p.contains(':') => return Err(unsafe_path()),
            p => parts.push(p),
        }
    }

    let mut resolved = root.to_path_buf();
    resolved.extend(parts);
    Ok(resolved)
}

/// `C:` style drive designator at the start of a name
fn has_drive_prefix(name: &str) -> bool {
    let bytes = name.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_file_scheme() {
        assert_eq!(normalize("file:///a//b///c"), "/a/b/c");
        assert_eq!(normalize("file:/data/x.zip"), "/data/x.zip");
        assert_eq!(normalize("/a/b/c"), "/a/b/c");
    }

    #[test]
    fn normalize_is_idempotent() {
        for input in ["file:///a//b///c", "//x//y/", "relative//dir", "file:file://x", ""] {
            let once = normalize(input);
            assert_eq!(normalize(&once), once);
        }
    }

    #[test]
    fn other_schemes_are_left_alone() {
        assert_eq!(normalize("cdvfile://localhost//persistent"), "cdvfile:/localhost/persistent");
    }

    #[test]
    fn resolves_nested_entries() {
        let root = Path::new("/out");
        let p = resolve_entry_path(root, "sub/dir/b.txt").unwrap();
        assert_eq!(p, Path::new("/out/sub/dir/b.txt"));

        let p = resolve_entry_path(root, "sub\\win\\c.txt").unwrap();
        assert_eq!(p, Path::new("/out/sub/win/c.txt"));

        let p = resolve_entry_path(root, "./a/../b.txt").unwrap();
        assert_eq!(p, Path::new("/out/b.txt"));
    }

    #[cfg(unix)]
    #[test]
    fn colons_inside_names_are_kept() {
        let root = Path::new("/out");
        let p = resolve_entry_path(root, "notes:v2.txt").unwrap();
        assert_eq!(p, Path::new("/out/notes:v2.txt"));

        let p = resolve_entry_path(root, "logs/12:30.txt").unwrap();
        assert_eq!(p, Path::new("/out/logs/12:30.txt"));
    }

    #[test]
    fn rejects_traversal() {
        let root = Path::new("/out");
        for name in ["../../evil", "a/../../evil", "/etc/passwd", "\\evil", "C:/evil", "C:evil"] {
            let err = resolve_entry_path(root, name).unwrap_err();
            assert!(matches!(err, Error::UnsafeEntryPath { .. }), "{name}");
        }
    }
}
