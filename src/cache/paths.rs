// Cache path utilities.
// Maps cache keys to files under the platform cache directory.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;

/// Get the base cache directory (~/.cache/gitpeek on Linux).
pub fn cache_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "", "gitpeek").map(|dirs| dirs.cache_dir().to_path_buf())
}

/// Directory holding one file per cache entry.
pub fn entries_dir(root: &Path) -> PathBuf {
    root.join("entries")
}

/// Path of the file backing `key`.
pub fn entry_path(root: &Path, key: &str) -> PathBuf {
    entries_dir(root).join(format!("{}.json", sanitize_key(key)))
}

/// Sanitize a cache key for use as a file name.
/// Percent-escapes problematic characters and `%` itself, so distinct keys
/// never share a file.
fn sanitize_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for c in key.chars() {
        match c {
            '%' | '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => {
                out.push_str(&format!("%{:02X}", c as u32));
            }
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_key() {
        assert_eq!(sanitize_key("simple"), "simple");
        assert_eq!(sanitize_key("rate_limit"), "rate_limit");
        assert_eq!(sanitize_key("user:octocat"), "user%3Aoctocat");
        assert_eq!(sanitize_key("commits:octocat:a/b"), "commits%3Aoctocat%3Aa%2Fb");
        assert_eq!(sanitize_key("100%"), "100%25");
    }

    #[test]
    fn test_distinct_keys_get_distinct_files() {
        let root = Path::new("/tmp/gitpeek");
        assert_ne!(
            entry_path(root, "commits:a_b:c"),
            entry_path(root, "commits:a:b_c")
        );
        assert_ne!(entry_path(root, "user:a"), entry_path(root, "user_a"));
        assert_ne!(entry_path(root, "user%3Aa"), entry_path(root, "user:a"));
    }

    #[test]
    fn test_entry_path() {
        let root = Path::new("/tmp/gitpeek");
        let path = entry_path(root, "repos:octocat");
        assert!(path.ends_with("entries/repos%3Aoctocat.json"));
    }
}
