pub const SEPARATOR: char = '/';

/// Splits `path` into normalized segments: empty and `.` segments dropped,
/// `..` pops the previous segment (never above the root).
pub fn segments(path: &str) -> Vec<&str> {
    let mut out: Vec<&str> = Vec::new();
    for segment in path.split(SEPARATOR) {
        match segment {
            "" | "." => {}
            ".." => {
                out.pop();
            }
            s => out.push(s),
        }
    }
    out
}

/// Absolute, normalized form of `path`; the root is `/`.
pub fn normalize(path: &str) -> String {
    format!("{}{}", SEPARATOR, segments(path).join("/"))
}

pub fn join_paths(parent: &str, name: &str) -> String {
    normalize(&format!("{}{}{}", parent, SEPARATOR, name))
}

pub fn parent_path(path: &str) -> String {
    let mut segs = segments(path);
    segs.pop();
    format!("{}{}", SEPARATOR, segs.join("/"))
}

/// Maps abstract paths to object keys beneath a repository prefix.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyCodec {
    repository: String,
}

impl KeyCodec {
    pub fn new(repository: &str) -> Self {
        Self {
            repository: segments(repository).join("/"),
        }
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// Directory keys always end with the separator, file keys never do.
    pub fn to_key(&self, path: &str, is_directory: bool) -> String {
        let segs = segments(path);
        let mut key = self.repository.clone();
        for seg in segs {
            if !key.is_empty() {
                key.push(SEPARATOR);
            }
            key.push_str(seg);
        }
        if is_directory {
            key.push(SEPARATOR);
        }
        key
    }

    /// Inverse of `to_key`: the abstract path a key lives at, if it is
    /// inside the repository.
    pub fn to_path(&self, key: &str) -> Option<String> {
        let rest = if self.repository.is_empty() {
            key
        } else if key == self.repository {
            ""
        } else {
            key.strip_prefix(&self.repository)?.strip_prefix(SEPARATOR)?
        };
        Some(normalize(rest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_key() {
        let codec = KeyCodec::new("/repo/");

        let cases = vec![
            ("", false, "repo"),
            ("/", false, "repo"),
            ("", true, "repo/"),
            ("/", true, "repo/"),
            ("/a.txt", false, "repo/a.txt"),
            ("a.txt", false, "repo/a.txt"),
            ("/dir", true, "repo/dir/"),
            ("/dir/", false, "repo/dir"),
            ("//dir///sub/./x", false, "repo/dir/sub/x"),
            ("/dir/sub/../x", false, "repo/dir/x"),
            ("/../../x", true, "repo/x/"),
        ];

        for (path, is_directory, expected) in cases {
            let result = codec.to_key(path, is_directory);
            assert_eq!(result, expected, "failed for case: {} {}", path, is_directory);
        }
    }

    #[test]
    fn test_directory_suffix() {
        let codec = KeyCodec::new("repo");
        let paths = vec!["", "/", "/a", "/a/b/", "a//b", "/a/../b/./c"];

        for path in paths {
            assert!(
                codec.to_key(path, true).ends_with(SEPARATOR),
                "failed for case: {}",
                path
            );
            assert!(
                !codec.to_key(path, false).ends_with(SEPARATOR),
                "failed for case: {}",
                path
            );
        }
    }

    #[test]
    fn test_parent_round_trip() {
        let codec = KeyCodec::new("repo");
        let paths = vec!["/a", "/a/b", "/dir/sub/file.txt", "x//y/./z"];

        for path in paths {
            let key = codec.to_key(path, false);
            let (parent_key, name) = key.rsplit_once(SEPARATOR).unwrap();
            let parent = codec.to_path(parent_key).unwrap();

            assert_eq!(parent, parent_path(path), "failed for case: {}", path);
            assert_eq!(
                join_paths(&parent, name),
                normalize(path),
                "failed for case: {}",
                path
            );
        }
    }

    #[test]
    fn test_to_path() {
        let codec = KeyCodec::new("repo");

        let cases = vec![
            ("repo", Some("/")),
            ("repo/", Some("/")),
            ("repo/a/b", Some("/a/b")),
            ("repository/a", None),
            ("other/a", None),
        ];

        for (key, expected) in cases {
            let result = codec.to_path(key);
            assert_eq!(result.as_deref(), expected, "failed for case: {}", key);
        }
    }

    #[test]
    fn test_join_and_parent() {
        let cases = vec![
            ("/", "a", "/a"),
            ("/dir", "a.txt", "/dir/a.txt"),
            ("/dir/", "sub", "/dir/sub"),
        ];

        for (parent, name, expected) in cases {
            let joined = join_paths(parent, name);
            assert_eq!(joined, expected, "failed for case: {}", name);
            assert_eq!(parent_path(&joined), normalize(parent), "failed for case: {}", name);
        }
    }
}
