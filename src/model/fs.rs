use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    time::SystemTime,
};

use crate::adapters::ObjectHead;

/// Stats properties derived from store-native fields, never persisted as
/// user metadata.
pub const RESERVED_PROPS: [&str; 3] = ["size", "etag", "modified"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    NotReadable,
    NoModificationAllowed,
    NotSupported,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::NotFound => "NotFoundError",
            ErrorKind::NotReadable => "NotReadableError",
            ErrorKind::NoModificationAllowed => "NoModificationAllowedError",
            ErrorKind::NotSupported => "NotSupportedError",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FSError {
    #[error("{repository}:{path} not found: {message}")]
    NotFound {
        repository: String,
        path: String,
        message: String,
    },

    #[error("{repository}:{path} is not readable: {message}")]
    NotReadable {
        repository: String,
        path: String,
        message: String,
    },

    #[error("{repository}:{path} cannot be modified: {message}")]
    NoModificationAllowed {
        repository: String,
        path: String,
        message: String,
    },

    #[error("{repository}:{path} not supported: {message}")]
    NotSupported {
        repository: String,
        path: String,
        message: String,
    },
}

impl FSError {
    pub fn new(kind: ErrorKind, repository: &str, path: &str, message: impl Into<String>) -> Self {
        let repository = repository.to_string();
        let path = path.to_string();
        let message = message.into();
        match kind {
            ErrorKind::NotFound => FSError::NotFound {
                repository,
                path,
                message,
            },
            ErrorKind::NotReadable => FSError::NotReadable {
                repository,
                path,
                message,
            },
            ErrorKind::NoModificationAllowed => FSError::NoModificationAllowed {
                repository,
                path,
                message,
            },
            ErrorKind::NotSupported => FSError::NotSupported {
                repository,
                path,
                message,
            },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            FSError::NotFound { .. } => ErrorKind::NotFound,
            FSError::NotReadable { .. } => ErrorKind::NotReadable,
            FSError::NoModificationAllowed { .. } => ErrorKind::NoModificationAllowed,
            FSError::NotSupported { .. } => ErrorKind::NotSupported,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            FSError::NotFound { path, .. }
            | FSError::NotReadable { path, .. }
            | FSError::NoModificationAllowed { path, .. }
            | FSError::NotSupported { path, .. } => path,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

/// Attributes of a file or directory. `size` is only present for files.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Stats {
    pub size: Option<u64>,
    pub modified: Option<SystemTime>,
    pub etag: Option<String>,
    pub props: BTreeMap<String, String>,
}

impl Stats {
    pub fn from_head(head: &ObjectHead, is_directory: bool) -> Self {
        let props = head
            .metadata
            .iter()
            .filter(|(k, _)| !RESERVED_PROPS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Self {
            size: if is_directory { None } else { Some(head.size) },
            modified: head.modified,
            etag: head.etag.clone(),
            props,
        }
    }

    pub fn is_file(&self) -> bool {
        self.size.is_some()
    }

    /// User metadata to persist alongside the object.
    pub fn metadata(&self) -> HashMap<String, String> {
        self.props
            .iter()
            .filter(|(k, _)| !RESERVED_PROPS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// Immediate child produced by a listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    pub kind: EntryKind,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct HeadOptions {
    /// Restricts the probes issued; `None` checks for both kinds.
    pub kind: Option<EntryKind>,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ReadOptions {
    pub start: Option<u64>,
    pub length: Option<u64>,
}

#[derive(Clone, Copy, Debug)]
pub struct WriteOptions {
    pub append: bool,
    pub create: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            append: false,
            create: true,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct URLOptions {
    /// `GET`, `PUT`, `POST` or `DELETE`; defaults to `GET`.
    pub url_type: Option<String>,
    /// Seconds until the URL expires; defaults to one day.
    pub expires: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_from_head() {
        let head = ObjectHead {
            size: 42,
            modified: Some(SystemTime::UNIX_EPOCH),
            etag: Some("\"abc\"".to_string()),
            metadata: HashMap::from([
                ("owner".to_string(), "alice".to_string()),
                ("size".to_string(), "1".to_string()),
                ("etag".to_string(), "x".to_string()),
                ("modified".to_string(), "0".to_string()),
            ]),
        };

        let file = Stats::from_head(&head, false);
        assert_eq!(file.size, Some(42));
        assert_eq!(file.etag.as_deref(), Some("\"abc\""));
        assert_eq!(file.modified, Some(SystemTime::UNIX_EPOCH));
        assert_eq!(file.props.len(), 1);
        assert_eq!(file.props.get("owner").map(String::as_str), Some("alice"));

        let dir = Stats::from_head(&head, true);
        assert_eq!(dir.size, None);
        assert!(!dir.is_file());
    }

    #[test]
    fn test_stats_metadata_skips_reserved() {
        let mut stats = Stats {
            size: Some(3),
            ..Default::default()
        };
        stats.props.insert("color".to_string(), "blue".to_string());
        stats.props.insert("size".to_string(), "3".to_string());

        let metadata = stats.metadata();
        assert_eq!(metadata.len(), 1);
        assert_eq!(metadata.get("color").map(String::as_str), Some("blue"));
    }

    #[test]
    fn test_error_kind() {
        let cases = vec![
            ErrorKind::NotFound,
            ErrorKind::NotReadable,
            ErrorKind::NoModificationAllowed,
            ErrorKind::NotSupported,
        ];

        for kind in cases {
            let err = FSError::new(kind, "repo", "/a", "boom");
            assert_eq!(err.kind(), kind, "failed for case: {}", kind);
            assert_eq!(err.path(), "/a", "failed for case: {}", kind);
        }
    }
}
