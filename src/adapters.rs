use std::{collections::HashMap, time::SystemTime};

use bytes::{Bytes, BytesMut};
use futures::{future::BoxFuture, StreamExt};

use crate::model::payload::{ByteStream, Payload};

pub mod mock;
pub mod s3;

pub type StoreFuture<'a, T> = BoxFuture<'a, Result<T, StoreError>>;

/// Failure reported by the object store, before it is classified for callers.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{}", describe(.message, .status, .code))]
pub struct StoreError {
    pub status: Option<u16>,
    pub code: Option<String>,
    pub message: String,
}

impl StoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            code: None,
            message: message.into(),
        }
    }

    pub fn not_found(key: &str) -> Self {
        Self {
            status: Some(404),
            code: Some("NotFound".to_string()),
            message: format!("no such key: {}", key),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status == Some(404)
            || matches!(self.code.as_deref(), Some("NotFound") | Some("NoSuchKey"))
    }
}

fn describe(message: &str, status: &Option<u16>, code: &Option<String>) -> String {
    match (status, code) {
        (Some(status), Some(code)) => format!("{} ({} {})", message, status, code),
        (Some(status), None) => format!("{} ({})", message, status),
        (None, Some(code)) => format!("{} ({})", message, code),
        (None, None) => message.to_string(),
    }
}

/// Regroups `body` into parts of exactly `part_size` bytes, the last one
/// possibly shorter. An empty body still yields one empty part, since a
/// multipart upload needs at least one.
pub fn split_parts(body: ByteStream, part_size: usize) -> ByteStream {
    let part_size = part_size.max(1);

    futures::stream::unfold(
        (Some(body), BytesMut::new(), false),
        move |(mut body, mut buffer, emitted)| async move {
            loop {
                if buffer.len() >= part_size {
                    let part = buffer.split_to(part_size).freeze();
                    return Some((Ok(part), (body, buffer, true)));
                }

                let Some(stream) = body.as_mut() else {
                    if buffer.is_empty() && emitted {
                        return None;
                    }
                    let part = buffer.split().freeze();
                    return Some((Ok(part), (None, buffer, true)));
                };

                match stream.next().await {
                    Some(Ok(chunk)) => buffer.extend_from_slice(&chunk),
                    Some(Err(err)) => return Some((Err(err), (None, BytesMut::new(), true))),
                    None => body = None,
                }
            }
        },
    )
    .boxed()
}

/// Result of a HEAD request.
#[derive(Clone, Debug, Default)]
pub struct ObjectHead {
    pub size: u64,
    pub modified: Option<SystemTime>,
    pub etag: Option<String>,
    pub metadata: HashMap<String, String>,
}

#[derive(Clone, Debug)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
    pub modified: Option<SystemTime>,
}

/// One page of a delimited listing.
#[derive(Clone, Debug, Default)]
pub struct ListPage {
    pub prefixes: Vec<String>,
    pub objects: Vec<ObjectSummary>,
    pub truncated: bool,
    pub next_token: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct ListRequest {
    pub prefix: String,
    pub delimiter: Option<String>,
    pub continuation_token: Option<String>,
    pub max_keys: Option<i32>,
}

/// Store command a signed URL is issued for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresignCommand {
    Get,
    Put,
    Delete,
}

/// The operations this crate needs from an S3-compatible store.
///
/// Retries, authentication and transport belong to the implementation.
pub trait ObjectStoreClient: Send + Sync {
    fn head_object<'a>(&'a self, bucket: &'a str, key: &'a str) -> StoreFuture<'a, ObjectHead>;

    /// `range` is an HTTP range header value such as `bytes=0-99`.
    fn get_object<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        range: Option<String>,
    ) -> StoreFuture<'a, Payload>;

    fn put_object<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        body: Bytes,
        metadata: Option<HashMap<String, String>>,
    ) -> StoreFuture<'a, ()>;

    fn delete_object<'a>(&'a self, bucket: &'a str, key: &'a str) -> StoreFuture<'a, ()>;

    fn list_objects_v2<'a>(
        &'a self,
        bucket: &'a str,
        request: ListRequest,
    ) -> StoreFuture<'a, ListPage>;

    /// Copies `src_key` onto `dst_key`, replacing the user metadata.
    fn copy_object<'a>(
        &'a self,
        bucket: &'a str,
        src_key: &'a str,
        dst_key: &'a str,
        metadata: HashMap<String, String>,
    ) -> StoreFuture<'a, ()>;

    fn presign<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        command: PresignCommand,
        expires_in: std::time::Duration,
    ) -> StoreFuture<'a, String>;

    /// Uploads a body of unknown length in parts and commits it.
    fn multipart_upload<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        body: ByteStream,
        metadata: Option<HashMap<String, String>>,
    ) -> StoreFuture<'a, ()>;
}

#[cfg(test)]
mod tests {
    use futures::TryStreamExt;

    use super::*;

    fn body_of(chunks: &[&'static str]) -> ByteStream {
        let items: Vec<Result<Bytes, StoreError>> = chunks
            .iter()
            .map(|c| Ok(Bytes::from_static(c.as_bytes())))
            .collect();
        futures::stream::iter(items).boxed()
    }

    #[tokio::test]
    async fn test_split_parts() {
        let cases = vec![
            (vec!["abcd", "efgh"], vec!["abcd", "efgh"]),
            (vec!["ab", "cd", "ef", "gh"], vec!["abcd", "efgh"]),
            (vec!["abcdefghij"], vec!["abcd", "efgh", "ij"]),
            (vec!["abc", "def"], vec!["abcd", "ef"]),
            (vec!["a"], vec!["a"]),
            (vec![], vec![""]),
            (vec!["", ""], vec![""]),
        ];

        for (chunks, expected) in cases {
            let parts: Vec<Bytes> = split_parts(body_of(&chunks), 4)
                .try_collect()
                .await
                .unwrap();
            let expected: Vec<Bytes> = expected
                .iter()
                .map(|p| Bytes::from_static(p.as_bytes()))
                .collect();
            assert_eq!(parts, expected, "failed for case: {:?}", chunks);
        }
    }

    #[tokio::test]
    async fn test_split_parts_stops_at_error() {
        let body = futures::stream::iter(vec![
            Ok(Bytes::from_static(b"abcdef")),
            Err(StoreError::new("source broke")),
            Ok(Bytes::from_static(b"gh")),
        ])
        .boxed();

        let items: Vec<Result<Bytes, StoreError>> = split_parts(body, 4).collect().await;

        assert_eq!(
            items,
            vec![
                Ok(Bytes::from_static(b"abcd")),
                Err(StoreError::new("source broke")),
            ]
        );
    }

    #[test]
    fn test_display() {
        let cases = vec![
            (StoreError::not_found("k"), "no such key: k (404 NotFound)"),
            (StoreError::new("boom"), "boom"),
            (
                StoreError {
                    status: Some(500),
                    code: None,
                    message: "oops".to_string(),
                },
                "oops (500)",
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(err.to_string(), expected, "failed for case: {}", expected);
        }
    }

    #[test]
    fn test_is_not_found() {
        let cases = vec![
            (StoreError::not_found("a"), true),
            (
                StoreError {
                    status: Some(404),
                    code: None,
                    message: "".to_string(),
                },
                true,
            ),
            (
                StoreError {
                    status: Some(400),
                    code: Some("NoSuchKey".to_string()),
                    message: "".to_string(),
                },
                true,
            ),
            (
                StoreError {
                    status: Some(403),
                    code: Some("AccessDenied".to_string()),
                    message: "".to_string(),
                },
                false,
            ),
            (StoreError::new("connection reset"), false),
        ];

        for (err, expected) in cases {
            assert_eq!(err.is_not_found(), expected, "failed for case: {}", err);
        }
    }
}
