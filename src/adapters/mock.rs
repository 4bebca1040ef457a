use std::{
    collections::{hash_map::DefaultHasher, BTreeMap, HashMap},
    hash::{Hash, Hasher},
    sync::{Mutex, MutexGuard},
    time::{Duration, SystemTime},
};

use bytes::{Bytes, BytesMut};
use futures::StreamExt;

use crate::{
    adapters::{
        split_parts, ListPage, ListRequest, ObjectHead, ObjectStoreClient, ObjectSummary,
        PresignCommand, StoreError, StoreFuture,
    },
    model::payload::{push_channel, Blob, ByteStream, Payload},
};

/// How the mock answers GET requests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BodyShape {
    #[default]
    Blob,
    PullStream,
    PushStream,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MockOp {
    Head,
    Get,
    Put,
    Delete,
    List,
    Copy,
    Presign,
    Multipart,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Call {
    pub op: MockOp,
    pub key: String,
    pub detail: Option<String>,
}

#[derive(Clone, Debug)]
struct StoredObject {
    body: Bytes,
    modified: SystemTime,
    etag: String,
    metadata: HashMap<String, String>,
}

impl StoredObject {
    fn new(body: Bytes, metadata: HashMap<String, String>) -> Self {
        let mut hasher = DefaultHasher::new();
        body.hash(&mut hasher);
        Self {
            etag: format!("\"{:016x}\"", hasher.finish()),
            body,
            modified: SystemTime::now(),
            metadata,
        }
    }
}

/// In-memory S3 stand-in that records every request it receives.
#[derive(Debug)]
pub struct MockClient {
    objects: Mutex<BTreeMap<String, StoredObject>>,
    calls: Mutex<Vec<Call>>,
    failures: Mutex<HashMap<(MockOp, String), StoreError>>,
    multipart_parts: Mutex<Vec<usize>>,
    page_size: usize,
    part_size: usize,
    chunk_size: usize,
    body_shape: BodyShape,
}

impl Default for MockClient {
    fn default() -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            multipart_parts: Mutex::new(Vec::new()),
            page_size: 1000,
            part_size: 5 * 1024 * 1024,
            chunk_size: 64 * 1024,
            body_shape: BodyShape::Blob,
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn parse_range(range: &str, len: usize) -> Result<(usize, usize), StoreError> {
    let invalid = || StoreError {
        status: Some(416),
        code: Some("InvalidRange".to_string()),
        message: format!("invalid range: {}", range),
    };

    let bounds = range.strip_prefix("bytes=").ok_or_else(invalid)?;
    let (start, end) = bounds.split_once('-').ok_or_else(invalid)?;
    let start: usize = start.parse().map_err(|_| invalid())?;
    let end: usize = if end.is_empty() {
        len
    } else {
        end.parse::<usize>().map_err(|_| invalid())?.saturating_add(1)
    };

    if start >= len && len > 0 {
        return Err(invalid());
    }

    Ok((start.min(len), end.min(len)))
}

impl MockClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_part_size(mut self, part_size: usize) -> Self {
        self.part_size = part_size.max(1);
        self
    }

    /// Size of the chunks stream-shaped GET bodies are split into.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_body_shape(mut self, body_shape: BodyShape) -> Self {
        self.body_shape = body_shape;
        self
    }

    pub fn insert(&self, key: &str, body: impl Into<Bytes>) {
        self.insert_with_metadata(key, body, HashMap::new());
    }

    pub fn insert_with_metadata(
        &self,
        key: &str,
        body: impl Into<Bytes>,
        metadata: HashMap<String, String>,
    ) {
        lock(&self.objects).insert(key.to_string(), StoredObject::new(body.into(), metadata));
    }

    pub fn object(&self, key: &str) -> Option<Bytes> {
        lock(&self.objects).get(key).map(|o| o.body.clone())
    }

    pub fn metadata(&self, key: &str) -> Option<HashMap<String, String>> {
        lock(&self.objects).get(key).map(|o| o.metadata.clone())
    }

    pub fn keys(&self) -> Vec<String> {
        lock(&self.objects).keys().cloned().collect()
    }

    /// Makes every `op` request against `key` fail with `err`.
    pub fn fail(&self, op: MockOp, key: &str, err: StoreError) {
        lock(&self.failures).insert((op, key.to_string()), err);
    }

    pub fn calls(&self) -> Vec<Call> {
        lock(&self.calls).clone()
    }

    pub fn count(&self, op: MockOp) -> usize {
        lock(&self.calls).iter().filter(|c| c.op == op).count()
    }

    pub fn reset_calls(&self) {
        lock(&self.calls).clear();
    }

    /// Part counts of completed multipart uploads, in order.
    pub fn multipart_parts(&self) -> Vec<usize> {
        lock(&self.multipart_parts).clone()
    }

    fn record(&self, op: MockOp, key: &str, detail: Option<String>) -> Result<(), StoreError> {
        lock(&self.calls).push(Call {
            op,
            key: key.to_string(),
            detail,
        });

        match lock(&self.failures).get(&(op, key.to_string())) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn shape_body(&self, body: Bytes) -> Payload {
        let chunks: Vec<Bytes> = body
            .chunks(self.chunk_size)
            .map(Bytes::copy_from_slice)
            .collect();

        match self.body_shape {
            BodyShape::Blob => Payload::Blob(Blob::new(body)),
            BodyShape::PullStream => Payload::pull(futures::stream::iter(
                chunks.into_iter().map(Ok::<Bytes, StoreError>),
            )),
            BodyShape::PushStream => {
                let (tx, rx) = push_channel();
                tokio::spawn(async move {
                    for chunk in chunks {
                        if !tx.send(chunk).await {
                            return;
                        }
                    }
                });
                Payload::PushStream(rx)
            }
        }
    }

    fn list_page(&self, request: &ListRequest) -> ListPage {
        let objects = lock(&self.objects);
        let prefix = request.prefix.as_str();
        let delimiter = request.delimiter.as_deref().filter(|d| !d.is_empty());
        let limit = request
            .max_keys
            .map(|m| m.max(1) as usize)
            .unwrap_or(self.page_size)
            .min(self.page_size);

        let mut page = ListPage::default();
        let mut last_marker: Option<String> = None;

        for (key, object) in objects.range(prefix.to_string()..) {
            if !key.starts_with(prefix) {
                break;
            }

            // Tokens are "P<prefix>" after a common prefix and "K<key>" after an object.
            if let Some(token) = request.continuation_token.as_deref() {
                let skip = match token.split_at(token.len().min(1)) {
                    ("P", marker) => key.as_str() <= marker || key.starts_with(marker),
                    (_, marker) => key.as_str() <= marker,
                };
                if skip {
                    continue;
                }
            }

            let rest = &key[prefix.len()..];
            let common = delimiter.and_then(|d| {
                rest.find(d)
                    .map(|idx| format!("{}{}", prefix, &rest[..idx + d.len()]))
            });

            if let Some(common) = &common {
                if page.prefixes.last() == Some(common) {
                    continue;
                }
            }

            if page.prefixes.len() + page.objects.len() == limit {
                page.truncated = true;
                page.next_token = last_marker;
                return page;
            }

            match common {
                Some(common) => {
                    last_marker = Some(format!("P{}", common));
                    page.prefixes.push(common);
                }
                None => {
                    last_marker = Some(format!("K{}", key));
                    page.objects.push(ObjectSummary {
                        key: key.clone(),
                        size: object.body.len() as u64,
                        modified: Some(object.modified),
                    });
                }
            }
        }

        page
    }
}

impl ObjectStoreClient for MockClient {
    fn head_object<'a>(&'a self, _bucket: &'a str, key: &'a str) -> StoreFuture<'a, ObjectHead> {
        Box::pin(async move {
            self.record(MockOp::Head, key, None)?;

            let objects = lock(&self.objects);
            let object = objects.get(key).ok_or_else(|| StoreError::not_found(key))?;

            Ok(ObjectHead {
                size: object.body.len() as u64,
                modified: Some(object.modified),
                etag: Some(object.etag.clone()),
                metadata: object.metadata.clone(),
            })
        })
    }

    fn get_object<'a>(
        &'a self,
        _bucket: &'a str,
        key: &'a str,
        range: Option<String>,
    ) -> StoreFuture<'a, Payload> {
        Box::pin(async move {
            self.record(MockOp::Get, key, range.clone())?;

            let body = lock(&self.objects)
                .get(key)
                .map(|o| o.body.clone())
                .ok_or_else(|| StoreError {
                    status: Some(404),
                    code: Some("NoSuchKey".to_string()),
                    message: format!("no such key: {}", key),
                })?;

            let body = match range {
                Some(range) => {
                    let (start, end) = parse_range(&range, body.len())?;
                    body.slice(start..end)
                }
                None => body,
            };

            Ok(self.shape_body(body))
        })
    }

    fn put_object<'a>(
        &'a self,
        _bucket: &'a str,
        key: &'a str,
        body: Bytes,
        metadata: Option<HashMap<String, String>>,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.record(MockOp::Put, key, Some(body.len().to_string()))?;
            self.insert_with_metadata(key, body, metadata.unwrap_or_default());
            Ok(())
        })
    }

    fn delete_object<'a>(&'a self, _bucket: &'a str, key: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.record(MockOp::Delete, key, None)?;
            lock(&self.objects).remove(key);
            Ok(())
        })
    }

    fn list_objects_v2<'a>(
        &'a self,
        _bucket: &'a str,
        request: ListRequest,
    ) -> StoreFuture<'a, ListPage> {
        Box::pin(async move {
            self.record(
                MockOp::List,
                &request.prefix,
                request.continuation_token.clone(),
            )?;
            Ok(self.list_page(&request))
        })
    }

    fn copy_object<'a>(
        &'a self,
        _bucket: &'a str,
        src_key: &'a str,
        dst_key: &'a str,
        metadata: HashMap<String, String>,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.record(MockOp::Copy, dst_key, Some(src_key.to_string()))?;

            let mut objects = lock(&self.objects);
            let body = objects
                .get(src_key)
                .map(|o| o.body.clone())
                .ok_or_else(|| StoreError::not_found(src_key))?;
            objects.insert(dst_key.to_string(), StoredObject::new(body, metadata));

            Ok(())
        })
    }

    fn presign<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        command: PresignCommand,
        expires_in: Duration,
    ) -> StoreFuture<'a, String> {
        Box::pin(async move {
            self.record(MockOp::Presign, key, Some(format!("{:?}", command)))?;
            Ok(format!(
                "https://mock.invalid/{}/{}?x-method={:?}&X-Amz-Expires={}",
                bucket,
                key,
                command,
                expires_in.as_secs()
            ))
        })
    }

    fn multipart_upload<'a>(
        &'a self,
        _bucket: &'a str,
        key: &'a str,
        body: ByteStream,
        metadata: Option<HashMap<String, String>>,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.record(MockOp::Multipart, key, None)?;

            let mut buf = BytesMut::new();
            let mut parts = 0;
            let mut pending = split_parts(body, self.part_size);
            while let Some(part) = pending.next().await {
                buf.extend_from_slice(&part?);
                parts += 1;
            }

            lock(&self.multipart_parts).push(parts);
            self.insert_with_metadata(key, buf.freeze(), metadata.unwrap_or_default());

            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_range() {
        let cases = vec![
            ("bytes=0-4", 10, Some((0, 5))),
            ("bytes=3-", 10, Some((3, 10))),
            ("bytes=8-20", 10, Some((8, 10))),
            ("bytes=10-", 10, None),
            ("bytes=0-", 0, Some((0, 0))),
            ("items=0-1", 10, None),
        ];

        for (range, len, expected) in cases {
            let result = parse_range(range, len).ok();
            assert_eq!(result, expected, "failed for case: {}", range);
        }
    }

    #[tokio::test]
    async fn test_list_delimited_pages() {
        let client = MockClient::new().with_page_size(1);
        client.insert("r/d/", "");
        client.insert("r/d/a.txt", "a");
        client.insert("r/d/b.txt", "b");
        client.insert("r/d/c/x.txt", "x");
        client.insert("r/d/c/y.txt", "y");
        client.insert("r/e.txt", "e");

        let mut seen = Vec::new();
        let mut token = None;
        loop {
            let page = client
                .list_objects_v2(
                    "bucket",
                    ListRequest {
                        prefix: "r/d/".to_string(),
                        delimiter: Some("/".to_string()),
                        continuation_token: token,
                        max_keys: None,
                    },
                )
                .await
                .unwrap();

            assert!(page.prefixes.len() + page.objects.len() <= 1);
            seen.extend(page.prefixes);
            seen.extend(page.objects.into_iter().map(|o| o.key));

            if !page.truncated {
                break;
            }
            token = page.next_token;
        }

        assert_eq!(seen, vec!["r/d/", "r/d/a.txt", "r/d/b.txt", "r/d/c/"]);
    }

    #[tokio::test]
    async fn test_multipart_counts_parts() {
        let client = MockClient::new().with_part_size(4);
        let body = Payload::pull(futures::stream::iter(vec![
            Ok(Bytes::from_static(b"abcdef")),
            Ok(Bytes::from_static(b"ghij")),
        ]));

        client
            .multipart_upload("bucket", "k", body.into_stream(), None)
            .await
            .unwrap();

        assert_eq!(client.multipart_parts(), vec![3]);
        assert_eq!(client.object("k"), Some(Bytes::from_static(b"abcdefghij")));
    }

    #[tokio::test]
    async fn test_multipart_empty_body_is_one_part() {
        let client = MockClient::new().with_part_size(4);
        let body = Payload::pull(futures::stream::iter(Vec::<Result<Bytes, StoreError>>::new()));

        client
            .multipart_upload("bucket", "k", body.into_stream(), None)
            .await
            .unwrap();

        assert_eq!(client.multipart_parts(), vec![1]);
        assert_eq!(client.object("k"), Some(Bytes::new()));
    }
}
