use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use tracing::{debug, error, info, instrument};

use crate::{
    adapters::{ObjectStoreClient, StoreError},
    fs::ObjectFS,
    model::{
        fs::{FSError, ReadOptions},
        payload::{Blob, ByteStream, Payload, PushEvent, PushStream},
    },
};

/// HTTP range header for `length` bytes starting at `start`. `None` fetches
/// the whole object.
pub fn range_header(start: Option<u64>, length: Option<u64>) -> Option<String> {
    if start.is_none() && length.is_none() {
        return None;
    }

    let s = start.unwrap_or(0);
    let e = match length {
        Some(length) => s.saturating_add(length.saturating_sub(1)).to_string(),
        None => String::new(),
    };

    Some(format!("bytes={}-{}", s, e))
}

enum Source {
    Blob { blob: Blob, offset: usize },
    Pull(ByteStream),
    Push(PushStream),
}

impl Source {
    fn from_payload(payload: Payload) -> Self {
        match payload {
            Payload::Bounded(b) => Source::Blob {
                blob: Blob::new(b),
                offset: 0,
            },
            Payload::Blob(blob) => Source::Blob { blob, offset: 0 },
            Payload::PullStream(s) => Source::Pull(s),
            Payload::PushStream(s) => Source::Push(s),
        }
    }

    fn close(self) {
        match self {
            Source::Push(mut s) => s.destroy(),
            Source::Pull(s) => drop(s),
            Source::Blob { .. } => {}
        }
    }
}

/// Splits `size` bytes off the front of `buf`, or everything when unbounded.
fn take_front(buf: &mut BytesMut, size: Option<usize>) -> Bytes {
    match size {
        Some(size) if size < buf.len() => buf.split_to(size).freeze(),
        _ => buf.split().freeze(),
    }
}

/// Sequential, seekable reader over one object. The GET is issued lazily on
/// the first read and again after every seek.
pub struct ReadSession<'a> {
    fs: &'a ObjectFS,
    path: String,
    position: u64,
    end: Option<u64>,
    source: Option<Source>,
    remaining: BytesMut,
    exhausted: bool,
}

impl<'a> ReadSession<'a> {
    pub(crate) fn new(fs: &'a ObjectFS, path: &str, options: ReadOptions) -> Self {
        let position = options.start.unwrap_or(0);
        Self {
            fs,
            path: path.to_string(),
            position,
            end: options.length.map(|length| position.saturating_add(length)),
            source: None,
            remaining: BytesMut::new(),
            exhausted: false,
        }
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Returns up to `size` bytes, or `None` at end of stream. Without a
    /// size, returns whatever the source has ready.
    pub async fn read(&mut self, size: Option<usize>) -> Result<Option<Bytes>, FSError> {
        if size == Some(0) {
            return Ok(Some(Bytes::new()));
        }
        if self.end.is_some_and(|end| self.position >= end) {
            return Ok(None);
        }

        if self.source.is_none() && !self.exhausted {
            let start = if self.position > 0 {
                Some(self.position)
            } else {
                None
            };
            let length = self.end.map(|end| end - self.position);
            match self.fs.load(&self.path, start, length).await? {
                Some(payload) => self.source = Some(Source::from_payload(payload)),
                None => {
                    self.exhausted = true;
                    return Ok(None);
                }
            }
        }

        let chunk = match self.next_chunk(size).await {
            Ok(chunk) => chunk,
            Err(err) => {
                self.close();
                error!(error_message=%err, error_group="read_body");
                return Err(self.fs.error(&self.path, err, false));
            }
        };

        match chunk {
            Some(chunk) if !chunk.is_empty() => {
                self.position += chunk.len() as u64;
                Ok(Some(chunk))
            }
            _ => {
                self.close();
                self.exhausted = true;
                Ok(None)
            }
        }
    }

    async fn next_chunk(&mut self, size: Option<usize>) -> Result<Option<Bytes>, StoreError> {
        let source = match self.source.as_mut() {
            None => return Ok(Some(take_front(&mut self.remaining, size))),
            Some(source) => source,
        };

        match source {
            Source::Blob { blob, offset } => {
                if *offset >= blob.len() {
                    return Ok(None);
                }
                let end = match size {
                    Some(size) => offset.saturating_add(size),
                    None => blob.len(),
                };
                let chunk = blob.slice(*offset, end);
                *offset += chunk.len();
                Ok(Some(chunk))
            }
            Source::Pull(stream) => {
                loop {
                    let satisfied = match size {
                        Some(size) => self.remaining.len() >= size,
                        None => !self.remaining.is_empty(),
                    };
                    if satisfied {
                        break;
                    }
                    match stream.next().await {
                        Some(chunk) => self.remaining.extend_from_slice(&chunk?),
                        None => {
                            self.source = None;
                            self.exhausted = true;
                            break;
                        }
                    }
                }
                Ok(Some(take_front(&mut self.remaining, size)))
            }
            Source::Push(stream) => {
                if self.remaining.is_empty() {
                    match stream.next_event().await {
                        PushEvent::Readable(chunk) => self.remaining.extend_from_slice(&chunk),
                        PushEvent::Error(err) => return Err(err),
                        PushEvent::End => {
                            self.source = None;
                            self.exhausted = true;
                        }
                    }
                }
                Ok(Some(take_front(&mut self.remaining, size)))
            }
        }
    }

    /// Drops the current source; the next read fetches from `offset`.
    pub fn seek(&mut self, offset: u64) {
        debug!(path = %self.path, offset = offset, "seek");
        self.close();
        self.remaining.clear();
        self.exhausted = false;
        self.position = offset;
    }

    pub fn close(&mut self) {
        if let Some(source) = self.source.take() {
            source.close();
        }
    }
}

impl Drop for ReadSession<'_> {
    fn drop(&mut self) {
        self.close();
    }
}

impl ObjectFS {
    pub fn open_read(&self, path: &str, options: ReadOptions) -> ReadSession<'_> {
        ReadSession::new(self, path, options)
    }

    /// Reads the requested range into memory.
    #[instrument(skip(self), fields(context = "read"))]
    pub async fn read_all(&self, path: &str, options: ReadOptions) -> Result<Bytes, FSError> {
        info!("called");

        let mut session = self.open_read(path, options);
        let mut buf = BytesMut::new();
        while let Some(chunk) = session.read(None).await? {
            buf.extend_from_slice(&chunk);
        }
        session.close();

        Ok(buf.freeze())
    }

    /// Issues the ranged GET. A zero length never reaches the store. `None`
    /// means `start` lies at or past the end of the object.
    pub(crate) async fn load(
        &self,
        path: &str,
        start: Option<u64>,
        length: Option<u64>,
    ) -> Result<Option<Payload>, FSError> {
        if length == Some(0) {
            return Ok(Some(Payload::default()));
        }

        let client = self.client().await?;
        match self
            .fetch(client.as_ref(), path, range_header(start, length))
            .await
        {
            Ok(payload) => Ok(Some(payload)),
            Err(err) if err.status == Some(416) && start.is_some_and(|s| s > 0) => {
                debug!(path = %path, start = ?start, "range starts past end of object");
                Ok(None)
            }
            Err(err) => Err(self.error(path, err, false)),
        }
    }

    /// GET of the file at `path`, left unclassified so readers and writers
    /// can map failures their own way.
    pub(crate) async fn fetch(
        &self,
        client: &dyn ObjectStoreClient,
        path: &str,
        range: Option<String>,
    ) -> Result<Payload, StoreError> {
        let key = self.codec.to_key(path, false);
        client
            .get_object(&self.bucket, &key, range)
            .await
            .map_err(|err| {
                if err.status != Some(416) {
                    error!(error_message=%err, error_group="get_object");
                }
                err
            })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        adapters::mock::{BodyShape, MockClient, MockOp},
        model::fs::ErrorKind,
    };

    const SHAPES: [BodyShape; 3] = [BodyShape::Blob, BodyShape::PullStream, BodyShape::PushStream];

    fn mock_fs(shape: BodyShape, chunk_size: usize) -> (Arc<MockClient>, ObjectFS) {
        let client = Arc::new(
            MockClient::new()
                .with_body_shape(shape)
                .with_chunk_size(chunk_size),
        );
        client.insert("repo/", "");
        client.insert("repo/f.txt", "0123456789");
        let fs = ObjectFS::with_client("bucket", "repo", client.clone()).unwrap();
        (client, fs)
    }

    #[test]
    fn test_range_header() {
        let cases = vec![
            (None, None, None),
            (Some(0), None, Some("bytes=0-")),
            (Some(5), None, Some("bytes=5-")),
            (None, Some(3), Some("bytes=0-2")),
            (Some(4), Some(2), Some("bytes=4-5")),
            (Some(2), Some(u64::MAX), Some("bytes=2-18446744073709551615")),
            (Some(u64::MAX), Some(5), Some("bytes=18446744073709551615-18446744073709551615")),
        ];

        for (start, length, expected) in cases {
            assert_eq!(
                range_header(start, length).as_deref(),
                expected,
                "failed for case: {:?} {:?}",
                start,
                length
            );
        }
    }

    #[tokio::test]
    async fn test_read_sized_chunks_across_shapes() {
        for shape in SHAPES {
            let (_client, fs) = mock_fs(shape, 3);
            let mut session = fs.open_read("/f.txt", ReadOptions::default());

            let mut chunks = Vec::new();
            while let Some(chunk) = session.read(Some(4)).await.unwrap() {
                chunks.push(chunk);
            }

            let joined: Vec<u8> = chunks.iter().flat_map(|c| c.to_vec()).collect();
            assert_eq!(joined, b"0123456789".to_vec(), "failed for case: {:?}", shape);
            assert!(chunks.iter().all(|c| c.len() <= 4), "failed for case: {:?}", shape);
            if shape != BodyShape::PushStream {
                let sizes: Vec<usize> = chunks.iter().map(|c| c.len()).collect();
                assert_eq!(sizes, vec![4, 4, 2], "failed for case: {:?}", shape);
            }
        }
    }

    #[tokio::test]
    async fn test_read_all_with_range() {
        for shape in SHAPES {
            let (client, fs) = mock_fs(shape, 2);

            let data = fs
                .read_all(
                    "/f.txt",
                    ReadOptions {
                        start: Some(2),
                        length: Some(5),
                    },
                )
                .await
                .unwrap();

            assert_eq!(&data[..], b"23456", "failed for case: {:?}", shape);
            let gets: Vec<Option<String>> = client
                .calls()
                .into_iter()
                .filter(|c| c.op == MockOp::Get)
                .map(|c| c.detail)
                .collect();
            assert_eq!(gets, vec![Some("bytes=2-6".to_string())], "failed for case: {:?}", shape);
        }
    }

    #[tokio::test]
    async fn test_zero_length_read_skips_store() {
        let client = Arc::new(MockClient::new());
        let fs = ObjectFS::with_client("bucket", "repo", client.clone()).unwrap();

        let mut session = fs.open_read("/f.txt", ReadOptions::default());
        assert_eq!(session.read(Some(0)).await.unwrap(), Some(Bytes::new()));

        let mut session = fs.open_read(
            "/f.txt",
            ReadOptions {
                start: Some(3),
                length: Some(0),
            },
        );
        assert_eq!(session.read(None).await.unwrap(), None);
        assert!(fs
            .read_all("/f.txt", ReadOptions { start: None, length: Some(0) })
            .await
            .unwrap()
            .is_empty());

        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn test_seek_reopens_with_range() {
        for shape in SHAPES {
            let (client, fs) = mock_fs(shape, 4);
            let mut session = fs.open_read("/f.txt", ReadOptions::default());

            let first = session.read(Some(2)).await.unwrap().unwrap();
            assert_eq!(&first[..], b"01", "failed for case: {:?}", shape);

            session.seek(7);
            let mut rest = Vec::new();
            while let Some(chunk) = session.read(None).await.unwrap() {
                rest.extend_from_slice(&chunk);
            }
            assert_eq!(rest, b"789".to_vec(), "failed for case: {:?}", shape);
            assert_eq!(session.position(), 10, "failed for case: {:?}", shape);

            let gets: Vec<Option<String>> = client
                .calls()
                .into_iter()
                .filter(|c| c.op == MockOp::Get)
                .map(|c| c.detail)
                .collect();
            assert_eq!(
                gets,
                vec![None, Some("bytes=7-".to_string())],
                "failed for case: {:?}",
                shape
            );
        }
    }

    #[tokio::test]
    async fn test_seek_within_bounded_range() {
        let (_client, fs) = mock_fs(BodyShape::PullStream, 1);
        let mut session = fs.open_read(
            "/f.txt",
            ReadOptions {
                start: Some(1),
                length: Some(6),
            },
        );

        session.seek(4);
        let data = session.read(Some(100)).await.unwrap().unwrap();
        assert_eq!(&data[..], b"456");
        assert_eq!(session.read(Some(1)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unbounded_sizes_do_not_overflow() {
        for shape in SHAPES {
            let (_client, fs) = mock_fs(shape, 3);
            let mut session = fs.open_read("/f.txt", ReadOptions::default());

            let head = session.read(Some(2)).await.unwrap().unwrap();
            assert_eq!(&head[..], b"01", "failed for case: {:?}", shape);

            let mut rest = Vec::new();
            while let Some(chunk) = session.read(Some(usize::MAX)).await.unwrap() {
                rest.extend_from_slice(&chunk);
            }
            assert_eq!(rest, b"23456789".to_vec(), "failed for case: {:?}", shape);

            let data = fs
                .read_all(
                    "/f.txt",
                    ReadOptions {
                        start: Some(2),
                        length: Some(u64::MAX),
                    },
                )
                .await
                .unwrap();
            assert_eq!(&data[..], b"23456789", "failed for case: {:?}", shape);
        }
    }

    #[tokio::test]
    async fn test_seek_to_end_is_end_of_stream() {
        for shape in SHAPES {
            let (client, fs) = mock_fs(shape, 4);
            let mut session = fs.open_read("/f.txt", ReadOptions::default());

            session.seek(10);
            assert_eq!(session.read(Some(4)).await.unwrap(), None, "failed for case: {:?}", shape);
            assert_eq!(session.read(None).await.unwrap(), None, "failed for case: {:?}", shape);

            session.seek(25);
            assert_eq!(session.read(None).await.unwrap(), None, "failed for case: {:?}", shape);

            session.seek(8);
            let tail = session.read(None).await.unwrap().unwrap();
            assert_eq!(&tail[..], b"89", "failed for case: {:?}", shape);

            assert_eq!(client.count(MockOp::Get), 3, "failed for case: {:?}", shape);
        }
    }

    #[tokio::test]
    async fn test_read_missing_is_not_found() {
        let (_client, fs) = mock_fs(BodyShape::Blob, 4);
        let mut session = fs.open_read("/nope.txt", ReadOptions::default());

        let err = session.read(None).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
