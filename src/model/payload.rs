use std::fmt;

use bytes::{Bytes, BytesMut};
use futures::{stream::BoxStream, StreamExt, TryStreamExt};
use tokio::sync::mpsc;

use crate::adapters::StoreError;

pub type ByteStream = BoxStream<'static, Result<Bytes, StoreError>>;

const PUSH_CHANNEL_CAPACITY: usize = 16;

/// Representation of a payload, ordered from most to least memory-bounded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Shape {
    Bounded,
    Blob,
    PushStream,
    PullStream,
}

impl Shape {
    pub fn is_stream(self) -> bool {
        matches!(self, Shape::PushStream | Shape::PullStream)
    }
}

/// Immutable, sliceable body handle.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Blob {
    data: Bytes,
}

impl Blob {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns `[start, end)` clamped to the blob bounds.
    pub fn slice(&self, start: usize, end: usize) -> Bytes {
        let end = end.min(self.data.len());
        let start = start.min(end);
        self.data.slice(start..end)
    }

    pub fn bytes(&self) -> Bytes {
        self.data.clone()
    }
}

/// Event observed by a push stream subscriber.
#[derive(Debug)]
pub enum PushEvent {
    Readable(Bytes),
    Error(StoreError),
    End,
}

/// Producer half of a push stream. Dropping it signals end of stream.
#[derive(Clone, Debug)]
pub struct PushSender {
    tx: mpsc::Sender<Result<Bytes, StoreError>>,
}

impl PushSender {
    /// Returns false once the subscriber has gone away.
    pub async fn send(&self, chunk: Bytes) -> bool {
        self.tx.send(Ok(chunk)).await.is_ok()
    }

    pub async fn fail(&self, err: StoreError) {
        let _ = self.tx.send(Err(err)).await;
    }
}

/// Push-based byte source: the producer emits chunks at its own pace and the
/// subscriber is woken once per chunk.
#[derive(Debug)]
pub struct PushStream {
    rx: mpsc::Receiver<Result<Bytes, StoreError>>,
}

pub fn push_channel() -> (PushSender, PushStream) {
    let (tx, rx) = mpsc::channel(PUSH_CHANNEL_CAPACITY);
    (PushSender { tx }, PushStream { rx })
}

impl PushStream {
    pub async fn next_event(&mut self) -> PushEvent {
        match self.rx.recv().await {
            Some(Ok(chunk)) => PushEvent::Readable(chunk),
            Some(Err(err)) => PushEvent::Error(err),
            None => PushEvent::End,
        }
    }

    /// Stops the producer; pending chunks are discarded.
    pub fn destroy(&mut self) {
        self.rx.close();
    }

    pub fn into_stream(self) -> ByteStream {
        futures::stream::unfold(self.rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed()
    }
}

/// A read or write body.
pub enum Payload {
    Bounded(Bytes),
    Blob(Blob),
    PullStream(ByteStream),
    PushStream(PushStream),
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Bounded(b) => f.debug_tuple("Bounded").field(&b.len()).finish(),
            Payload::Blob(b) => f.debug_tuple("Blob").field(&b.len()).finish(),
            Payload::PullStream(_) => f.write_str("PullStream"),
            Payload::PushStream(_) => f.write_str("PushStream"),
        }
    }
}

impl Default for Payload {
    fn default() -> Self {
        Payload::Bounded(Bytes::new())
    }
}

impl From<Bytes> for Payload {
    fn from(value: Bytes) -> Self {
        Payload::Bounded(value)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(value: Vec<u8>) -> Self {
        Payload::Bounded(value.into())
    }
}

impl From<&'static str> for Payload {
    fn from(value: &'static str) -> Self {
        Payload::Bounded(Bytes::from_static(value.as_bytes()))
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Payload::Bounded(value.into())
    }
}

impl From<Blob> for Payload {
    fn from(value: Blob) -> Self {
        Payload::Blob(value)
    }
}

impl From<PushStream> for Payload {
    fn from(value: PushStream) -> Self {
        Payload::PushStream(value)
    }
}

impl Payload {
    pub fn pull(stream: impl futures::Stream<Item = Result<Bytes, StoreError>> + Send + 'static) -> Self {
        Payload::PullStream(stream.boxed())
    }

    pub fn shape(&self) -> Shape {
        match self {
            Payload::Bounded(_) => Shape::Bounded,
            Payload::Blob(_) => Shape::Blob,
            Payload::PushStream(_) => Shape::PushStream,
            Payload::PullStream(_) => Shape::PullStream,
        }
    }

    pub fn is_stream(&self) -> bool {
        self.shape().is_stream()
    }

    /// Exact byte length, known only for bounded representations.
    pub fn len(&self) -> Option<u64> {
        match self {
            Payload::Bounded(b) => Some(b.len() as u64),
            Payload::Blob(b) => Some(b.len() as u64),
            Payload::PullStream(_) | Payload::PushStream(_) => None,
        }
    }

    pub fn into_stream(self) -> ByteStream {
        match self {
            Payload::Bounded(b) => futures::stream::iter(non_empty(b)).boxed(),
            Payload::Blob(b) => futures::stream::iter(non_empty(b.bytes())).boxed(),
            Payload::PullStream(s) => s,
            Payload::PushStream(s) => s.into_stream(),
        }
    }

    /// Drains the payload into a single buffer.
    pub async fn into_bytes(self) -> Result<Bytes, StoreError> {
        match self {
            Payload::Bounded(b) => Ok(b),
            Payload::Blob(b) => Ok(b.bytes()),
            other => {
                let buf = other
                    .into_stream()
                    .try_fold(BytesMut::new(), |mut acc, chunk| async move {
                        acc.extend_from_slice(&chunk);
                        Ok(acc)
                    })
                    .await?;
                Ok(buf.freeze())
            }
        }
    }

    /// Concatenates `parts` in order. The least memory-bounded shape present
    /// decides the result: pull stream, then push stream, then blob, then
    /// buffer. Stream results are produced lazily.
    ///
    /// Merging into a push stream spawns a forwarding task, so it must be
    /// called from within a tokio runtime.
    pub fn merge(parts: Vec<Payload>) -> Payload {
        let shape = parts.iter().map(Payload::shape).max().unwrap_or(Shape::Bounded);
        match shape {
            Shape::PullStream => Payload::PullStream(
                futures::stream::iter(parts)
                    .map(Payload::into_stream)
                    .flatten()
                    .boxed(),
            ),
            Shape::PushStream => {
                let (tx, rx) = push_channel();
                tokio::spawn(async move {
                    for part in parts {
                        let mut stream = part.into_stream();
                        while let Some(item) = stream.next().await {
                            match item {
                                Ok(chunk) => {
                                    if !tx.send(chunk).await {
                                        return;
                                    }
                                }
                                Err(err) => {
                                    tx.fail(err).await;
                                    return;
                                }
                            }
                        }
                    }
                });
                Payload::PushStream(rx)
            }
            Shape::Blob => Payload::Blob(Blob::new(concat_bounded(parts))),
            Shape::Bounded => Payload::Bounded(concat_bounded(parts)),
        }
    }
}

fn non_empty(b: Bytes) -> Option<Result<Bytes, StoreError>> {
    if b.is_empty() {
        None
    } else {
        Some(Ok(b))
    }
}

// Only called when every part is bounded or a blob.
fn concat_bounded(parts: Vec<Payload>) -> Bytes {
    let mut iter = parts.into_iter();
    let first = match iter.next() {
        None => return Bytes::new(),
        Some(Payload::Bounded(b)) => b,
        Some(Payload::Blob(b)) => b.bytes(),
        Some(_) => Bytes::new(),
    };

    let mut rest = iter.peekable();
    if rest.peek().is_none() {
        return first;
    }

    let mut buf = BytesMut::from(&first[..]);
    for part in rest {
        match part {
            Payload::Bounded(b) => buf.extend_from_slice(&b),
            Payload::Blob(b) => buf.extend_from_slice(&b.bytes()),
            Payload::PullStream(_) | Payload::PushStream(_) => {}
        }
    }

    buf.freeze()
}
