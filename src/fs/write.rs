use tracing::{debug, error, info, instrument};

use crate::{
    fs::ObjectFS,
    model::{
        fs::{EntryKind, FSError, HeadOptions, Stats, WriteOptions},
        payload::Payload,
    },
};

/// Buffers payloads for one object and uploads them on `close`. Nothing
/// reaches the store before then.
pub struct WriteSession<'a> {
    fs: &'a ObjectFS,
    path: String,
    options: WriteOptions,
    previous: Option<Stats>,
    queued: Vec<Payload>,
}

impl WriteSession<'_> {
    pub fn previous(&self) -> Option<&Stats> {
        self.previous.as_ref()
    }

    pub fn write(&mut self, payload: impl Into<Payload>) {
        self.queued.push(payload.into());
    }

    /// Merges the queued payloads and saves them as the object's content.
    pub async fn close(self) -> Result<(), FSError> {
        let payload = Payload::merge(self.queued);
        self.fs
            .save(&self.path, payload, self.previous.as_ref(), self.options)
            .await
    }
}

impl ObjectFS {
    /// Resolves the current file at `path` and opens a session over it. A
    /// missing file is an error only when `options.create` is false.
    #[instrument(skip(self), fields(context = "open_write"))]
    pub async fn open_write(
        &self,
        path: &str,
        options: WriteOptions,
    ) -> Result<WriteSession<'_>, FSError> {
        info!("called");

        let head = HeadOptions {
            kind: Some(EntryKind::File),
        };
        let previous = match self.get_stats_with(path, head).await {
            Ok(stats) => Some(stats),
            Err(err) if err.is_not_found() && options.create => None,
            Err(err) => return Err(err),
        };

        Ok(WriteSession {
            fs: self,
            path: path.to_string(),
            options,
            previous,
            queued: Vec::new(),
        })
    }

    /// Writes `payload` to the file at `path`. With `append`, the existing
    /// content is fetched and prefixed. Stream bodies go through a multipart
    /// upload, bounded ones through a single PUT. Custom props of `previous`
    /// are carried onto the new object.
    #[instrument(skip(self, payload, previous), fields(context = "save"))]
    pub async fn save(
        &self,
        path: &str,
        payload: Payload,
        previous: Option<&Stats>,
        options: WriteOptions,
    ) -> Result<(), FSError> {
        info!(shape = ?payload.shape(), append = options.append, "called");

        let client = self.client().await?;
        let key = self.codec.to_key(path, false);

        let has_content = previous.is_some_and(|stats| stats.size != Some(0));
        let body = if options.append && has_content {
            let existing = self
                .fetch(client.as_ref(), path, None)
                .await
                .map_err(|err| self.error(path, err, true))?;
            debug!(existing = ?existing.shape(), "appending");
            Payload::merge(vec![existing, payload])
        } else {
            payload
        };

        let metadata = previous.map(Stats::metadata);

        let result = if body.is_stream() {
            client
                .multipart_upload(&self.bucket, &key, body.into_stream(), metadata)
                .await
        } else {
            match body.into_bytes().await {
                Ok(bytes) => {
                    client
                        .put_object(&self.bucket, &key, bytes, metadata)
                        .await
                }
                Err(err) => Err(err),
            }
        };

        result.map_err(|err| {
            error!(error_message=%err, error_group="put_object");
            self.error(path, err, true)
        })
    }
}
