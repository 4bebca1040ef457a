use std::{sync::Arc, time::Duration};

use futures::{future::BoxFuture, FutureExt};
use tokio::sync::Mutex;
use tracing::{error, info, instrument};

use crate::{
    adapters::{
        s3::S3Config, ListPage, ListRequest, ObjectHead, ObjectStoreClient, PresignCommand,
        StoreError,
    },
    model::fs::{EntryKind, ErrorKind, FSError, HeadOptions, Stats, URLOptions},
};

pub mod key;
pub mod listing;
pub mod read;
pub mod write;

use key::{KeyCodec, SEPARATOR};

/// Default lifetime of a signed URL, in seconds.
pub const DEFAULT_URL_EXPIRES: u64 = 86400;

pub type ClientFactory = Box<
    dyn Fn() -> BoxFuture<'static, Result<Arc<dyn ObjectStoreClient>, StoreError>> + Send + Sync,
>;

/// Outcome of one existence probe.
#[derive(Debug)]
pub enum ProbeOutcome<T> {
    Succeeded(T),
    Failed(StoreError),
    Skipped,
}

impl<T> From<Result<T, StoreError>> for ProbeOutcome<T> {
    fn from(value: Result<T, StoreError>) -> Self {
        match value {
            Ok(v) => ProbeOutcome::Succeeded(v),
            Err(err) => ProbeOutcome::Failed(err),
        }
    }
}

/// Applies file > directory marker > implicit directory precedence. On
/// failure returns the error of the highest-priority probe that was issued.
pub fn settle_probes(
    file_head: ProbeOutcome<ObjectHead>,
    dir_head: ProbeOutcome<ObjectHead>,
    dir_list: ProbeOutcome<ListPage>,
    key: &str,
) -> Result<Stats, StoreError> {
    if let ProbeOutcome::Succeeded(head) = &file_head {
        return Ok(Stats::from_head(head, false));
    }
    if let ProbeOutcome::Succeeded(head) = &dir_head {
        return Ok(Stats::from_head(head, true));
    }
    if let ProbeOutcome::Succeeded(page) = &dir_list {
        if !page.objects.is_empty() || !page.prefixes.is_empty() {
            return Ok(Stats::default());
        }
    }

    match (file_head, dir_head, dir_list) {
        (ProbeOutcome::Failed(err), _, _) => Err(err),
        (_, ProbeOutcome::Failed(err), _) => Err(err),
        (_, _, ProbeOutcome::Failed(err)) => Err(err),
        _ => Err(StoreError::not_found(key)),
    }
}

/// Hierarchical file system view over a flat object store bucket.
pub struct ObjectFS {
    bucket: String,
    codec: KeyCodec,
    factory: ClientFactory,
    client: Mutex<Option<Arc<dyn ObjectStoreClient>>>,
}

impl ObjectFS {
    /// The client is built by `factory` on first use.
    pub fn new(bucket: &str, repository: &str, factory: ClientFactory) -> Result<Self, FSError> {
        let codec = KeyCodec::new(repository);
        if codec.repository().is_empty() {
            return Err(FSError::new(
                ErrorKind::NotSupported,
                repository,
                "/",
                "an empty repository is not supported",
            ));
        }

        Ok(Self {
            bucket: bucket.to_string(),
            codec,
            factory,
            client: Mutex::new(None),
        })
    }

    pub fn with_client(
        bucket: &str,
        repository: &str,
        client: Arc<dyn ObjectStoreClient>,
    ) -> Result<Self, FSError> {
        Self::new(
            bucket,
            repository,
            Box::new(move || {
                let client = client.clone();
                async move { Ok::<_, StoreError>(client) }.boxed()
            }),
        )
    }

    pub fn from_config(config: S3Config) -> Result<Self, FSError> {
        let bucket = config.bucket.clone();
        let repository = config.repository.clone();
        let config = Arc::new(config);

        Self::new(
            &bucket,
            &repository,
            Box::new(move || {
                let config = config.clone();
                async move {
                    let client: Arc<dyn ObjectStoreClient> = Arc::new(config.connect().await);
                    Ok::<_, StoreError>(client)
                }
                .boxed()
            }),
        )
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn repository(&self) -> &str {
        self.codec.repository()
    }

    pub fn codec(&self) -> &KeyCodec {
        &self.codec
    }

    pub fn supports_range_read(&self) -> bool {
        true
    }

    pub fn supports_range_write(&self) -> bool {
        false
    }

    pub(crate) fn error(&self, path: &str, err: StoreError, write: bool) -> FSError {
        let kind = if err.is_not_found() {
            ErrorKind::NotFound
        } else if write {
            ErrorKind::NoModificationAllowed
        } else {
            ErrorKind::NotReadable
        };

        FSError::new(kind, self.codec.repository(), path, err.to_string())
    }

    /// Returns the shared client, building it and ensuring the root marker
    /// exists on first use. Concurrent first callers wait on the same
    /// initialisation.
    pub(crate) async fn client(&self) -> Result<Arc<dyn ObjectStoreClient>, FSError> {
        let mut slot = self.client.lock().await;
        if let Some(client) = slot.as_ref() {
            return Ok(client.clone());
        }

        let client = (self.factory)().await.map_err(|err| {
            error!(error_message=%err, error_group="connect");
            self.error("/", err, false)
        })?;
        self.bootstrap(client.as_ref()).await?;

        *slot = Some(client.clone());
        Ok(client)
    }

    async fn bootstrap(&self, client: &dyn ObjectStoreClient) -> Result<(), FSError> {
        let root = self.codec.to_key("/", true);

        match client.head_object(&self.bucket, &root).await {
            Ok(_) => return Ok(()),
            Err(err) if err.is_not_found() => {
                info!(key = %root, "creating root marker");
            }
            Err(err) => {
                error!(error_message=%err, error_group="head_object", key=%root);
                return Err(self.error("/", err, false));
            }
        }

        client
            .put_object(&self.bucket, &root, bytes::Bytes::new(), None)
            .await
            .map_err(|err| {
                error!(error_message=%err, error_group="put_object", key=%root);
                self.error("/", err, true)
            })
    }

    /// Releases the client; the next operation builds a new one.
    #[instrument(skip(self), fields(context = "dispose"))]
    pub async fn dispose(&self) {
        info!("called");
        self.client.lock().await.take();
    }

    pub async fn get_stats(&self, path: &str) -> Result<Stats, FSError> {
        self.get_stats_with(path, HeadOptions::default()).await
    }

    #[instrument(skip(self), fields(context = "head"))]
    pub async fn get_stats_with(&self, path: &str, options: HeadOptions) -> Result<Stats, FSError> {
        info!("called");

        let client = self.client().await?;
        let probe_file = options.kind != Some(EntryKind::Directory);
        let probe_dir = options.kind != Some(EntryKind::File);

        let file_key = self.codec.to_key(path, false);
        let dir_key = self.codec.to_key(path, true);

        let file_head = async {
            if probe_file {
                ProbeOutcome::from(client.head_object(&self.bucket, &file_key).await)
            } else {
                ProbeOutcome::Skipped
            }
        };
        let dir_head = async {
            if probe_dir {
                ProbeOutcome::from(client.head_object(&self.bucket, &dir_key).await)
            } else {
                ProbeOutcome::Skipped
            }
        };
        let dir_list = async {
            if probe_dir {
                let request = ListRequest {
                    prefix: dir_key.clone(),
                    delimiter: Some(SEPARATOR.to_string()),
                    continuation_token: None,
                    max_keys: Some(1),
                };
                ProbeOutcome::from(client.list_objects_v2(&self.bucket, request).await)
            } else {
                ProbeOutcome::Skipped
            }
        };

        let (file_head, dir_head, dir_list) = futures::join!(file_head, dir_head, dir_list);

        settle_probes(file_head, dir_head, dir_list, &file_key).map_err(|err| {
            if !err.is_not_found() {
                error!(error_message=%err, error_group="head_object");
            }
            self.error(path, err, false)
        })
    }

    #[instrument(skip(self), fields(context = "mkdir"))]
    pub async fn make_directory(&self, path: &str) -> Result<(), FSError> {
        info!("called");

        let client = self.client().await?;
        let key = self.codec.to_key(path, true);
        client
            .put_object(&self.bucket, &key, bytes::Bytes::new(), None)
            .await
            .map_err(|err| {
                error!(error_message=%err, error_group="put_object");
                self.error(path, err, true)
            })
    }

    #[instrument(skip(self), fields(context = "rmdir"))]
    pub async fn remove_directory(&self, path: &str) -> Result<(), FSError> {
        info!("called");
        self.delete(path, true).await
    }

    #[instrument(skip(self), fields(context = "rm"))]
    pub async fn remove_file(&self, path: &str) -> Result<(), FSError> {
        info!("called");
        self.delete(path, false).await
    }

    async fn delete(&self, path: &str, is_directory: bool) -> Result<(), FSError> {
        let client = self.client().await?;
        let key = self.codec.to_key(path, is_directory);
        client.delete_object(&self.bucket, &key).await.map_err(|err| {
            error!(error_message=%err, error_group="delete_object");
            self.error(path, err, true)
        })
    }

    /// Replaces the user metadata of an object by copying it onto itself.
    /// `props` without a size addresses the directory marker.
    #[instrument(skip(self, props), fields(context = "patch"))]
    pub async fn patch_metadata(&self, path: &str, props: &Stats) -> Result<(), FSError> {
        info!(props = props.props.len(), "called");

        let client = self.client().await?;
        let key = self.codec.to_key(path, props.size.is_none());
        client
            .copy_object(&self.bucket, &key, &key, props.metadata())
            .await
            .map_err(|err| {
                error!(error_message=%err, error_group="copy_object");
                self.error(path, err, true)
            })
    }

    #[instrument(skip(self), fields(context = "to_url"))]
    pub async fn to_url(&self, path: &str, options: &URLOptions) -> Result<String, FSError> {
        info!("called");

        let url_type = options
            .url_type
            .as_deref()
            .unwrap_or("GET")
            .to_ascii_uppercase();
        let command = match url_type.as_str() {
            "GET" => PresignCommand::Get,
            "PUT" | "POST" => PresignCommand::Put,
            "DELETE" => PresignCommand::Delete,
            other => {
                return Err(FSError::new(
                    ErrorKind::NotSupported,
                    self.codec.repository(),
                    path,
                    format!("\"{}\" is not supported", other),
                ))
            }
        };
        let expires = Duration::from_secs(options.expires.unwrap_or(DEFAULT_URL_EXPIRES));

        let client = self.client().await?;
        let key = self.codec.to_key(path, false);
        client
            .presign(&self.bucket, &key, command, expires)
            .await
            .map_err(|err| {
                error!(error_message=%err, error_group="presign");
                self.error(path, err, false)
            })
    }
}
