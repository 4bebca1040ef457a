use std::{
    collections::HashMap,
    time::{Duration, SystemTime},
};

use aws_sdk_s3::{
    config::Region,
    error::{DisplayErrorContext, ProvideErrorMetadata, SdkError},
    presigning::PresigningConfig,
    primitives::{ByteStream as SdkByteStream, DateTime},
    types::{CompletedMultipartUpload, CompletedPart, MetadataDirective},
};
use bytes::Bytes;
use futures::StreamExt;
use tracing::{info, warn};

use crate::{
    adapters::{
        split_parts, ListPage, ListRequest, ObjectHead, ObjectStoreClient, ObjectSummary,
        PresignCommand, StoreError, StoreFuture,
    },
    model::payload::{ByteStream, Payload},
};

/// Minimum part size accepted by S3 for every part but the last.
pub const PART_SIZE: usize = 5 * 1024 * 1024;

/// Connection settings for an S3-compatible endpoint.
#[derive(Clone, Debug, Default)]
pub struct S3Config {
    pub bucket: String,
    pub repository: String,
    pub region: Option<String>,
    pub endpoint_url: Option<String>,
    pub force_path_style: bool,
}

impl S3Config {
    /// Loads credentials from the environment and builds a client.
    pub async fn connect(&self) -> aws_sdk_s3::Client {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = &self.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(endpoint_url) = &self.endpoint_url {
            loader = loader.endpoint_url(endpoint_url);
        }
        let sdk_config = loader.load().await;

        let config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(self.force_path_style)
            .build();

        info!(
            bucket = %self.bucket,
            endpoint_url = ?self.endpoint_url,
            "s3 client constructed"
        );

        aws_sdk_s3::Client::from_conf(config)
    }
}

fn store_error<E>(op: &str, key: &str, err: SdkError<E>) -> StoreError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    StoreError {
        status: err.raw_response().map(|r| r.status().as_u16()),
        code: err.code().map(str::to_string),
        message: format!("failed to {} at: {}, {}", op, key, DisplayErrorContext(&err)),
    }
}

fn to_system_time(dt: Option<&DateTime>) -> Option<SystemTime> {
    dt.map(|dt| SystemTime::UNIX_EPOCH + Duration::new(dt.secs().max(0) as u64, dt.subsec_nanos()))
}

impl ObjectStoreClient for aws_sdk_s3::Client {
    fn head_object<'a>(&'a self, bucket: &'a str, key: &'a str) -> StoreFuture<'a, ObjectHead> {
        Box::pin(async move {
            let ho = self
                .head_object()
                .bucket(bucket)
                .key(key)
                .send()
                .await
                .map_err(|err| store_error("head_object", key, err))?;

            Ok(ObjectHead {
                size: ho.content_length().unwrap_or(0).max(0) as u64,
                modified: to_system_time(ho.last_modified()),
                etag: ho.e_tag().map(str::to_string),
                metadata: ho.metadata().cloned().unwrap_or_default(),
            })
        })
    }

    fn get_object<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        range: Option<String>,
    ) -> StoreFuture<'a, Payload> {
        Box::pin(async move {
            let o = self
                .get_object()
                .bucket(bucket)
                .key(key)
                .set_range(range)
                .send()
                .await
                .map_err(|err| store_error("get_object", key, err))?;

            let key = key.to_string();
            let body = futures::stream::try_unfold(o.body, move |mut body| {
                let key = key.clone();
                async move {
                    let chunk = body.try_next().await.map_err(|err| {
                        StoreError::new(format!("failed to collect body: {}, {}", key, err))
                    })?;
                    Ok(chunk.map(|c| (c, body)))
                }
            });

            Ok(Payload::pull(body))
        })
    }

    fn put_object<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        body: Bytes,
        metadata: Option<HashMap<String, String>>,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let length = body.len() as i64;
            self.put_object()
                .bucket(bucket)
                .key(key)
                .content_length(length)
                .body(SdkByteStream::from(body))
                .set_metadata(metadata)
                .send()
                .await
                .map_err(|err| store_error("put_object", key, err))?;

            Ok(())
        })
    }

    fn delete_object<'a>(&'a self, bucket: &'a str, key: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.delete_object()
                .bucket(bucket)
                .key(key)
                .send()
                .await
                .map_err(|err| store_error("delete_object", key, err))?;

            Ok(())
        })
    }

    fn list_objects_v2<'a>(
        &'a self,
        bucket: &'a str,
        request: ListRequest,
    ) -> StoreFuture<'a, ListPage> {
        Box::pin(async move {
            let lo = self
                .list_objects_v2()
                .bucket(bucket)
                .prefix(&request.prefix)
                .set_delimiter(request.delimiter)
                .set_continuation_token(request.continuation_token)
                .set_max_keys(request.max_keys)
                .send()
                .await
                .map_err(|err| store_error("list_objects", &request.prefix, err))?;

            let prefixes = lo
                .common_prefixes()
                .iter()
                .filter_map(|cp| cp.prefix().map(str::to_string))
                .collect();

            let objects = lo
                .contents()
                .iter()
                .map(|o| ObjectSummary {
                    key: o.key().unwrap_or("").to_string(),
                    size: o.size().unwrap_or(0).max(0) as u64,
                    modified: to_system_time(o.last_modified()),
                })
                .collect();

            Ok(ListPage {
                prefixes,
                objects,
                truncated: lo.is_truncated().unwrap_or(false),
                next_token: lo.next_continuation_token().map(str::to_string),
            })
        })
    }

    fn copy_object<'a>(
        &'a self,
        bucket: &'a str,
        src_key: &'a str,
        dst_key: &'a str,
        metadata: HashMap<String, String>,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.copy_object()
                .bucket(bucket)
                .copy_source(format!("{}/{}", bucket, src_key))
                .key(dst_key)
                .metadata_directive(MetadataDirective::Replace)
                .set_metadata(Some(metadata))
                .send()
                .await
                .map_err(|err| store_error("copy_object", dst_key, err))?;

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
            let config = PresigningConfig::expires_in(expires_in).map_err(|err| {
                StoreError::new(format!("failed to presign at: {}, {}", key, err))
            })?;

            let req = match command {
                PresignCommand::Get => self
                    .get_object()
                    .bucket(bucket)
                    .key(key)
                    .presigned(config)
                    .await
                    .map_err(|err| store_error("presign get_object", key, err))?,
                PresignCommand::Put => self
                    .put_object()
                    .bucket(bucket)
                    .key(key)
                    .presigned(config)
                    .await
                    .map_err(|err| store_error("presign put_object", key, err))?,
                PresignCommand::Delete => self
                    .delete_object()
                    .bucket(bucket)
                    .key(key)
                    .presigned(config)
                    .await
                    .map_err(|err| store_error("presign delete_object", key, err))?,
            };

            Ok(req.uri().to_string())
        })
    }

    fn multipart_upload<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        body: ByteStream,
        metadata: Option<HashMap<String, String>>,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mu = self
                .create_multipart_upload()
                .bucket(bucket)
                .key(key)
                .set_metadata(metadata)
                .send()
                .await
                .map_err(|err| store_error("create_multipart_upload", key, err))?;

            let upload_id = mu
                .upload_id()
                .ok_or_else(|| StoreError::new(format!("missing upload id for: {}", key)))?
                .to_string();

            match upload_parts(self, bucket, key, &upload_id, body).await {
                Ok(parts) => {
                    let manifest = CompletedMultipartUpload::builder()
                        .set_parts(Some(parts))
                        .build();

                    self.complete_multipart_upload()
                        .bucket(bucket)
                        .key(key)
                        .upload_id(&upload_id)
                        .multipart_upload(manifest)
                        .send()
                        .await
                        .map_err(|err| store_error("complete_multipart_upload", key, err))?;

                    Ok(())
                }
                Err(err) => {
                    if let Err(abort_err) = self
                        .abort_multipart_upload()
                        .bucket(bucket)
                        .key(key)
                        .upload_id(&upload_id)
                        .send()
                        .await
                    {
                        warn!(
                            error_message = %DisplayErrorContext(&abort_err),
                            error_group = "abort_multipart_upload",
                            key = key
                        );
                    }
                    Err(err)
                }
            }
        })
    }
}

async fn upload_parts(
    client: &aws_sdk_s3::Client,
    bucket: &str,
    key: &str,
    upload_id: &str,
    body: ByteStream,
) -> Result<Vec<CompletedPart>, StoreError> {
    let mut parts = Vec::new();
    let mut pending = split_parts(body, PART_SIZE);

    while let Some(part) = pending.next().await {
        let part = part?;
        let part_number = parts.len() as i32 + 1;

        let up = client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(SdkByteStream::from(part))
            .send()
            .await
            .map_err(|err| store_error("upload_part", key, err))?;

        parts.push(
            CompletedPart::builder()
                .set_e_tag(up.e_tag().map(str::to_string))
                .part_number(part_number)
                .build(),
        );
    }

    Ok(parts)
}
