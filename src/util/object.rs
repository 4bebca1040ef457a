use crate::model::fs::{ErrorKind, FSError};

const SCHEME: &str = "s3://";

/// Splits `s3://bucket/repository` into its bucket and repository parts.
/// The repository may contain further separators.
pub fn parse_bucket_uri(bucket_uri: &str) -> Result<(String, String), FSError> {
    let invalid = |message: &str| {
        FSError::new(
            ErrorKind::NotSupported,
            "",
            bucket_uri,
            format!("failed to parse {}: {}", bucket_uri, message),
        )
    };

    let rest = bucket_uri
        .strip_prefix(SCHEME)
        .ok_or_else(|| invalid("only s3:// is supported"))?;

    let (bucket, repository) = rest.split_once('/').unwrap_or((rest, ""));
    let repository = repository.trim_matches('/');

    return if bucket.is_empty() {
        Err(invalid("missing bucket"))
    } else if repository.is_empty() {
        Err(invalid("missing repository"))
    } else {
        Ok((bucket.to_string(), repository.to_string()))
    };
}
