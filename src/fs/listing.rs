use tracing::{debug, error, info, instrument};

use crate::{
    adapters::{ListPage, ListRequest},
    fs::{
        key::{join_paths, SEPARATOR},
        ObjectFS,
    },
    model::fs::{Entry, EntryKind, FSError},
};

/// Appends the immediate children found in `page` to `entries`. `prefix` is
/// the directory key that was listed; it never yields itself as a child.
pub fn extract_children(page: &ListPage, prefix: &str, entries: &mut Vec<Entry>) {
    for common in &page.prefixes {
        if common == prefix {
            continue;
        }
        let rest = common.strip_prefix(prefix).unwrap_or(common);
        if let Some(name) = rest.split(SEPARATOR).filter(|s| !s.is_empty()).last() {
            entries.push(Entry {
                name: name.to_string(),
                kind: EntryKind::Directory,
            });
        }
    }

    for object in &page.objects {
        if object.key == prefix {
            continue;
        }
        let rest = object.key.strip_prefix(prefix).unwrap_or(&object.key);
        match rest.split(SEPARATOR).last() {
            Some(name) if !name.is_empty() => entries.push(Entry {
                name: name.to_string(),
                kind: EntryKind::File,
            }),
            _ => {}
        }
    }
}

impl ObjectFS {
    /// Child paths of the directory at `path`; subdirectories end with `/`.
    pub async fn list_children(&self, path: &str) -> Result<Vec<String>, FSError> {
        let entries = self.list_entries(path).await?;

        Ok(entries
            .into_iter()
            .map(|entry| {
                let child = join_paths(path, &entry.name);
                match entry.kind {
                    EntryKind::Directory => format!("{}{}", child, SEPARATOR),
                    EntryKind::File => child,
                }
            })
            .collect())
    }

    /// Walks every page of the delimited listing under `path` in store order.
    /// A directory that was never created lists as empty.
    #[instrument(skip(self), fields(context = "list"))]
    pub async fn list_entries(&self, path: &str) -> Result<Vec<Entry>, FSError> {
        info!("called");

        let client = self.client().await?;
        let prefix = self.codec.to_key(path, true);

        let mut entries = Vec::new();
        let mut continuation_token: Option<String> = None;
        let mut first_page = true;

        loop {
            let request = ListRequest {
                prefix: prefix.clone(),
                delimiter: Some(SEPARATOR.to_string()),
                continuation_token: continuation_token.take(),
                max_keys: None,
            };

            let page = match client.list_objects_v2(&self.bucket, request).await {
                Ok(page) => page,
                Err(err) if first_page && err.is_not_found() => {
                    debug!(prefix = %prefix, "listing not found, treating as empty");
                    return Ok(entries);
                }
                Err(err) => {
                    error!(error_message=%err, error_group="list_objects");
                    return Err(self.error(path, err, false));
                }
            };
            first_page = false;

            extract_children(&page, &prefix, &mut entries);

            if !page.truncated {
                break;
            }
            continuation_token = page.next_token;
            if continuation_token.is_none() {
                break;
            }
        }

        Ok(entries)
    }
}
