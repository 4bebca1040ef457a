use std::time::SystemTime;

use bucketfs::{
    util::object::parse_bucket_uri, EntryKind, FSError, HeadOptions, ObjectFS, Payload,
    ReadOptions, S3Config, Stats, StoreError, URLOptions, WriteOptions,
};
use bytes::{Bytes, BytesMut};
use clap::{Parser, Subcommand};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{info, instrument};

const STDIN_CHUNK: usize = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Fs(#[from] FSError),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid property: {0}, expected KEY=VALUE")]
    InvalidProp(String),
}

#[derive(Debug, Parser)]
#[command(name = "bucketfs", version, about = "File system operations over an S3 bucket")]
pub struct Args {
    /// Repository location, e.g. s3://bucket/repository
    pub uri: String,

    #[arg(long)]
    pub region: Option<String>,

    /// Custom endpoint for S3-compatible stores
    #[arg(long)]
    pub endpoint_url: Option<String>,

    /// Address the bucket in the path instead of the host name
    #[arg(long)]
    pub path_style: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print the stats of a file or directory
    Stat {
        path: String,
        /// Only look for a file (`file`) or a directory (`dir`)
        #[arg(long, value_parser = parse_kind)]
        kind: Option<EntryKind>,
    },
    /// List the children of a directory
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },
    /// Write a file, or a byte range of it, to stdout
    Cat {
        path: String,
        #[arg(long)]
        start: Option<u64>,
        #[arg(long)]
        length: Option<u64>,
    },
    /// Upload a local file, or stdin with `-`
    Put {
        path: String,
        source: String,
        #[arg(long)]
        append: bool,
        /// Fail if the file does not exist yet
        #[arg(long)]
        no_create: bool,
    },
    Mkdir {
        path: String,
    },
    Rmdir {
        path: String,
    },
    Rm {
        path: String,
    },
    /// Set custom properties, replacing the existing ones
    Patch {
        path: String,
        #[arg(required = true)]
        props: Vec<String>,
    },
    /// Print a pre-signed URL
    Url {
        path: String,
        #[arg(long)]
        method: Option<String>,
        #[arg(long)]
        expires: Option<u64>,
    },
}

fn parse_kind(value: &str) -> Result<EntryKind, String> {
    match value {
        "file" => Ok(EntryKind::File),
        "dir" | "directory" => Ok(EntryKind::Directory),
        other => Err(format!("unknown kind: {}", other)),
    }
}

pub fn parse_prop(prop: &str) -> Result<(String, String), CliError> {
    match prop.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(CliError::InvalidProp(prop.to_string())),
    }
}

fn format_modified(modified: Option<SystemTime>) -> String {
    modified
        .and_then(|m| OffsetDateTime::from(m).format(&Rfc3339).ok())
        .unwrap_or_else(|| "-".to_string())
}

pub fn format_stats(path: &str, stats: &Stats) -> String {
    let mut lines = vec![
        format!("path: {}", path),
        format!(
            "type: {}",
            if stats.is_file() { "file" } else { "directory" }
        ),
    ];
    if let Some(size) = stats.size {
        lines.push(format!("size: {}", size));
    }
    lines.push(format!("modified: {}", format_modified(stats.modified)));
    if let Some(etag) = &stats.etag {
        lines.push(format!("etag: {}", etag));
    }
    for (key, value) in &stats.props {
        lines.push(format!("{}: {}", key, value));
    }
    lines.join("\n")
}

fn stdin_payload() -> Payload {
    let stream = futures::stream::unfold(Some(tokio::io::stdin()), |stdin| async move {
        let mut stdin = stdin?;
        let mut buf = BytesMut::with_capacity(STDIN_CHUNK);
        match stdin.read_buf(&mut buf).await {
            Ok(0) => None,
            Ok(_) => Some((Ok(buf.freeze()), Some(stdin))),
            Err(err) => Some((
                Err(StoreError::new(format!("failed to read stdin: {}", err))),
                None,
            )),
        }
    });
    Payload::pull(stream)
}

pub async fn run(args: Args) -> Result<(), CliError> {
    let (bucket, repository) = parse_bucket_uri(&args.uri)?;
    let config = S3Config {
        bucket,
        repository,
        region: args.region,
        endpoint_url: args.endpoint_url,
        force_path_style: args.path_style,
    };

    let fs = ObjectFS::from_config(config)?;
    let result = execute(&fs, args.command).await;
    fs.dispose().await;
    result
}

#[instrument(skip(fs, command), fields(context = "cli"))]
async fn execute(fs: &ObjectFS, command: Command) -> Result<(), CliError> {
    info!(command = ?command, "called");

    match command {
        Command::Stat { path, kind } => {
            let stats = fs.get_stats_with(&path, HeadOptions { kind }).await?;
            println!("{}", format_stats(&path, &stats));
        }
        Command::Ls { path } => {
            for child in fs.list_children(&path).await? {
                println!("{}", child);
            }
        }
        Command::Cat {
            path,
            start,
            length,
        } => {
            let mut stdout = tokio::io::stdout();
            let mut session = fs.open_read(&path, ReadOptions { start, length });
            while let Some(chunk) = session.read(None).await? {
                stdout.write_all(&chunk).await?;
            }
            session.close();
            stdout.flush().await?;
        }
        Command::Put {
            path,
            source,
            append,
            no_create,
        } => {
            let options = WriteOptions {
                append,
                create: !no_create,
            };
            let payload = if source == "-" {
                stdin_payload()
            } else {
                Payload::from(Bytes::from(tokio::fs::read(&source).await?))
            };

            let mut session = fs.open_write(&path, options).await?;
            session.write(payload);
            session.close().await?;
        }
        Command::Mkdir { path } => fs.make_directory(&path).await?,
        Command::Rmdir { path } => fs.remove_directory(&path).await?,
        Command::Rm { path } => fs.remove_file(&path).await?,
        Command::Patch { path, props } => {
            let mut stats = fs.get_stats(&path).await?;
            stats.props.clear();
            for prop in &props {
                let (key, value) = parse_prop(prop)?;
                stats.props.insert(key, value);
            }
            fs.patch_metadata(&path, &stats).await?;
        }
        Command::Url {
            path,
            method,
            expires,
        } => {
            let options = URLOptions {
                url_type: method,
                expires,
            };
            println!("{}", fs.to_url(&path, &options).await?);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    #[test]
    fn test_parse_prop() {
        let cases = vec![
            ("owner=alice", Some(("owner", "alice"))),
            ("empty=", Some(("empty", ""))),
            ("eq=a=b", Some(("eq", "a=b"))),
            ("=value", None),
            ("novalue", None),
        ];

        for (prop, expected) in cases {
            let result = parse_prop(prop).ok();
            let expected = expected.map(|(k, v)| (k.to_string(), v.to_string()));
            assert_eq!(result, expected, "failed for case: {}", prop);
        }
    }

    #[test]
    fn test_parse_args() {
        let args = Args::try_parse_from([
            "bucketfs",
            "s3://bucket/repo",
            "--path-style",
            "cat",
            "/a.txt",
            "--start",
            "4",
        ])
        .unwrap();

        assert!(args.path_style);
        assert!(matches!(
            args.command,
            Command::Cat {
                start: Some(4),
                length: None,
                ..
            }
        ));

        let args = Args::try_parse_from(["bucketfs", "s3://bucket/repo", "stat", "/d", "--kind", "dir"])
            .unwrap();
        assert!(matches!(
            args.command,
            Command::Stat {
                kind: Some(EntryKind::Directory),
                ..
            }
        ));

        assert!(Args::try_parse_from(["bucketfs", "s3://bucket/repo", "patch", "/a"]).is_err());
    }

    #[test]
    fn test_format_stats() {
        let stats = Stats {
            size: Some(3),
            modified: Some(SystemTime::UNIX_EPOCH),
            etag: Some("\"e\"".to_string()),
            props: BTreeMap::from([("owner".to_string(), "alice".to_string())]),
        };

        let out = format_stats("/a.txt", &stats);

        assert_eq!(
            out,
            "path: /a.txt\ntype: file\nsize: 3\nmodified: 1970-01-01T00:00:00Z\netag: \"e\"\nowner: alice"
        );
        assert!(format_stats("/d", &Stats::default()).contains("type: directory"));
    }
}
