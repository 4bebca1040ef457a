//! File system view over an S3 bucket: directories are prefixes under a
//! repository key, optionally marked by zero-length `dir/` objects.

pub mod adapters;
pub mod fs;
pub mod model;
pub mod util;

pub use adapters::{s3::S3Config, ObjectStoreClient, StoreError};
pub use fs::{read::ReadSession, write::WriteSession, ObjectFS};
pub use model::{
    fs::{
        Entry, EntryKind, ErrorKind, FSError, HeadOptions, ReadOptions, Stats, URLOptions,
        WriteOptions,
    },
    payload::{Blob, Payload, PushSender, PushStream},
};
