//! Object storage used for deployment payloads.
//!
//! The publish pipeline only needs three operations: write one object,
//! list a prefix, delete a batch of keys. `ObjectStore` is that contract;
//! `DiskObjectStore` backs it with a local directory and `S3ObjectStore`
//! with any S3-compatible service.

pub mod disk;
pub mod s3;

use async_trait::async_trait;
use bytes::Bytes;
use std::io;
use thiserror::Error;

pub use disk::DiskObjectStore;
pub use s3::S3ObjectStore;

const MAX_OBJECT_KEY_LEN: usize = 1024;

/// Key and size of a stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEntry {
    pub key: String,
    pub size: u64,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid object key `{0}`")]
    InvalidKey(String),
    #[error("invalid bucket name `{0}`")]
    InvalidBucket(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Backend(#[from] object_store::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write `body` under `key`, replacing any previous object.
    async fn put(&self, bucket: &str, key: &str, body: Bytes, content_type: &str)
    -> StoreResult<()>;

    /// Every object whose key starts with `prefix`.
    async fn list_by_prefix(&self, bucket: &str, prefix: &str) -> StoreResult<Vec<ObjectEntry>>;

    /// Delete `keys`. Keys that do not exist are ignored.
    async fn bulk_delete(&self, bucket: &str, keys: &[String]) -> StoreResult<()>;
}

/// Basic key validation to avoid trivial path traversal vectors.
///
/// Rejects empty or overlong keys, keys that begin with `/`, contain a `..`
/// segment, a backslash, NUL or any other control byte.
pub fn ensure_key_safe(key: &str) -> StoreResult<()> {
    let invalid = key.is_empty()
        || key.len() > MAX_OBJECT_KEY_LEN
        || key.starts_with('/')
        || key.split('/').any(|segment| segment == "..")
        || key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0');
    if invalid {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Bucket names become directory names or S3 bucket names; keep them to
/// lowercase DNS-style labels.
pub fn ensure_bucket_safe(bucket: &str) -> StoreResult<()> {
    let valid = (3..=63).contains(&bucket.len())
        && bucket
            .chars()
            .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
        && !bucket.starts_with(['.', '-'])
        && !bucket.ends_with(['.', '-'])
        && !bucket.contains("..");
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidBucket(bucket.to_string()))
    }
}
