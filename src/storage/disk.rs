//! Local-directory object store.
//!
//! Objects live at `base_path/{bucket}/{key}`. Writes go to a temporary file
//! in the destination directory, are fsynced, then renamed into place so a
//! reader never observes a partially written object.

use super::{ObjectEntry, ObjectStore, StoreError, StoreResult, ensure_bucket_safe, ensure_key_safe};
use async_trait::async_trait;
use bytes::Bytes;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;
use walkdir::WalkDir;

const TMP_PREFIX: &str = ".tmp-";

#[derive(Clone, Debug)]
pub struct DiskObjectStore {
    /// Base directory on disk where buckets are created.
    base_path: PathBuf,
}

impl DiskObjectStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    fn bucket_root(&self, bucket: &str) -> StoreResult<PathBuf> {
        ensure_bucket_safe(bucket)?;
        Ok(self.base_path.join(bucket))
    }

    fn object_path(&self, bucket: &str, key: &str) -> StoreResult<PathBuf> {
        ensure_key_safe(key)?;
        let mut path = self.bucket_root(bucket)?;
        path.extend(key.split('/').filter(|segment| !segment.is_empty()));
        Ok(path)
    }

    /// Recursively remove empty directories up to the bucket root.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl ObjectStore for DiskObjectStore {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> StoreResult<()> {
        let file_path = self.object_path(bucket, key)?;
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StoreError::Io(io::Error::other("object path missing parent directory"))
        })?;
        fs::create_dir_all(&parent).await?;

        let tmp_path = parent.join(format!("{TMP_PREFIX}{}", Uuid::new_v4()));
        let written = async {
            let mut file = File::create(&tmp_path).await?;
            file.write_all(&body).await?;
            file.flush().await?;
            file.sync_all().await?;
            fs::rename(&tmp_path, &file_path).await
        }
        .await;

        if let Err(err) = written {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }

        debug!(
            bucket,
            key,
            content_type,
            size = body.len(),
            "stored object on disk"
        );
        Ok(())
    }

    async fn list_by_prefix(&self, bucket: &str, prefix: &str) -> StoreResult<Vec<ObjectEntry>> {
        let root = self.bucket_root(bucket)?;

        // Only walk the directory the prefix already pins down.
        let start = match prefix.rsplit_once('/') {
            Some((dir, _)) if !dir.is_empty() => self.object_path(bucket, dir)?,
            _ => root.clone(),
        };

        let prefix = prefix.to_string();
        tokio::task::spawn_blocking(move || walk_prefix(&root, &start, &prefix))
            .await
            .map_err(|err| StoreError::Io(io::Error::other(err)))?
    }

    async fn bulk_delete(&self, bucket: &str, keys: &[String]) -> StoreResult<()> {
        let root = self.bucket_root(bucket)?;
        for key in keys {
            let file_path = self.object_path(bucket, key)?;
            match fs::remove_file(&file_path).await {
                Ok(_) => debug!("removed physical file {}", file_path.display()),
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    debug!("file {} already missing", file_path.display());
                }
                Err(err) => return Err(StoreError::Io(err)),
            }
            if let Some(parent) = file_path.parent() {
                self.prune_empty_dirs(parent, &root).await;
            }
        }
        Ok(())
    }
}

/// Objects under `start` whose key begins with `prefix`, sorted by key.
/// A missing start directory is an empty listing.
fn walk_prefix(root: &Path, start: &Path, prefix: &str) -> StoreResult<Vec<ObjectEntry>> {
    let mut entries = Vec::new();
    for entry in WalkDir::new(start) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) if err.io_error().map(io::Error::kind) == Some(ErrorKind::NotFound) => {
                continue;
            }
            Err(err) => return Err(StoreError::Io(err.into())),
        };
        if !entry.file_type().is_file()
            || entry.file_name().to_string_lossy().starts_with(TMP_PREFIX)
        {
            continue;
        }
        let Some(key) = relative_key(root, entry.path()) else {
            continue;
        };
        if key.starts_with(prefix) {
            let size = entry.metadata().map_err(io::Error::from)?.len();
            entries.push(ObjectEntry { key, size });
        }
    }

    entries.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(entries)
}

/// `/`-separated key of `path` relative to the bucket root.
fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let segments = relative
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<Vec<_>>>()?;
    Some(segments.join("/"))
}
