//! S3-compatible object store built on the `object_store` crate.

use super::{ObjectEntry, ObjectStore, StoreError, StoreResult, ensure_bucket_safe, ensure_key_safe};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt, stream};
use object_store::{
    Attribute, AttributeValue, Attributes, ObjectStore as _, PutOptions, PutPayload,
    aws::{AmazonS3, AmazonS3Builder},
    path::Path,
};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

/// One `AmazonS3` client per bucket, built lazily from the `AWS_*`
/// environment plus the configured region and endpoint.
pub struct S3ObjectStore {
    region: Option<String>,
    endpoint: Option<String>,
    clients: Mutex<HashMap<String, Arc<AmazonS3>>>,
}

impl S3ObjectStore {
    pub fn new(region: Option<String>, endpoint: Option<String>) -> Self {
        Self {
            region,
            endpoint,
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn client(&self, bucket: &str) -> StoreResult<Arc<AmazonS3>> {
        ensure_bucket_safe(bucket)?;
        let mut clients = self
            .clients
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(client) = clients.get(bucket) {
            return Ok(client.clone());
        }

        let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket);
        if let Some(region) = &self.region {
            builder = builder.with_region(region);
        }
        // For supporting localstack/minio
        if let Some(endpoint) = &self.endpoint {
            builder = builder.with_endpoint(endpoint);
            if endpoint.starts_with("http://") {
                builder = builder.with_allow_http(true);
            }
        }
        let client = Arc::new(builder.build()?);
        clients.insert(bucket.to_string(), client.clone());
        Ok(client)
    }
}

fn object_path(key: &str) -> StoreResult<Path> {
    ensure_key_safe(key)?;
    Path::parse(key).map_err(|_| StoreError::InvalidKey(key.to_string()))
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> StoreResult<()> {
        let client = self.client(bucket)?;
        let location = object_path(key)?;

        let mut attributes = Attributes::new();
        attributes.insert(
            Attribute::ContentType,
            AttributeValue::from(content_type.to_string()),
        );
        let options = PutOptions {
            attributes,
            ..PutOptions::default()
        };

        client
            .put_opts(&location, PutPayload::from(body), options)
            .await?;
        Ok(())
    }

    async fn list_by_prefix(&self, bucket: &str, prefix: &str) -> StoreResult<Vec<ObjectEntry>> {
        let client = self.client(bucket)?;
        // `object_store` lists whole path segments, so list the directory the
        // prefix pins down and filter the remainder by string prefix.
        let dir = match prefix.rsplit_once('/') {
            Some((dir, _)) if !dir.is_empty() => Some(object_path(dir)?),
            _ => None,
        };

        let metas: Vec<_> = client.list(dir.as_ref()).try_collect().await?;
        let mut entries: Vec<ObjectEntry> = metas
            .into_iter()
            .map(|meta| ObjectEntry {
                key: meta.location.to_string(),
                size: meta.size as u64,
            })
            .filter(|entry| entry.key.starts_with(prefix))
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    async fn bulk_delete(&self, bucket: &str, keys: &[String]) -> StoreResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let client = self.client(bucket)?;
        let locations = keys
            .iter()
            .map(|key| object_path(key))
            .collect::<StoreResult<Vec<_>>>()?;

        let deleted: Vec<Path> = client
            .delete_stream(stream::iter(locations.into_iter().map(Ok)).boxed())
            .try_collect()
            .await?;
        tracing::debug!(bucket, count = deleted.len(), "deleted objects from S3");
        Ok(())
    }
}
