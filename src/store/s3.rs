//! S3-compatible object store (AWS S3, MinIO, Backblaze B2, ...).
//!
//! # Credentials
//!
//! Taken explicitly from `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY`
//! (plus `AWS_SESSION_TOKEN` when set) instead of the SDK's provider chain,
//! so a missing key is reported at startup rather than on the first upload.

use super::{ObjectInfo, ObjectMeta, ObjectStore, StoreError, validate_path};
use crate::config::StoreConfig;
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region, retry::RetryConfig};
use aws_sdk_s3::primitives::ByteStream;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct S3Store {
    client: Client,
    bucket: String,
}

fn env_var(name: &str) -> Result<String, StoreError> {
    std::env::var(name).map_err(|_| StoreError::Config(format!("{name} is not set")))
}

impl S3Store {
    pub async fn from_config(config: &StoreConfig) -> Result<Self, StoreError> {
        if config.bucket.is_empty() {
            return Err(StoreError::Config("store.bucket is required for s3".into()));
        }
        let credentials = Credentials::new(
            env_var("AWS_ACCESS_KEY_ID")?,
            env_var("AWS_SECRET_ACCESS_KEY")?,
            std::env::var("AWS_SESSION_TOKEN").ok(),
            None,
            "image-publisher",
        );
        let mut builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            // Fetch retries are ours; keep the SDK to a single retry on top
            .retry_config(RetryConfig::standard().with_max_attempts(2))
            .force_path_style(true);
        if !config.endpoint.is_empty() {
            builder = builder.endpoint_url(config.endpoint.clone());
        }
        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket.clone(),
        })
    }
}

fn to_chrono(dt: &aws_sdk_s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(dt.secs(), dt.subsec_nanos())
}

#[async_trait]
impl ObjectStore for S3Store {
    fn name(&self) -> &str {
        "s3"
    }

    async fn exists(&self, path: &str) -> Result<bool, StoreError> {
        validate_path(path)?;
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(path)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => Ok(false),
            Err(e) => Err(StoreError::Backend(format!("HEAD {path}: {e}"))),
        }
    }

    async fn put(&self, path: &str, bytes: Vec<u8>, meta: &ObjectMeta) -> Result<(), StoreError> {
        validate_path(path)?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(path)
            .body(ByteStream::from(bytes))
            .content_type(&meta.content_type)
            .cache_control(&meta.cache_control)
            .send()
            .await
            .map_err(|e| StoreError::Backend(format!("PUT {path}: {e}")))?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>, StoreError> {
        let mut found = Vec::new();
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .into_paginator()
            .send();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| StoreError::Backend(format!("LIST {prefix}: {e}")))?;
            for object in page.contents() {
                let Some(key) = object.key() else { continue };
                found.push(ObjectInfo {
                    path: key.to_string(),
                    created: object.last_modified().and_then(to_chrono),
                });
            }
        }
        found.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(found)
    }
}
