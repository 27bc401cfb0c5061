//! HTTP client for an S3-compatible object endpoint.
//!
//! Objects are addressed as `{base_url}/{bucket}/{key}`. Metadata travels as
//! `x-amz-meta-*` headers in both directions.

use super::{check_length, validate_key, BlobObject, BlobStore, PutRequest, StorageError};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

const META_PREFIX: &str = "x-amz-meta-";

pub struct HttpBlobStore {
    client: reqwest::Client,
    base_url: String,
    bucket: String,
    token: Option<String>,
}

impl HttpBlobStore {
    /// Create a new client.
    ///
    /// # Arguments
    /// * `base_url` - Endpoint of the object service (e.g., "http://minio:9000")
    /// * `bucket` - Bucket all keys are stored under
    /// * `token` - Optional bearer token sent with every request
    /// * `timeout_secs` - Optional request timeout in seconds. Without one,
    ///   requests run until they complete or the caller drops them.
    pub fn new(
        base_url: &str,
        bucket: &str,
        token: Option<String>,
        timeout_secs: Option<u64>,
    ) -> Result<Self, StorageError> {
        let mut builder = reqwest::Client::builder();
        if let Some(secs) = timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder
            .build()
            .map_err(|e| StorageError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        // Ensure base_url doesn't have trailing slash
        let base_url = base_url.trim_end_matches('/').to_string();
        let bucket = bucket.trim_matches('/').to_string();

        Ok(Self {
            client,
            base_url,
            bucket,
            token,
        })
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.base_url, self.bucket, key)
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn put(&self, req: PutRequest) -> Result<(), StorageError> {
        validate_key(&req.key)?;
        check_length(&req)?;

        let url = self.object_url(&req.key);
        let mut builder = self
            .client
            .put(&url)
            .header(CONTENT_TYPE, req.content_type.as_str());
        for (name, value) in &req.metadata {
            builder = builder.header(format!("{}{}", META_PREFIX, name), value.as_str());
        }

        let response = self
            .authorize(builder)
            .body(req.body)
            .send()
            .await
            .map_err(|e| StorageError::Transport(format!("Failed to upload {}: {}", req.key, e)))?;

        if !response.status().is_success() {
            return Err(StorageError::Transport(format!(
                "Upload of {} failed with status: {}",
                req.key,
                response.status()
            )));
        }

        debug!("Uploaded {} ({} bytes)", req.key, req.content_length);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<BlobObject, StorageError> {
        validate_key(key)?;

        let response = self
            .authorize(self.client.get(self.object_url(key)))
            .send()
            .await
            .map_err(|e| StorageError::Transport(format!("Failed to fetch {}: {}", key, e)))?;

        match response.status() {
            StatusCode::NOT_FOUND => return Err(StorageError::NotFound(key.to_string())),
            status if !status.is_success() => {
                return Err(StorageError::Transport(format!(
                    "Fetch of {} failed with status: {}",
                    key, status
                )))
            }
            _ => {}
        }

        let headers = response.headers();
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let metadata: BTreeMap<String, String> = headers
            .iter()
            .filter_map(|(name, value)| {
                let field = name.as_str().strip_prefix(META_PREFIX)?;
                Some((field.to_string(), value.to_str().ok()?.to_string()))
            })
            .collect();

        let data = response
            .bytes()
            .await
            .map_err(|e| StorageError::Transport(format!("Failed to read {}: {}", key, e)))?
            .to_vec();

        Ok(BlobObject {
            data,
            content_type,
            metadata,
        })
    }
}
