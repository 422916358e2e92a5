//! Binary object storage for inline photo and music blobs.
//!
//! Submissions may carry `data:<mime>;base64,<payload>` references. Before a
//! page is persisted those blobs are uploaded under deterministic keys so a
//! retried publication overwrites instead of duplicating.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::config::AppConfig;
use crate::dto::{MusicKind, PageSubmission};
use crate::errors::ServiceError;

pub const PHOTOS_BUCKET: &str = "photos";
pub const MUSIC_BUCKET: &str = "music";

static DATA_URL_HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^data:(?P<mime>[A-Za-z0-9.+-]+/[A-Za-z0-9.+-]+)(?:;[^;,]+)*;base64$")
        .expect("data URL pattern compiles")
});

#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Stores `bytes` under `bucket/key`, replacing any previous object,
    /// and returns its public URL.
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        bytes: Bytes,
    ) -> Result<String, ServiceError>;
}

/// A decoded `data:` URL.
#[derive(Debug, Clone, PartialEq)]
pub struct InlineBlob {
    pub content_type: String,
    pub bytes: Bytes,
}

impl InlineBlob {
    pub fn extension(&self) -> &'static str {
        extension_for(&self.content_type)
    }
}

pub fn is_inline(reference: &str) -> bool {
    reference.starts_with("data:")
}

/// Decodes a base64 `data:` URL.
pub fn parse_data_url(reference: &str) -> Result<InlineBlob, ServiceError> {
    let (header, payload) = reference
        .split_once(',')
        .ok_or_else(|| ServiceError::BadRequest("data URL has no payload".to_string()))?;
    let captures = DATA_URL_HEADER.captures(header).ok_or_else(|| {
        ServiceError::BadRequest("only base64 data URLs with a media type are supported".into())
    })?;
    let content_type = captures["mime"].to_ascii_lowercase();
    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|e| ServiceError::BadRequest(format!("invalid base64 payload: {}", e)))?;
    Ok(InlineBlob {
        content_type,
        bytes: Bytes::from(bytes),
    })
}

fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/png" => "png",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "image/heic" => "heic",
        "audio/mpeg" | "audio/mp3" => "mp3",
        "audio/mp4" | "audio/x-m4a" => "m4a",
        "audio/ogg" => "ogg",
        "audio/wav" | "audio/x-wav" => "wav",
        _ => "bin",
    }
}

/// Replaces every inline blob in the submission with a stored URL.
/// External references pass through untouched.
#[instrument(skip(store, submission), fields(photos = submission.photos.len()))]
pub async fn materialize_assets(
    store: &dyn AssetStore,
    payment_id: &str,
    mut submission: PageSubmission,
) -> Result<PageSubmission, ServiceError> {
    let mut photos = Vec::with_capacity(submission.photos.len());
    for (index, reference) in submission.photos.into_iter().enumerate() {
        if !is_inline(&reference) {
            photos.push(reference);
            continue;
        }
        let blob = parse_data_url(&reference).map_err(|e| {
            ServiceError::AssetUploadFailed(format!("photo {}: {}", index + 1, e))
        })?;
        let key = format!("{}/photo-{}.{}", payment_id, index + 1, blob.extension());
        let url = upload(store, PHOTOS_BUCKET, &key, blob).await?;
        photos.push(url);
    }
    submission.photos = photos;

    if let Some(music) = submission.music.as_mut() {
        if music.kind == MusicKind::Upload && is_inline(&music.source) {
            let blob = parse_data_url(&music.source)
                .map_err(|e| ServiceError::AssetUploadFailed(format!("music: {}", e)))?;
            let key = format!("{}/music.{}", payment_id, blob.extension());
            music.source = upload(store, MUSIC_BUCKET, &key, blob).await?;
        }
    }
    Ok(submission)
}

async fn upload(
    store: &dyn AssetStore,
    bucket: &str,
    key: &str,
    blob: InlineBlob,
) -> Result<String, ServiceError> {
    debug!(bucket, key, size = blob.bytes.len(), "uploading asset");
    store
        .upload(bucket, key, &blob.content_type, blob.bytes)
        .await
        .map_err(|e| match e {
            ServiceError::AssetUploadFailed(_) => e,
            other => ServiceError::AssetUploadFailed(format!("{}/{}: {}", bucket, key, other)),
        })
}

/// Object storage REST client (`POST <base>/object/<bucket>/<key>`).
pub struct HttpAssetStore {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpAssetStore {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::InternalError(format!("HTTP client build failed: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    pub fn public_url(&self, bucket: &str, key: &str) -> String {
        format!("{}/object/public/{}/{}", self.base_url, bucket, key)
    }
}

#[async_trait]
impl AssetStore for HttpAssetStore {
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        bytes: Bytes,
    ) -> Result<String, ServiceError> {
        let response = self
            .client
            .post(format!("{}/object/{}/{}", self.base_url, bucket, key))
            .bearer_auth(&self.api_key)
            .header("apikey", &self.api_key)
            .header("x-upsert", "true")
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await
            .map_err(|e| ServiceError::AssetUploadFailed(format!("{}/{}: {}", bucket, key, e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            warn!(bucket, key, status = %status, detail = %detail, "asset upload refused");
            return Err(ServiceError::AssetUploadFailed(format!(
                "{}/{}: storage responded {}",
                bucket, key, status
            )));
        }
        Ok(self.public_url(bucket, key))
    }
}

/// Keeps objects in memory; URLs use the `memory://` scheme.
#[derive(Debug, Default)]
pub struct InMemoryAssetStore {
    objects: DashMap<String, (String, Bytes)>,
}

impl InMemoryAssetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, bucket: &str, key: &str) -> Option<(String, Bytes)> {
        self.objects
            .get(&format!("{}/{}", bucket, key))
            .map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[async_trait]
impl AssetStore for InMemoryAssetStore {
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        bytes: Bytes,
    ) -> Result<String, ServiceError> {
        self.objects.insert(
            format!("{}/{}", bucket, key),
            (content_type.to_string(), bytes),
        );
        Ok(format!("memory://{}/{}", bucket, key))
    }
}

/// HTTP store when configured, memory otherwise.
pub fn asset_store_from_config(
    cfg: &AppConfig,
) -> Result<std::sync::Arc<dyn AssetStore>, ServiceError> {
    match (&cfg.asset_store_url, &cfg.asset_store_key) {
        (Some(url), Some(key)) => Ok(std::sync::Arc::new(HttpAssetStore::new(
            url.clone(),
            key.clone(),
            cfg.provider_timeout(),
        )?)),
        _ => {
            if cfg.is_production() {
                return Err(ServiceError::Misconfigured(
                    "asset_store_url and asset_store_key are required in production".into(),
                ));
            }
            warn!("asset store not configured, keeping uploads in memory");
            Ok(std::sync::Arc::new(InMemoryAssetStore::new()))
        }
    }
}
