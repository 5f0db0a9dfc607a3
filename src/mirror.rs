use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use chrono::Utc;
use serde::Deserialize;
use sha2::{Digest as _, Sha256};

use crate::config::{CloudinaryConfig, HttpConfig, MirrorConfig, MirrorProvider};
use crate::retry::RetryPolicy;

/// Copies a remote image to a media host and returns the public URL.
///
/// `placement` is a stable, host-independent key. Mirroring the same source to
/// the same placement twice must be safe.
pub trait Mirror: Send + Sync {
    fn mirror_image(&self, source_url: &str, placement: &str) -> anyhow::Result<String>;
}

pub fn page_placement(comic_id: &str, chapter_key: &str, page: usize) -> String {
    format!("{comic_id}/chapter_{chapter_key}/page_{page}")
}

pub fn cover_placement(comic_id: &str) -> String {
    format!("{comic_id}/cover")
}

pub fn build_mirror(config: &MirrorConfig, http: &HttpConfig) -> anyhow::Result<Arc<dyn Mirror>> {
    Ok(match config.provider {
        MirrorProvider::Passthrough => Arc::new(PassthroughMirror),
        MirrorProvider::Cloudinary => Arc::new(CloudinaryMirror::new(&config.cloudinary, http)?),
    })
}

/// Keeps images where they are.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughMirror;

impl Mirror for PassthroughMirror {
    fn mirror_image(&self, source_url: &str, _placement: &str) -> anyhow::Result<String> {
        Ok(source_url.to_owned())
    }
}

#[derive(Debug, Clone)]
pub struct CloudinaryMirror {
    client: reqwest::blocking::Client,
    retry: RetryPolicy,
    upload_url: String,
    api_key: String,
    api_secret: String,
    folder: String,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    secure_url: Option<String>,
    error: Option<UploadError>,
}

#[derive(Debug, Deserialize)]
struct UploadError {
    message: String,
}

impl CloudinaryMirror {
    pub fn new(config: &CloudinaryConfig, http: &HttpConfig) -> anyhow::Result<Self> {
        let (Some(cloud_name), Some(api_key), Some(api_secret)) =
            (&config.cloud_name, &config.api_key, &config.api_secret)
        else {
            anyhow::bail!(
                "cloudinary mirror requires COMICHUB_CLOUDINARY_CLOUD_NAME, COMICHUB_CLOUDINARY_API_KEY and COMICHUB_CLOUDINARY_API_SECRET"
            );
        };

        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(http.timeout_secs.max(1) * 4))
            .connect_timeout(Duration::from_secs(http.timeout_secs.clamp(1, 10)))
            .build()
            .context("build cloudinary http client")?;

        Ok(Self {
            client,
            retry: http.retry_policy(),
            upload_url: format!(
                "{}/{cloud_name}/image/upload",
                config.api_base_url.trim_end_matches('/')
            ),
            api_key: api_key.clone(),
            api_secret: api_secret.clone(),
            folder: config.folder.trim_matches('/').to_owned(),
        })
    }

    fn public_id(&self, placement: &str) -> String {
        if self.folder.is_empty() {
            placement.to_owned()
        } else {
            format!("{}/{placement}", self.folder)
        }
    }

    fn upload_once(&self, source_url: &str, public_id: &str) -> anyhow::Result<String> {
        let timestamp = Utc::now().timestamp().to_string();
        let signed = [
            ("overwrite", "true"),
            ("public_id", public_id),
            ("timestamp", timestamp.as_str()),
        ];
        let signature = sign(&signed, &self.api_secret);

        let mut form: Vec<(&str, &str)> = signed.to_vec();
        form.push(("file", source_url));
        form.push(("api_key", &self.api_key));
        form.push(("signature", &signature));
        form.push(("signature_algorithm", "sha256"));

        let response = self
            .client
            .post(&self.upload_url)
            .form(&form)
            .send()
            .context("send cloudinary upload")?;
        let status = response.status();
        let body: UploadResponse = response
            .json()
            .with_context(|| format!("decode cloudinary response (status {status})"))?;

        if let Some(error) = body.error {
            anyhow::bail!("cloudinary upload rejected ({status}): {}", error.message);
        }
        if !status.is_success() {
            anyhow::bail!("cloudinary upload failed: status {status}");
        }
        body.secure_url
            .filter(|url| !url.is_empty())
            .context("cloudinary response has no secure_url")
    }
}

impl Mirror for CloudinaryMirror {
    fn mirror_image(&self, source_url: &str, placement: &str) -> anyhow::Result<String> {
        let public_id = self.public_id(placement);
        let url = self.retry.run(&format!("mirror {source_url}"), |_| {
            self.upload_once(source_url, &public_id)
        })?;
        tracing::debug!(source_url, public_id = %public_id, url = %url, "mirrored image");
        Ok(url)
    }
}

/// Signed-upload signature: parameters sorted by name, joined as a query
/// string, secret appended, SHA-256 hex.
fn sign(params: &[(&str, &str)], secret: &str) -> String {
    let mut sorted = params.to_vec();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    let joined = sorted
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&");

    let mut hasher = Sha256::new();
    hasher.update(joined.as_bytes());
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}
