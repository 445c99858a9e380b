//! JSON file persistence + profile API client for GuildStats.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use guildstats_core::RawProfile;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

pub const CRATE_NAME: &str = "guildstats-storage";

pub const DEFAULT_API_URL: &str = "https://geopixels.net/GetUserProfile";

#[derive(Debug, Clone)]
pub struct StoredFile {
    pub path: PathBuf,
    pub byte_size: usize,
}

/// A single JSON document on disk that is always read whole and replaced whole.
#[derive(Debug, Clone)]
pub struct JsonFile {
    path: PathBuf,
}

impl JsonFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn exists(&self) -> anyhow::Result<bool> {
        fs::try_exists(&self.path)
            .await
            .with_context(|| format!("checking {}", self.path.display()))
    }

    pub async fn load<T: DeserializeOwned>(&self) -> anyhow::Result<T> {
        let data = fs::read(&self.path)
            .await
            .with_context(|| format!("reading {}", self.path.display()))?;
        serde_json::from_slice(&data).with_context(|| format!("parsing {}", self.path.display()))
    }

    /// Serialize `value` without whitespace and swap it in via temp-file rename,
    /// so readers never observe a half-written file.
    pub async fn replace<T: Serialize + ?Sized>(&self, value: &T) -> anyhow::Result<StoredFile> {
        let bytes = serde_json::to_vec(value)
            .with_context(|| format!("serializing {}", self.path.display()))?;
        self.replace_bytes(&bytes).await
    }

    pub async fn replace_bytes(&self, bytes: &[u8]) -> anyhow::Result<StoredFile> {
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)
            .await
            .with_context(|| format!("creating directory {}", parent.display()))?;

        let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));

        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp file {}", temp_path.display()))?;
        file.write_all(bytes)
            .await
            .with_context(|| format!("writing temp file {}", temp_path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing temp file {}", temp_path.display()))?;
        drop(file);

        if let Err(err) = fs::rename(&temp_path, &self.path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err).with_context(|| {
                format!(
                    "renaming temp file {} -> {}",
                    temp_path.display(),
                    self.path.display()
                )
            });
        }

        Ok(StoredFile {
            path: self.path.clone(),
            byte_size: bytes.len(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub api_url: String,
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            timeout: Duration::from_secs(10),
            user_agent: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for target {target_id}")]
    HttpStatus { status: u16, target_id: u64 },
}

/// Profile API client. Holds one pooled `reqwest::Client`; clones share it.
#[derive(Debug, Clone)]
pub struct ProfileFetcher {
    client: reqwest::Client,
    api_url: String,
}

impl ProfileFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .default_headers(headers)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            api_url: config.api_url,
        })
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    pub async fn request_profile(&self, target_id: u64) -> Result<RawProfile, FetchError> {
        let resp = self
            .client
            .post(&self.api_url)
            .json(&serde_json::json!({ "targetId": target_id }))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                target_id,
            });
        }

        Ok(resp.json::<RawProfile>().await?)
    }

    /// Any failure, or an empty `{}` body, means "no profile for this id".
    pub async fn fetch_profile(&self, target_id: u64) -> Option<RawProfile> {
        match self.request_profile(target_id).await {
            Ok(profile) if profile.is_empty() => {
                debug!(target_id, "empty profile body");
                None
            }
            Ok(profile) => Some(profile),
            Err(err) => {
                debug!(target_id, error = %err, "profile unavailable");
                None
            }
        }
    }
}
