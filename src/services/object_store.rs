use async_trait::async_trait;
use reqwest::Client;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use super::ObjectStore;
use crate::utils::{IngestError, IngestResult};

/// 拒绝空键与包含 `..` 或绝对路径的键
fn validate_key(key: &str) -> IngestResult<&str> {
    let trimmed = key.trim_start_matches('/');
    let safe = !trimmed.is_empty()
        && Path::new(trimmed)
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if safe {
        Ok(trimmed)
    } else {
        Err(IngestError::StorageError(format!("非法对象键: {}", key)))
    }
}

/// 本地目录对象存储，返回 `<url_prefix>/<key>`
pub struct LocalObjectStore {
    root: PathBuf,
    url_prefix: String,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>, url_prefix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            url_prefix: url_prefix.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 删除全部已存对象
    pub async fn clear(&self) -> IngestResult<()> {
        if tokio::fs::try_exists(&self.root).await? {
            tokio::fs::remove_dir_all(&self.root).await?;
            info!("已清空本地对象存储: {}", self.root.display());
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(&self, bytes: Vec<u8>, key: &str) -> IngestResult<String> {
        let key = validate_key(key)?;
        let path = self.root.join(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &bytes).await?;
        debug!("写入对象 {} ({} 字节)", path.display(), bytes.len());
        Ok(format!("{}/{}", self.url_prefix, key))
    }
}

/// S3 兼容的 HTTP 对象存储：`PUT <endpoint>/<bucket>/<key>`
pub struct HttpObjectStore {
    client: Client,
    endpoint: String,
    bucket: String,
    api_token: String,
    url_prefix: String,
}

impl HttpObjectStore {
    pub fn new(
        endpoint: impl Into<String>,
        bucket: impl Into<String>,
        api_token: impl Into<String>,
        url_prefix: impl Into<String>,
    ) -> IngestResult<Self> {
        let client = Client::builder().timeout(Duration::from_secs(60)).build()?;
        let endpoint: String = endpoint.into();
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            bucket: bucket.into(),
            api_token: api_token.into(),
            url_prefix: url_prefix.into(),
        })
    }

    fn upload_url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.endpoint, self.bucket, key)
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn put(&self, bytes: Vec<u8>, key: &str) -> IngestResult<String> {
        let key = validate_key(key)?;
        let mut request = self
            .client
            .put(self.upload_url(key))
            .header("Content-Type", "image/png")
            .body(bytes);
        if !self.api_token.is_empty() {
            request = request.header("Authorization", format!("Bearer {}", self.api_token));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IngestError::StorageError(format!(
                "上传 {} 失败 {}: {}",
                key, status, body
            )));
        }
        Ok(format!("{}/{}", self.url_prefix, key))
    }
}
