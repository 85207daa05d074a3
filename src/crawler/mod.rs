//! 书籍来源：本地路径、HTTP(S) 地址或 S3 控制台对象链接

use reqwest::{Client, Url};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::utils::{IngestError, IngestResult};

#[derive(Debug, Clone, PartialEq)]
pub enum BookSource {
    Local(PathBuf),
    Remote { url: String, file_name: String },
}

impl BookSource {
    /// 解析命令行或批处理给出的书籍位置
    pub fn parse(input: &str) -> IngestResult<Self> {
        let input = input.trim();
        if !(input.starts_with("http://") || input.starts_with("https://")) {
            return Ok(BookSource::Local(PathBuf::from(input)));
        }

        let url = Url::parse(input)
            .map_err(|e| IngestError::ConfigError(format!("无效的书籍地址 {}: {}", input, e)))?;

        if let Some(key) = console_object_key(&url) {
            let bucket = url
                .path_segments()
                .and_then(|mut segments| segments.next_back())
                .filter(|s| !s.is_empty())
                .ok_or_else(|| IngestError::ConfigError(format!("无法解析存储桶: {}", input)))?
                .to_string();
            return Self::from_bucket_key(&bucket, &key);
        }

        let file_name = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .map(percent_decode)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| IngestError::ConfigError(format!("地址中没有文件名: {}", input)))?;
        let file_name = checked_file_name(file_name)?;
        Ok(BookSource::Remote {
            url: url.to_string(),
            file_name,
        })
    }

    /// `https://<bucket>.s3.amazonaws.com/<key>`
    fn from_bucket_key(bucket: &str, key: &str) -> IngestResult<Self> {
        let mut url = Url::parse(&format!("https://{}.s3.amazonaws.com/", bucket))
            .map_err(|e| IngestError::ConfigError(format!("无效的存储桶 {}: {}", bucket, e)))?;
        url.path_segments_mut()
            .map_err(|_| IngestError::ConfigError(format!("无效的存储桶 {}", bucket)))?
            .pop_if_empty()
            .extend(key.split('/'));

        let file_name = key
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| IngestError::ConfigError(format!("对象键中没有文件名: {}", key)))?
            .to_string();
        let file_name = checked_file_name(file_name)?;
        Ok(BookSource::Remote {
            url: url.to_string(),
            file_name,
        })
    }

    /// 书名：文件名（含扩展名）
    pub fn book_name(&self) -> String {
        match self {
            BookSource::Local(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
            BookSource::Remote { file_name, .. } => file_name.clone(),
        }
    }

    pub fn is_pdf(&self) -> bool {
        self.book_name().to_lowercase().ends_with(".pdf")
    }
}

/// S3 控制台链接的 `prefix=` 查询参数即对象键
fn console_object_key(url: &Url) -> Option<String> {
    if !url.path().contains("/s3/object/") {
        return None;
    }
    url.query_pairs()
        .find(|(name, _)| name == "prefix")
        .map(|(_, value)| value.into_owned())
        .filter(|key| !key.is_empty())
}

/// 下载文件名必须是单个普通路径段，不能带分隔符或 `.`/`..`
fn checked_file_name(name: String) -> IngestResult<String> {
    let mut components = Path::new(&name).components();
    let single = matches!(components.next(), Some(Component::Normal(_))) && components.next().is_none();
    if single && !name.contains(['/', '\\']) {
        Ok(name)
    } else {
        Err(IngestError::ConfigError(format!("非法的下载文件名: {}", name)))
    }
}

fn percent_decode(segment: &str) -> String {
    let bytes = segment.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(b) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(b);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// 已就绪的本地 PDF
#[derive(Debug, Clone)]
pub struct FetchedBook {
    pub path: PathBuf,
    /// 下载得到的文件在入库结束后删除
    pub downloaded: bool,
}

impl FetchedBook {
    pub async fn discard(&self) {
        if !self.downloaded {
            return;
        }
        if let Err(e) = tokio::fs::remove_file(&self.path).await {
            warn!("删除已下载文件失败 {}: {}", self.path.display(), e);
        }
    }
}

pub struct BookFetcher {
    client: Client,
    download_dir: PathBuf,
}

impl BookFetcher {
    pub fn new(download_dir: impl Into<PathBuf>, timeout_secs: u64) -> IngestResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent("bookingest/0.1")
            .build()?;
        Ok(Self {
            client,
            download_dir: download_dir.into(),
        })
    }

    pub async fn fetch(&self, source: &BookSource) -> IngestResult<FetchedBook> {
        match source {
            BookSource::Local(path) => {
                if !tokio::fs::try_exists(path).await? {
                    return Err(IngestError::PdfError(format!(
                        "书籍文件不存在: {}",
                        path.display()
                    )));
                }
                Ok(FetchedBook {
                    path: path.clone(),
                    downloaded: false,
                })
            }
            BookSource::Remote { url, file_name } => {
                tokio::fs::create_dir_all(&self.download_dir).await?;
                let save_path = self.download_dir.join(file_name);
                self.download_pdf(url, &save_path).await?;
                Ok(FetchedBook {
                    path: save_path,
                    downloaded: true,
                })
            }
        }
    }

    async fn download_pdf(&self, url: &str, save_path: &Path) -> IngestResult<()> {
        info!("下载PDF: {} -> {}", url, save_path.display());

        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            error!("下载失败，状态码: {}", response.status());
            return Err(IngestError::StorageError(format!(
                "下载 {} 失败: {}",
                url,
                response.status()
            )));
        }

        let bytes = response.bytes().await?;
        tokio::fs::write(save_path, bytes).await?;
        info!("PDF下载完成: {}", save_path.display());
        Ok(())
    }
}
