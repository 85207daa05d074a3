use async_trait::async_trait;
use image::RgbImage;
use reqwest::Client;
use serde::Deserialize;
use std::io::Cursor;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::LayoutDetector;
use crate::parser::{BoundingBox, Region, RegionKind};
use crate::utils::{IngestError, IngestResult};

#[derive(Debug, Deserialize)]
struct DetectResponse {
    #[serde(default)]
    blocks: Vec<DetectedBlock>,
}

#[derive(Debug, Deserialize)]
struct DetectedBlock {
    #[serde(rename = "type")]
    kind: String,
    x_1: f32,
    y_1: f32,
    x_2: f32,
    y_2: f32,
}

/// HTTP 版面检测服务客户端：POST PNG 页面图像，返回区块列表
pub struct HttpLayoutDetector {
    client: Client,
    url: String,
    model: String,
}

impl HttpLayoutDetector {
    pub fn new(url: impl Into<String>, model: impl Into<String>, timeout_secs: u64) -> IngestResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
            model: model.into(),
        })
    }
}

/// 解析检测响应；未知类型的区块丢弃
fn parse_blocks(body: &str, model: &str) -> IngestResult<Vec<Region>> {
    let response: DetectResponse = serde_json::from_str(body)
        .map_err(|e| IngestError::DetectionError(format!("{} 响应格式错误: {}", model, e)))?;

    let regions = response
        .blocks
        .into_iter()
        .filter_map(|block| {
            let Some(kind) = RegionKind::from_label(&block.kind) else {
                debug!("{} 返回未知区块类型 {}，忽略", model, block.kind);
                return None;
            };
            Some(Region::new(
                kind,
                BoundingBox::new(block.x_1, block.y_1, block.x_2, block.y_2),
                model,
            ))
        })
        .collect();
    Ok(regions)
}

#[async_trait]
impl LayoutDetector for HttpLayoutDetector {
    async fn detect(&self, image: &RgbImage) -> IngestResult<Vec<Region>> {
        let started = Instant::now();
        let mut png = Vec::new();
        image.write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)?;

        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", "image/png")
            .body(png)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            warn!("{} 检测服务返回 {}", self.model, status);
            return Err(IngestError::DetectionError(format!(
                "{} 返回错误 {}: {}",
                self.model,
                status,
                body.chars().take(200).collect::<String>()
            )));
        }

        let regions = parse_blocks(&body, &self.model)?;
        debug!(
            "{} 检测到 {} 个区块，耗时 {:?}",
            self.model,
            regions.len(),
            started.elapsed()
        );
        Ok(regions)
    }
}
