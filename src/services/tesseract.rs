use async_trait::async_trait;
use image::RgbImage;
use std::path::PathBuf;
use tokio::process::Command;

use super::TextRecognizer;
use crate::utils::{IngestError, IngestResult};

/// 调用 tesseract 命令行识别裁剪图文本
pub struct TesseractRecognizer {
    command: String,
    language: String,
    page_segmentation_mode: u8,
    scratch_dir: PathBuf,
}

impl TesseractRecognizer {
    pub fn new(
        command: impl Into<String>,
        language: impl Into<String>,
        page_segmentation_mode: u8,
        scratch_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            command: command.into(),
            language: language.into(),
            page_segmentation_mode,
            scratch_dir: scratch_dir.into(),
        }
    }

    fn arguments(&self) -> Vec<String> {
        let mut args = vec!["stdout".to_string(), "-l".to_string(), self.language.clone()];
        if self.page_segmentation_mode > 0 {
            args.push("--psm".to_string());
            args.push(self.page_segmentation_mode.to_string());
        }
        args
    }
}

#[async_trait]
impl TextRecognizer for TesseractRecognizer {
    async fn recognize(&self, image: &RgbImage) -> IngestResult<String> {
        tokio::fs::create_dir_all(&self.scratch_dir).await?;
        // 并发页面各自使用唯一文件名
        let crop_file = tempfile::Builder::new()
            .prefix("crop_")
            .suffix(".png")
            .tempfile_in(&self.scratch_dir)?;
        image.save_with_format(crop_file.path(), image::ImageFormat::Png)?;

        let output = Command::new(&self.command)
            .arg(crop_file.path())
            .args(self.arguments())
            .output()
            .await
            .map_err(|e| IngestError::OcrError(format!("无法启动 {}: {}", self.command, e)))?;

        if !output.status.success() {
            return Err(IngestError::OcrError(format!(
                "{} 退出码 {:?}: {}",
                self.command,
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
