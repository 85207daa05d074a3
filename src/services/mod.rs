//! 外部协作方接口：版面检测、OCR、公式转写、LaTeX 朗读、对象存储、错误记录、PDF 栅格化。
//! 进程启动时构造一次，以 `Arc<dyn ...>` 注入到提取器与编排器。

pub mod layout_client;
pub mod nougat;
pub mod object_store;
pub mod speech;
pub mod tesseract;

#[cfg(test)]
pub mod testing;

use async_trait::async_trait;
use image::RgbImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::parser::{Region, TableRecord};
use crate::utils::IngestResult;

pub use layout_client::HttpLayoutDetector;
pub use nougat::CommandTranscriber;
pub use object_store::{HttpObjectStore, LocalObjectStore};
pub use speech::RuleBasedSpeech;
pub use tesseract::TesseractRecognizer;

#[async_trait]
pub trait LayoutDetector: Send + Sync {
    async fn detect(&self, image: &RgbImage) -> IngestResult<Vec<Region>>;
}

#[async_trait]
pub trait TextRecognizer: Send + Sync {
    async fn recognize(&self, image: &RgbImage) -> IngestResult<String>;
}

/// 表格结构与标题提取的结果
#[derive(Debug, Clone)]
pub struct TableExtraction {
    /// 追加到页面正文的文本
    pub narrative: String,
    pub record: TableRecord,
}

#[async_trait]
pub trait TableExtractor: Send + Sync {
    async fn extract(&self, crop: &RgbImage, table_id: &str) -> IngestResult<TableExtraction>;
}

/// 整页 LaTeX 转写工具（进程外调用），输入为单页 PDF
#[async_trait]
pub trait FormulaTranscriber: Send + Sync {
    async fn transcribe(&self, pdf_path: &Path) -> IngestResult<String>;
}

pub trait LatexToSpeech: Send + Sync {
    fn convert(&self, expression: &str) -> IngestResult<String>;
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// 上传对象并返回可访问的 URL
    async fn put(&self, bytes: Vec<u8>, key: &str) -> IngestResult<String>;
}

#[async_trait]
pub trait ErrorSink: Send + Sync {
    async fn record(
        &self,
        book_id: &str,
        book: &str,
        page_number: Option<usize>,
        error: &str,
        location: &str,
    ) -> IngestResult<()>;
}

#[async_trait]
pub trait PageRasterizer: Send + Sync {
    async fn page_count(&self, pdf_path: &Path) -> IngestResult<usize>;

    /// 渲染第 `page_index` 页（从 0 开始）到 `output` 路径
    async fn render(&self, pdf_path: &Path, page_index: usize, output: &Path)
        -> IngestResult<PathBuf>;
}

/// 页面提取所需的全部协作方
#[derive(Clone)]
pub struct Services {
    pub general_detector: Arc<dyn LayoutDetector>,
    pub table_detector: Arc<dyn LayoutDetector>,
    pub recognizer: Arc<dyn TextRecognizer>,
    pub table_extractor: Arc<dyn TableExtractor>,
    pub transcriber: Arc<dyn FormulaTranscriber>,
    pub speech: Arc<dyn LatexToSpeech>,
    pub object_store: Arc<dyn ObjectStore>,
}
