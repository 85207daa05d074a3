pub mod logger;
pub mod scheduler;
pub mod text;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("配置错误: {0}")]
    ConfigError(String),

    #[error("数据库错误: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("网络请求错误: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("IO错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("图像处理错误: {0}")]
    ImageError(#[from] image::ImageError),

    #[error("PDF处理错误: {0}")]
    PdfError(String),

    #[error("版面检测错误: {0}")]
    DetectionError(String),

    #[error("OCR识别错误: {0}")]
    OcrError(String),

    #[error("公式转写错误: {0}")]
    FormulaError(String),

    #[error("对象存储错误: {0}")]
    StorageError(String),

    #[error("区域裁剪错误: {0}")]
    CropError(String),
}

impl From<lopdf::Error> for IngestError {
    fn from(e: lopdf::Error) -> Self {
        IngestError::PdfError(e.to_string())
    }
}

pub type IngestResult<T> = Result<T, IngestError>;
