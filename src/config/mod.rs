use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const SETTINGS_PATH: &str = "config/settings.toml";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub detector: DetectorConfig,
    pub ocr: OcrConfig,
    pub formula: FormulaConfig,
    pub object_store: ObjectStoreConfig,
    pub storage: StorageConfig,
    pub pipeline: PipelineConfig,
    pub schedule: ScheduleConfig,
}

/// 两个版面检测服务：通用版面模型与表格专用模型
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DetectorConfig {
    pub general_url: String,
    pub general_model: String,
    pub table_url: String,
    pub table_model: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OcrConfig {
    pub command: String,
    pub language: String,
    /// tesseract --psm，0 表示使用默认值
    pub page_segmentation_mode: u8,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FormulaConfig {
    pub command: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObjectStoreConfig {
    /// "local" 或 "http"
    pub backend: String,
    pub endpoint: String,
    pub bucket: String,
    pub api_token: String,
    pub local_dir: String,
    pub public_base_url: String,
    pub figure_folder: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    pub database_path: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    pub work_dir: String,
    pub dpi: u32,
    /// 0 表示按 CPU 核数
    pub max_workers: usize,
    pub rasterizer_command: String,
    pub download_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScheduleConfig {
    pub cron: String,
    pub inbox_dir: String,
}

impl AppConfig {
    /// 默认值 -> config/settings.toml -> BOOKINGEST__SECTION__KEY 环境变量
    pub fn load() -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name(SETTINGS_PATH).required(false))
            .add_source(
                config::Environment::with_prefix("BOOKINGEST")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .context("加载配置失败")?;

        let config: AppConfig = settings.try_deserialize().context("配置格式错误")?;
        Ok(config)
    }

    pub fn save(&self, path: &str) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn database_url(&self) -> String {
        format!("sqlite:{}", self.storage.database_path)
    }
}

impl PipelineConfig {
    pub fn worker_count(&self) -> usize {
        if self.max_workers > 0 {
            return self.max_workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

impl ObjectStoreConfig {
    /// 对外可访问的对象 URL 前缀
    pub fn url_prefix(&self) -> String {
        if !self.public_base_url.is_empty() {
            return self.public_base_url.trim_end_matches('/').to_string();
        }
        format!("https://{}.s3.amazonaws.com", self.bucket)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            detector: DetectorConfig {
                general_url: "http://127.0.0.1:8501/detect/publaynet".to_string(),
                general_model: "PubLayNet".to_string(),
                table_url: "http://127.0.0.1:8501/detect/tablebank".to_string(),
                table_model: "TableBank".to_string(),
                timeout_secs: 120,
            },
            ocr: OcrConfig {
                command: "tesseract".to_string(),
                language: "eng".to_string(),
                page_segmentation_mode: 0,
            },
            formula: FormulaConfig {
                command: "nougat".to_string(),
                args: vec!["--no-skipping".to_string()],
            },
            object_store: ObjectStoreConfig {
                backend: "local".to_string(),
                endpoint: String::new(),
                bucket: "book-assets".to_string(),
                api_token: String::new(),
                local_dir: "./data/objects".to_string(),
                public_base_url: String::new(),
                figure_folder: "book-images".to_string(),
            },
            storage: StorageConfig {
                database_path: "./data/bookingest.db".to_string(),
            },
            pipeline: PipelineConfig {
                work_dir: "./data/work".to_string(),
                dpi: 300,
                max_workers: 0,
                rasterizer_command: "pdftoppm".to_string(),
                download_timeout_secs: 300,
            },
            schedule: ScheduleConfig {
                cron: "0 0 2 * * *".to_string(),
                inbox_dir: "./data/inbox".to_string(),
            },
        }
    }
}
