use async_trait::async_trait;
use image::{Rgb, RgbImage};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::*;
use crate::parser::{BoundingBox, Region, TableParser};
use crate::utils::IngestError;

/// 用灰度值 `shade` 填充矩形区域
pub fn paint(image: &mut RgbImage, bbox: &BoundingBox, shade: u8) {
    let x2 = (bbox.x2 as u32).min(image.width());
    let y2 = (bbox.y2 as u32).min(image.height());
    for y in bbox.y1 as u32..y2 {
        for x in bbox.x1 as u32..x2 {
            image.put_pixel(x, y, Rgb([shade, shade, shade]));
        }
    }
}

/// Answers with the text registered for the dominant non-black shade of the crop.
pub struct ColorRecognizer {
    texts: HashMap<u8, String>,
    failing: Option<u8>,
    calls: AtomicUsize,
}

impl ColorRecognizer {
    pub fn new(texts: &[(u8, &str)]) -> Self {
        Self {
            texts: texts.iter().map(|(s, t)| (*s, t.to_string())).collect(),
            failing: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing_on(mut self, shade: u8) -> Self {
        self.failing = Some(shade);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn dominant_shade(image: &RgbImage) -> Option<u8> {
        let mut counts: HashMap<u8, usize> = HashMap::new();
        for pixel in image.pixels() {
            if pixel[0] != 0 {
                *counts.entry(pixel[0]).or_default() += 1;
            }
        }
        counts.into_iter().max_by_key(|(_, n)| *n).map(|(s, _)| s)
    }
}

#[async_trait]
impl TextRecognizer for ColorRecognizer {
    async fn recognize(&self, image: &RgbImage) -> IngestResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let shade = Self::dominant_shade(image);
        if shade.is_some() && shade == self.failing {
            return Err(IngestError::OcrError("识别失败".to_string()));
        }
        Ok(shade
            .and_then(|s| self.texts.get(&s).cloned())
            .unwrap_or_default())
    }
}

pub struct FixedDetector {
    regions: Option<Vec<Region>>,
}

impl FixedDetector {
    pub fn new(regions: Vec<Region>) -> Self {
        Self {
            regions: Some(regions),
        }
    }

    pub fn failing() -> Self {
        Self { regions: None }
    }
}

#[async_trait]
impl LayoutDetector for FixedDetector {
    async fn detect(&self, _image: &RgbImage) -> IngestResult<Vec<Region>> {
        self.regions
            .clone()
            .ok_or_else(|| IngestError::DetectionError("检测服务不可用".to_string()))
    }
}

pub struct ScriptedTranscriber {
    output: Option<String>,
    calls: AtomicUsize,
}

impl ScriptedTranscriber {
    pub fn new(output: &str) -> Self {
        Self {
            output: Some(output.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            output: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FormulaTranscriber for ScriptedTranscriber {
    async fn transcribe(&self, pdf_path: &Path) -> IngestResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert!(pdf_path.exists(), "转写输入 PDF 应当存在");
        self.output
            .clone()
            .ok_or_else(|| IngestError::FormulaError("nougat exited with status 1".to_string()))
    }
}

/// 原样返回输入的朗读转换
pub struct EchoSpeech;

impl LatexToSpeech for EchoSpeech {
    fn convert(&self, expression: &str) -> IngestResult<String> {
        Ok(expression.to_string())
    }
}

#[derive(Default)]
pub struct MemoryObjectStore {
    pub objects: Mutex<Vec<(String, usize)>>,
    pub fail: bool,
}

impl MemoryObjectStore {
    pub fn keys(&self) -> Vec<String> {
        self.objects
            .lock()
            .unwrap()
            .iter()
            .map(|(k, _)| k.clone())
            .collect()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, bytes: Vec<u8>, key: &str) -> IngestResult<String> {
        if self.fail {
            return Err(IngestError::StorageError("上传被拒绝".to_string()));
        }
        self.objects
            .lock()
            .unwrap()
            .push((key.to_string(), bytes.len()));
        Ok(format!("mem://{key}"))
    }
}

#[derive(Default)]
pub struct MemoryErrorSink {
    pub entries: Mutex<Vec<(String, Option<usize>, String)>>,
}

#[async_trait]
impl ErrorSink for MemoryErrorSink {
    async fn record(
        &self,
        book_id: &str,
        _book: &str,
        page_number: Option<usize>,
        error: &str,
        _location: &str,
    ) -> IngestResult<()> {
        self.entries
            .lock()
            .unwrap()
            .push((book_id.to_string(), page_number, error.to_string()));
        Ok(())
    }
}

/// 用预先准备的页面图像代替真实栅格化
pub struct FakeRasterizer {
    pub pages: Vec<RgbImage>,
}

#[async_trait]
impl PageRasterizer for FakeRasterizer {
    async fn page_count(&self, _pdf_path: &Path) -> IngestResult<usize> {
        Ok(self.pages.len())
    }

    async fn render(
        &self,
        _pdf_path: &Path,
        page_index: usize,
        output: &Path,
    ) -> IngestResult<PathBuf> {
        let page = self
            .pages
            .get(page_index)
            .ok_or_else(|| IngestError::PdfError(format!("页码越界: {page_index}")))?;
        page.save_with_format(output, image::ImageFormat::Png)?;
        Ok(output.to_path_buf())
    }
}

/// 由给定协作方组装的服务集合
pub fn services(
    general: Vec<Region>,
    table: Vec<Region>,
    recognizer: Arc<ColorRecognizer>,
    transcriber: Arc<ScriptedTranscriber>,
    store: Arc<MemoryObjectStore>,
) -> Services {
    Services {
        general_detector: Arc::new(FixedDetector::new(general)),
        table_detector: Arc::new(FixedDetector::new(table)),
        recognizer: recognizer.clone(),
        table_extractor: Arc::new(TableParser::new(recognizer, store.clone(), "tables")),
        transcriber,
        speech: Arc::new(EchoSpeech),
        object_store: store,
    }
}
