use image::RgbImage;
use serde::Serialize;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::caption::CaptionResolver;
use super::cropper::RegionCropper;
use super::formula_extractor::FormulaExtractor;
use super::placeholder::PlaceholderRegistry;
use super::region::{has_structure, merge_detections, reading_order, Region, RegionKind};
use super::{FigureRecord, PageContent};
use crate::services::{LayoutDetector, ObjectStore, Services, TableExtractor, TextRecognizer};
use crate::utils::text::normalize_whitespace;
use crate::utils::IngestResult;

/// 失败发生的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FaultStage {
    Detection,
    Region,
    Formula,
    Rasterize,
    Page,
    /// 整本书级别：下载、读取页数、持久化
    Book,
}

/// 页面或区块级别的非致命失败
#[derive(Debug, Clone, PartialEq)]
pub struct PageFault {
    pub page_number: Option<usize>,
    pub region_index: Option<usize>,
    pub stage: FaultStage,
    pub message: String,
    /// 产生失败的源码位置 `file:line`
    pub location: String,
}

impl PageFault {
    #[track_caller]
    pub fn new(
        page_number: Option<usize>,
        region_index: Option<usize>,
        stage: FaultStage,
        message: impl Into<String>,
    ) -> Self {
        let caller = std::panic::Location::caller();
        Self {
            page_number,
            region_index,
            stage,
            message: message.into(),
            location: format!("{}:{}", caller.file(), caller.line()),
        }
    }

    pub fn describe(&self) -> String {
        match self.region_index {
            Some(i) => format!("区块 #{}: {}", i, self.message),
            None => self.message.clone(),
        }
    }
}

/// 成功提取的页面，附带需要记录的非致命失败
#[derive(Debug)]
pub struct PageExtraction {
    pub content: PageContent,
    pub faults: Vec<PageFault>,
}

#[derive(Debug)]
pub enum PageOutcome {
    Extracted(PageExtraction),
    /// 页面整体失败，降级为空页
    Degraded(PageFault),
}

impl PageOutcome {
    pub fn is_degraded(&self) -> bool {
        matches!(self, PageOutcome::Degraded(_))
    }

    pub fn into_parts(self) -> (PageContent, Vec<PageFault>) {
        match self {
            PageOutcome::Extracted(e) => (e.content, e.faults),
            PageOutcome::Degraded(fault) => (PageContent::default(), vec![fault]),
        }
    }
}

/// 单页内容组装：合并检测结果、选择策略、按阅读顺序分派区块、整页公式转写
pub struct PageContentExtractor {
    general_detector: Arc<dyn LayoutDetector>,
    table_detector: Arc<dyn LayoutDetector>,
    recognizer: Arc<dyn TextRecognizer>,
    table_extractor: Arc<dyn TableExtractor>,
    object_store: Arc<dyn ObjectStore>,
    formula: FormulaExtractor,
    captions: CaptionResolver,
    cropper: RegionCropper,
    figure_folder: String,
}

impl PageContentExtractor {
    pub fn new(services: &Services, dpi: u32, figure_folder: impl Into<String>) -> Self {
        Self {
            general_detector: services.general_detector.clone(),
            table_detector: services.table_detector.clone(),
            recognizer: services.recognizer.clone(),
            table_extractor: services.table_extractor.clone(),
            object_store: services.object_store.clone(),
            formula: FormulaExtractor::new(
                services.transcriber.clone(),
                services.speech.clone(),
                dpi,
            ),
            captions: CaptionResolver::new(services.recognizer.clone()),
            cropper: RegionCropper::new(),
            figure_folder: figure_folder.into(),
        }
    }

    /// 对页面图像运行两路版面检测后组装内容
    pub async fn process(&self, image: &RgbImage, page_number: usize, scratch_dir: &Path) -> PageOutcome {
        let detections = tokio::try_join!(
            self.general_detector.detect(image),
            self.table_detector.detect(image)
        );

        match detections {
            Ok((general, table)) => {
                self.assemble(image, page_number, general, table, scratch_dir)
                    .await
            }
            Err(e) => {
                warn!("第 {} 页版面检测失败: {}", page_number, e);
                PageOutcome::Degraded(PageFault::new(
                    Some(page_number),
                    None,
                    FaultStage::Detection,
                    e.to_string(),
                ))
            }
        }
    }

    /// 根据已有检测结果组装页面
    pub async fn assemble(
        &self,
        image: &RgbImage,
        page_number: usize,
        general: Vec<Region>,
        table: Vec<Region>,
        scratch_dir: &Path,
    ) -> PageOutcome {
        let regions = merge_detections(general, table);
        debug!("第 {} 页合并后区块 {} 个", page_number, regions.len());

        if has_structure(&regions) {
            self.structured(image, page_number, regions, scratch_dir).await
        } else {
            self.fallback(image, page_number, scratch_dir).await
        }
    }

    async fn fallback(&self, image: &RgbImage, page_number: usize, scratch_dir: &Path) -> PageOutcome {
        info!("第 {} 页未检测到表格或插图，使用整页转写", page_number);
        let mut registry = PlaceholderRegistry::new();

        match self
            .formula
            .extract(image, &mut registry, page_number, scratch_dir)
            .await
        {
            Ok(extraction) => PageOutcome::Extracted(PageExtraction {
                content: registry.into_content(extraction.text, None),
                faults: extraction.tool_fault.into_iter().collect(),
            }),
            Err(e) => {
                warn!("第 {} 页整页转写失败: {}", page_number, e);
                PageOutcome::Degraded(PageFault::new(
                    Some(page_number),
                    None,
                    FaultStage::Page,
                    e.to_string(),
                ))
            }
        }
    }

    async fn structured(
        &self,
        image: &RgbImage,
        page_number: usize,
        regions: Vec<Region>,
        scratch_dir: &Path,
    ) -> PageOutcome {
        let ordered = reading_order(regions);
        let mut registry = PlaceholderRegistry::new();
        let mut narrative = String::new();
        let mut faults = Vec::new();

        for (i, region) in ordered.iter().enumerate() {
            let predecessor = i.checked_sub(1).map(|j| &ordered[j]);
            let successor = ordered.get(i + 1);
            let started = Instant::now();

            match self
                .handle_region(image, region, predecessor, successor, &mut registry)
                .await
            {
                Ok(fragment) => narrative.push_str(&fragment),
                Err(e) => {
                    warn!("第 {} 页 {} 区块 #{} 提取失败，跳过: {}", page_number, region.kind, i, e);
                    faults.push(PageFault::new(
                        Some(page_number),
                        Some(i),
                        FaultStage::Region,
                        format!("{}: {}", region.kind, e),
                    ));
                }
            }
            debug!("{} 区块 #{} 耗时 {:?}", region.kind, i, started.elapsed());
        }

        let transcription = match self
            .formula
            .extract(image, &mut registry, page_number, scratch_dir)
            .await
        {
            Ok(extraction) => {
                faults.extend(extraction.tool_fault);
                extraction.text
            }
            Err(e) => {
                warn!("第 {} 页公式提取失败: {}", page_number, e);
                return PageOutcome::Degraded(PageFault::new(
                    Some(page_number),
                    None,
                    FaultStage::Page,
                    e.to_string(),
                ));
            }
        };

        let text = normalize_whitespace(&narrative);
        PageOutcome::Extracted(PageExtraction {
            content: registry.into_content(text, Some(transcription)),
            faults,
        })
    }

    async fn handle_region(
        &self,
        image: &RgbImage,
        region: &Region,
        predecessor: Option<&Region>,
        successor: Option<&Region>,
        registry: &mut PlaceholderRegistry,
    ) -> IngestResult<String> {
        match region.kind {
            RegionKind::Table => self.handle_table(image, region, registry).await,
            RegionKind::Figure => {
                self.handle_figure(image, region, predecessor, successor, registry)
                    .await
            }
            RegionKind::Text | RegionKind::Title | RegionKind::List => {
                self.handle_text(image, region).await
            }
        }
    }

    /// 原始识别文本直接拼入正文，页面末尾统一规整
    async fn handle_text(&self, image: &RgbImage, region: &Region) -> IngestResult<String> {
        let crop = self.cropper.crop(image, region)?;
        self.recognizer.recognize(&crop).await
    }

    /// 表格内容与标题交给表格提取器，不插入占位符
    async fn handle_table(
        &self,
        image: &RgbImage,
        region: &Region,
        registry: &mut PlaceholderRegistry,
    ) -> IngestResult<String> {
        let crop = self.cropper.crop(image, region)?;
        let table_id = registry.mint_id();
        let extraction = self.table_extractor.extract(&crop, &table_id).await?;
        registry.add_table(extraction.record);
        Ok(extraction.narrative)
    }

    /// 上传插图、解析图注，返回插图占位符
    async fn handle_figure(
        &self,
        image: &RgbImage,
        region: &Region,
        predecessor: Option<&Region>,
        successor: Option<&Region>,
        registry: &mut PlaceholderRegistry,
    ) -> IngestResult<String> {
        let crop = self.cropper.crop(image, region)?;
        let figure_id = registry.mint_id();

        let caption = self
            .captions
            .resolve(image, predecessor, successor)
            .await?;

        let mut bytes = Vec::new();
        crop.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)?;
        let key = format!("{}/{}.png", self.figure_folder, figure_id);
        let url = self.object_store.put(bytes, &key).await?;

        info!("插图已上传: {} 图注=\"{}\"", url, caption);
        Ok(registry.add_figure(FigureRecord {
            id: figure_id,
            url,
            caption,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::placeholder::{find_tokens, PlaceholderKind};
    use crate::parser::{BoundingBox, Page};
    use crate::services::testing::{
        paint, services, ColorRecognizer, FixedDetector, MemoryObjectStore, ScriptedTranscriber,
    };

    struct Fixture {
        image: RgbImage,
        texts: Vec<(u8, String)>,
        general: Vec<Region>,
        table: Vec<Region>,
        failing_shade: Option<u8>,
        store: MemoryObjectStore,
        transcript: String,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                image: RgbImage::new(1000, 1400),
                texts: Vec::new(),
                general: Vec::new(),
                table: Vec::new(),
                failing_shade: None,
                store: MemoryObjectStore::default(),
                transcript: String::new(),
            }
        }

        fn region(&mut self, kind: RegionKind, y1: f32, y2: f32, shade: u8, text: &str) -> &mut Self {
            let bbox = BoundingBox::new(100.0, y1, 900.0, y2);
            paint(&mut self.image, &bbox, shade);
            self.texts.push((shade, text.to_string()));
            let region = Region::new(kind, bbox, "fixture");
            if kind == RegionKind::Table {
                self.table.push(region);
            } else {
                self.general.push(region);
            }
            self
        }

        async fn run(self) -> (PageOutcome, Arc<ColorRecognizer>, Arc<ScriptedTranscriber>, Arc<MemoryObjectStore>) {
            let pairs: Vec<(u8, &str)> = self.texts.iter().map(|(s, t)| (*s, t.as_str())).collect();
            let mut recognizer = ColorRecognizer::new(&pairs);
            if let Some(shade) = self.failing_shade {
                recognizer = recognizer.failing_on(shade);
            }
            let recognizer = Arc::new(recognizer);
            let transcriber = Arc::new(ScriptedTranscriber::new(&self.transcript));
            let store = Arc::new(self.store);
            let svc = services(self.general, self.table, recognizer.clone(), transcriber.clone(), store.clone());

            let extractor = PageContentExtractor::new(&svc, 300, "figs");
            let scratch = tempfile::tempdir().unwrap();
            let outcome = extractor.process(&self.image, 0, scratch.path()).await;
            (outcome, recognizer, transcriber, store)
        }
    }

    fn extracted(outcome: PageOutcome) -> PageExtraction {
        match outcome {
            PageOutcome::Extracted(e) => e,
            PageOutcome::Degraded(f) => panic!("页面不应降级: {f:?}"),
        }
    }

    #[tokio::test]
    async fn text_only_page_uses_whole_page_transcription() {
        let mut fx = Fixture::new();
        fx.region(RegionKind::Text, 100.0, 300.0, 10, "ocr text");
        fx.transcript = "Hello\n\n  world \\(x+1\\)\n".to_string();

        let (outcome, recognizer, transcriber, _) = fx.run().await;
        let page = extracted(outcome);
        let content = page.content;

        assert!(content.tables.is_empty());
        assert!(content.figures.is_empty());
        assert_eq!(content.equations.len(), 1);
        assert_eq!(
            content.text,
            format!("Hello world {{{{equation:{}}}}}", content.equations[0].id)
        );
        assert!(content.formula_transcription.is_none());
        assert_eq!(recognizer.calls(), 0);
        assert_eq!(transcriber.calls(), 1);
        assert!(page.faults.is_empty());
    }

    #[tokio::test]
    async fn empty_detection_falls_back() {
        let mut fx = Fixture::new();
        fx.transcript = "Only prose.".to_string();
        let (outcome, ..) = fx.run().await;
        let content = extracted(outcome).content;
        assert_eq!(content.text, "Only prose.");
        assert!(content.equations.is_empty());
    }

    #[tokio::test]
    async fn structured_page_follows_reading_order() {
        let mut fx = Fixture::new();
        fx.region(RegionKind::Text, 800.0, 900.0, 30, "Closing words\n")
            .region(RegionKind::Title, 50.0, 100.0, 10, "Chapter One\n")
            .region(RegionKind::Figure, 400.0, 700.0, 40, "")
            .region(RegionKind::Text, 200.0, 300.0, 20, "Intro\nparagraph\n");
        fx.transcript = "full page \\(z\\)".to_string();

        let (outcome, _, _, store) = fx.run().await;
        let content = extracted(outcome).content;

        assert_eq!(content.figures.len(), 1);
        let figure = &content.figures[0];
        assert_eq!(figure.caption, "");
        assert_eq!(figure.url, format!("mem://figs/{}.png", figure.id));
        assert_eq!(store.keys(), vec![format!("figs/{}.png", figure.id)]);
        assert_eq!(
            content.text,
            format!("Chapter One Intro paragraph {{{{figure:{}}}}}Closing words", figure.id)
        );

        // 整页转写单独保存，公式仅来自转写
        assert_eq!(content.equations.len(), 1);
        assert_eq!(
            content.formula_transcription,
            Some(format!("full page {{{{equation:{}}}}}", content.equations[0].id))
        );
        assert!(find_tokens(&content.text)
            .iter()
            .all(|(k, _)| *k == PlaceholderKind::Figure));
        let page = Page::new("p".to_string(), content);
        assert!(page.dangling_placeholders().is_empty());
    }

    #[tokio::test]
    async fn figure_takes_caption_from_preceding_block() {
        let mut fx = Fixture::new();
        fx.region(RegionKind::Title, 100.0, 200.0, 10, "Figure 2. A diagram\n")
            .region(RegionKind::Figure, 300.0, 600.0, 40, "");

        let (outcome, ..) = fx.run().await;
        let content = extracted(outcome).content;
        assert_eq!(content.figures.len(), 1);
        let figure = &content.figures[0];
        assert_eq!(figure.caption, "Figure 2. A diagram");
        assert_eq!(
            content.text,
            format!("Figure 2. A diagram {{{{figure:{}}}}}", figure.id)
        );
    }

    #[tokio::test]
    async fn general_detector_tables_are_ignored() {
        let mut fx = Fixture::new();
        fx.region(RegionKind::Figure, 600.0, 900.0, 40, "");
        let bbox = BoundingBox::new(100.0, 100.0, 900.0, 400.0);
        paint(&mut fx.image, &bbox, 60);
        fx.texts.push((60, "Table 9: should not appear\nA  B\n1  2\n".to_string()));
        fx.general.push(Region::new(RegionKind::Table, bbox, "general"));

        let (outcome, ..) = fx.run().await;
        let content = extracted(outcome).content;
        assert!(content.tables.is_empty());
        assert!(!content.text.contains("Table 9"));
        assert_eq!(content.figures.len(), 1);
    }

    #[tokio::test]
    async fn table_region_contributes_text_and_record_without_placeholder() {
        let mut fx = Fixture::new();
        fx.region(RegionKind::Table, 300.0, 500.0, 70, "Table 1: Results\nA  B\n1  2\n");

        let (outcome, ..) = fx.run().await;
        let content = extracted(outcome).content;
        assert_eq!(content.tables.len(), 1);
        assert_eq!(content.tables[0].caption, "Table 1: Results");
        assert!(content.tables[0].cells.is_some());
        assert_eq!(content.text, "Table 1: Results A B 1 2");
        assert!(find_tokens(&content.text).is_empty());
    }

    #[tokio::test]
    async fn failing_region_is_skipped_and_recorded() {
        let mut fx = Fixture::new();
        fx.region(RegionKind::Text, 100.0, 200.0, 10, "kept\n")
            .region(RegionKind::Text, 300.0, 400.0, 20, "lost\n")
            .region(RegionKind::Figure, 600.0, 900.0, 40, "");
        fx.failing_shade = Some(20);

        let (outcome, ..) = fx.run().await;
        let page = extracted(outcome);
        assert_eq!(page.content.text, "kept");
        assert_eq!(page.faults.len(), 2);
        let text_fault = &page.faults[0];
        assert_eq!(text_fault.stage, FaultStage::Region);
        assert_eq!(text_fault.region_index, Some(1));
        // 插图的前驱 OCR 同样失败，插图被整体跳过
        assert_eq!(page.faults[1].region_index, Some(2));
        assert!(page.content.figures.is_empty());
        assert!(find_tokens(&page.content.text).is_empty());
    }

    #[tokio::test]
    async fn failed_upload_leaves_no_orphan_placeholder() {
        let mut fx = Fixture::new();
        fx.region(RegionKind::Figure, 300.0, 600.0, 40, "");
        fx.store = MemoryObjectStore {
            fail: true,
            ..Default::default()
        };

        let (outcome, ..) = fx.run().await;
        let page = extracted(outcome);
        assert!(page.content.figures.is_empty());
        assert_eq!(page.content.text, "");
        assert_eq!(page.faults.len(), 1);
    }

    #[tokio::test]
    async fn detector_failure_degrades_page() {
        let recognizer = Arc::new(ColorRecognizer::new(&[]));
        let transcriber = Arc::new(ScriptedTranscriber::new(""));
        let mut svc = services(
            vec![],
            vec![],
            recognizer,
            transcriber.clone(),
            Arc::new(MemoryObjectStore::default()),
        );
        svc.table_detector = Arc::new(FixedDetector::failing());
        let extractor = PageContentExtractor::new(&svc, 300, "figs");
        let scratch = tempfile::tempdir().unwrap();

        let outcome = extractor.process(&RgbImage::new(10, 10), 7, scratch.path()).await;
        assert!(outcome.is_degraded());
        let (content, faults) = outcome.into_parts();
        assert_eq!(content, PageContent::default());
        assert_eq!(faults[0].stage, FaultStage::Detection);
        assert_eq!(faults[0].page_number, Some(7));
        assert!(faults[0].location.contains("page_extractor.rs"));
        assert_eq!(transcriber.calls(), 0);
    }
}
