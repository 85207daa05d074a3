//! 整本书的入库编排：获取 PDF、逐页栅格化并并发提取、持久化、去除重复标题、清理临时文件

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::crawler::{BookFetcher, BookSource, FetchedBook};
use crate::parser::{
    new_id, CaptionScrubber, Document, FaultStage, Page, PageContentExtractor, PageFault, PageOutcome,
};
use crate::services::{ErrorSink, PageRasterizer, Services};
use crate::storage::Database;
use crate::utils::IngestResult;

#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub work_dir: PathBuf,
    pub workers: usize,
    pub dpi: u32,
    pub figure_folder: String,
}

impl IngestSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            work_dir: PathBuf::from(&config.pipeline.work_dir),
            workers: config.pipeline.worker_count(),
            dpi: config.pipeline.dpi,
            figure_folder: config.object_store.figure_folder.clone(),
        }
    }
}

/// 单本书的处理结果
#[derive(Debug, Clone, Default)]
pub struct BookReport {
    pub book_id: String,
    pub book: String,
    pub pages: usize,
    pub degraded_pages: usize,
    pub faults: usize,
    pub persisted: bool,
    pub scrubbed: bool,
}

pub struct BookIngestor {
    extractor: Arc<PageContentExtractor>,
    rasterizer: Arc<dyn PageRasterizer>,
    fetcher: BookFetcher,
    db: Arc<Database>,
    errors: Arc<dyn ErrorSink>,
    scrubber: CaptionScrubber,
    settings: IngestSettings,
}

impl BookIngestor {
    pub fn new(
        services: &Services,
        rasterizer: Arc<dyn PageRasterizer>,
        fetcher: BookFetcher,
        db: Arc<Database>,
        errors: Arc<dyn ErrorSink>,
        settings: IngestSettings,
    ) -> Self {
        Self {
            extractor: Arc::new(PageContentExtractor::new(
                services,
                settings.dpi,
                settings.figure_folder.clone(),
            )),
            rasterizer,
            fetcher,
            db,
            errors,
            scrubber: CaptionScrubber::new(),
            settings,
        }
    }

    /// 处理一本书；所有失败都记录到错误文档，不向调用方返回错误
    pub async fn ingest(&self, source: &BookSource) -> BookReport {
        let started = Instant::now();
        let mut report = BookReport {
            book_id: new_id(),
            book: source.book_name(),
            ..Default::default()
        };
        info!("开始处理书籍: {} ({})", report.book, report.book_id);

        let fetched = match self.fetcher.fetch(source).await {
            Ok(fetched) => fetched,
            Err(e) => {
                let fault = PageFault::new(None, None, FaultStage::Book, format!("获取书籍失败: {e}"));
                self.record(&report, &fault).await;
                report.faults += 1;
                return report;
            }
        };

        let book_dir = self.settings.work_dir.join(book_stem(&fetched.path));
        if let Err(e) = self.run(&fetched, &book_dir, &mut report).await {
            let fault = PageFault::new(None, None, FaultStage::Book, e.to_string());
            self.record(&report, &fault).await;
            report.faults += 1;
        }

        fetched.discard().await;
        if let Err(e) = tokio::fs::remove_dir_all(&book_dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("清理工作目录失败 {}: {}", book_dir.display(), e);
            }
        }

        info!(
            "书籍处理完成: {} 共 {} 页, 降级 {} 页, 失败记录 {} 条",
            report.book, report.pages, report.degraded_pages, report.faults
        );
        debug!("书籍 {} 处理耗时 {:?}", report.book_id, started.elapsed());
        report
    }

    async fn run(&self, fetched: &FetchedBook, book_dir: &Path, report: &mut BookReport) -> IngestResult<()> {
        tokio::fs::create_dir_all(book_dir).await?;
        let page_count = self.rasterizer.page_count(&fetched.path).await?;
        info!("{} 共 {} 页", report.book, page_count);

        let outcomes = self.process_pages(&fetched.path, book_dir, page_count).await;

        let mut pages = Vec::with_capacity(page_count);
        for outcome in outcomes {
            if outcome.is_degraded() {
                report.degraded_pages += 1;
            }
            let (content, faults) = outcome.into_parts();
            for fault in &faults {
                self.record(report, fault).await;
            }
            report.faults += faults.len();
            pages.push(Page::new(new_id(), content));
        }
        report.pages = pages.len();

        let document = Document {
            book_id: report.book_id.clone(),
            book: report.book.clone(),
            pages,
        };
        self.db.insert_document(&document).await?;
        report.persisted = true;

        report.scrubbed = self.scrub(&report.book_id).await?;
        Ok(())
    }

    /// 并发处理所有页面，结果按页码排序
    async fn process_pages(&self, pdf_path: &Path, book_dir: &Path, page_count: usize) -> Vec<PageOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.settings.workers.max(1)));
        let mut tasks = JoinSet::new();

        for page_number in 0..page_count {
            let semaphore = semaphore.clone();
            let extractor = self.extractor.clone();
            let rasterizer = self.rasterizer.clone();
            let pdf_path = pdf_path.to_path_buf();
            let book_dir = book_dir.to_path_buf();

            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    let fault = PageFault::new(Some(page_number), None, FaultStage::Page, "工作池已关闭");
                    return (page_number, PageOutcome::Degraded(fault));
                };
                let outcome = process_page(&extractor, rasterizer.as_ref(), &pdf_path, &book_dir, page_number).await;
                (page_number, outcome)
            });
        }

        let mut slots: Vec<Option<PageOutcome>> = (0..page_count).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((page_number, outcome)) => slots[page_number] = Some(outcome),
                Err(e) => error!("页面任务异常退出: {}", e),
            }
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(page_number, slot)| {
                slot.unwrap_or_else(|| {
                    PageOutcome::Degraded(PageFault::new(
                        Some(page_number),
                        None,
                        FaultStage::Page,
                        "页面任务异常退出",
                    ))
                })
            })
            .collect()
    }

    /// 对已存文档去除重复标题，返回记录是否被修改
    pub async fn scrub(&self, book_id: &str) -> IngestResult<bool> {
        let Some(mut document) = self.db.find_document(book_id).await? else {
            warn!("未找到文档: {}", book_id);
            return Ok(false);
        };

        self.scrubber.scrub(&mut document);
        let modified = self.db.update_pages(book_id, &document.pages).await?;
        if modified {
            info!("文档 {} 已更新", book_id);
        } else {
            info!("文档 {} 无需更新", book_id);
        }
        Ok(modified)
    }

    /// 处理目录中的全部文件；非 PDF 文件记录错误后跳过。
    /// 给出 `archive_dir` 时，处理过的 PDF 移入该目录。
    pub async fn batch(&self, dir: &Path, archive_dir: Option<&Path>) -> IngestResult<Vec<BookReport>> {
        let mut entries = Vec::new();
        let mut read_dir = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            if entry.file_type().await?.is_file() {
                entries.push(entry.path());
            }
        }
        entries.sort();
        info!("批量处理 {}: {} 个文件", dir.display(), entries.len());

        let mut reports = Vec::new();
        for path in entries {
            let source = BookSource::Local(path.clone());
            if !source.is_pdf() {
                let name = source.book_name();
                warn!("跳过非 PDF 文件: {}", name);
                let report = BookReport {
                    book_id: new_id(),
                    book: name.clone(),
                    ..Default::default()
                };
                let fault = PageFault::new(None, None, FaultStage::Book, format!("{name} is not a pdf"));
                self.record(&report, &fault).await;
                continue;
            }

            reports.push(self.ingest(&source).await);

            if let Some(archive) = archive_dir {
                tokio::fs::create_dir_all(archive).await?;
                let target = archive.join(source.book_name());
                if let Err(e) = tokio::fs::rename(&path, &target).await {
                    warn!("归档失败 {}: {}", path.display(), e);
                }
            }
        }
        Ok(reports)
    }

    async fn record(&self, report: &BookReport, fault: &PageFault) {
        if let Err(e) = self
            .errors
            .record(&report.book_id, &report.book, fault.page_number, &fault.describe(), &fault.location)
            .await
        {
            error!("写入错误记录失败 ({}): {}", report.book_id, e);
        }
    }
}

/// 栅格化单页到 `page_<n+1>.jpg`，提取内容后删除图像
async fn process_page(
    extractor: &PageContentExtractor,
    rasterizer: &dyn PageRasterizer,
    pdf_path: &Path,
    book_dir: &Path,
    page_number: usize,
) -> PageOutcome {
    let started = Instant::now();
    let image_path = book_dir.join(format!("page_{}.jpg", page_number + 1));

    let image = match load_page(rasterizer, pdf_path, page_number, &image_path).await {
        Ok(image) => image,
        Err(e) => {
            warn!("第 {} 页栅格化失败: {}", page_number, e);
            return PageOutcome::Degraded(PageFault::new(
                Some(page_number),
                None,
                FaultStage::Rasterize,
                e.to_string(),
            ));
        }
    };

    let outcome = extractor.process(&image, page_number, book_dir).await;
    if let Err(e) = tokio::fs::remove_file(&image_path).await {
        debug!("删除页面图像失败 {}: {}", image_path.display(), e);
    }
    debug!("第 {} 页处理耗时 {:?}", page_number, started.elapsed());
    outcome
}

async fn load_page(
    rasterizer: &dyn PageRasterizer,
    pdf_path: &Path,
    page_number: usize,
    image_path: &Path,
) -> IngestResult<image::RgbImage> {
    let rendered = rasterizer.render(pdf_path, page_number, image_path).await?;
    let bytes = tokio::fs::read(&rendered).await?;
    Ok(image::load_from_memory(&bytes)?.to_rgb8())
}

fn book_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "book".to_string())
}
