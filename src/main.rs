mod config;
mod crawler;
mod parser;
mod pipeline;
mod services;
mod storage;
mod utils;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use config::{AppConfig, SETTINGS_PATH};
use crawler::{BookFetcher, BookSource};
use parser::pdf_parser::PdftoppmRasterizer;
use parser::TableParser;
use pipeline::{BookIngestor, BookReport, IngestSettings};
use services::{
    CommandTranscriber, HttpLayoutDetector, HttpObjectStore, LocalObjectStore, ObjectStore,
    RuleBasedSpeech, Services, TesseractRecognizer, TextRecognizer,
};
use storage::{Database, ErrorRecorder};
use utils::logger;

#[derive(Parser)]
#[command(name = "bookingest")]
#[command(about = "书籍 PDF 页面内容提取与入库", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 初始化配置和数据库
    Init,
    /// 处理一本或多本书（本地路径、HTTP 地址或 S3 控制台链接）
    Ingest {
        #[arg(required = true)]
        sources: Vec<String>,
    },
    /// 处理目录中的全部 PDF
    Batch {
        dir: PathBuf,
    },
    /// 按 cron 表达式定时处理收件目录
    Schedule,
    /// 对已入库的书重新去除重复标题
    Scrub {
        book_id: String,
    },
    /// 列出已入库的书
    List,
    /// 清理工作目录、本地对象存储和数据库
    Clean,
}

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    logger::init_logger();
    info!("bookingest 启动");

    let cli = Cli::parse();

    match cli.command {
        Commands::Init => init_command().await?,
        Commands::Ingest { sources } => ingest_command(sources).await?,
        Commands::Batch { dir } => batch_command(dir).await?,
        Commands::Schedule => schedule_command().await?,
        Commands::Scrub { book_id } => scrub_command(&book_id).await?,
        Commands::List => list_command().await?,
        Commands::Clean => clean_command().await?,
    }

    Ok(())
}

async fn open_database(config: &AppConfig) -> Result<Arc<Database>> {
    if let Some(parent) = Path::new(&config.storage.database_path).parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let db = Database::new(&config.database_url())
        .await
        .context("连接数据库失败")?;
    db.init_schema().await?;
    Ok(Arc::new(db))
}

fn build_object_store(config: &AppConfig) -> Result<Arc<dyn ObjectStore>> {
    let store = &config.object_store;
    match store.backend.as_str() {
        "http" => Ok(Arc::new(HttpObjectStore::new(
            &store.endpoint,
            &store.bucket,
            &store.api_token,
            store.url_prefix(),
        )?)),
        "local" => Ok(Arc::new(LocalObjectStore::new(&store.local_dir, store.url_prefix()))),
        other => anyhow::bail!("未知的对象存储类型: {}", other),
    }
}

fn build_services(config: &AppConfig) -> Result<Services> {
    let detector = &config.detector;
    let recognizer: Arc<dyn TextRecognizer> = Arc::new(TesseractRecognizer::new(
        &config.ocr.command,
        &config.ocr.language,
        config.ocr.page_segmentation_mode,
        Path::new(&config.pipeline.work_dir).join("ocr"),
    ));
    let object_store = build_object_store(config)?;

    Ok(Services {
        general_detector: Arc::new(HttpLayoutDetector::new(
            &detector.general_url,
            &detector.general_model,
            detector.timeout_secs,
        )?),
        table_detector: Arc::new(HttpLayoutDetector::new(
            &detector.table_url,
            &detector.table_model,
            detector.timeout_secs,
        )?),
        table_extractor: Arc::new(TableParser::new(
            recognizer.clone(),
            object_store.clone(),
            config.object_store.figure_folder.clone(),
        )),
        recognizer,
        transcriber: Arc::new(CommandTranscriber::new(
            &config.formula.command,
            config.formula.args.clone(),
        )),
        speech: Arc::new(RuleBasedSpeech::new()),
        object_store,
    })
}

async fn build_ingestor(config: &AppConfig) -> Result<BookIngestor> {
    let db = open_database(config).await?;
    let services = build_services(config)?;
    let work_dir = PathBuf::from(&config.pipeline.work_dir);
    tokio::fs::create_dir_all(&work_dir).await?;

    Ok(BookIngestor::new(
        &services,
        Arc::new(PdftoppmRasterizer::new(
            &config.pipeline.rasterizer_command,
            config.pipeline.dpi,
        )),
        BookFetcher::new(work_dir.join("downloads"), config.pipeline.download_timeout_secs)?,
        db.clone(),
        Arc::new(ErrorRecorder::new(db)),
        IngestSettings::from_config(config),
    ))
}

fn log_report(report: &BookReport) {
    if report.persisted {
        info!(
            "✅ {} -> {} ({} 页, 降级 {} 页, 失败记录 {} 条)",
            report.book, report.book_id, report.pages, report.degraded_pages, report.faults
        );
    } else {
        warn!("❌ {} 未能入库，详见错误记录 {}", report.book, report.book_id);
    }
}

async fn init_command() -> Result<()> {
    info!("初始化系统...");

    let app_config = AppConfig::default();
    tokio::fs::create_dir_all("config").await?;
    tokio::fs::create_dir_all(&app_config.pipeline.work_dir).await?;
    tokio::fs::create_dir_all(&app_config.schedule.inbox_dir).await?;

    // 生成默认配置文件
    app_config.save(SETTINGS_PATH)?;
    info!("已生成配置文件: {}", SETTINGS_PATH);

    info!("正在初始化数据库: {}", app_config.database_url());
    open_database(&app_config).await?;
    info!("数据库初始化完成");

    info!("✅ 系统初始化完成！");
    info!("下一步:");
    info!("  1. 编辑 {} 配置检测服务与对象存储", SETTINGS_PATH);
    info!("  2. 运行 'bookingest ingest <book.pdf>' 处理一本书");
    Ok(())
}

async fn ingest_command(sources: Vec<String>) -> Result<()> {
    let app_config = AppConfig::load()?;
    let ingestor = build_ingestor(&app_config).await?;

    for input in sources {
        let source = match BookSource::parse(&input) {
            Ok(source) => source,
            Err(e) => {
                error!("无法解析书籍来源 {}: {}", input, e);
                continue;
            }
        };
        let report = ingestor.ingest(&source).await;
        log_report(&report);
    }
    Ok(())
}

async fn batch_command(dir: PathBuf) -> Result<()> {
    let app_config = AppConfig::load()?;
    let ingestor = build_ingestor(&app_config).await?;

    let reports = ingestor.batch(&dir, None).await?;
    for report in &reports {
        log_report(report);
    }
    info!("批量处理完成: {} 本", reports.len());
    Ok(())
}

async fn schedule_command() -> Result<()> {
    info!("启动定时任务调度器...");

    let app_config = AppConfig::load()?;
    let ingestor = Arc::new(build_ingestor(&app_config).await?);
    let inbox = PathBuf::from(&app_config.schedule.inbox_dir);
    tokio::fs::create_dir_all(&inbox).await?;

    let scheduler = utils::scheduler::TaskScheduler::new().await?;
    let job_fn = Arc::new(move || {
        let ingestor = ingestor.clone();
        let inbox = inbox.clone();
        async move {
            let archive = inbox.join("processed");
            match ingestor.batch(&inbox, Some(&archive)).await {
                Ok(reports) => {
                    for report in &reports {
                        log_report(report);
                    }
                    info!("定时入库完成: {} 本", reports.len());
                }
                Err(e) => error!("定时入库失败: {}", e),
            }
        }
    });

    scheduler.add_job(&app_config.schedule.cron, job_fn).await?;
    scheduler.start().await?;

    info!("调度器运行中，按 Ctrl+C 停止");

    // 保持运行
    tokio::signal::ctrl_c().await?;
    info!("收到停止信号");

    scheduler.shutdown().await?;
    Ok(())
}

async fn scrub_command(book_id: &str) -> Result<()> {
    let app_config = AppConfig::load()?;
    let ingestor = build_ingestor(&app_config).await?;
    let modified = ingestor.scrub(book_id).await?;
    info!("去除重复标题完成: {} (修改: {})", book_id, modified);
    Ok(())
}

async fn list_command() -> Result<()> {
    let app_config = AppConfig::load()?;
    let db = open_database(&app_config).await?;

    let documents = db.list_documents().await?;
    if documents.is_empty() {
        info!("尚无入库书籍");
    }
    for doc in documents {
        info!("{}  {}  {} 页  {}", doc.book_id, doc.book, doc.page_count, doc.created_at);
    }
    Ok(())
}

async fn clean_command() -> Result<()> {
    info!("开始清理数据...");
    let app_config = AppConfig::load()?;

    let work_dir = Path::new(&app_config.pipeline.work_dir);
    match tokio::fs::read_dir(work_dir).await {
        Ok(mut entries) => {
            let mut count = 0u64;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let removed = if entry.file_type().await?.is_dir() {
                    tokio::fs::remove_dir_all(&path).await
                } else {
                    tokio::fs::remove_file(&path).await
                };
                match removed {
                    Ok(()) => count += 1,
                    Err(e) => info!("删除失败 {}: {}", path.display(), e),
                }
            }
            info!("已清理 {}: {} 项", work_dir.display(), count);
        }
        Err(_) => info!("目录不存在，跳过: {}", work_dir.display()),
    }

    if app_config.object_store.backend == "local" {
        LocalObjectStore::new(&app_config.object_store.local_dir, app_config.object_store.url_prefix())
            .clear()
            .await?;
    }

    // 清空数据库表
    match open_database(&app_config).await {
        Ok(db) => db.clear_all_tables().await?,
        Err(e) => info!("数据库连接失败，跳过清空: {}", e),
    }

    info!("✅ 清理完成");
    Ok(())
}
