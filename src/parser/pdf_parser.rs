use async_trait::async_trait;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use image::RgbImage;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::{debug, info};

use crate::services::PageRasterizer;
use crate::utils::{IngestError, IngestResult};

/// 读取PDF页数
pub fn page_count(pdf_path: &Path) -> IngestResult<usize> {
    if !pdf_path.exists() {
        return Err(IngestError::PdfError(format!(
            "PDF文件不存在: {}",
            pdf_path.display()
        )));
    }
    let doc = Document::load(pdf_path)?;
    Ok(doc.get_pages().len())
}

/// 把栅格页面包装成单页 PDF：一个 FlateDecode 压缩的 DeviceRGB 图像 XObject 铺满整页。
/// 页面尺寸按 `dpi` 换算为 PDF 点。
pub fn image_to_pdf(image: &RgbImage, dpi: u32) -> IngestResult<Vec<u8>> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(IngestError::PdfError("空图像无法生成PDF".to_string()));
    }

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(image.as_raw())?;
    let compressed = encoder.finish()?;

    let dpi = dpi.max(1) as i64;
    let page_w = (width as i64 * 72 / dpi).max(1);
    let page_h = (height as i64 * 72 / dpi).max(1);

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let image_id = doc.add_object(Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => width as i64,
            "Height" => height as i64,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
            "Filter" => "FlateDecode",
        },
        compressed,
    ));

    let content = Content {
        operations: vec![
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![
                    page_w.into(),
                    0.into(),
                    0.into(),
                    page_h.into(),
                    0.into(),
                    0.into(),
                ],
            ),
            Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
            Operation::new("Q", vec![]),
        ],
    };
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));

    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
        "Resources" => dictionary! {
            "XObject" => dictionary! { "Im0" => image_id },
        },
        "MediaBox" => vec![0.into(), 0.into(), page_w.into(), page_h.into()],
    });

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)?;
    debug!("生成单页PDF: {}x{} px -> {} 字节", width, height, bytes.len());
    Ok(bytes)
}

/// 在阻塞线程池中包装页面并写入 `dir` 下的临时 PDF；文件随返回值析构删除
pub async fn write_page_pdf(
    image: &RgbImage,
    dpi: u32,
    page_number: usize,
    dir: &Path,
) -> IngestResult<NamedTempFile> {
    let image = image.clone();
    let dir = dir.to_path_buf();
    tokio::task::spawn_blocking(move || -> IngestResult<NamedTempFile> {
        let bytes = image_to_pdf(&image, dpi)?;
        let mut file = tempfile::Builder::new()
            .prefix(&format!("page_{}_", page_number + 1))
            .suffix(".pdf")
            .tempfile_in(&dir)?;
        file.write_all(&bytes)?;
        file.flush()?;
        Ok(file)
    })
    .await
    .map_err(|e| IngestError::PdfError(format!("PDF包装任务失败: {e}")))?
}

/// 调用 pdftoppm 渲染单页 JPEG
pub struct PdftoppmRasterizer {
    command: String,
    dpi: u32,
}

impl PdftoppmRasterizer {
    pub fn new(command: impl Into<String>, dpi: u32) -> Self {
        Self {
            command: command.into(),
            dpi,
        }
    }
}

#[async_trait]
impl PageRasterizer for PdftoppmRasterizer {
    async fn page_count(&self, pdf_path: &Path) -> IngestResult<usize> {
        let path = pdf_path.to_path_buf();
        tokio::task::spawn_blocking(move || page_count(&path))
            .await
            .map_err(|e| IngestError::PdfError(format!("页数读取任务失败: {e}")))?
    }

    async fn render(
        &self,
        pdf_path: &Path,
        page_index: usize,
        output: &Path,
    ) -> IngestResult<PathBuf> {
        let page = (page_index + 1).to_string();
        // pdftoppm appends the extension itself
        let prefix = output.with_extension("");

        let result = Command::new(&self.command)
            .arg("-f")
            .arg(&page)
            .arg("-l")
            .arg(&page)
            .arg("-r")
            .arg(self.dpi.to_string())
            .arg("-jpeg")
            .arg("-singlefile")
            .arg(pdf_path)
            .arg(&prefix)
            .output()
            .await?;

        if !result.status.success() {
            return Err(IngestError::PdfError(format!(
                "{} 渲染第 {} 页失败: {}",
                self.command,
                page,
                String::from_utf8_lossy(&result.stderr).trim()
            )));
        }

        let rendered = prefix.with_extension("jpg");
        if rendered != output {
            tokio::fs::rename(&rendered, output).await?;
        }
        info!("渲染第 {} 页: {}", page, output.display());
        Ok(output.to_path_buf())
    }
}
