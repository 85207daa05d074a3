use async_trait::async_trait;
use image::RgbImage;
use regex::Regex;
use std::io::Cursor;
use std::sync::Arc;
use tracing::{debug, info};

use super::{TableCells, TableRecord};
use crate::services::{ObjectStore, TableExtraction, TableExtractor, TextRecognizer};
use crate::utils::text::normalize_whitespace;
use crate::utils::IngestResult;

/// 基于 OCR 的表格提取：识别裁剪图文本，找出 "Table N" 标题行并按列对齐拆分单元格。
/// 无法拆出网格时上传整表图片。
pub struct TableParser {
    recognizer: Arc<dyn TextRecognizer>,
    store: Arc<dyn ObjectStore>,
    folder: String,
    caption_re: Regex,
    column_re: Regex,
}

impl TableParser {
    pub fn new(
        recognizer: Arc<dyn TextRecognizer>,
        store: Arc<dyn ObjectStore>,
        folder: impl Into<String>,
    ) -> Self {
        Self {
            recognizer,
            store,
            folder: folder.into(),
            caption_re: Regex::new(r"(?i)^Table\s+(\d+)[.:]?\s*(.*)$").unwrap(),
            column_re: Regex::new(r"[\t]|\s{2,}").unwrap(),
        }
    }

    /// 返回 (标题, 单元格)。标题为首个 "Table N" 行（已规整空白），否则为空串。
    pub fn parse(&self, text: &str) -> (String, Option<TableCells>) {
        let mut caption = String::new();
        let mut raw_rows: Vec<&str> = Vec::new();

        for line in text.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if caption.is_empty() && self.caption_re.is_match(trimmed) {
                caption = normalize_whitespace(trimmed);
                continue;
            }
            if self.looks_like_table_row(trimmed) {
                raw_rows.push(trimmed);
            }
        }

        let cells = if raw_rows.len() >= 2 {
            self.parse_rows(&raw_rows)
        } else {
            None
        };
        (caption, cells)
    }

    /// Check if a line looks like a table row
    fn looks_like_table_row(&self, line: &str) -> bool {
        if line.len() < 3 {
            return false;
        }
        self.split_columns(line).len() >= 2
    }

    fn split_columns(&self, line: &str) -> Vec<String> {
        self.column_re
            .split(line)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Parse raw text rows into headers and data rows
    fn parse_rows(&self, raw_rows: &[&str]) -> Option<TableCells> {
        let (first, rest) = raw_rows.split_first()?;
        let headers = self.split_columns(first);
        if headers.len() < 2 {
            return None;
        }

        let rows: Vec<Vec<String>> = rest.iter().map(|row| self.split_columns(row)).collect();
        if rows.is_empty() {
            return None;
        }

        Some(TableCells { headers, rows })
    }

    async fn upload_crop(&self, crop: &RgbImage, table_id: &str) -> IngestResult<String> {
        let mut bytes = Vec::new();
        crop.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)?;
        let key = format!("{}/{}.png", self.folder, table_id);
        self.store.put(bytes, &key).await
    }
}

#[async_trait]
impl TableExtractor for TableParser {
    async fn extract(&self, crop: &RgbImage, table_id: &str) -> IngestResult<TableExtraction> {
        let narrative = self.recognizer.recognize(crop).await?;
        let (caption, cells) = self.parse(&narrative);

        let image_url = match cells {
            Some(ref c) => {
                debug!("表格 {}: {} 列, {} 行", table_id, c.headers.len(), c.rows.len());
                None
            }
            None => {
                debug!("表格 {} 未能拆分单元格，上传整表图片", table_id);
                Some(self.upload_crop(crop, table_id).await?)
            }
        };

        info!("表格提取完成: {} 标题=\"{}\"", table_id, caption);
        Ok(TableExtraction {
            narrative,
            record: TableRecord {
                id: table_id.to_string(),
                cells,
                image_url,
                caption,
            },
        })
    }
}
