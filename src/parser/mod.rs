pub mod caption;
pub mod cropper;
pub mod formula_extractor;
pub mod page_extractor;
pub mod pdf_parser;
pub mod placeholder;
pub mod region;
pub mod scrubber;
pub mod table_parser;

pub use page_extractor::{FaultStage, PageContentExtractor, PageFault, PageOutcome};
pub use region::{BoundingBox, Region, RegionKind};
pub use scrubber::CaptionScrubber;
pub use table_parser::TableParser;

use serde::{Deserialize, Serialize};

/// 表格的结构化单元格
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableCells {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// 提取的表格；单元格或整表图片二者至少其一
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cells: Option<TableCells>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub caption: String,
}

/// 提取的插图
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FigureRecord {
    pub id: String,
    pub url: String,
    pub caption: String,
}

/// 提取的公式
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EquationRecord {
    pub id: String,
    pub latex: String,
    pub spoken_form: String,
}

/// 单页的提取结果（尚未分配页 id）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageContent {
    pub text: String,
    pub tables: Vec<TableRecord>,
    pub figures: Vec<FigureRecord>,
    pub equations: Vec<EquationRecord>,
    pub formula_transcription: Option<String>,
}

/// 持久化的页面记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub id: String,
    pub text: String,
    pub tables: Vec<TableRecord>,
    pub figures: Vec<FigureRecord>,
    pub equations: Vec<EquationRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula_transcription: Option<String>,
}

impl Page {
    pub fn new(id: String, content: PageContent) -> Self {
        Self {
            id,
            text: content.text,
            tables: content.tables,
            figures: content.figures,
            equations: content.equations,
            formula_transcription: content.formula_transcription,
        }
    }

    /// 降级页：文本与附属列表全部为空
    pub fn empty(id: String) -> Self {
        Self::new(id, PageContent::default())
    }

    /// 文本中找不到对应记录的占位符
    pub fn dangling_placeholders(&self) -> Vec<String> {
        placeholder::find_tokens(&self.text)
            .into_iter()
            .filter(|(kind, id)| match kind {
                placeholder::PlaceholderKind::Figure => !self.figures.iter().any(|f| &f.id == id),
                placeholder::PlaceholderKind::Equation => {
                    !self.equations.iter().any(|e| &e.id == id)
                }
            })
            .map(|(kind, id)| placeholder::token(kind, &id))
            .collect()
    }
}

/// 一本书的完整文档
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub book_id: String,
    pub book: String,
    pub pages: Vec<Page>,
}

/// 新的 32 位十六进制标识符
pub fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
