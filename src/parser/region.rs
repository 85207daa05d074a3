use serde::{Deserialize, Serialize};
use std::fmt;

/// 版面区块类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegionKind {
    Table,
    Figure,
    Text,
    Title,
    List,
}

impl RegionKind {
    /// 解析检测模型输出的类型标签，未知标签返回 None
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim() {
            "Table" | "table" => Some(Self::Table),
            "Figure" | "figure" => Some(Self::Figure),
            "Text" | "text" => Some(Self::Text),
            "Title" | "title" => Some(Self::Title),
            "List" | "list" => Some(Self::List),
            _ => None,
        }
    }

    pub fn is_structural(self) -> bool {
        matches!(self, Self::Table | Self::Figure)
    }
}

impl fmt::Display for RegionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Table => "Table",
            Self::Figure => "Figure",
            Self::Text => "Text",
            Self::Title => "Title",
            Self::List => "List",
        };
        f.write_str(name)
    }
}

/// 像素坐标系下的矩形 (x1, y1) - (x2, y2)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn vertical_midpoint(&self) -> f32 {
        (self.y1 + self.y2) / 2.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub kind: RegionKind,
    pub bbox: BoundingBox,
    pub source_model: String,
}

impl Region {
    pub fn new(kind: RegionKind, bbox: BoundingBox, source_model: impl Into<String>) -> Self {
        Self {
            kind,
            bbox,
            source_model: source_model.into(),
        }
    }
}

/// 合并两路检测结果：通用模型的非表格区块 + 表格模型的表格区块
pub fn merge_detections(general: Vec<Region>, table: Vec<Region>) -> Vec<Region> {
    general
        .into_iter()
        .filter(|r| r.kind != RegionKind::Table)
        .chain(table.into_iter().filter(|r| r.kind == RegionKind::Table))
        .collect()
}

/// 页面是否含表格或插图（决定走结构化还是整页转写）
pub fn has_structure(regions: &[Region]) -> bool {
    regions.iter().any(|r| r.kind.is_structural())
}

/// 按纵向中点升序排列，得到阅读顺序；中点相同时保持原顺序
pub fn reading_order(mut regions: Vec<Region>) -> Vec<Region> {
    regions.sort_by(|a, b| {
        a.bbox
            .vertical_midpoint()
            .total_cmp(&b.bbox.vertical_midpoint())
    });
    regions
}
