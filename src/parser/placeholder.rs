use regex::Regex;
use std::sync::OnceLock;

use super::{new_id, EquationRecord, FigureRecord, PageContent, TableRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderKind {
    Figure,
    Equation,
}

impl PlaceholderKind {
    fn tag(self) -> &'static str {
        match self {
            Self::Figure => "figure",
            Self::Equation => "equation",
        }
    }
}

/// `{{figure:<id>}}` / `{{equation:<id>}}`，下游渲染器按字节匹配
pub fn token(kind: PlaceholderKind, id: &str) -> String {
    format!("{{{{{}:{}}}}}", kind.tag(), id)
}

fn token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{(figure|equation):([^{}\s]+)\}\}").unwrap())
}

/// 按出现顺序列出文本中的占位符
pub fn find_tokens(text: &str) -> Vec<(PlaceholderKind, String)> {
    token_re()
        .captures_iter(text)
        .map(|caps| {
            let kind = if &caps[1] == "figure" {
                PlaceholderKind::Figure
            } else {
                PlaceholderKind::Equation
            };
            (kind, caps[2].to_string())
        })
        .collect()
}

/// 单页内的标识符分配与附属记录登记
#[derive(Debug, Default)]
pub struct PlaceholderRegistry {
    tables: Vec<TableRecord>,
    figures: Vec<FigureRecord>,
    equations: Vec<EquationRecord>,
}

impl PlaceholderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mint_id(&self) -> String {
        new_id()
    }

    pub fn add_table(&mut self, record: TableRecord) {
        self.tables.push(record);
    }

    /// 登记插图并返回其占位符
    pub fn add_figure(&mut self, record: FigureRecord) -> String {
        let placeholder = token(PlaceholderKind::Figure, &record.id);
        self.figures.push(record);
        placeholder
    }

    /// 登记公式并返回其占位符
    pub fn add_equation(&mut self, record: EquationRecord) -> String {
        let placeholder = token(PlaceholderKind::Equation, &record.id);
        self.equations.push(record);
        placeholder
    }

    pub fn equations(&self) -> &[EquationRecord] {
        &self.equations
    }

    pub fn into_content(self, text: String, formula_transcription: Option<String>) -> PageContent {
        PageContent {
            text,
            tables: self.tables,
            figures: self.figures,
            equations: self.equations,
            formula_transcription,
        }
    }
}
