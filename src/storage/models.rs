use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::parser::{Document, Page};

/// 一条处理失败记录；`page` 为空表示整本书级别的失败
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<usize>,
    pub error: String,
    /// 失败发生处 `file:line`
    pub location: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDocument {
    pub book_id: String,
    pub book: String,
    pub error_pages: Vec<ErrorEntry>,
}

#[derive(Debug, Clone, FromRow)]
pub struct DocumentRow {
    pub book_id: String,
    pub book: String,
    pub pages: String,
}

impl DocumentRow {
    pub fn into_document(self) -> Result<Document, serde_json::Error> {
        let pages: Vec<Page> = serde_json::from_str(&self.pages)?;
        Ok(Document {
            book_id: self.book_id,
            book: self.book,
            pages,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct ErrorDocumentRow {
    pub book_id: String,
    pub book: String,
    pub error_pages: String,
}

impl ErrorDocumentRow {
    pub fn into_error_document(self) -> Result<ErrorDocument, serde_json::Error> {
        Ok(ErrorDocument {
            book_id: self.book_id,
            book: self.book,
            error_pages: serde_json::from_str(&self.error_pages)?,
        })
    }
}

/// 文档列表摘要
#[derive(Debug, Clone, FromRow)]
pub struct DocumentSummary {
    pub book_id: String,
    pub book: String,
    pub page_count: i64,
    pub created_at: String,
}
