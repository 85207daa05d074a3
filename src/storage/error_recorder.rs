use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

use super::database::Database;
use super::models::{ErrorDocument, ErrorEntry};
use crate::services::ErrorSink;
use crate::utils::IngestResult;

/// 按书籍累积失败记录：已有错误文档则追加，否则新建
pub struct ErrorRecorder {
    db: Arc<Database>,
    // 并发页面的"查找后追加/新建"需要串行
    lock: Mutex<()>,
}

impl ErrorRecorder {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl ErrorSink for ErrorRecorder {
    async fn record(
        &self,
        book_id: &str,
        book: &str,
        page_number: Option<usize>,
        error: &str,
        location: &str,
    ) -> IngestResult<()> {
        let entry = ErrorEntry {
            page: page_number,
            error: error.to_string(),
            location: location.to_string(),
        };

        let _guard = self.lock.lock().await;
        if self.db.find_error_document(book_id).await?.is_some() {
            self.db.push_error(book_id, &entry).await?;
        } else {
            warn!("书籍 {} 首次记录失败", book);
            self.db
                .insert_error_document(&ErrorDocument {
                    book_id: book_id.to_string(),
                    book: book.to_string(),
                    error_pages: vec![entry],
                })
                .await?;
        }
        Ok(())
    }
}
