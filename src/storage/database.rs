use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use tracing::info;

use crate::parser::{Document, Page};
use crate::storage::models::{
    DocumentRow, DocumentSummary, ErrorDocument, ErrorDocumentRow, ErrorEntry,
};
use crate::utils::IngestResult;

pub struct Database {
    pool: SqlitePool,
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

impl Database {
    pub async fn new(database_url: &str) -> IngestResult<Self> {
        Self::with_max_connections(database_url, 5).await
    }

    pub async fn with_max_connections(database_url: &str, max_connections: u32) -> IngestResult<Self> {
        // 确保使用create_if_missing选项
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(
                database_url
                    .parse::<sqlx::sqlite::SqliteConnectOptions>()?
                    .create_if_missing(true),
            )
            .await?;

        info!("数据库连接成功: {}", database_url);
        Ok(Self { pool })
    }

    pub async fn init_schema(&self) -> IngestResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                book_id TEXT NOT NULL UNIQUE,
                book TEXT NOT NULL,
                pages TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS error_documents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                book_id TEXT NOT NULL UNIQUE,
                book TEXT NOT NULL,
                error_pages TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("数据库表结构初始化完成");
        Ok(())
    }

    /// 保存整本书的文档
    pub async fn insert_document(&self, document: &Document) -> IngestResult<()> {
        let pages = serde_json::to_string(&document.pages)?;
        sqlx::query(
            r#"
            INSERT INTO documents (book_id, book, pages, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&document.book_id)
        .bind(&document.book)
        .bind(pages)
        .bind(now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn find_document(&self, book_id: &str) -> IngestResult<Option<Document>> {
        let row = sqlx::query_as::<_, DocumentRow>(
            "SELECT book_id, book, pages FROM documents WHERE book_id = ?",
        )
        .bind(book_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(row.into_document()?)),
            None => Ok(None),
        }
    }

    /// 覆盖页面列表，返回记录是否真的被修改
    pub async fn update_pages(&self, book_id: &str, pages: &[Page]) -> IngestResult<bool> {
        let pages = serde_json::to_string(pages)?;
        let result = sqlx::query(
            "UPDATE documents SET pages = ?, updated_at = ? WHERE book_id = ? AND pages <> ?",
        )
        .bind(&pages)
        .bind(now())
        .bind(book_id)
        .bind(&pages)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn list_documents(&self) -> IngestResult<Vec<DocumentSummary>> {
        let rows = sqlx::query_as::<_, DocumentSummary>(
            r#"
            SELECT book_id, book, json_array_length(pages) AS page_count, created_at
            FROM documents ORDER BY created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn find_error_document(&self, book_id: &str) -> IngestResult<Option<ErrorDocument>> {
        let row = sqlx::query_as::<_, ErrorDocumentRow>(
            "SELECT book_id, book, error_pages FROM error_documents WHERE book_id = ?",
        )
        .bind(book_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(row.into_error_document()?)),
            None => Ok(None),
        }
    }

    pub async fn insert_error_document(&self, document: &ErrorDocument) -> IngestResult<()> {
        let error_pages = serde_json::to_string(&document.error_pages)?;
        sqlx::query(
            "INSERT INTO error_documents (book_id, book, error_pages, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&document.book_id)
        .bind(&document.book)
        .bind(error_pages)
        .bind(now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// 向已有错误文档追加一条记录，返回是否找到该文档
    pub async fn push_error(&self, book_id: &str, entry: &ErrorEntry) -> IngestResult<bool> {
        let entry = serde_json::to_string(entry)?;
        let result = sqlx::query(
            "UPDATE error_documents SET error_pages = json_insert(error_pages, '$[#]', json(?)) WHERE book_id = ?",
        )
        .bind(entry)
        .bind(book_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// 单连接内存库，供测试使用
    #[cfg(test)]
    pub(crate) async fn in_memory() -> Self {
        let db = Self::with_max_connections("sqlite::memory:", 1)
            .await
            .expect("内存数据库");
        db.init_schema().await.expect("初始化表结构");
        db
    }

    /// 清空所有表
    pub async fn clear_all_tables(&self) -> IngestResult<()> {
        sqlx::query("DELETE FROM documents").execute(&self.pool).await?;
        sqlx::query("DELETE FROM error_documents").execute(&self.pool).await?;
        info!("数据库表已清空");
        Ok(())
    }
}
