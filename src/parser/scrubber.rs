use tracing::debug;

use super::{Document, Page};
use crate::utils::text::normalize_whitespace;

/// 全书后处理：删除正文中与表格/插图标题重复的文本
#[derive(Debug, Default, Clone, Copy)]
pub struct CaptionScrubber;

impl CaptionScrubber {
    pub fn new() -> Self {
        Self
    }

    /// 处理整本书，返回是否有页面被修改
    pub fn scrub(&self, document: &mut Document) -> bool {
        let mut modified = 0;
        for page in document.pages.iter_mut() {
            if self.scrub_page(page) {
                modified += 1;
            }
        }
        debug!("书籍 {} 去除重复标题: {} 页被修改", document.book_id, modified);
        modified > 0
    }

    /// 删除页面正文中所有非空标题的全部出现，直到不再变化
    pub fn scrub_page(&self, page: &mut Page) -> bool {
        let captions: Vec<String> = page
            .tables
            .iter()
            .map(|t| t.caption.as_str())
            .chain(page.figures.iter().map(|f| f.caption.as_str()))
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect();
        if captions.is_empty() {
            return false;
        }

        let mut text = page.text.clone();
        loop {
            let mut removed = false;
            for caption in &captions {
                // a removal can splice together a fresh occurrence
                while text.contains(caption.as_str()) {
                    text = text.replace(caption.as_str(), "");
                    removed = true;
                }
            }
            if !removed {
                break;
            }
            text = normalize_whitespace(&text);
        }

        if text == page.text {
            return false;
        }
        page.text = text;
        true
    }
}
