use image::RgbImage;
use regex::Regex;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::page_extractor::{FaultStage, PageFault};
use super::pdf_parser::write_page_pdf;
use super::placeholder::PlaceholderRegistry;
use super::EquationRecord;
use crate::services::{FormulaTranscriber, LatexToSpeech};
use crate::utils::text::normalize_whitespace;
use crate::utils::IngestResult;

/// 整页公式转写的结果
#[derive(Debug)]
pub struct FormulaExtraction {
    /// 已替换公式占位符并规整空白的文本
    pub text: String,
    /// 转写工具失败时记录（此时文本为空）
    pub tool_fault: Option<PageFault>,
}

/// 整页 LaTeX 转写 + 公式占位符替换
pub struct FormulaExtractor {
    transcriber: Arc<dyn FormulaTranscriber>,
    speech: Arc<dyn LatexToSpeech>,
    span_re: Regex,
    dpi: u32,
}

impl FormulaExtractor {
    pub fn new(
        transcriber: Arc<dyn FormulaTranscriber>,
        speech: Arc<dyn LatexToSpeech>,
        dpi: u32,
    ) -> Self {
        Self {
            transcriber,
            speech,
            // \( ... \) 或 \[ ... \]，非贪婪
            span_re: Regex::new(r"(\\\(.*?\\\)|\\\[.*?\\\])").unwrap(),
            dpi,
        }
    }

    /// 包装单页 PDF -> 外部转写 -> 公式替换为占位符 -> 规整空白。
    /// 转写工具失败不致命，返回空文本并附带 fault；包装或朗读转换失败返回 Err。
    pub async fn extract(
        &self,
        image: &RgbImage,
        registry: &mut PlaceholderRegistry,
        page_number: usize,
        scratch_dir: &Path,
    ) -> IngestResult<FormulaExtraction> {
        let started = Instant::now();

        let pdf_file = write_page_pdf(image, self.dpi, page_number, scratch_dir).await?;

        let (latex, tool_fault) = match self.transcriber.transcribe(pdf_file.path()).await {
            Ok(text) => (text, None),
            Err(e) => {
                warn!("第 {} 页公式转写失败: {}", page_number, e);
                let fault = PageFault::new(Some(page_number), None, FaultStage::Formula, e.to_string());
                (String::new(), Some(fault))
            }
        };
        // 临时 PDF 在 pdf_file 析构时删除
        drop(pdf_file);

        let text = self.substitute_equations(&latex, registry)?;
        debug!(
            "第 {} 页公式提取耗时 {:?}，公式 {} 个",
            page_number,
            started.elapsed(),
            registry.equations().len()
        );
        Ok(FormulaExtraction { text, tool_fault })
    }

    /// 把每个数学片段登记为公式记录并替换为占位符
    pub fn substitute_equations(
        &self,
        latex: &str,
        registry: &mut PlaceholderRegistry,
    ) -> IngestResult<String> {
        let mut out = String::with_capacity(latex.len());
        let mut last = 0;

        for m in self.span_re.find_iter(latex) {
            out.push_str(&latex[last..m.start()]);

            let matched = m.as_str();
            let spoken_form = self.speech.convert(&spoken_input(matched))?;
            let id = registry.mint_id();
            let placeholder = registry.add_equation(EquationRecord {
                id,
                latex: matched.to_string(),
                spoken_form,
            });
            out.push_str(&placeholder);
            last = m.end();
        }
        out.push_str(&latex[last..]);

        let count = registry.equations().len();
        if count > 0 {
            info!("替换公式 {} 个", count);
        }
        Ok(normalize_whitespace(&out))
    }
}

/// 去掉一个前导反斜杠并以 `$...$` 包裹
fn spoken_input(matched: &str) -> String {
    let body = matched.strip_prefix('\\').unwrap_or(matched);
    format!("${body}$")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::placeholder::{find_tokens, PlaceholderKind};
    use crate::services::testing::{EchoSpeech, ScriptedTranscriber};

    fn extractor(transcriber: Arc<ScriptedTranscriber>) -> FormulaExtractor {
        FormulaExtractor::new(transcriber, Arc::new(EchoSpeech), 300)
    }

    #[test]
    fn spoken_input_strips_one_backslash_and_wraps() {
        assert_eq!(spoken_input(r"\(x^2\)"), r"$(x^2\)$");
        assert_eq!(spoken_input(r"\[a\]"), r"$[a\]$");
    }

    #[test]
    fn every_span_becomes_a_placeholder_with_a_record() {
        let ex = extractor(Arc::new(ScriptedTranscriber::new("")));
        let mut registry = PlaceholderRegistry::new();
        let text = ex
            .substitute_equations("Let \\(x\\) be\n\ngiven   by \\[x = 1\\] and \\(y\\).", &mut registry)
            .unwrap();

        let tokens = find_tokens(&text);
        assert_eq!(tokens.len(), 3);
        assert!(tokens.iter().all(|(k, _)| *k == PlaceholderKind::Equation));

        let eqs = registry.equations();
        assert_eq!(eqs[0].latex, r"\(x\)");
        assert_eq!(eqs[1].latex, r"\[x = 1\]");
        assert_eq!(eqs[1].spoken_form, r"$[x = 1\]$");
        for ((_, id), eq) in tokens.iter().zip(eqs) {
            assert_eq!(id, &eq.id);
        }
        assert_eq!(
            text,
            format!(
                "Let {{{{equation:{}}}}} be given by {{{{equation:{}}}}} and {{{{equation:{}}}}}.",
                eqs[0].id, eqs[1].id, eqs[2].id
            )
        );
    }

    #[test]
    fn spans_do_not_cross_lines() {
        let ex = extractor(Arc::new(ScriptedTranscriber::new("")));
        let mut registry = PlaceholderRegistry::new();
        let text = ex.substitute_equations("\\(a\nb\\)", &mut registry).unwrap();
        assert!(registry.equations().is_empty());
        assert_eq!(text, r"\(a b\)");
    }

    #[tokio::test]
    async fn transcription_runs_on_a_wrapped_pdf() {
        let dir = tempfile::tempdir().unwrap();
        let transcriber = Arc::new(ScriptedTranscriber::new("# Title\n\nArea \\(\\pi r^2\\)"));
        let ex = extractor(transcriber.clone());
        let mut registry = PlaceholderRegistry::new();
        let image = RgbImage::new(50, 50);

        let out = ex.extract(&image, &mut registry, 4, dir.path()).await.unwrap();
        assert!(out.tool_fault.is_none());
        assert_eq!(transcriber.calls(), 1);
        assert!(out.text.starts_with("# Title Area {{equation:"));
        assert_eq!(registry.equations().len(), 1);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn tool_failure_yields_empty_text_and_a_fault() {
        let dir = tempfile::tempdir().unwrap();
        let ex = extractor(Arc::new(ScriptedTranscriber::failing()));
        let mut registry = PlaceholderRegistry::new();

        let out = ex
            .extract(&RgbImage::new(8, 8), &mut registry, 2, dir.path())
            .await
            .unwrap();
        assert_eq!(out.text, "");
        let fault = out.tool_fault.unwrap();
        assert_eq!(fault.page_number, Some(2));
        assert_eq!(fault.stage, FaultStage::Formula);
    }
}
