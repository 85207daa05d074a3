use async_trait::async_trait;
use std::path::Path;
use std::time::Instant;
use tokio::process::Command;
use tracing::debug;

use super::FormulaTranscriber;
use crate::utils::{IngestError, IngestResult};

/// 进程外公式转写工具（默认 `nougat <pdf> --no-skipping`），返回其标准输出
pub struct CommandTranscriber {
    command: String,
    args: Vec<String>,
}

impl CommandTranscriber {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }
}

#[async_trait]
impl FormulaTranscriber for CommandTranscriber {
    async fn transcribe(&self, pdf_path: &Path) -> IngestResult<String> {
        let started = Instant::now();
        let output = Command::new(&self.command)
            .arg(pdf_path)
            .args(&self.args)
            .output()
            .await
            .map_err(|e| IngestError::FormulaError(format!("无法启动 {}: {}", self.command, e)))?;

        if !output.status.success() {
            return Err(IngestError::FormulaError(format!(
                "{} 退出码 {:?}: {}",
                self.command,
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        debug!("{} 转写 {} 耗时 {:?}", self.command, pdf_path.display(), started.elapsed());
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stdout_is_the_transcription() {
        let transcriber = CommandTranscriber::new("echo", vec!["\\(x\\)".to_string()]);
        let text = transcriber.transcribe(Path::new("page.pdf")).await.unwrap();
        assert_eq!(text.trim(), "page.pdf \\(x\\)");
    }

    #[tokio::test]
    async fn failing_tool_is_a_formula_error() {
        let transcriber = CommandTranscriber::new("false", vec![]);
        let err = transcriber.transcribe(Path::new("page.pdf")).await;
        assert!(matches!(err, Err(IngestError::FormulaError(_))));
    }
}
