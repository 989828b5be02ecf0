//! Tesseract as the local OCR engine.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, instrument};

use super::image::LabelImage;
use super::{EngineError, LocalOcrClient};

/// Runs the `tesseract` binary once per image, image on stdin, text on stdout.
#[derive(Debug, Clone)]
pub struct TesseractClient {
    command: String,
}

impl TesseractClient {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    fn args(language: &str) -> [&str; 6] {
        // Page segmentation mode 6: a single uniform block of text.
        ["stdin", "stdout", "-l", language, "--psm", "6"]
    }
}

#[async_trait]
impl LocalOcrClient for TesseractClient {
    #[instrument(skip_all, fields(command = %self.command, language = %language, bytes = image.bytes.len()), err)]
    async fn recognize(&self, image: &LabelImage, language: &str) -> Result<String, EngineError> {
        let mut child = Command::new(&self.command)
            .args(Self::args(language))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EngineError::Process(format!("failed to start {}: {e}", self.command)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&image.bytes)
                .await
                .map_err(|e| EngineError::Process(format!("failed to feed image: {e}")))?;
            // Dropping stdin closes the pipe so tesseract sees EOF.
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| EngineError::Process(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::Process(format!(
                "{} exited with {}: {}",
                self.command,
                output.status,
                stderr.trim()
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        debug!(chars = text.len(), "tesseract finished");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image() -> LabelImage {
        LabelImage {
            bytes: b"pixels".to_vec(),
            media_type: "image/png",
            width: 1,
            height: 1,
        }
    }

    #[test]
    fn arguments_select_language_and_block_mode() {
        assert_eq!(
            TesseractClient::args("fra"),
            ["stdin", "stdout", "-l", "fra", "--psm", "6"]
        );
    }

    #[tokio::test]
    async fn missing_binary_is_a_process_error() {
        let client = TesseractClient::new("winebox-no-such-ocr-binary");
        let err = client.recognize(&image(), "eng").await.unwrap_err();
        assert!(matches!(err, EngineError::Process(ref m) if m.contains("failed to start")));
    }
}
