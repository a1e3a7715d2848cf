//! The document processing function.
//!
//! Workers treat [`DocumentProcessor`] as opaque: they hand it the input
//! bytes and get back text or a [`ProcessingError`]. [`TextExtractor`] is the
//! default implementation.

use async_trait::async_trait;

/// Shortest printable run kept when scanning binary input.
pub const MIN_RUN_LEN: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("Document is empty")]
    EmptyInput,

    #[error("No extractable text found in document")]
    NoText,

    #[error("Failed to read input: {0}")]
    Input(String),

    #[error("Failed to write output: {0}")]
    Output(String),

    #[error("Processing task panicked: {0}")]
    Panicked(String),

    #[error("Processing failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait DocumentProcessor: Send + Sync {
    /// Turn a document into text.
    async fn process(&self, filename: &str, bytes: Vec<u8>) -> Result<String, ProcessingError>;
}

/// Plain-text extraction.
///
/// UTF-8 input is passed through. Anything else is scanned for printable
/// ASCII runs of at least [`MIN_RUN_LEN`] characters, joined by blank lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextExtractor;

impl TextExtractor {
    pub fn extract(bytes: &[u8]) -> Result<String, ProcessingError> {
        if bytes.is_empty() {
            return Err(ProcessingError::EmptyInput);
        }

        let text = match std::str::from_utf8(bytes) {
            Ok(s) if !s.contains('\0') => s.trim().to_string(),
            _ => printable_runs(bytes).join("\n\n"),
        };

        if text.trim().is_empty() {
            return Err(ProcessingError::NoText);
        }
        Ok(text)
    }
}

#[async_trait]
impl DocumentProcessor for TextExtractor {
    async fn process(&self, filename: &str, bytes: Vec<u8>) -> Result<String, ProcessingError> {
        tracing::debug!(filename, size = bytes.len(), "Extracting text");
        tokio::task::spawn_blocking(move || Self::extract(&bytes))
            .await
            .map_err(|e| ProcessingError::Failed(e.to_string()))?
    }
}

fn printable_runs(bytes: &[u8]) -> Vec<String> {
    let mut runs = Vec::new();
    let mut current = String::new();

    for &b in bytes {
        if b.is_ascii_graphic() || b == b' ' || b == b'\t' {
            current.push(b as char);
            continue;
        }
        flush_run(&mut current, &mut runs);
    }
    flush_run(&mut current, &mut runs);
    runs
}

fn flush_run(current: &mut String, runs: &mut Vec<String>) {
    let trimmed = current.trim();
    if trimmed.chars().count() >= MIN_RUN_LEN {
        runs.push(trimmed.to_string());
    }
    current.clear();
}
