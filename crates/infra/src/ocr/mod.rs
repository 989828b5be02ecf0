//! OCR engine adapter.
//!
//! Two backends sit behind async traits: a vision engine that answers with
//! schema fields, and a local engine that answers with raw text. Which one
//! runs is decided by [`select_engines`] from explicit configuration.

pub mod adapter;
pub mod claude;
pub mod image;
pub mod tesseract;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use winebox_label::{EngineKind, StructuredLabel};

use crate::config::ScanConfig;

pub use adapter::OcrAdapter;
pub use claude::ClaudeVisionClient;
pub use image::{sniff, LabelImage};
pub use tesseract::TesseractClient;

/// Raw label photos as supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelImages {
    pub front: Vec<u8>,
    pub back: Option<Vec<u8>>,
}

impl LabelImages {
    pub fn front(front: impl Into<Vec<u8>>) -> Self {
        Self {
            front: front.into(),
            back: None,
        }
    }

    pub fn with_back(mut self, back: impl Into<Vec<u8>>) -> Self {
        self.back = Some(back.into());
        self
    }
}

/// Failure of a single engine call. Never surfaced to callers directly.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("engine not configured")]
    NotConfigured,

    #[error("engine timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("engine quota exhausted")]
    Quota,

    #[error("engine returned HTTP {status}")]
    Http { status: u16 },

    #[error("network error: {0}")]
    Network(String),

    #[error("malformed engine response: {0}")]
    MalformedResponse(String),

    #[error("engine returned no fields and no text")]
    EmptyResponse,

    #[error("ocr process failed: {0}")]
    Process(String),
}

/// Errors surfaced by [`OcrAdapter::scan`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScanError {
    #[error("invalid image: {0}")]
    InvalidImage(String),

    /// Every available engine failed or none was configured.
    #[error("scan unavailable (vision: {vision:?}, local: {local:?})")]
    ScanUnavailable {
        vision: Option<String>,
        local: Option<String>,
    },
}

#[async_trait]
pub trait VisionClient: Send + Sync {
    /// Read both label sides in one request and return schema fields.
    async fn read_label(
        &self,
        front: &LabelImage,
        back: Option<&LabelImage>,
    ) -> Result<StructuredLabel, EngineError>;
}

#[async_trait]
pub trait LocalOcrClient: Send + Sync {
    /// Recognise the text of one image.
    async fn recognize(&self, image: &LabelImage, language: &str) -> Result<String, EngineError>;
}

#[derive(Clone)]
pub enum OcrEngine {
    Vision(Arc<dyn VisionClient>),
    Local(Arc<dyn LocalOcrClient>),
}

impl OcrEngine {
    pub fn kind(&self) -> EngineKind {
        match self {
            OcrEngine::Vision(_) => EngineKind::Vision,
            OcrEngine::Local(_) => EngineKind::Local,
        }
    }
}

impl core::fmt::Debug for OcrEngine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("OcrEngine").field(&self.kind()).finish()
    }
}

/// Primary engine plus at most one fallback.
#[derive(Debug, Clone)]
pub struct EnginePlan {
    pub primary: OcrEngine,
    pub fallback: Option<OcrEngine>,
}

/// Vision first when enabled and present, local as its only fallback;
/// local alone otherwise. `None` when nothing can run.
pub fn select_engines(
    config: &ScanConfig,
    vision: Option<&Arc<dyn VisionClient>>,
    local: Option<&Arc<dyn LocalOcrClient>>,
) -> Option<EnginePlan> {
    let local = local.map(|l| OcrEngine::Local(Arc::clone(l)));
    match vision {
        Some(v) if config.vision_enabled() => Some(EnginePlan {
            primary: OcrEngine::Vision(Arc::clone(v)),
            fallback: local,
        }),
        _ => local.map(|primary| EnginePlan {
            primary,
            fallback: None,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoVision;

    #[async_trait]
    impl VisionClient for NoVision {
        async fn read_label(
            &self,
            _front: &LabelImage,
            _back: Option<&LabelImage>,
        ) -> Result<StructuredLabel, EngineError> {
            Err(EngineError::NotConfigured)
        }
    }

    struct NoLocal;

    #[async_trait]
    impl LocalOcrClient for NoLocal {
        async fn recognize(&self, _image: &LabelImage, _language: &str) -> Result<String, EngineError> {
            Err(EngineError::NotConfigured)
        }
    }

    fn credentialed() -> ScanConfig {
        let mut config = ScanConfig::default();
        config.vision.api_key = Some("key".to_string());
        config
    }

    #[test]
    fn vision_first_with_local_fallback() {
        let vision: Arc<dyn VisionClient> = Arc::new(NoVision);
        let local: Arc<dyn LocalOcrClient> = Arc::new(NoLocal);
        let plan = select_engines(&credentialed(), Some(&vision), Some(&local)).unwrap();
        assert_eq!(plan.primary.kind(), EngineKind::Vision);
        assert_eq!(plan.fallback.map(|f| f.kind()), Some(EngineKind::Local));
    }

    #[test]
    fn local_only_when_vision_disabled_or_uncredentialed() {
        let vision: Arc<dyn VisionClient> = Arc::new(NoVision);
        let local: Arc<dyn LocalOcrClient> = Arc::new(NoLocal);

        let mut disabled = credentialed();
        disabled.use_vision = false;
        for config in [disabled, ScanConfig::default()] {
            let plan = select_engines(&config, Some(&vision), Some(&local)).unwrap();
            assert_eq!(plan.primary.kind(), EngineKind::Local);
            assert!(plan.fallback.is_none());
        }
    }

    #[test]
    fn nothing_to_run() {
        let vision: Arc<dyn VisionClient> = Arc::new(NoVision);
        assert!(select_engines(&ScanConfig::default(), Some(&vision), None).is_none());

        let plan = select_engines(&credentialed(), Some(&vision), None).unwrap();
        assert_eq!(plan.primary.kind(), EngineKind::Vision);
        assert!(plan.fallback.is_none());
    }
}
