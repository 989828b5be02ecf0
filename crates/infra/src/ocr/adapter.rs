use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use winebox_label::{EngineKind, ScanResult};

use super::image::{sniff, LabelImage};
use super::{
    select_engines, ClaudeVisionClient, EngineError, LabelImages, LocalOcrClient, OcrEngine,
    ScanError, TesseractClient, VisionClient,
};
use crate::config::ScanConfig;

/// Runs one scan: image checks, primary engine, at most one fallback.
#[derive(Clone)]
pub struct OcrAdapter {
    config: ScanConfig,
    vision: Option<Arc<dyn VisionClient>>,
    local: Option<Arc<dyn LocalOcrClient>>,
}

impl OcrAdapter {
    pub fn new(
        config: ScanConfig,
        vision: Option<Arc<dyn VisionClient>>,
        local: Option<Arc<dyn LocalOcrClient>>,
    ) -> Self {
        Self {
            config,
            vision,
            local,
        }
    }

    /// Production wiring: Claude vision (when credentialed) and Tesseract.
    pub fn from_config(config: ScanConfig) -> Self {
        let vision = ClaudeVisionClient::from_config(&config.vision)
            .map(|c| Arc::new(c) as Arc<dyn VisionClient>);
        let local: Arc<dyn LocalOcrClient> = Arc::new(TesseractClient::new(&config.local.command));
        Self::new(config, vision, Some(local))
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    #[instrument(skip(self, images), fields(has_back = images.back.is_some()), err)]
    pub async fn scan(&self, images: &LabelImages) -> Result<ScanResult, ScanError> {
        let max = self.config.max_image_bytes;
        let front = sniff(images.front.clone(), max)
            .map_err(|e| ScanError::InvalidImage(format!("front label: {e}")))?;
        let back = match &images.back {
            Some(bytes) => Some(
                sniff(bytes.clone(), max)
                    .map_err(|e| ScanError::InvalidImage(format!("back label: {e}")))?,
            ),
            None => None,
        };

        let Some(plan) = select_engines(&self.config, self.vision.as_ref(), self.local.as_ref())
        else {
            warn!("no OCR engine available");
            return Err(ScanError::ScanUnavailable {
                vision: Some(EngineError::NotConfigured.to_string()),
                local: Some(EngineError::NotConfigured.to_string()),
            });
        };

        info!(engine = %plan.primary.kind(), "scanning label");
        let primary_err = match self.run(&plan.primary, &front, back.as_ref()).await {
            Ok(scan) => return Ok(scan),
            Err(e) => e,
        };

        let mut vision_err = None;
        let mut local_err = None;
        match plan.primary.kind() {
            EngineKind::Vision => vision_err = Some(primary_err.to_string()),
            EngineKind::Local => local_err = Some(primary_err.to_string()),
        }

        if let Some(fallback) = &plan.fallback {
            warn!(error = %primary_err, fallback = %fallback.kind(), "primary engine failed; falling back");
            match self.run(fallback, &front, back.as_ref()).await {
                Ok(scan) => return Ok(scan),
                Err(e) => local_err = Some(e.to_string()),
            }
        } else if vision_err.is_none() {
            vision_err = Some("vision engine not enabled".to_string());
        }

        warn!(vision = ?vision_err, local = ?local_err, "all OCR engines failed");
        Err(ScanError::ScanUnavailable {
            vision: vision_err,
            local: local_err,
        })
    }

    async fn run(
        &self,
        engine: &OcrEngine,
        front: &LabelImage,
        back: Option<&LabelImage>,
    ) -> Result<ScanResult, EngineError> {
        match engine {
            OcrEngine::Vision(client) => {
                let limit = self.config.vision.timeout;
                let structured = bounded(limit, client.read_label(front, back)).await?;
                if structured.is_empty() {
                    return Err(EngineError::EmptyResponse);
                }
                debug!("vision engine returned structured fields");
                Ok(ScanResult::vision(structured))
            }
            OcrEngine::Local(client) => {
                let limit = self.config.local.timeout;
                let language = self.config.local.language.as_str();
                let front_text = bounded(limit, client.recognize(front, language));
                let (front_text, back_text) = match back {
                    Some(back) => {
                        let back_text = bounded(limit, client.recognize(back, language));
                        let (f, b) = tokio::try_join!(front_text, back_text)?;
                        (f, Some(b))
                    }
                    None => (front_text.await?, None),
                };
                debug!(chars = front_text.len(), "local engine returned text");
                Ok(ScanResult::local(front_text, back_text))
            }
        }
    }
}

async fn bounded<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, EngineError>>,
) -> Result<T, EngineError> {
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| EngineError::Timeout(limit))?
}
