//! Configuration loading and representation.
//!
//! Everything is plain data handed to constructors; nothing here is global.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

const MIB: usize = 1024 * 1024;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct CellarConfig {
    pub scan: ScanConfig,
    pub ledger: LedgerConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Try the vision engine before local OCR (only if it has credentials).
    pub use_vision: bool,
    pub vision: VisionConfig,
    pub local: LocalOcrConfig,
    pub max_image_bytes: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            use_vision: true,
            vision: VisionConfig::default(),
            local: LocalOcrConfig::default(),
            max_image_bytes: 10 * MIB,
        }
    }
}

impl ScanConfig {
    pub fn vision_enabled(&self) -> bool {
        self.use_vision && self.vision.has_credentials()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    pub api_key: Option<String>,
    pub endpoint: String,
    pub model: String,
    pub max_tokens: u32,
    #[serde(with = "secs")]
    pub timeout: Duration,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: "https://api.anthropic.com/v1/messages".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            max_tokens: 1024,
            timeout: Duration::from_secs(30),
        }
    }
}

impl VisionConfig {
    pub fn has_credentials(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LocalOcrConfig {
    pub command: String,
    pub language: String,
    #[serde(with = "secs")]
    pub timeout: Duration,
}

impl Default for LocalOcrConfig {
    fn default() -> Self {
        Self {
            command: "tesseract".to_string(),
            language: "eng".to_string(),
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub max_conflict_retries: u32,
    pub max_quantity_per_movement: i64,
    pub max_notes_len: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_conflict_retries: 16,
            max_quantity_per_movement: 10_000,
            max_notes_len: 2_000,
        }
    }
}

impl CellarConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from defaults overridden by whatever `lookup` returns.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::default();

        if let Some(v) = get("WINEBOX_USE_VISION") {
            config.scan.use_vision = parse_bool("WINEBOX_USE_VISION", &v)?;
        }
        config.scan.vision.api_key = get("ANTHROPIC_API_KEY");
        if let Some(v) = get("WINEBOX_VISION_MODEL") {
            config.scan.vision.model = v;
        }
        if let Some(v) = get("WINEBOX_VISION_ENDPOINT") {
            config.scan.vision.endpoint = v;
        }
        if let Some(v) = get("WINEBOX_VISION_TIMEOUT_SECS") {
            config.scan.vision.timeout = parse_secs("WINEBOX_VISION_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("WINEBOX_TESSERACT_CMD") {
            config.scan.local.command = v;
        }
        if let Some(v) = get("WINEBOX_TESSERACT_LANG") {
            config.scan.local.language = v;
        }
        if let Some(v) = get("WINEBOX_OCR_TIMEOUT_SECS") {
            config.scan.local.timeout = parse_secs("WINEBOX_OCR_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("WINEBOX_MAX_UPLOAD_MB") {
            let mb: usize = parse_num("WINEBOX_MAX_UPLOAD_MB", &v)?;
            if mb == 0 {
                return Err(invalid("WINEBOX_MAX_UPLOAD_MB", &v, "must be positive"));
            }
            config.scan.max_image_bytes = mb.saturating_mul(MIB);
        }
        if let Some(v) = get("WINEBOX_LEDGER_MAX_RETRIES") {
            config.ledger.max_conflict_retries = parse_num("WINEBOX_LEDGER_MAX_RETRIES", &v)?;
        }

        Ok(config)
    }
}

fn invalid(key: &'static str, value: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.into(),
    }
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, value, "expected a boolean")),
    }
}

fn parse_num<T: core::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T::Err: core::fmt::Display,
{
    value.parse().map_err(|e: T::Err| invalid(key, value, e.to_string()))
}

fn parse_secs(key: &'static str, value: &str) -> Result<Duration, ConfigError> {
    let secs: u64 = parse_num(key, value)?;
    if secs == 0 {
        return Err(invalid(key, value, "must be positive"));
    }
    Ok(Duration::from_secs(secs))
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_environment() {
        let config = CellarConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, CellarConfig::default());
        assert!(config.scan.use_vision);
        assert!(!config.scan.vision_enabled(), "no key means no vision");
        assert_eq!(config.scan.vision.timeout, Duration::from_secs(30));
        assert_eq!(config.scan.local.language, "eng");
        assert_eq!(config.scan.max_image_bytes, 10 * MIB);
        assert_eq!(config.ledger.max_conflict_retries, 16);
    }

    #[test]
    fn environment_overrides_defaults() {
        let config = CellarConfig::from_lookup(lookup(&[
            ("ANTHROPIC_API_KEY", "sk-test"),
            ("WINEBOX_VISION_TIMEOUT_SECS", "5"),
            ("WINEBOX_TESSERACT_LANG", "fra"),
            ("WINEBOX_MAX_UPLOAD_MB", "2"),
            ("WINEBOX_LEDGER_MAX_RETRIES", "3"),
        ]))
        .unwrap();

        assert!(config.scan.vision_enabled());
        assert_eq!(config.scan.vision.timeout, Duration::from_secs(5));
        assert_eq!(config.scan.local.language, "fra");
        assert_eq!(config.scan.max_image_bytes, 2 * MIB);
        assert_eq!(config.ledger.max_conflict_retries, 3);
    }

    #[test]
    fn vision_toggle_disables_engine_even_with_key() {
        let config = CellarConfig::from_lookup(lookup(&[
            ("ANTHROPIC_API_KEY", "sk-test"),
            ("WINEBOX_USE_VISION", "false"),
        ]))
        .unwrap();
        assert!(!config.scan.vision_enabled());
    }

    #[test]
    fn unparseable_values_are_rejected() {
        let err = CellarConfig::from_lookup(lookup(&[("WINEBOX_USE_VISION", "maybe")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "WINEBOX_USE_VISION", .. }));

        assert!(CellarConfig::from_lookup(lookup(&[("WINEBOX_OCR_TIMEOUT_SECS", "0")])).is_err());
        assert!(CellarConfig::from_lookup(lookup(&[("WINEBOX_MAX_UPLOAD_MB", "lots")])).is_err());
    }

    #[test]
    fn deserializes_partial_documents() {
        let config: CellarConfig =
            serde_json::from_str(r#"{"scan": {"use_vision": false, "vision": {"timeout": 12}}}"#)
                .unwrap();
        assert!(!config.scan.use_vision);
        assert_eq!(config.scan.vision.timeout, Duration::from_secs(12));
        assert_eq!(config.ledger, LedgerConfig::default());
    }
}
