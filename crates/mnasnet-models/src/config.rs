use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::blocks::BatchNormSettings;
use crate::error::{ModelError, ModelResult};

/// Everything needed to build an [`MnasNet`](crate::MnasNet).
///
/// Missing JSON fields fall back to the defaults:
///
/// ```json
/// { "alpha": 0.75, "num_classes": 10 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MnasNetConfig {
    /// Width multiplier.
    pub alpha: f64,
    pub num_classes: usize,
    /// Stored and validated, never applied: the classifier is a bare linear layer.
    pub dropout: f64,
    pub batch_norm: BatchNormSettings,
    /// Seed for weight initialization; `None` draws from the OS.
    pub seed: Option<u64>,
}

impl MnasNetConfig {
    pub fn new(alpha: f64) -> Self {
        MnasNetConfig { alpha, ..Default::default() }
    }

    pub fn with_num_classes(mut self, num_classes: usize) -> Self {
        self.num_classes = num_classes;
        self
    }

    pub fn with_dropout(mut self, dropout: f64) -> Self {
        self.dropout = dropout;
        self
    }

    pub fn with_batch_norm(mut self, batch_norm: BatchNormSettings) -> Self {
        self.batch_norm = batch_norm;
        self
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn validate(&self) -> ModelResult<()> {
        if !(self.alpha > 0.0 && self.alpha.is_finite()) {
            return Err(ModelError::InvalidWidthMultiplier(self.alpha));
        }
        if self.num_classes == 0 {
            return Err(ModelError::InvalidClassCount);
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(ModelError::InvalidDropout(self.dropout));
        }
        self.batch_norm.validate()
    }

    pub fn from_json_str(json: &str) -> ModelResult<Self> {
        let config: MnasNetConfig =
            serde_json::from_str(json).map_err(|e| ModelError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ModelResult<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .map_err(|e| ModelError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&json)
    }

    pub fn to_json_string(&self) -> ModelResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| ModelError::Config(e.to_string()))
    }
}

impl Default for MnasNetConfig {
    fn default() -> Self {
        MnasNetConfig {
            alpha: 1.0,
            num_classes: 1000,
            dropout: 0.0,
            batch_norm: BatchNormSettings::default(),
            seed: Some(42),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = MnasNetConfig::default();
        assert_eq!(cfg.alpha, 1.0);
        assert_eq!(cfg.num_classes, 1000);
        assert_eq!(cfg.batch_norm.momentum, 0.9);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let cfg = MnasNetConfig::from_json_str(r#"{ "alpha": 0.75, "num_classes": 10 }"#).unwrap();
        assert_eq!(cfg.alpha, 0.75);
        assert_eq!(cfg.num_classes, 10);
        assert_eq!(cfg.dropout, 0.0);
        assert_eq!(cfg.seed, Some(42));
    }

    #[test]
    fn test_json_round_trip() {
        let cfg = MnasNetConfig::new(1.3)
            .with_num_classes(2)
            .with_dropout(0.2)
            .with_seed(None);
        let json = cfg.to_json_string().unwrap();
        assert_eq!(MnasNetConfig::from_json_str(&json).unwrap(), cfg);
    }

    #[test]
    fn test_validation() {
        assert!(matches!(
            MnasNetConfig::new(0.0).validate(),
            Err(ModelError::InvalidWidthMultiplier(_))
        ));
        assert!(matches!(
            MnasNetConfig::new(1.0).with_num_classes(0).validate(),
            Err(ModelError::InvalidClassCount)
        ));
        assert!(matches!(
            MnasNetConfig::new(1.0).with_dropout(1.0).validate(),
            Err(ModelError::InvalidDropout(_))
        ));
        assert!(matches!(
            MnasNetConfig::from_json_str(r#"{ "alpha": -2.0 }"#),
            Err(ModelError::InvalidWidthMultiplier(_))
        ));
        assert!(matches!(MnasNetConfig::from_json_str("not json"), Err(ModelError::Config(_))));
    }

    #[test]
    fn test_missing_file() {
        let path = std::env::temp_dir().join("mnasnet-config-does-not-exist.json");
        assert!(matches!(MnasNetConfig::from_json_file(path), Err(ModelError::Config(_))));
    }
}
