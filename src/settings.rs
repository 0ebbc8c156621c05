//! Runtime settings, layered from defaults, an optional TOML file, and
//! `CRAFTLENS__*` environment variables

use crate::config::{DEFAULT_LABELS_FILE, DEFAULT_MODEL_FILE, RUST_LOG, SETTINGS_FILE, TOP_N};
use crate::error::{ClassifyError, Result};
use crate::preprocess::PreprocessConfig;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct ModelSettings {
    /// TorchScript file
    pub path: PathBuf,
    /// Label vocabulary, one per line, in output index order
    pub labels_path: PathBuf,
    pub top_n: usize,
    pub min_confidence: f32,
    /// Set to false when the module already ends in a softmax
    pub apply_softmax: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogSettings {
    /// `tracing_subscriber::EnvFilter` directive, overridden by `RUST_LOG`
    pub filter: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub model: ModelSettings,
    pub preprocess: PreprocessConfig,
    /// Extra or replacement suggestions, keyed by label
    #[serde(default)]
    pub suggestions: HashMap<String, String>,
    pub log: LogSettings,
}

impl Settings {
    /// Load settings. Without an explicit `path`, `craftlens.toml` in the
    /// working directory is used if it exists.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(SETTINGS_FILE).required(false),
        };
        let settings: Settings = Self::builder()?
            .add_source(file)
            .add_source(Environment::with_prefix("CRAFTLENS").separator("__"))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Built-in defaults only
    pub fn defaults() -> Result<Self> {
        let settings: Settings = Self::builder()?.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject values that would make every classification fail or come back empty
    pub fn validate(&self) -> Result<()> {
        if self.preprocess.size == 0 {
            return Err(ClassifyError::Config("preprocess.size must be positive".into()));
        }
        if self.model.top_n == 0 {
            return Err(ClassifyError::Config("model.top_n must be at least 1".into()));
        }
        let min_confidence = self.model.min_confidence;
        if !min_confidence.is_finite() || !(0.0..=1.0).contains(&min_confidence) {
            return Err(ClassifyError::Config(format!(
                "model.min_confidence must be within [0, 1], got {min_confidence}"
            )));
        }
        Ok(())
    }

    fn builder() -> Result<config::ConfigBuilder<config::builder::DefaultState>> {
        let preprocess = PreprocessConfig::default();
        Ok(Config::builder()
            .set_default("model.path", DEFAULT_MODEL_FILE)?
            .set_default("model.labels_path", DEFAULT_LABELS_FILE)?
            .set_default("model.top_n", TOP_N as u64)?
            .set_default("model.min_confidence", 0.0)?
            .set_default("model.apply_softmax", true)?
            .set_default("preprocess.size", preprocess.size as u64)?
            .set_default("preprocess.filter", "triangle")?
            .set_default("preprocess.resize", "stretch")?
            .set_default("preprocess.scaling", "imagenet")?
            .set_default("preprocess.channel_order", "rgb")?
            .set_default("log.filter", RUST_LOG)?)
    }
}
