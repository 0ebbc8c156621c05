//! The classification service ties preprocessing, inference, and suggestion
//! lookup together behind a single `classify` call

use crate::error::{ClassifyError, Result};
use crate::inference::{InferenceEngine, Model, SharedModel};
use crate::photo::Image;
use crate::preprocess::{self, PreprocessConfig};
use crate::settings::Settings;
use crate::suggestion::SuggestionResolver;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

/// What a photo was classified as, and the advice that goes with it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub label: String,
    pub confidence: f32,
    pub suggestion: String,
}

#[derive(Debug, Clone)]
pub struct ClassificationService {
    preprocess: PreprocessConfig,
    engine: InferenceEngine,
    resolver: SuggestionResolver,
}

impl ClassificationService {
    pub fn new(
        preprocess: PreprocessConfig,
        engine: InferenceEngine,
        resolver: SuggestionResolver,
    ) -> Self {
        ClassificationService {
            preprocess,
            engine,
            resolver,
        }
    }

    /// A service around an in-memory model with default preprocessing and
    /// the built-in suggestions
    pub fn with_model(model: Arc<dyn Model>) -> Self {
        let shared = Arc::new(SharedModel::loaded("in-memory", model));
        ClassificationService::new(
            PreprocessConfig::default(),
            InferenceEngine::new(shared),
            SuggestionResolver::new(),
        )
    }

    /// Build the service described by `settings`. The model is not loaded
    /// until the first classification (or an explicit `preload`).
    pub fn from_settings(settings: &Settings) -> Self {
        let model = settings.model.clone();
        let name = model.path.display().to_string();
        let shared = SharedModel::lazy(name, move || load_model(&model));

        let engine = InferenceEngine::new(Arc::new(shared))
            .with_top_n(settings.model.top_n)
            .with_min_confidence(settings.model.min_confidence);

        ClassificationService::new(
            settings.preprocess.clone(),
            engine,
            SuggestionResolver::with_overrides(settings.suggestions.clone()),
        )
    }

    /// Load the model now instead of on the first request
    pub fn preload(&self) -> Result<()> {
        self.engine.model().preload()
    }

    /// Classify a photo. Preprocessing and inference errors are returned
    /// unchanged; an image the model recognises nothing in still yields a
    /// `Classification` with an empty label, zero confidence, and the
    /// default suggestion.
    #[tracing::instrument(skip(self))]
    pub fn classify(&self, image: &Image) -> Result<Classification> {
        let normalized = preprocess::normalize_with(image, &self.preprocess)?;
        let predictions = self.engine.predict(&normalized)?;

        let (label, confidence) = match predictions.into_iter().next() {
            Some(top) => (top.label, top.confidence),
            None => {
                debug!("model recognised nothing in the image");
                (String::new(), 0.0)
            }
        };
        let suggestion = self.resolver.resolve(&label).to_string();

        info!("classified image as {label:?} ({confidence:.2})");
        Ok(Classification {
            label,
            confidence,
            suggestion,
        })
    }

    /// Run `classify` on the blocking thread pool so async callers are not
    /// stalled by inference
    pub async fn classify_async(self: Arc<Self>, image: Image) -> Result<Classification> {
        tokio::task::spawn_blocking(move || self.classify(&image))
            .await
            .map_err(|e| ClassifyError::Inference(format!("classification task failed: {e}")))?
    }
}

#[cfg(feature = "torch")]
fn load_model(model: &crate::settings::ModelSettings) -> Result<Arc<dyn Model>> {
    let torch =
        crate::torch::TorchModel::new(&model.path, &model.labels_path, model.apply_softmax)?;
    Ok(Arc::new(torch))
}

#[cfg(not(feature = "torch"))]
fn load_model(_model: &crate::settings::ModelSettings) -> Result<Arc<dyn Model>> {
    Err(ClassifyError::ModelLoad(
        "craftlens was built without the `torch` feature".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::{FixedModel, LabelPrediction};
    use crate::suggestion::DEFAULT_SUGGESTION;
    use crate::util::test;
    use std::collections::HashMap;

    fn photo() -> Image {
        Image::from_bytes(test::png_bytes(320, 240))
    }

    #[test]
    fn test_top_prediction_wins() {
        let service = ClassificationService::with_model(Arc::new(FixedModel::new(vec![
            LabelPrediction::new("craft_type_2", 0.2),
            LabelPrediction::new("craft_type_1", 0.6),
        ])));
        let classification = service.classify(&photo()).unwrap();
        assert_eq!(classification.label, "craft_type_1");
        assert_eq!(classification.confidence, 0.6);
        assert_eq!(
            classification.suggestion,
            "Try using a blue thread to create a beautiful embroidery pattern."
        );
    }

    #[test]
    fn test_no_predictions() {
        let service = ClassificationService::with_model(Arc::new(FixedModel::empty()));
        let classification = service.classify(&photo()).unwrap();
        assert_eq!(
            classification,
            Classification {
                label: String::new(),
                confidence: 0.0,
                suggestion: DEFAULT_SUGGESTION.into(),
            }
        );
    }

    #[test]
    fn test_invalid_image_propagates() {
        let service = ClassificationService::with_model(Arc::new(FixedModel::empty()));
        let err = service.classify(&Image::from_bytes(Vec::new())).unwrap_err();
        assert!(matches!(err, ClassifyError::InvalidImage(_)));
    }

    #[test]
    fn test_from_settings_uses_overrides() {
        let mut settings = Settings::defaults().unwrap();
        settings.model.path = "models/does-not-exist.pt".into();
        settings.suggestions = HashMap::from([("knitting".into(), "Mind your gauge.".into())]);

        let service = ClassificationService::from_settings(&settings);
        assert_eq!(service.resolver.resolve("knitting"), "Mind your gauge.");
        assert!(matches!(
            service.classify(&photo()),
            Err(ClassifyError::ModelLoad(_))
        ));
        assert!(matches!(service.preload(), Err(ClassifyError::ModelLoad(_))));
    }

    #[test]
    fn test_classification_json() {
        let classification = Classification {
            label: "craft_type_2".into(),
            confidence: 0.5,
            suggestion: "glue".into(),
        };
        assert_eq!(
            serde_json::to_string(&classification).unwrap(),
            r#"{"label":"craft_type_2","confidence":0.5,"suggestion":"glue"}"#
        );
    }
}
