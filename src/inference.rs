//! The inference engine: a lazily loaded, read-only model shared by every
//! classification, plus the post-processing that turns raw scores into a
//! ranked list of labels

use crate::config::{INPUT_SIZE, TOP_N};
use crate::error::{ClassifyError, Result};
use crate::preprocess::NormalizedImage;
use once_cell::sync::OnceCell;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A label predicted by the model with its confidence in [0, 1]
#[derive(Debug, Clone, PartialEq)]
pub struct LabelPrediction {
    pub label: String,
    pub confidence: f32,
}

impl LabelPrediction {
    pub fn new(label: impl Into<String>, confidence: f32) -> Self {
        LabelPrediction {
            label: label.into(),
            confidence,
        }
    }
}

/// A pre-trained classifier. Implementations must be pure given their
/// loaded weights: the same input always yields the same scores.
pub trait Model: Debug + Send + Sync {
    /// The `[channels, height, width]` shape the model accepts
    fn input_shape(&self) -> [usize; 3];

    /// Score every label the model knows about. Order does not matter.
    fn predict(&self, image: &NormalizedImage) -> Result<Vec<LabelPrediction>>;
}

type Loader = Box<dyn Fn() -> Result<Arc<dyn Model>> + Send + Sync>;

/// A model handle that loads exactly once, on first use, and is read-only
/// afterwards. A failed load is remembered: every later access returns the
/// same `ModelLoad` error instead of trying again.
pub struct SharedModel {
    name: String,
    cell: OnceCell<std::result::Result<Arc<dyn Model>, String>>,
    loader: Loader,
}

impl SharedModel {
    /// Defer loading to `loader`, called at most once
    pub fn lazy<F>(name: impl Into<String>, loader: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn Model>> + Send + Sync + 'static,
    {
        SharedModel {
            name: name.into(),
            cell: OnceCell::new(),
            loader: Box::new(loader),
        }
    }

    /// Wrap a model that is already in memory
    pub fn loaded(name: impl Into<String>, model: Arc<dyn Model>) -> Self {
        SharedModel {
            name: name.into(),
            cell: OnceCell::with_value(Ok(model)),
            loader: Box::new(|| Err(ClassifyError::ModelLoad("model already loaded".into()))),
        }
    }

    /// Get the model, loading it if this is the first access
    pub fn get(&self) -> Result<&Arc<dyn Model>> {
        let loaded = self.cell.get_or_init(|| {
            info!("loading model {}", self.name);
            match (self.loader)() {
                Ok(model) => {
                    info!("loaded model {}: {:?}", self.name, model);
                    Ok(model)
                }
                Err(e) => {
                    warn!("model {} is unavailable: {e}", self.name);
                    Err(match e {
                        ClassifyError::ModelLoad(msg) => msg,
                        other => other.to_string(),
                    })
                }
            }
        });
        loaded
            .as_ref()
            .map_err(|msg| ClassifyError::ModelLoad(msg.clone()))
    }

    /// Force the load now so a broken artifact is reported at startup
    pub fn preload(&self) -> Result<()> {
        self.get().map(|_| ())
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.cell.get(), Some(Ok(_)))
    }
}

impl Debug for SharedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.cell.get() {
            None => "pending",
            Some(Ok(_)) => "loaded",
            Some(Err(_)) => "failed",
        };
        write!(f, "SharedModel {{ name: {:?}, state: {state} }}", self.name)
    }
}

/// Runs the shared model and ranks its output
#[derive(Debug, Clone)]
pub struct InferenceEngine {
    model: Arc<SharedModel>,
    /// Keep at most this many predictions
    top_n: usize,
    /// Drop predictions below this confidence
    min_confidence: f32,
}

impl InferenceEngine {
    pub fn new(model: Arc<SharedModel>) -> Self {
        InferenceEngine {
            model,
            top_n: TOP_N,
            min_confidence: 0.0,
        }
    }

    pub fn with_top_n(mut self, top_n: usize) -> Self {
        self.top_n = top_n;
        self
    }

    pub fn with_min_confidence(mut self, min_confidence: f32) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    pub fn model(&self) -> &Arc<SharedModel> {
        &self.model
    }

    /// Predictions sorted by descending confidence. May be empty.
    pub fn predict(&self, image: &NormalizedImage) -> Result<Vec<LabelPrediction>> {
        let model = self.model.get()?;

        let expected = model.input_shape();
        if image.shape() != expected {
            return Err(ClassifyError::ModelInput {
                expected,
                actual: image.shape(),
            });
        }

        let raw = model.predict(image)?;
        let total = raw.len();
        let predictions = rank(raw, self.min_confidence, self.top_n);
        debug!(
            "model produced {total} scores, kept {}: {predictions:?}",
            predictions.len()
        );
        Ok(predictions)
    }
}

/// Drop non-finite scores, clamp into [0, 1], sort descending (stable),
/// apply the threshold, and keep the first `top_n`
fn rank(raw: Vec<LabelPrediction>, min_confidence: f32, top_n: usize) -> Vec<LabelPrediction> {
    let mut predictions: Vec<LabelPrediction> = raw
        .into_iter()
        .filter(|p| p.confidence.is_finite())
        .map(|p| LabelPrediction {
            confidence: p.confidence.clamp(0.0, 1.0),
            ..p
        })
        .filter(|p| p.confidence >= min_confidence)
        .collect();
    predictions.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    predictions.truncate(top_n);
    predictions
}

/// A model that returns a fixed set of scores regardless of the input.
/// Useful wherever a deterministic stand-in for a trained artifact is needed.
#[derive(Debug, Clone)]
pub struct FixedModel {
    predictions: Vec<LabelPrediction>,
    input_shape: [usize; 3],
}

impl FixedModel {
    pub fn new(predictions: Vec<LabelPrediction>) -> Self {
        FixedModel {
            predictions,
            input_shape: [
                NormalizedImage::CHANNELS,
                INPUT_SIZE as usize,
                INPUT_SIZE as usize,
            ],
        }
    }

    /// A model that never recognises anything
    pub fn empty() -> Self {
        FixedModel::new(Vec::new())
    }

    pub fn with_input_shape(mut self, input_shape: [usize; 3]) -> Self {
        self.input_shape = input_shape;
        self
    }
}

impl Model for FixedModel {
    fn input_shape(&self) -> [usize; 3] {
        self.input_shape
    }

    fn predict(&self, _image: &NormalizedImage) -> Result<Vec<LabelPrediction>> {
        Ok(self.predictions.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn blank() -> NormalizedImage {
        NormalizedImage::from_chw(224, 224, vec![0.0; 3 * 224 * 224]).unwrap()
    }

    fn engine(model: FixedModel) -> InferenceEngine {
        InferenceEngine::new(Arc::new(SharedModel::loaded("fixed", Arc::new(model))))
    }

    #[test]
    fn test_sorted_descending() {
        let model = FixedModel::new(vec![
            LabelPrediction::new("a", 0.1),
            LabelPrediction::new("b", 0.7),
            LabelPrediction::new("c", 0.05),
            LabelPrediction::new("d", 0.15),
        ]);
        let predictions = engine(model).predict(&blank()).unwrap();
        let labels: Vec<_> = predictions.iter().map(|p| p.label.as_str()).collect();
        assert_eq!(labels, ["b", "d", "a", "c"]);
        assert!(predictions
            .windows(2)
            .all(|w| w[0].confidence >= w[1].confidence));
    }

    #[test]
    fn test_top_n_and_threshold() {
        let model = FixedModel::new(
            (0..10)
                .map(|i| LabelPrediction::new(format!("l{i}"), i as f32 / 10.0))
                .collect(),
        );
        let predictions = engine(model.clone())
            .with_top_n(3)
            .predict(&blank())
            .unwrap();
        assert_eq!(predictions.len(), 3);
        assert_eq!(predictions[0].label, "l9");

        let predictions = engine(model)
            .with_top_n(100)
            .with_min_confidence(0.75)
            .predict(&blank())
            .unwrap();
        let labels: Vec<_> = predictions.iter().map(|p| p.label.as_str()).collect();
        assert_eq!(labels, ["l9", "l8"]);
    }

    #[test]
    fn test_scores_clamped_and_nan_dropped() {
        let model = FixedModel::new(vec![
            LabelPrediction::new("nan", f32::NAN),
            LabelPrediction::new("high", 1.5),
            LabelPrediction::new("low", -0.2),
        ]);
        let predictions = engine(model).predict(&blank()).unwrap();
        assert_eq!(
            predictions,
            vec![
                LabelPrediction::new("high", 1.0),
                LabelPrediction::new("low", 0.0)
            ]
        );
    }

    #[test]
    fn test_empty_is_legal() {
        let predictions = engine(FixedModel::empty()).predict(&blank()).unwrap();
        assert!(predictions.is_empty());
    }

    #[test]
    fn test_shape_mismatch() {
        let model = FixedModel::empty().with_input_shape([3, 299, 299]);
        let err = engine(model).predict(&blank()).unwrap_err();
        assert_eq!(
            err,
            ClassifyError::ModelInput {
                expected: [3, 299, 299],
                actual: [3, 224, 224],
            }
        );
    }

    #[test]
    fn test_loads_once() {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = loads.clone();
        let shared = Arc::new(SharedModel::lazy("counted", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(FixedModel::empty()) as Arc<dyn Model>)
        }));
        assert!(!shared.is_loaded());

        let engine = InferenceEngine::new(shared.clone());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let engine = engine.clone();
                std::thread::spawn(move || engine.predict(&blank()).unwrap())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert!(shared.is_loaded());
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_load_failure_is_sticky() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let shared = SharedModel::lazy("broken", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(ClassifyError::ModelLoad("no such file".into()))
        });

        assert_eq!(
            shared.preload().unwrap_err(),
            ClassifyError::ModelLoad("no such file".into())
        );
        let engine = InferenceEngine::new(Arc::new(shared));
        assert!(matches!(
            engine.predict(&blank()),
            Err(ClassifyError::ModelLoad(_))
        ));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
