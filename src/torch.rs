//! Code for loading and running a (trained) TorchScript classifier

use crate::config::INPUT_SIZE;
use crate::error::{ClassifyError, Result};
use crate::inference::{LabelPrediction, Model};
use crate::preprocess::NormalizedImage;
use std::path::Path;
use std::sync::Mutex;
use tch::{no_grad, Kind, Tensor};

/// A TorchScript module together with the label vocabulary its output indexes
#[derive(Debug)]
pub struct TorchModel {
    /// The loaded torch model. `CModule` is only `Send` in tch 0.14, so
    /// forward passes are serialized.
    model: Mutex<tch::CModule>,

    /// One label per output index
    labels: Vec<String>,

    /// Whether the module outputs logits that still need a softmax
    apply_softmax: bool,
}

impl TorchModel {
    /// Load the module at `model_file` and the newline separated labels at
    /// `labels_file`. Any failure is a `ModelLoad` error.
    pub fn new(
        model_file: impl AsRef<Path>,
        labels_file: impl AsRef<Path>,
        apply_softmax: bool,
    ) -> Result<Self> {
        let model_file = model_file.as_ref();
        let labels_file = labels_file.as_ref();

        let model = tch::CModule::load(model_file).map_err(|e| {
            ClassifyError::ModelLoad(format!("{}: {e}", model_file.display()))
        })?;

        let labels = std::fs::read_to_string(labels_file)
            .map_err(|e| ClassifyError::ModelLoad(format!("{}: {e}", labels_file.display())))?;
        let labels = parse_labels(&labels);
        if labels.is_empty() {
            return Err(ClassifyError::ModelLoad(format!(
                "{}: no labels",
                labels_file.display()
            )));
        }

        Ok(TorchModel {
            model: Mutex::new(model),
            labels,
            apply_softmax,
        })
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }
}

impl Model for TorchModel {
    fn input_shape(&self) -> [usize; 3] {
        [
            NormalizedImage::CHANNELS,
            INPUT_SIZE as usize,
            INPUT_SIZE as usize,
        ]
    }

    fn predict(&self, image: &NormalizedImage) -> Result<Vec<LabelPrediction>> {
        let [c, h, w] = image.shape();
        let input = Tensor::from_slice(image.data()).view([1, c as i64, h as i64, w as i64]);

        let output = {
            let model = self
                .model
                .lock()
                .map_err(|_| ClassifyError::Inference("model lock poisoned".into()))?;
            no_grad(|| model.forward_ts(&[input]))
                .map_err(|e| ClassifyError::Inference(e.to_string()))?
        };

        let output = output.flatten(0, -1);
        let output = match self.apply_softmax {
            true => output.softmax(-1, Some(Kind::Float)),
            false => output.to_kind(Kind::Float),
        };

        // Write tensor to vector
        let n = output.numel();
        let mut scores = vec![0f32; n];
        output.contiguous().copy_data(&mut scores, n);

        if scores.len() != self.labels.len() {
            return Err(ClassifyError::Inference(format!(
                "model produced {} scores for {} labels",
                scores.len(),
                self.labels.len()
            )));
        }

        Ok(self
            .labels
            .iter()
            .zip(scores)
            .map(|(label, confidence)| LabelPrediction::new(label.clone(), confidence))
            .collect())
    }
}

/// One label per non-empty line, surrounding whitespace removed
fn parse_labels(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_labels() {
        let labels = parse_labels("craft_type_1\n\n  craft_type_2 \r\nknitting\n");
        assert_eq!(labels, ["craft_type_1", "craft_type_2", "knitting"]);
    }

    #[test]
    fn test_missing_model_file() {
        let err = TorchModel::new("models/missing.pt", "models/missing.txt", true).unwrap_err();
        assert!(matches!(err, ClassifyError::ModelLoad(_)));
    }
}
