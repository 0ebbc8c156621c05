pub mod error;
pub mod inference;
pub mod photo;
pub mod preprocess;
pub mod service;
pub mod settings;
pub mod suggestion;
#[cfg(feature = "torch")]
pub mod torch;

pub use error::{ClassifyError, Result};
pub use inference::{FixedModel, InferenceEngine, LabelPrediction, Model, SharedModel};
pub use photo::{B64Image, Image};
pub use preprocess::{normalize, NormalizedImage, PreprocessConfig};
pub use service::{Classification, ClassificationService};
pub use suggestion::{resolve_suggestion, SuggestionResolver, DEFAULT_SUGGESTION};

/// Craftlens built-in defaults. Anything here can be overridden through
/// `settings::Settings`.
pub mod config {
    /// Side length of the square model input
    pub const INPUT_SIZE: u32 = 224;

    /// Keep the `TOP_N` most confident predictions
    pub const TOP_N: usize = 5;

    /// Default log filter when `RUST_LOG` is unset
    pub const RUST_LOG: &str = "info";

    /// The TorchScript model bundled with the app
    pub const DEFAULT_MODEL_FILE: &str = "models/craft_model.pt";

    /// Label vocabulary of the bundled model
    pub const DEFAULT_LABELS_FILE: &str = "models/craft_labels.txt";

    /// Settings file looked up in the working directory
    pub const SETTINGS_FILE: &str = "craftlens.toml";
}

pub mod util {
    use tracing_subscriber::EnvFilter;

    /// Install the global fmt subscriber. `RUST_LOG` takes precedence over
    /// `default_filter`.
    pub fn init_tracing(default_filter: &str) {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_filter));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    }

    #[cfg(test)]
    pub mod test {
        use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};
        use std::io::Cursor;

        /// A single-colour image
        pub fn solid(width: u32, height: u32, rgb: [u8; 3]) -> DynamicImage {
            DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb(rgb)))
        }

        /// A gradient, encoded as png
        pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
            let img = RgbImage::from_fn(width, height, |x, y| {
                Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
            });
            let mut bytes = Vec::new();
            DynamicImage::ImageRgb8(img)
                .write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)
                .unwrap();
            bytes
        }
    }
}
