//! Turns an arbitrary photo into the fixed-size float tensor the model expects

use crate::config::INPUT_SIZE;
use crate::error::{ClassifyError, Result};
use crate::photo::Image;
use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, RgbImage};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Per-channel mean and standard deviation of the ImageNet training set
const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Interpolation used when resizing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Filter {
    Nearest,
    /// Bilinear
    Triangle,
    CatmullRom,
    Lanczos3,
}

impl From<Filter> for FilterType {
    fn from(filter: Filter) -> FilterType {
        match filter {
            Filter::Nearest => FilterType::Nearest,
            Filter::Triangle => FilterType::Triangle,
            Filter::CatmullRom => FilterType::CatmullRom,
            Filter::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

/// How the photo is fitted into the square model input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResizeMode {
    /// Resize both axes independently, ignoring aspect ratio
    Stretch,
    /// Keep the aspect ratio and pad the rest with black
    Letterbox,
}

/// Value range the pixel channels are mapped to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scaling {
    /// `value / 255`, in [0, 1]
    Unit,
    /// `(value / 255 - mean) / std` with the ImageNet statistics
    ImageNet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelOrder {
    Rgb,
    Bgr,
}

/// Preprocessing convention. Has to match whatever the model was trained with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessConfig {
    /// Side length of the square output
    pub size: u32,
    pub filter: Filter,
    pub resize: ResizeMode,
    pub scaling: Scaling,
    pub channel_order: ChannelOrder,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        PreprocessConfig {
            size: INPUT_SIZE,
            filter: Filter::Triangle,
            resize: ResizeMode::Stretch,
            scaling: Scaling::ImageNet,
            channel_order: ChannelOrder::Rgb,
        }
    }
}

/// A 3-channel float image in CHW layout, ready for inference
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedImage {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl NormalizedImage {
    pub const CHANNELS: usize = 3;

    /// Build from raw CHW data. Returns `None` if `data` does not hold
    /// exactly `3 * height * width` values.
    pub fn from_chw(width: usize, height: usize, data: Vec<f32>) -> Option<Self> {
        (data.len() == Self::CHANNELS * width * height).then_some(NormalizedImage {
            width,
            height,
            data,
        })
    }

    /// `[channels, height, width]`
    pub fn shape(&self) -> [usize; 3] {
        [Self::CHANNELS, self.height, self.width]
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Value of channel `c` at pixel (`x`, `y`)
    pub fn get(&self, c: usize, y: usize, x: usize) -> f32 {
        self.data[c * self.height * self.width + y * self.width + x]
    }
}

/// Normalize with the default convention (224x224, bilinear, RGB, ImageNet)
pub fn normalize(image: &Image) -> Result<NormalizedImage> {
    normalize_with(image, &PreprocessConfig::default())
}

/// Decode, resize, and scale `image` into a `NormalizedImage`
pub fn normalize_with(image: &Image, config: &PreprocessConfig) -> Result<NormalizedImage> {
    if config.size == 0 {
        return Err(ClassifyError::Config("preprocess size must be positive".into()));
    }
    let pixels = image.decode()?;
    debug!(
        "normalizing {:?} image to {size}x{size}",
        pixels.dimensions(),
        size = config.size
    );

    let resized = match config.resize {
        ResizeMode::Stretch => pixels
            .resize_exact(config.size, config.size, config.filter.into())
            .to_rgb8(),
        ResizeMode::Letterbox => letterbox(&pixels, config.size, config.filter.into()),
    };

    Ok(to_tensor(&resized, config))
}

/// Fit inside a `size`x`size` black canvas, centred
fn letterbox(pixels: &DynamicImage, size: u32, filter: FilterType) -> RgbImage {
    let (w, h) = pixels.dimensions();
    let scale = (size as f32 / w as f32).min(size as f32 / h as f32);
    let new_w = ((w as f32 * scale).round() as u32).clamp(1, size);
    let new_h = ((h as f32 * scale).round() as u32).clamp(1, size);

    let scaled = pixels.resize_exact(new_w, new_h, filter).to_rgb8();
    let mut canvas = RgbImage::new(size, size);
    let x_offset = (size - new_w) / 2;
    let y_offset = (size - new_h) / 2;
    imageops::overlay(&mut canvas, &scaled, x_offset as i64, y_offset as i64);
    canvas
}

fn to_tensor(rgb: &RgbImage, config: &PreprocessConfig) -> NormalizedImage {
    let (width, height) = (rgb.width() as usize, rgb.height() as usize);
    let plane = width * height;
    let mut data = vec![0f32; NormalizedImage::CHANNELS * plane];

    for (x, y, pixel) in rgb.enumerate_pixels() {
        let offset = y as usize * width + x as usize;
        for src in 0..NormalizedImage::CHANNELS {
            let dst = match config.channel_order {
                ChannelOrder::Rgb => src,
                ChannelOrder::Bgr => 2 - src,
            };
            let value = pixel[src] as f32 / 255.0;
            data[dst * plane + offset] = match config.scaling {
                Scaling::Unit => value,
                Scaling::ImageNet => (value - IMAGENET_MEAN[src]) / IMAGENET_STD[src],
            };
        }
    }

    NormalizedImage {
        width,
        height,
        data,
    }
}
