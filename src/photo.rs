//! The image handed to the pipeline by whatever captured or picked the photo

use crate::error::{ClassifyError, Result};
use base64::{engine::general_purpose, Engine as _};
use image::{DynamicImage, GenericImageView};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::path::Path;

/// A captured photo. Either still encoded (jpeg, png, ...) or already decoded
/// into pixels by the photo source. Never mutated once constructed.
#[derive(Clone)]
pub struct Image {
    data: ImageData,
}

#[derive(Clone)]
enum ImageData {
    Encoded(Vec<u8>),
    Pixels(DynamicImage),
}

impl Image {
    /// Wrap encoded image bytes. Decoding is deferred until preprocessing.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Image {
            data: ImageData::Encoded(bytes.into()),
        }
    }

    /// Wrap an already decoded pixel buffer
    pub fn from_pixels(pixels: DynamicImage) -> Self {
        Image {
            data: ImageData::Pixels(pixels),
        }
    }

    /// Read an encoded image from disk
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| {
            ClassifyError::InvalidImage(format!("cannot read {}: {e}", path.display()))
        })?;
        Ok(Image::from_bytes(bytes))
    }

    /// Decode into pixels, rejecting empty or zero-sized images
    pub fn decode(&self) -> Result<DynamicImage> {
        let pixels = match &self.data {
            ImageData::Encoded(bytes) if bytes.is_empty() => {
                return Err(ClassifyError::InvalidImage("empty image data".into()))
            }
            ImageData::Encoded(bytes) => image::load_from_memory(bytes)
                .map_err(|e| ClassifyError::InvalidImage(e.to_string()))?,
            ImageData::Pixels(pixels) => pixels.clone(),
        };

        let (width, height) = pixels.dimensions();
        if width == 0 || height == 0 {
            return Err(ClassifyError::InvalidImage(format!(
                "image has zero dimension ({width}x{height})"
            )));
        }
        Ok(pixels)
    }
}

impl Debug for Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.data {
            ImageData::Encoded(bytes) => write!(f, "Image {{ encoded: <{} bytes> }}", bytes.len()),
            ImageData::Pixels(pixels) => {
                let (width, height) = pixels.dimensions();
                write!(f, "Image {{ pixels: {width}x{height} }}")
            }
        }
    }
}

/// A base 64 encoded image, as sent over JSON by a photo source
#[derive(Serialize, Deserialize)]
pub struct B64Image {
    pub image: String,
}

impl Debug for B64Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "B64Image {{ image: <{} chars> }}", self.image.len())
    }
}

impl TryFrom<B64Image> for Image {
    type Error = ClassifyError;

    fn try_from(b64_img: B64Image) -> Result<Image> {
        let bytes = general_purpose::STANDARD
            .decode(b64_img.image.trim())
            .map_err(|e| ClassifyError::InvalidImage(format!("bad base64: {e}")))?;
        Ok(Image::from_bytes(bytes))
    }
}

impl From<&[u8]> for B64Image {
    fn from(bytes: &[u8]) -> B64Image {
        B64Image {
            image: general_purpose::STANDARD.encode(bytes),
        }
    }
}
