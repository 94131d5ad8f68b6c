//! Decoding sources and producing resized JPEG variants.
//!
//! | Step | Crate / function |
//! |---|---|
//! | Decode (JPEG, PNG, TIFF, WebP) | `image::load_from_memory_with_format` |
//! | Resize | `DynamicImage::resize_exact` with `Lanczos3` |
//! | Encode | `image::codecs::jpeg::JpegEncoder` |
//! | Metadata | [`ExifSegment`] transplant (JPEG sources only) |
//!
//! A source is decoded once; all configured widths are then generated in
//! parallel on the rayon pool. Every width runs to completion and the first
//! error in width order fails the whole image.

use super::calculations::variant_dimensions;
use super::exif::ExifSegment;
use super::params::Quality;
use crate::naming::VariantSpec;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ExtendedColorType, ImageEncoder, ImageFormat};
use rayon::prelude::*;
use thiserror::Error;

/// Content type of every encoded variant.
pub const VARIANT_CONTENT_TYPE: &str = "image/jpeg";

#[derive(Error, Debug)]
pub enum ImagingError {
    #[error("unrecognized image format")]
    UnknownFormat,
    #[error("invalid image data: {0}")]
    Decode(#[source] image::ImageError),
    #[error("JPEG encoding failed for {path}: {source}")]
    Encode {
        path: String,
        #[source]
        source: image::ImageError,
    },
}

/// A decoded source image plus the metadata to carry into its variants.
pub struct SourceImage {
    pub image: DynamicImage,
    pub format: ImageFormat,
    /// Present only for JPEG sources that carry Exif.
    pub exif: Option<ExifSegment>,
}

impl SourceImage {
    /// Decode raw source bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, ImagingError> {
        let format = image::guess_format(bytes).map_err(|_| ImagingError::UnknownFormat)?;
        let image =
            image::load_from_memory_with_format(bytes, format).map_err(ImagingError::Decode)?;
        let exif = match format {
            ImageFormat::Jpeg => ExifSegment::from_jpeg(bytes),
            _ => None,
        };
        Ok(Self {
            image,
            format,
            exif,
        })
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.image.width(), self.image.height())
    }
}

/// One encoded variant, ready to publish.
#[derive(Debug, Clone)]
pub struct EncodedVariant {
    pub spec: VariantSpec,
    pub path: String,
    pub width: u32,
    pub height: u32,
    pub bytes: Vec<u8>,
}

/// Produces every configured variant of a source image.
#[derive(Debug, Clone)]
pub struct VariantGenerator {
    specs: Vec<VariantSpec>,
    quality: Quality,
    prefix: String,
}

impl VariantGenerator {
    pub fn new(widths: &[u32], quality: Quality, prefix: impl Into<String>) -> Self {
        Self {
            specs: VariantSpec::from_widths(widths),
            quality,
            prefix: prefix.into(),
        }
    }

    pub fn specs(&self) -> &[VariantSpec] {
        &self.specs
    }

    /// Object paths `filename` publishes to, in width order.
    pub fn target_paths(&self, filename: &str) -> Vec<String> {
        self.specs
            .iter()
            .map(|spec| spec.target_path(&self.prefix, filename))
            .collect()
    }

    /// Generate all variants of `source` in parallel.
    pub fn generate(
        &self,
        source: &SourceImage,
        filename: &str,
    ) -> Result<Vec<EncodedVariant>, ImagingError> {
        let results: Vec<Result<EncodedVariant, ImagingError>> = self
            .specs
            .par_iter()
            .map(|spec| self.generate_one(source, filename, *spec))
            .collect();
        results.into_iter().collect()
    }

    fn generate_one(
        &self,
        source: &SourceImage,
        filename: &str,
        spec: VariantSpec,
    ) -> Result<EncodedVariant, ImagingError> {
        let original = source.dimensions();
        let (width, height) = variant_dimensions(original, spec.width);
        let path = spec.target_path(&self.prefix, filename);

        let rgb = if (width, height) == original {
            source.image.to_rgb8()
        } else {
            source
                .image
                .resize_exact(width, height, FilterType::Lanczos3)
                .to_rgb8()
        };

        let mut encoded = Vec::new();
        JpegEncoder::new_with_quality(&mut encoded, self.quality.value())
            .write_image(rgb.as_raw(), width, height, ExtendedColorType::Rgb8)
            .map_err(|source| ImagingError::Encode {
                path: path.clone(),
                source,
            })?;

        let bytes = match &source.exif {
            Some(exif) => exif.transplant(encoded),
            None => encoded,
        };

        Ok(EncodedVariant {
            spec,
            path,
            width,
            height,
            bytes,
        })
    }
}
