//! Image processing in pure Rust.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Decode** | `image::load_from_memory_with_format` |
//! | **Resize → JPEG** | Lanczos3 + `JpegEncoder` |
//! | **Exif** | custom APP1 segment transplant |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for dimension math (unit testable)
//! - **Parameters**: Encoding quality
//! - **Exif**: Metadata carried from a JPEG source into its variants
//! - **Variants**: [`SourceImage`] decoding + [`VariantGenerator`]

mod calculations;
pub mod exif;
mod params;
pub mod variants;

pub use calculations::variant_dimensions;
pub use exif::ExifSegment;
pub use params::Quality;
pub use variants::{
    EncodedVariant, ImagingError, SourceImage, VARIANT_CONTENT_TYPE, VariantGenerator,
};
