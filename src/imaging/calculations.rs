//! Pure calculation functions for variant dimensions.
//!
//! All functions here are pure and testable without any I/O or images.

/// Calculate the output size for a target width.
///
/// `target_width == 0` keeps the original width. The height follows the
/// original aspect ratio and is **truncated**, not rounded:
/// `floor(width / (orig_w / orig_h))`. A height that truncates to zero is
/// raised to one pixel so the encoder always receives a real image.
///
/// # Examples
/// ```
/// # use image_publisher::imaging::variant_dimensions;
/// assert_eq!(variant_dimensions((1000, 500), 250), (250, 125));
/// assert_eq!(variant_dimensions((1001, 500), 250), (250, 124));
/// assert_eq!(variant_dimensions((800, 600), 0), (800, 600));
/// ```
pub fn variant_dimensions(original: (u32, u32), target_width: u32) -> (u32, u32) {
    let (orig_w, orig_h) = original;
    let width = if target_width > 0 { target_width } else { orig_w };
    let aspect = orig_w as f64 / orig_h as f64;
    let height = (width as f64 / aspect) as u32;
    (width, height.max(1))
}
