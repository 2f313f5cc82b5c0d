//! Pixel preprocessing applied before any call into a learning library.

/// Upper bound of the raw pixel value range.
pub const PIXEL_MAX: f32 = 255.0;

/// Threshold for the optional 1-bit color space conversion.
pub const BINARIZE_THRESHOLD: f32 = 0.1;

/// Scales byte pixels into the `[0,1]` range.
pub fn normalize(data: &[u8]) -> Vec<f32> {
    data.iter().map(|&v| v as f32 / PIXEL_MAX).collect()
}

/// Converts normalized pixels to 1-bit color space.
/// Values below [BINARIZE_THRESHOLD] become 0, all others 1.
pub fn binarize_in_place(values: &mut [f32]) {
    for v in values.iter_mut() {
        *v = if *v < BINARIZE_THRESHOLD { 0.0 } else { 1.0 };
    }
}

/// Inverse of [normalize], applied to model output to restore the original
/// pixel scale.
pub fn rescale_in_place(values: &mut [f32]) {
    for v in values.iter_mut() {
        *v *= PIXEL_MAX;
    }
}
