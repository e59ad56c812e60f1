use crate::error::SegmentationError;
use image::{ImageBuffer, Luma, RgbImage};

/// Per-pixel foreground confidence: 0.0 = background, 1.0 = foreground.
/// Dimensions match the frame it was computed from.
pub type Matte = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Trait for segmentation models
/// Allows swapping between different backends (MediaPipe selfie, RVM, ...)
///
/// A model is loaded once and owned by the compositor for the whole session.
pub trait SegmentationModel {
    /// Process an RGB frame and return its confidence grid
    fn segment(&mut self, frame: &RgbImage) -> Result<Matte, SegmentationError>;

    /// Reset internal state (for models with temporal/recurrent components)
    fn reset_state(&mut self) {}

    /// Get the model's input dimensions as (width, height)
    fn input_size(&self) -> (u32, u32);
}

/// How a model expects its input tensor laid out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorLayout {
    /// [1, 3, H, W]
    Nchw,
    /// [1, H, W, 3]
    Nhwc,
}
