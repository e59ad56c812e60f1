use super::types::{Matte, TensorLayout};
use crate::error::SegmentationError;
use image::{imageops, RgbImage};
use ndarray::Array4;

/// Preprocessor for converting RGB images to model input tensors
pub struct Preprocessor {
    target_width: u32,
    target_height: u32,
    layout: TensorLayout,
}

impl Preprocessor {
    pub fn new(target_width: u32, target_height: u32, layout: TensorLayout) -> Self {
        Self {
            target_width,
            target_height,
            layout,
        }
    }

    /// Preprocess an RGB image into a normalized tensor
    ///
    /// Steps:
    /// 1. Resize to target dimensions
    /// 2. Convert to float and normalize to [0, 1]
    /// 3. Lay out as NCHW or NHWC depending on the model
    pub fn preprocess(&self, image: &RgbImage) -> Array4<f32> {
        let _span = tracing::debug_span!("preprocess").entered();

        let resized = if image.dimensions() != (self.target_width, self.target_height) {
            imageops::resize(
                image,
                self.target_width,
                self.target_height,
                imageops::FilterType::Triangle,
            )
        } else {
            image.clone()
        };

        let (width, height) = (resized.width() as usize, resized.height() as usize);
        let mut tensor = match self.layout {
            TensorLayout::Nchw => Array4::<f32>::zeros((1, 3, height, width)),
            TensorLayout::Nhwc => Array4::<f32>::zeros((1, height, width, 3)),
        };

        for (x, y, pixel) in resized.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            for c in 0..3 {
                let value = pixel[c] as f32 / 255.0;
                match self.layout {
                    TensorLayout::Nchw => tensor[[0, c, y, x]] = value,
                    TensorLayout::Nhwc => tensor[[0, y, x, c]] = value,
                }
            }
        }

        tensor
    }

    /// Resize a model-resolution matte (row-major) back to the frame dimensions
    pub fn postprocess_matte(
        matte: Vec<f32>,
        matte_width: u32,
        matte_height: u32,
        target_width: u32,
        target_height: u32,
    ) -> Result<Matte, SegmentationError> {
        let _span = tracing::debug_span!("postprocess").entered();

        let len = matte.len();
        let matte = Matte::from_raw(matte_width, matte_height, matte).ok_or_else(|| {
            SegmentationError::Shape(vec![len, matte_height as usize, matte_width as usize])
        })?;

        if (matte_width, matte_height) == (target_width, target_height) {
            return Ok(matte);
        }

        Ok(imageops::resize(
            &matte,
            target_width,
            target_height,
            imageops::FilterType::Triangle,
        ))
    }

    /// Convert matte to grayscale RGB image for visualization
    pub fn matte_to_rgb(matte: &Matte) -> RgbImage {
        RgbImage::from_fn(matte.width(), matte.height(), |x, y| {
            let value = (matte.get_pixel(x, y)[0] * 255.0).clamp(0.0, 255.0) as u8;
            image::Rgb([value, value, value])
        })
    }
}
