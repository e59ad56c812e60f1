use super::preprocess::Preprocessor;
use super::types::{Matte, SegmentationModel, TensorLayout};
use super::{inference_err, load_session};
use crate::error::SegmentationError;
use image::RgbImage;
use ort::session::Session;
use ort::value::Tensor;
use std::path::Path;

/// MediaPipe selfie segmentation exported to ONNX
///
/// Input is a single NHWC frame normalized to [0, 1]; the only output is a
/// [1, H, W, 1] foreground probability grid at model resolution.
pub struct SelfieSegmentation {
    session: Session,
    preprocessor: Preprocessor,
    width: u32,
    height: u32,
}

impl SelfieSegmentation {
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        width: u32,
        height: u32,
    ) -> Result<Self, SegmentationError> {
        let path = model_path.as_ref();
        tracing::info!("Loading selfie segmentation model from {}", path.display());

        let session = load_session(path)?;
        tracing::info!("Selfie segmentation model loaded ({}x{} input)", width, height);

        Ok(Self {
            session,
            preprocessor: Preprocessor::new(width, height, TensorLayout::Nhwc),
            width,
            height,
        })
    }
}

impl SegmentationModel for SelfieSegmentation {
    fn segment(&mut self, frame: &RgbImage) -> Result<Matte, SegmentationError> {
        let _span = tracing::debug_span!("selfie_segment").entered();

        let input = Tensor::from_array(self.preprocessor.preprocess(frame)).map_err(inference_err)?;

        let _infer_span = tracing::debug_span!("inference").entered();
        let outputs = self
            .session
            .run(ort::inputs![input])
            .map_err(inference_err)?;
        drop(_infer_span);

        let mask = outputs[0]
            .try_extract_array::<f32>()
            .map_err(inference_err)?;

        // [1, H, W, 1]
        let shape = mask.shape().to_vec();
        if shape.len() != 4 || shape[0] != 1 || shape[3] != 1 {
            return Err(SegmentationError::Shape(shape));
        }
        let (mask_height, mask_width) = (shape[1] as u32, shape[2] as u32);
        let values: Vec<f32> = mask.iter().copied().collect();

        let (frame_width, frame_height) = frame.dimensions();
        Preprocessor::postprocess_matte(values, mask_width, mask_height, frame_width, frame_height)
    }

    fn input_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}
