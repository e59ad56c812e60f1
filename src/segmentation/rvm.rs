use super::preprocess::Preprocessor;
use super::types::{Matte, SegmentationModel, TensorLayout};
use super::{inference_err, load_session};
use crate::error::SegmentationError;
use image::RgbImage;
use ndarray::{Array4, ArrayViewD, Ix4};
use ort::session::Session;
use ort::value::Tensor;
use std::path::Path;

/// RobustVideoMatting segmentation model
///
/// This model uses recurrent connections to maintain temporal consistency.
/// Hidden states (r1-r4) are carried between frames for smooth results.
pub struct RobustVideoMatting {
    session: Session,
    preprocessor: Preprocessor,
    width: u32,
    height: u32,

    // Fed back into the next inference
    r1: Option<Array4<f32>>,
    r2: Option<Array4<f32>>,
    r3: Option<Array4<f32>>,
    r4: Option<Array4<f32>>,

    downsample_ratio: f32,
}

impl RobustVideoMatting {
    /// Create a new RVM model from an ONNX file
    ///
    /// # Default Configuration
    /// - Input size: 512x512
    /// - Downsample ratio: 0.25 (hidden states are 1/4 of input resolution)
    pub fn new<P: AsRef<Path>>(model_path: P) -> Result<Self, SegmentationError> {
        let path = model_path.as_ref();

        tracing::info!("Loading RVM model from {}", path.display());
        let session = load_session(path)?;
        tracing::info!("RVM model loaded successfully");

        let width = 512;
        let height = 512;

        Ok(Self {
            session,
            preprocessor: Preprocessor::new(width, height, TensorLayout::Nchw),
            width,
            height,
            r1: None,
            r2: None,
            r3: None,
            r4: None,
            downsample_ratio: 0.25,
        })
    }

    fn hidden_states(&self) -> [Array4<f32>; 4] {
        let h = (self.height as f32 * self.downsample_ratio) as usize;
        let w = (self.width as f32 * self.downsample_ratio) as usize;

        match (&self.r1, &self.r2, &self.r3, &self.r4) {
            (Some(r1), Some(r2), Some(r3), Some(r4)) => {
                [r1.clone(), r2.clone(), r3.clone(), r4.clone()]
            }
            _ => {
                tracing::debug!("Initializing hidden states to {}x{}", w, h);
                [
                    Array4::zeros((1, 16, h, w)),
                    Array4::zeros((1, 20, h / 2, w / 2)),
                    Array4::zeros((1, 24, h / 4, w / 4)),
                    Array4::zeros((1, 28, h / 8, w / 8)),
                ]
            }
        }
    }
}

fn to_state(view: ArrayViewD<'_, f32>) -> Result<Array4<f32>, SegmentationError> {
    let shape = view.shape().to_vec();
    view.to_owned()
        .into_dimensionality::<Ix4>()
        .map_err(|_| SegmentationError::Shape(shape))
}

impl SegmentationModel for RobustVideoMatting {
    fn segment(&mut self, frame: &RgbImage) -> Result<Matte, SegmentationError> {
        let _span = tracing::debug_span!("rvm_segment").entered();

        let [r1, r2, r3, r4] = self.hidden_states();
        let src = Tensor::from_array(self.preprocessor.preprocess(frame)).map_err(inference_err)?;
        let r1 = Tensor::from_array(r1).map_err(inference_err)?;
        let r2 = Tensor::from_array(r2).map_err(inference_err)?;
        let r3 = Tensor::from_array(r3).map_err(inference_err)?;
        let r4 = Tensor::from_array(r4).map_err(inference_err)?;

        let _infer_span = tracing::debug_span!("inference").entered();
        let outputs = self
            .session
            .run(ort::inputs![src, r1, r2, r3, r4])
            .map_err(inference_err)?;
        drop(_infer_span);

        // Outputs: fgr, pha, r1o, r2o, r3o, r4o
        let pha = outputs[1].try_extract_array::<f32>().map_err(inference_err)?;
        let next = [
            to_state(outputs[2].try_extract_array::<f32>().map_err(inference_err)?)?,
            to_state(outputs[3].try_extract_array::<f32>().map_err(inference_err)?)?,
            to_state(outputs[4].try_extract_array::<f32>().map_err(inference_err)?)?,
            to_state(outputs[5].try_extract_array::<f32>().map_err(inference_err)?)?,
        ];

        // [1, 1, H, W]
        let shape = pha.shape().to_vec();
        if shape.len() != 4 || shape[0] != 1 || shape[1] != 1 {
            return Err(SegmentationError::Shape(shape));
        }
        let (matte_height, matte_width) = (shape[2] as u32, shape[3] as u32);
        let values: Vec<f32> = pha.iter().copied().collect();
        drop(outputs);

        let [n1, n2, n3, n4] = next;
        self.r1 = Some(n1);
        self.r2 = Some(n2);
        self.r3 = Some(n3);
        self.r4 = Some(n4);

        let (frame_width, frame_height) = frame.dimensions();
        Preprocessor::postprocess_matte(
            values,
            matte_width,
            matte_height,
            frame_width,
            frame_height,
        )
    }

    fn reset_state(&mut self) {
        tracing::info!("Resetting RVM hidden states");
        self.r1 = None;
        self.r2 = None;
        self.r3 = None;
        self.r4 = None;
    }

    fn input_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}
