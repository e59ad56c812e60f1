mod preprocess;
mod rvm;
mod selfie;
pub mod types;

pub use preprocess::Preprocessor;
pub use rvm::RobustVideoMatting;
pub use selfie::SelfieSegmentation;
pub use types::{Matte, SegmentationModel};

use crate::error::SegmentationError;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use std::fmt::Display;
use std::path::Path;

/// Which pretrained network the ONNX file at `--model` contains
#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModelKind {
    /// MediaPipe selfie segmentation, general (square 256x256) variant
    #[default]
    Selfie,
    /// MediaPipe selfie segmentation, landscape (256x144) variant
    SelfieLandscape,
    /// RobustVideoMatting with recurrent state
    Rvm,
}

/// Load the model once for the whole session
pub fn create_model(
    kind: ModelKind,
    model_path: &Path,
) -> Result<Box<dyn SegmentationModel>, SegmentationError> {
    Ok(match kind {
        ModelKind::Selfie => Box::new(SelfieSegmentation::new(model_path, 256, 256)?),
        ModelKind::SelfieLandscape => Box::new(SelfieSegmentation::new(model_path, 256, 144)?),
        ModelKind::Rvm => Box::new(RobustVideoMatting::new(model_path)?),
    })
}

/// Build an ONNX Runtime session for `path`
pub(crate) fn load_session(path: &Path) -> Result<Session, SegmentationError> {
    let model_err = |err: &dyn Display| SegmentationError::Model {
        path: path.to_path_buf(),
        reason: err.to_string(),
    };

    let session = Session::builder()
        .map_err(|e| model_err(&e))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| model_err(&e))?
        .with_intra_threads(4)
        .map_err(|e| model_err(&e))?
        .commit_from_file(path)
        .map_err(|e| model_err(&e))?;

    Ok(session)
}

pub(crate) fn inference_err(err: impl Display) -> SegmentationError {
    SegmentationError::Inference(err.to_string())
}
