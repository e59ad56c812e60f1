use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while opening or warming up the physical camera
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("no camera device at {}", .0.display())]
    DeviceUnavailable(PathBuf),
    #[error("failed to open camera {index}: {reason}")]
    Open { index: u32, reason: String },
    #[error("camera {index} produced no frame within {attempts} warm-up reads")]
    NoFrames { index: u32, attempts: usize },
}

/// Errors raised by frame sinks and the preview window
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("sink is closed")]
    Closed,
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write frame: {0}")]
    Write(#[from] std::io::Error),
    #[error(
        "could not create v4l2loopback device at {}; install it from https://github.com/umlaeute/v4l2loopback",
        .0.display()
    )]
    LoopbackMissing(PathBuf),
    #[error("v4l2 device error: {0}")]
    Device(String),
}

/// Errors raised by segmentation backends
#[derive(Error, Debug)]
pub enum SegmentationError {
    #[error("failed to load model from {}: {reason}", path.display())]
    Model { path: PathBuf, reason: String },
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("unexpected model output shape {0:?}")]
    Shape(Vec<usize>),
}
