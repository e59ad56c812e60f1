mod ffmpeg;
mod loopback;
mod preview;

pub use ffmpeg::FfmpegSink;
pub use loopback::{ensure_loopback_device, LoopbackWriter};
pub use preview::FfplayPreview;

use crate::error::SinkError;
use image::{imageops, RgbImage};
use std::borrow::Cow;

/// Trait for output destinations
pub trait OutputSink {
    /// Write an RGB frame to the output. May block until the consumer accepts it.
    ///
    /// Fails with [`SinkError::Closed`] once the sink has been closed.
    fn write_frame(&mut self, frame: &RgbImage) -> Result<(), SinkError>;

    /// Frame geometry fixed at open time
    fn resolution(&self) -> (u32, u32);

    /// Stop the output. Safe to call more than once.
    fn close(&mut self);
}

/// On-screen preview of the outgoing stream
pub trait PreviewSink {
    /// Show `frame`; returns `false` once the user has quit the preview
    fn show(&mut self, frame: &RgbImage) -> bool;

    fn close(&mut self);
}

/// Which sink implementation feeds the virtual device
#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SinkKind {
    /// Pipe raw RGB into an ffmpeg process that encodes for the v4l2 device
    #[default]
    Ffmpeg,
    /// Convert to YUYV in-process and write straight to the device node
    Direct,
}

/// Path of the `/dev/videoN` node for a device index
pub fn device_path(index: u32) -> std::path::PathBuf {
    std::path::PathBuf::from(format!("/dev/video{index}"))
}

/// Resize `frame` to the sink geometry if it does not already match
fn conform(frame: &RgbImage, width: u32, height: u32) -> Cow<'_, RgbImage> {
    if frame.dimensions() == (width, height) {
        return Cow::Borrowed(frame);
    }

    tracing::debug!(
        "Resizing {}x{} frame to sink geometry {}x{}",
        frame.width(),
        frame.height(),
        width,
        height
    );
    Cow::Owned(imageops::resize(
        frame,
        width,
        height,
        imageops::FilterType::Triangle,
    ))
}
