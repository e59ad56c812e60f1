mod v4l_capture;

pub use v4l_capture::WebcamCapture;

use image::RgbImage;

/// Trait for camera capture sources
pub trait CaptureSource {
    /// Capture a single frame
    ///
    /// `None` signals a transient read failure or a closed source; it never panics.
    fn read(&mut self) -> Option<RgbImage>;

    /// Negotiated resolution of captured frames as (width, height)
    fn resolution(&self) -> (u32, u32);

    /// Negotiated frame rate
    fn frame_rate(&self) -> u32;

    /// Release the device. Safe to call more than once.
    fn close(&mut self);
}
