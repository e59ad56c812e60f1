use super::CaptureSource;
use crate::error::CaptureError;
use image::RgbImage;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution,
};
use nokhwa::Camera;
use std::path::PathBuf;

/// Number of reads used to confirm the device is streaming before handing it out
const WARMUP_READS: usize = 3;

pub struct WebcamCapture {
    camera: Option<Camera>,
    index: u32,
    width: u32,
    height: u32,
    fps: u32,
}

impl WebcamCapture {
    /// Open camera `device_index`, requesting the closest MJPEG mode to the
    /// given geometry. The device may negotiate something else; the actual
    /// values are what [`CaptureSource::resolution`] reports.
    pub fn open(
        device_index: u32,
        width: u32,
        height: u32,
        fps: u32,
    ) -> Result<Self, CaptureError> {
        let node = PathBuf::from(format!("/dev/video{device_index}"));
        if cfg!(target_os = "linux") && !node.exists() {
            return Err(CaptureError::DeviceUnavailable(node));
        }

        tracing::info!(
            "Initializing webcam {} at {}x{} @ {} Hz",
            device_index,
            width,
            height,
            fps
        );

        let index = CameraIndex::Index(device_index);
        let format = CameraFormat::new(Resolution::new(width, height), FrameFormat::MJPEG, fps);
        let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(format));

        let open_err = |err: nokhwa::NokhwaError| CaptureError::Open {
            index: device_index,
            reason: err.to_string(),
        };
        let mut camera = Camera::new(index, requested).map_err(open_err)?;
        camera.open_stream().map_err(open_err)?;

        let negotiated = camera.resolution();
        let negotiated_fps = camera.frame_rate();
        tracing::info!(
            "Webcam is set to: {}x{} @ {} Hz",
            negotiated.width(),
            negotiated.height(),
            negotiated_fps
        );

        let mut capture = Self {
            camera: Some(camera),
            index: device_index,
            width: negotiated.width(),
            height: negotiated.height(),
            fps: negotiated_fps,
        };

        if let Err(err) = warm_up(&mut capture, device_index, WARMUP_READS) {
            capture.close();
            return Err(err);
        }

        Ok(capture)
    }
}

/// Read `attempts` frames from freshly opened camera `index`, failing only
/// when none of them arrives. Returns how many were delivered.
fn warm_up<C>(source: &mut C, index: u32, attempts: usize) -> Result<usize, CaptureError>
where
    C: CaptureSource + ?Sized,
{
    let delivered = (0..attempts).filter(|_| source.read().is_some()).count();
    if delivered == 0 {
        return Err(CaptureError::NoFrames { index, attempts });
    }
    tracing::debug!("Warm-up delivered {}/{} frames", delivered, attempts);
    Ok(delivered)
}

impl CaptureSource for WebcamCapture {
    fn read(&mut self) -> Option<RgbImage> {
        let camera = self.camera.as_mut()?;

        let frame = match camera.frame() {
            Ok(frame) => frame,
            Err(err) => {
                tracing::debug!("Failed to capture frame: {}", err);
                return None;
            }
        };

        let decoded = match frame.decode_image::<RgbFormat>() {
            Ok(decoded) => decoded,
            Err(err) => {
                tracing::debug!("Failed to decode frame: {}", err);
                return None;
            }
        };

        // rebuilt from raw bytes so nokhwa's image version does not leak out
        let (width, height) = (decoded.width(), decoded.height());
        RgbImage::from_raw(width, height, decoded.into_raw())
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn frame_rate(&self) -> u32 {
        self.fps
    }

    fn close(&mut self) {
        if let Some(mut camera) = self.camera.take() {
            if let Err(err) = camera.stop_stream() {
                tracing::warn!("Failed to stop webcam {} stream: {}", self.index, err);
            }
            tracing::info!("Webcam closed.");
        }
    }
}

impl Drop for WebcamCapture {
    fn drop(&mut self) {
        self.close();
    }
}
