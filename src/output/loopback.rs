use super::{conform, device_path, OutputSink};
use crate::error::SinkError;
use image::RgbImage;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread;
use std::time::Duration;
use v4l::video::Output;
use v4l::{Device, Format, FourCC};

/// Time given to udev to create the node after loading the module
const PROVISION_WAIT: Duration = Duration::from_secs(1);

/// Make sure `/dev/video{index}` exists, loading v4l2loopback for it if needed.
pub fn ensure_loopback_device(index: u32) -> Result<PathBuf, SinkError> {
    let path = device_path(index);
    ensure_device_with(&path, PROVISION_WAIT, || load_loopback_module(index))?;
    log_capabilities(&path);
    Ok(path)
}

fn ensure_device_with<F>(path: &Path, wait: Duration, provision: F) -> Result<(), SinkError>
where
    F: FnOnce(),
{
    if path.exists() {
        return Ok(());
    }

    provision();
    thread::sleep(wait);

    if path.exists() {
        Ok(())
    } else {
        Err(SinkError::LoopbackMissing(path.to_path_buf()))
    }
}

fn modprobe_args(index: u32) -> Vec<String> {
    vec![
        "modprobe".to_string(),
        "v4l2loopback".to_string(),
        "exclusive_caps=1".to_string(),
        format!("video_nr={index}"),
        "card_label=virtualcamera".to_string(),
    ]
}

fn load_loopback_module(index: u32) {
    let args = modprobe_args(index);
    tracing::info!(
        "Couldn't find v4l2loopback device on /dev/video{}. Calling modprobe v4l2loopback.",
        index
    );
    tracing::info!(
        "If you do not want the program to do it, run it yourself: sudo {}",
        args.join(" ")
    );

    match Command::new("sudo").args(&args).status() {
        Ok(status) if status.success() => {}
        Ok(status) => tracing::warn!("modprobe exited with {}", status),
        Err(err) => tracing::warn!("Failed to run sudo modprobe: {}", err),
    }
}

fn log_capabilities(path: &Path) {
    match Device::with_path(path).and_then(|dev| dev.query_caps()) {
        Ok(caps) => tracing::info!(
            "Virtual device {}: {} ({})",
            path.display(),
            caps.card,
            caps.driver
        ),
        Err(err) => tracing::warn!("Could not query {}: {}", path.display(), err),
    }
}

/// Writes YUYV frames straight into a v4l2loopback device node
pub struct LoopbackWriter {
    device: Option<(Device, File)>,
    width: u32,
    height: u32,
}

impl LoopbackWriter {
    pub fn open(device_index: u32, width: u32, height: u32) -> Result<Self, SinkError> {
        let path = ensure_loopback_device(device_index)?;
        tracing::info!(
            "Opening v4l2loopback device at {} ({}x{})",
            path.display(),
            width,
            height
        );

        let device = Device::with_path(&path).map_err(|err| SinkError::Device(err.to_string()))?;
        let format = Format::new(width, height, FourCC::new(b"YUYV"));
        let negotiated = Output::set_format(&device, &format)
            .map_err(|err| SinkError::Device(err.to_string()))?;
        if (negotiated.width, negotiated.height) != (width, height) {
            return Err(SinkError::Device(format!(
                "device accepted {}x{} instead of {}x{}",
                negotiated.width, negotiated.height, width, height
            )));
        }

        let file = File::options()
            .write(true)
            .open(&path)
            .map_err(|err| SinkError::Device(format!("{}: {}", path.display(), err)))?;
        tracing::info!("v4l2loopback device opened successfully");

        Ok(Self {
            device: Some((device, file)),
            width,
            height,
        })
    }
}

/// Convert RGB frame to YUV422 (YUYV) format
fn rgb_to_yuyv(rgb_image: &RgbImage) -> Vec<u8> {
    let (width, height) = rgb_image.dimensions();
    let mut yuyv = Vec::with_capacity((width * height * 2) as usize);

    for y in 0..height {
        for x in (0..width).step_by(2) {
            let pixel1 = rgb_image.get_pixel(x, y);
            let pixel2 = if x + 1 < width {
                rgb_image.get_pixel(x + 1, y)
            } else {
                pixel1
            };

            let (y1, u1, v1) = rgb_to_yuv(pixel1[0], pixel1[1], pixel1[2]);
            let (y2, u2, v2) = rgb_to_yuv(pixel2[0], pixel2[1], pixel2[2]);

            // chroma is shared by the pair
            let u = ((u1 as u16 + u2 as u16) / 2) as u8;
            let v = ((v1 as u16 + v2 as u16) / 2) as u8;

            yuyv.extend_from_slice(&[y1, u, y2, v]);
        }
    }

    yuyv
}

/// BT.601 RGB to YUV
fn rgb_to_yuv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let r = r as f32;
    let g = g as f32;
    let b = b as f32;

    let y = (0.299 * r + 0.587 * g + 0.114 * b).round().clamp(0.0, 255.0) as u8;
    let u = ((-0.147 * r - 0.289 * g + 0.436 * b) + 128.0).round().clamp(0.0, 255.0) as u8;
    let v = ((0.615 * r - 0.515 * g - 0.100 * b) + 128.0).round().clamp(0.0, 255.0) as u8;

    (y, u, v)
}

impl OutputSink for LoopbackWriter {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<(), SinkError> {
        let (_, file) = self.device.as_mut().ok_or(SinkError::Closed)?;
        let frame = conform(frame, self.width, self.height);
        file.write_all(&rgb_to_yuyv(&frame))?;
        Ok(())
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn close(&mut self) {
        if self.device.take().is_some() {
            tracing::info!("v4l2loopback device closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use std::cell::Cell;

    #[test]
    fn test_rgb_to_yuv_extremes() {
        assert_eq!(rgb_to_yuv(0, 0, 0), (0, 128, 128));
        let (y, u, v) = rgb_to_yuv(255, 255, 255);
        assert_eq!(y, 255);
        assert!((127..=129).contains(&u));
        assert!((127..=129).contains(&v));
    }

    #[test]
    fn test_yuyv_packs_pixel_pairs() {
        let image = RgbImage::from_pixel(4, 2, Rgb([0, 0, 0]));
        let packed = rgb_to_yuyv(&image);
        assert_eq!(packed.len(), 4 * 2 * 2);
        assert_eq!(&packed[..4], &[0, 128, 0, 128]);
    }

    #[test]
    fn test_yuyv_odd_width_repeats_last_pixel() {
        let image = RgbImage::from_pixel(3, 1, Rgb([255, 255, 255]));
        assert_eq!(rgb_to_yuyv(&image).len(), 8);
    }

    #[test]
    fn test_write_after_close_is_closed_error() {
        let mut writer = LoopbackWriter {
            device: None,
            width: 2,
            height: 2,
        };
        writer.close();
        let result = writer.write_frame(&RgbImage::new(2, 2));
        assert!(matches!(result, Err(SinkError::Closed)));
    }

    #[test]
    fn test_existing_device_is_not_provisioned() {
        let called = Cell::new(false);
        let path = std::env::temp_dir();
        ensure_device_with(&path, Duration::ZERO, || called.set(true)).unwrap();
        assert!(!called.get());
    }

    #[test]
    fn test_provisioning_rechecks_once() {
        let path = std::env::temp_dir().join(format!("loopback-{}", std::process::id()));
        let _ = std::fs::remove_file(&path);

        ensure_device_with(&path, Duration::ZERO, || {
            File::create(&path).unwrap();
        })
        .unwrap();
        std::fs::remove_file(&path).unwrap();

        let missing = ensure_device_with(&path, Duration::ZERO, || {});
        assert!(matches!(missing, Err(SinkError::LoopbackMissing(p)) if p == path));
    }

    #[test]
    fn test_modprobe_args() {
        let args = modprobe_args(7);
        assert_eq!(args[0], "modprobe");
        assert!(args.contains(&"video_nr=7".to_string()));
        assert!(args.contains(&"exclusive_caps=1".to_string()));
    }
}
