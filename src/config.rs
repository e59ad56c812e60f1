use crate::output::SinkKind;
use crate::segmentation::ModelKind;
use anyhow::{ensure, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Number X of /dev/videoX that is the physical webcam
    #[arg(long, default_value_t = 0)]
    pub webcam: u32,

    /// Number X of /dev/videoX used for the virtual webcam (v4l2loopback)
    #[arg(long, default_value_t = 2)]
    pub virtual_device: u32,

    /// Background image used instead of blur
    #[arg(long)]
    pub bg_image: Option<PathBuf>,

    /// Width requested from the webcam
    #[arg(long, default_value_t = 1920)]
    pub width: u32,

    /// Height requested from the webcam
    #[arg(long, default_value_t = 1080)]
    pub height: u32,

    /// Frames per second requested from the webcam
    #[arg(long, default_value_t = 30)]
    pub fps: u32,

    /// Show a window with the modified stream (press q in it to quit)
    #[arg(long)]
    pub show: bool,

    /// Path to the segmentation model (ONNX file)
    #[arg(long, default_value = "models/selfie_segmentation.onnx")]
    pub model: PathBuf,

    /// Which network the model file contains
    #[arg(long, value_enum, default_value_t = ModelKind::Selfie)]
    pub model_kind: ModelKind,

    /// How frames reach the virtual device
    #[arg(long, value_enum, default_value_t = SinkKind::Ffmpeg)]
    pub sink: SinkKind,

    /// Show matte visualization (grayscale silhouette) instead of the composite
    #[arg(long)]
    pub show_matte: bool,

    /// Pause after a failed webcam read, in milliseconds (0 retries immediately)
    #[arg(long, default_value_t = 0)]
    pub retry_delay_ms: u64,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,
}

/// Settings fixed for the whole session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub source_device: u32,
    pub sink_device: u32,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub background: Option<PathBuf>,
    pub preview: bool,
    pub model: PathBuf,
    pub model_kind: ModelKind,
    pub sink: SinkKind,
    pub show_matte: bool,
    pub retry_delay: Duration,
}

impl SessionConfig {
    pub fn from_args(args: &Args) -> Result<Self> {
        ensure!(
            args.width > 0 && args.height > 0,
            "requested resolution {}x{} must be non-zero",
            args.width,
            args.height
        );
        ensure!(args.fps > 0, "requested frame rate must be non-zero");

        Ok(Self {
            source_device: args.webcam,
            sink_device: args.virtual_device,
            width: args.width,
            height: args.height,
            fps: args.fps,
            background: args.bg_image.clone(),
            preview: args.show,
            model: args.model.clone(),
            model_kind: args.model_kind,
            sink: args.sink,
            show_matte: args.show_matte,
            retry_delay: Duration::from_millis(args.retry_delay_ms),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["backdrop-cam"]).unwrap();
        let config = SessionConfig::from_args(&args).unwrap();
        assert_eq!(config.source_device, 0);
        assert_eq!(config.sink_device, 2);
        assert_eq!((config.width, config.height, config.fps), (1920, 1080, 30));
        assert_eq!(config.background, None);
        assert!(!config.preview);
        assert_eq!(config.model_kind, ModelKind::Selfie);
        assert_eq!(config.sink, SinkKind::Ffmpeg);
        assert_eq!(config.retry_delay, Duration::ZERO);
    }

    #[test]
    fn test_overrides() {
        let args = Args::try_parse_from([
            "backdrop-cam",
            "--webcam",
            "1",
            "--virtual-device",
            "10",
            "--bg-image",
            "beach.jpg",
            "--width",
            "1280",
            "--height",
            "720",
            "--show",
            "--model-kind",
            "rvm",
            "--sink",
            "direct",
            "--retry-delay-ms",
            "15",
        ])
        .unwrap();
        let config = SessionConfig::from_args(&args).unwrap();
        assert_eq!(config.source_device, 1);
        assert_eq!(config.sink_device, 10);
        assert_eq!(config.background, Some(PathBuf::from("beach.jpg")));
        assert_eq!((config.width, config.height), (1280, 720));
        assert!(config.preview);
        assert_eq!(config.model_kind, ModelKind::Rvm);
        assert_eq!(config.sink, SinkKind::Direct);
        assert_eq!(config.retry_delay, Duration::from_millis(15));
    }

    #[test]
    fn test_rejects_zero_geometry() {
        let args = Args::try_parse_from(["backdrop-cam", "--width", "0"]).unwrap();
        assert!(SessionConfig::from_args(&args).is_err());
        let args = Args::try_parse_from(["backdrop-cam", "--fps", "0"]).unwrap();
        assert!(SessionConfig::from_args(&args).is_err());
    }
}
