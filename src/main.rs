mod cancel;
mod capture;
mod compositor;
mod config;
mod error;
mod output;
mod pipeline;
mod segmentation;

use anyhow::{Context, Result};
use cancel::CancelToken;
use capture::{CaptureSource, WebcamCapture};
use clap::Parser;
use compositor::Compositor;
use config::{Args, SessionConfig};
use output::{FfmpegSink, FfplayPreview, LoopbackWriter, OutputSink, PreviewSink, SinkKind};
use pipeline::{Pipeline, StopReason};

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    let config = SessionConfig::from_args(&args)?;
    let cancel = CancelToken::from_signals().context("Failed to install signal handler")?;

    tracing::info!("backdrop-cam starting");
    tracing::info!(
        "Requested: {}x{} @ {} Hz from /dev/video{}",
        config.width,
        config.height,
        config.fps,
        config.source_device
    );

    let mut webcam = WebcamCapture::open(
        config.source_device,
        config.width,
        config.height,
        config.fps,
    )
    .context("Failed to initialize webcam capture")?;

    let result = run(&config, &mut webcam, &cancel);
    webcam.close();

    match result? {
        StopReason::Interrupted => tracing::info!("Interrupted, shutting down"),
        StopReason::PreviewClosed => tracing::info!("Preview closed, shutting down"),
    }
    Ok(())
}

/// Everything after the webcam is open; the caller releases the webcam on every exit path.
fn run(
    config: &SessionConfig,
    webcam: &mut WebcamCapture,
    cancel: &CancelToken,
) -> Result<StopReason> {
    // Physical devices may not honor the request, so size everything downstream
    // from a real frame.
    let first = webcam.read().context("Can't read webcam")?;
    let (width, height) = first.dimensions();
    if (width, height) != webcam.resolution() {
        let (reported_width, reported_height) = webcam.resolution();
        tracing::warn!(
            "Webcam reports {}x{} but delivers {}x{}",
            reported_width,
            reported_height,
            width,
            height
        );
    }
    let fps = webcam.frame_rate().max(1);
    tracing::info!("Output: {}x{} @ {} Hz", width, height, fps);

    tracing::info!("Loading segmentation model from {}", config.model.display());
    let model = segmentation::create_model(config.model_kind, &config.model)
        .context("Failed to load segmentation model")?;
    let (model_width, model_height) = model.input_size();
    tracing::info!("Segmentation input: {}x{}", model_width, model_height);

    let mut compositor = Compositor::new(model).with_matte_view(config.show_matte);
    if let Some(path) = &config.background {
        if compositor.load_background(path) {
            compositor.set_background_size(width, height);
        }
    }
    if !compositor.has_fixed_background() {
        tracing::info!("Using blurred background");
    }

    let mut sink: Box<dyn OutputSink> = match config.sink {
        SinkKind::Ffmpeg => Box::new(
            FfmpegSink::open(config.sink_device, width, height, fps)
                .context("Failed to initialize virtual camera")?,
        ),
        SinkKind::Direct => Box::new(
            LoopbackWriter::open(config.sink_device, width, height)
                .context("Failed to initialize v4l2loopback output")?,
        ),
    };
    let (sink_width, sink_height) = sink.resolution();
    tracing::info!("Virtual camera accepting {}x{}", sink_width, sink_height);

    let mut preview = if config.preview {
        Some(FfplayPreview::open(width, height, fps).context("Failed to open preview window")?)
    } else {
        None
    };

    let mut pipeline = Pipeline::new(webcam, &mut compositor, sink.as_mut())
        .with_retry_delay(config.retry_delay);
    if let Some(preview) = preview.as_mut() {
        pipeline = pipeline.with_preview(preview);
    }
    let result = pipeline.run(cancel);

    if let Some(preview) = preview.as_mut() {
        preview.close();
    }
    sink.close();

    result
}
