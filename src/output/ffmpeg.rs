use super::{conform, ensure_loopback_device, OutputSink};
use crate::error::SinkError;
use image::RgbImage;
use std::io::Write;
use std::path::{Path, PathBuf};
#[cfg(unix)]
use std::os::unix::process::CommandExt;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// How long ffmpeg gets to drain and exit after its stdin closes
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// Feeds raw RGB frames to an ffmpeg process that writes YUYV into a
/// v4l2loopback device.
pub struct FfmpegSink {
    process: Option<(Child, ChildStdin)>,
    device: PathBuf,
    width: u32,
    height: u32,
}

/// ffmpeg arguments for an rgb24 pipe into a v4l2 output device
pub(crate) fn ffmpeg_args(device: &Path, width: u32, height: u32, fps: u32) -> Vec<String> {
    let size = format!("{width}x{height}");
    let fps = fps.to_string();
    [
        "-loglevel",
        "error",
        "-f",
        "rawvideo",
        "-pix_fmt",
        "rgb24",
        "-video_size",
        size.as_str(),
        "-framerate",
        fps.as_str(),
        "-i",
        "pipe:0",
        "-f",
        "v4l2",
        "-vcodec",
        "rawvideo",
        "-pix_fmt",
        "yuyv422",
        "-r",
        fps.as_str(),
        "-s",
        size.as_str(),
    ]
    .iter()
    .map(|s| s.to_string())
    .chain(std::iter::once(device.display().to_string()))
    .collect()
}

/// Command writing to the child's stdin with its output discarded.
///
/// The child gets its own process group so a terminal Ctrl+C reaches only us;
/// we then close it in order.
pub(crate) fn piped_command(program: &str) -> Command {
    let mut command = Command::new(program);
    command
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    #[cfg(unix)]
    command.process_group(0);
    command
}

impl FfmpegSink {
    /// Provision the loopback device if needed and start the encoder.
    /// Geometry is fixed for the lifetime of the sink.
    pub fn open(device_index: u32, width: u32, height: u32, fps: u32) -> Result<Self, SinkError> {
        let device = ensure_loopback_device(device_index)?;
        tracing::info!(
            "Initializing virtual camera {}: {}x{} @ {} Hz",
            device.display(),
            width,
            height,
            fps
        );

        let mut child = piped_command("ffmpeg")
            .args(ffmpeg_args(&device, width, height, fps))
            .spawn()
            .map_err(|source| SinkError::Spawn {
                program: "ffmpeg",
                source,
            })?;

        let Some(stdin) = child.stdin.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(SinkError::Device("ffmpeg stdin was not captured".to_string()));
        };

        Ok(Self {
            process: Some((child, stdin)),
            device,
            width,
            height,
        })
    }
}

/// Close `stdin`, give the child a moment to exit on its own, then kill it
pub(crate) fn shutdown_child(mut child: Child, stdin: ChildStdin, name: &str) {
    drop(stdin);

    let deadline = Instant::now() + SHUTDOWN_GRACE;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                tracing::debug!("{} exited with {}", name, status);
                return;
            }
            Ok(None) if Instant::now() < deadline => thread::sleep(Duration::from_millis(20)),
            Ok(None) => break,
            Err(err) => {
                tracing::warn!("Failed to poll {}: {}", name, err);
                break;
            }
        }
    }

    if let Err(err) = child.kill() {
        tracing::warn!("Failed to terminate {}: {}", name, err);
    }
    let _ = child.wait();
}

impl OutputSink for FfmpegSink {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<(), SinkError> {
        let (_, stdin) = self.process.as_mut().ok_or(SinkError::Closed)?;
        let frame = conform(frame, self.width, self.height);
        stdin.write_all(frame.as_raw())?;
        Ok(())
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn close(&mut self) {
        if let Some((child, stdin)) = self.process.take() {
            shutdown_child(child, stdin, "ffmpeg");
            tracing::info!("Virtual camera {} closed", self.device.display());
        }
    }
}

impl Drop for FfmpegSink {
    fn drop(&mut self) {
        self.close();
    }
}
