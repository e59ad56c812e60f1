use super::ffmpeg::{piped_command, shutdown_child};
use super::PreviewSink;
use crate::error::SinkError;
use image::RgbImage;
use std::io::Write;
use std::process::{Child, ChildStdin};

const WINDOW_TITLE: &str = "Blurred Background Cam";

/// Preview window backed by an `ffplay` process reading raw RGB from stdin.
///
/// Pressing `q` or Esc in the window ends ffplay, which is reported as a quit.
pub struct FfplayPreview {
    process: Option<(Child, ChildStdin)>,
    width: u32,
    height: u32,
}

fn ffplay_args(width: u32, height: u32, fps: u32) -> Vec<String> {
    vec![
        "-loglevel".to_string(),
        "error".to_string(),
        "-window_title".to_string(),
        WINDOW_TITLE.to_string(),
        "-f".to_string(),
        "rawvideo".to_string(),
        "-pixel_format".to_string(),
        "rgb24".to_string(),
        "-video_size".to_string(),
        format!("{width}x{height}"),
        "-framerate".to_string(),
        fps.to_string(),
        "-i".to_string(),
        "pipe:0".to_string(),
    ]
}

impl FfplayPreview {
    pub fn open(width: u32, height: u32, fps: u32) -> Result<Self, SinkError> {
        tracing::info!(
            "Opening preview window ({}x{}), press q in it to quit",
            width,
            height
        );

        let mut child = piped_command("ffplay")
            .args(ffplay_args(width, height, fps))
            .spawn()
            .map_err(|source| SinkError::Spawn {
                program: "ffplay",
                source,
            })?;

        let Some(stdin) = child.stdin.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(SinkError::Device("ffplay stdin was not captured".to_string()));
        };

        Ok(Self {
            process: Some((child, stdin)),
            width,
            height,
        })
    }
}

impl PreviewSink for FfplayPreview {
    fn show(&mut self, frame: &RgbImage) -> bool {
        let Some((child, stdin)) = self.process.as_mut() else {
            return false;
        };

        if let Ok(Some(status)) = child.try_wait() {
            tracing::info!("Preview window closed ({})", status);
            self.process = None;
            return false;
        }

        if frame.dimensions() != (self.width, self.height) {
            tracing::debug!("Skipping preview of {}x{} frame", frame.width(), frame.height());
            return true;
        }

        if let Err(err) = stdin.write_all(frame.as_raw()) {
            tracing::info!("Preview window closed: {}", err);
            self.close();
            return false;
        }

        true
    }

    fn close(&mut self) {
        if let Some((child, stdin)) = self.process.take() {
            shutdown_child(child, stdin, "ffplay");
        }
    }
}

impl Drop for FfplayPreview {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ffplay_args() {
        let args = ffplay_args(320, 240, 15).join(" ");
        assert!(args.contains("-pixel_format rgb24 -video_size 320x240 -framerate 15 -i pipe:0"));
    }

    #[test]
    fn test_closed_preview_reports_quit() {
        let mut preview = FfplayPreview {
            process: None,
            width: 2,
            height: 2,
        };
        assert!(!preview.show(&RgbImage::new(2, 2)));
        preview.close();
    }

    #[test]
    fn test_exited_viewer_reports_quit() {
        let Ok(mut child) = piped_command("true").spawn() else {
            return;
        };
        let stdin = child.stdin.take().unwrap();
        let _ = child.wait();
        let mut preview = FfplayPreview {
            process: Some((child, stdin)),
            width: 2,
            height: 2,
        };
        assert!(!preview.show(&RgbImage::new(2, 2)));
    }
}
