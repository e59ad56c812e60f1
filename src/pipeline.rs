use crate::cancel::CancelToken;
use crate::capture::CaptureSource;
use crate::compositor::Compositor;
use crate::output::{OutputSink, PreviewSink};
use anyhow::{Context, Result};
use std::thread;
use std::time::{Duration, Instant};

/// Frames between timing reports
const STATS_INTERVAL: u64 = 30;

/// A sink write slower than this is reported
const SLOW_WRITE: Duration = Duration::from_secs(1);

/// Why the driver loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Cancellation token fired (SIGINT / SIGTERM)
    Interrupted,
    /// The user quit the preview window
    PreviewClosed,
}

#[derive(Default)]
struct Timings {
    frames: u64,
    capture: Duration,
    composite: Duration,
    output: Duration,
}

impl Timings {
    fn report(&self) {
        let per_frame = |total: Duration| total.as_secs_f64() * 1000.0 / self.frames as f64;
        let capture_ms = per_frame(self.capture);
        let composite_ms = per_frame(self.composite);
        let output_ms = per_frame(self.output);
        let total_ms = capture_ms + composite_ms + output_ms;

        tracing::info!(
            "Frame {}: capture={:.1}ms, composite={:.1}ms, output={:.1}ms, total={:.1}ms, fps={:.1}",
            self.frames,
            capture_ms,
            composite_ms,
            output_ms,
            total_ms,
            1000.0 / total_ms
        );
    }
}

/// Source -> compositor -> sink relay, one frame in flight at a time
pub struct Pipeline<'a, C: ?Sized, O: ?Sized> {
    source: &'a mut C,
    compositor: &'a mut Compositor,
    sink: &'a mut O,
    preview: Option<&'a mut dyn PreviewSink>,
    retry_delay: Duration,
}

impl<'a, C, O> Pipeline<'a, C, O>
where
    C: CaptureSource + ?Sized,
    O: OutputSink + ?Sized,
{
    pub fn new(source: &'a mut C, compositor: &'a mut Compositor, sink: &'a mut O) -> Self {
        Self {
            source,
            compositor,
            sink,
            preview: None,
            retry_delay: Duration::ZERO,
        }
    }

    pub fn with_preview(mut self, preview: &'a mut dyn PreviewSink) -> Self {
        self.preview = Some(preview);
        self
    }

    /// Pause between failed reads; zero retries immediately
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Run until `cancel` fires or the preview is closed.
    ///
    /// Failed reads are retried without limit. Segmentation and sink failures
    /// are fatal and returned.
    pub fn run(&mut self, cancel: &CancelToken) -> Result<StopReason> {
        let mut timings = Timings::default();
        let mut failed_reads = 0u64;

        tracing::info!("Starting main pipeline loop");
        tracing::info!("Press Ctrl+C to stop");

        loop {
            if cancel.is_cancelled() {
                return Ok(StopReason::Interrupted);
            }

            let capture_start = Instant::now();
            let Some(frame) = self.source.read() else {
                failed_reads += 1;
                if failed_reads == 1 {
                    tracing::warn!("Couldn't read webcam, retrying");
                } else {
                    tracing::debug!("Webcam read failed ({} in a row)", failed_reads);
                }
                if !self.retry_delay.is_zero() {
                    thread::sleep(self.retry_delay);
                }
                continue;
            };
            timings.capture += capture_start.elapsed();

            if failed_reads > 0 {
                tracing::info!("Webcam delivering again after {} failed reads", failed_reads);
                self.compositor.reset_segmentation();
                failed_reads = 0;
            }

            let composite_start = Instant::now();
            let output_frame = self
                .compositor
                .blur_background(&frame)
                .context("Failed to composite frame")?;
            timings.composite += composite_start.elapsed();

            let output_start = Instant::now();
            if let Err(err) = self.sink.write_frame(&output_frame) {
                if cancel.is_cancelled() {
                    tracing::debug!("Write failed during shutdown: {}", err);
                    return Ok(StopReason::Interrupted);
                }
                return Err(err).context("Failed to write frame to virtual camera");
            }
            let write_time = output_start.elapsed();
            if write_time > SLOW_WRITE {
                tracing::warn!(
                    "Virtual camera write took {:.1}s, is anything consuming it?",
                    write_time.as_secs_f64()
                );
            }
            timings.output += write_time;

            if let Some(preview) = self.preview.as_mut() {
                if !preview.show(&output_frame) {
                    if cancel.is_cancelled() {
                        return Ok(StopReason::Interrupted);
                    }
                    return Ok(StopReason::PreviewClosed);
                }
            }

            timings.frames += 1;
            if timings.frames % STATS_INTERVAL == 0 {
                timings.report();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{SegmentationError, SinkError};
    use crate::segmentation::{Matte, SegmentationModel};
    use image::{Luma, Rgb, RgbImage};
    use std::cell::Cell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    const FRAME: Rgb<u8> = Rgb([10, 200, 30]);
    const BACKDROP: Rgb<u8> = Rgb([250, 5, 120]);

    /// Everything is foreground in the left column only
    struct LeftColumn {
        resets: Rc<Cell<u32>>,
    }

    impl SegmentationModel for LeftColumn {
        fn segment(&mut self, frame: &RgbImage) -> Result<Matte, SegmentationError> {
            Ok(Matte::from_fn(frame.width(), frame.height(), |x, _| {
                Luma([if x == 0 { 0.9 } else { 0.05 }])
            }))
        }

        fn reset_state(&mut self) {
            self.resets.set(self.resets.get() + 1);
        }

        fn input_size(&self) -> (u32, u32) {
            (2, 2)
        }
    }

    /// Plays back a script of reads, cancelling the token once it runs out
    struct ScriptedSource {
        reads: VecDeque<Option<RgbImage>>,
        cancel: CancelToken,
        attempts: usize,
    }

    impl CaptureSource for ScriptedSource {
        fn read(&mut self) -> Option<RgbImage> {
            self.attempts += 1;
            match self.reads.pop_front() {
                Some(read) => read,
                None => {
                    self.cancel.cancel();
                    None
                }
            }
        }

        fn resolution(&self) -> (u32, u32) {
            (2, 2)
        }

        fn frame_rate(&self) -> u32 {
            30
        }

        fn close(&mut self) {}
    }

    #[derive(Default)]
    struct RecordingSink {
        frames: Vec<RgbImage>,
        closed: bool,
    }

    impl OutputSink for RecordingSink {
        fn write_frame(&mut self, frame: &RgbImage) -> Result<(), SinkError> {
            if self.closed {
                return Err(SinkError::Closed);
            }
            self.frames.push(frame.clone());
            Ok(())
        }

        fn resolution(&self) -> (u32, u32) {
            (2, 2)
        }

        fn close(&mut self) {
            self.closed = true;
        }
    }

    /// Fires the token and then fails, like a child killed by the same Ctrl+C
    struct DiesOnInterrupt {
        cancel: CancelToken,
    }

    impl OutputSink for DiesOnInterrupt {
        fn write_frame(&mut self, _frame: &RgbImage) -> Result<(), SinkError> {
            self.cancel.cancel();
            Err(SinkError::Write(std::io::ErrorKind::BrokenPipe.into()))
        }

        fn resolution(&self) -> (u32, u32) {
            (2, 2)
        }

        fn close(&mut self) {}
    }

    struct ClosedByInterrupt {
        cancel: CancelToken,
    }

    impl PreviewSink for ClosedByInterrupt {
        fn show(&mut self, _frame: &RgbImage) -> bool {
            self.cancel.cancel();
            false
        }

        fn close(&mut self) {}
    }

    struct QuitAfter {
        remaining: usize,
        shown: usize,
    }

    impl PreviewSink for QuitAfter {
        fn show(&mut self, _frame: &RgbImage) -> bool {
            self.shown += 1;
            if self.remaining == 0 {
                return false;
            }
            self.remaining -= 1;
            true
        }

        fn close(&mut self) {}
    }

    fn frame() -> Option<RgbImage> {
        Some(RgbImage::from_pixel(2, 2, FRAME))
    }

    fn compositor(resets: Rc<Cell<u32>>) -> Compositor {
        let mut compositor = Compositor::new(Box::new(LeftColumn { resets }));
        compositor.set_background(RgbImage::from_pixel(2, 2, BACKDROP));
        compositor.set_background_size(2, 2);
        compositor
    }

    fn source(reads: Vec<Option<RgbImage>>, cancel: &CancelToken) -> ScriptedSource {
        ScriptedSource {
            reads: reads.into(),
            cancel: cancel.clone(),
            attempts: 0,
        }
    }

    #[test]
    fn test_relays_until_interrupted() {
        let cancel = CancelToken::new();
        let mut source = source(vec![frame(), frame(), frame()], &cancel);
        let mut compositor = compositor(Rc::default());
        let mut sink = RecordingSink::default();

        let reason = Pipeline::new(&mut source, &mut compositor, &mut sink)
            .run(&cancel)
            .unwrap();

        assert_eq!(reason, StopReason::Interrupted);
        assert_eq!(sink.frames.len(), 3);
        let out = &sink.frames[0];
        assert_eq!(*out.get_pixel(0, 0), FRAME);
        assert_eq!(*out.get_pixel(0, 1), FRAME);
        assert_eq!(*out.get_pixel(1, 0), BACKDROP);
        assert_eq!(*out.get_pixel(1, 1), BACKDROP);
    }

    #[test]
    fn test_cancelled_before_start_reads_nothing() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut source = source(vec![frame()], &cancel);
        let mut compositor = compositor(Rc::default());
        let mut sink = RecordingSink::default();

        let reason = Pipeline::new(&mut source, &mut compositor, &mut sink)
            .run(&cancel)
            .unwrap();
        assert_eq!(reason, StopReason::Interrupted);
        assert_eq!(source.attempts, 0);
        assert!(sink.frames.is_empty());
    }

    #[test]
    fn test_failed_reads_are_retried() {
        let cancel = CancelToken::new();
        let mut source = source(vec![frame(), None, None, None, frame()], &cancel);
        let resets = Rc::new(Cell::new(0));
        let mut compositor = compositor(resets.clone());
        let mut sink = RecordingSink::default();

        Pipeline::new(&mut source, &mut compositor, &mut sink)
            .with_retry_delay(Duration::from_millis(1))
            .run(&cancel)
            .unwrap();

        assert_eq!(sink.frames.len(), 2);
        assert_eq!(source.attempts, 6);
        assert_eq!(resets.get(), 1);
    }

    #[test]
    fn test_preview_quit_stops_loop() {
        let cancel = CancelToken::new();
        let mut source = source(vec![frame(), frame(), frame(), frame()], &cancel);
        let mut compositor = compositor(Rc::default());
        let mut sink = RecordingSink::default();
        let mut preview = QuitAfter {
            remaining: 1,
            shown: 0,
        };

        let reason = Pipeline::new(&mut source, &mut compositor, &mut sink)
            .with_preview(&mut preview)
            .run(&cancel)
            .unwrap();

        assert_eq!(reason, StopReason::PreviewClosed);
        assert_eq!(preview.shown, 2);
        assert_eq!(sink.frames.len(), 2);
        assert!(!cancel.is_cancelled());
    }

    #[test]
    fn test_closed_sink_is_fatal() {
        let cancel = CancelToken::new();
        let mut source = source(vec![frame()], &cancel);
        let mut compositor = compositor(Rc::default());
        let mut sink = RecordingSink::default();
        sink.close();

        let result = Pipeline::new(&mut source, &mut compositor, &mut sink).run(&cancel);
        assert!(result.is_err());
    }

    #[test]
    fn test_write_failure_after_interrupt_is_clean_stop() {
        let cancel = CancelToken::new();
        let mut source = source(vec![frame(), frame()], &cancel);
        let mut compositor = compositor(Rc::default());
        let mut sink = DiesOnInterrupt {
            cancel: cancel.clone(),
        };

        let reason = Pipeline::new(&mut source, &mut compositor, &mut sink)
            .run(&cancel)
            .unwrap();
        assert_eq!(reason, StopReason::Interrupted);
        assert_eq!(source.attempts, 1);
    }

    #[test]
    fn test_preview_gone_after_interrupt_is_interrupted() {
        let cancel = CancelToken::new();
        let mut source = source(vec![frame(), frame()], &cancel);
        let mut compositor = compositor(Rc::default());
        let mut sink = RecordingSink::default();
        let mut preview = ClosedByInterrupt {
            cancel: cancel.clone(),
        };

        let reason = Pipeline::new(&mut source, &mut compositor, &mut sink)
            .with_preview(&mut preview)
            .run(&cancel)
            .unwrap();
        assert_eq!(reason, StopReason::Interrupted);
        assert_eq!(sink.frames.len(), 1);
    }
}
