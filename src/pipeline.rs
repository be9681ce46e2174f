//! Two-flow annotation pipeline.
//!
//! Each display frame is teed into an RGB copy for the inference flow. The
//! inference flow publishes into the overlay mailbox; the display flow draws
//! the latest published result and moves on without waiting for inference.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{bounded, unbounded, TrySendError};

use crate::error::FlowError;
use crate::frame::{Frame, TextMeta, VideoInfo};
use crate::infer::{FlowOutcome, InferStats, InferenceStage};
use crate::overlay::{OverlayStage, OverlayStats};
use crate::render::RenderOutcome;
use crate::source::FrameSource;
use crate::tee::FrameTee;

/// Result of one lockstep [`AnnotationPipeline::step`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StepReport {
    pub flow: FlowOutcome,
    /// `None` when the display format cannot be drawn on.
    pub render: Option<RenderOutcome>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PipelineReport {
    pub display_frames: u64,
    /// Frames handed to the inference worker.
    pub queued: u64,
    /// Frames dropped because the worker was still busy.
    pub dropped: u64,
    pub texts: u64,
    pub inference: InferStats,
    pub overlay: OverlayStats,
}

pub struct AnnotationPipeline {
    tee: FrameTee,
    inference: InferenceStage,
    overlay: OverlayStage,
    started: bool,
}

impl AnnotationPipeline {
    pub fn new(tee: FrameTee, inference: InferenceStage, overlay: OverlayStage) -> Self {
        Self {
            tee,
            inference,
            overlay,
            started: false,
        }
    }

    /// Start both stages and negotiate both flows.
    pub fn start(&mut self, display: VideoInfo) -> Result<()> {
        self.inference.start().context("start inference stage")?;
        self.inference
            .set_caps(self.tee.output_info()?)
            .context("negotiate inference flow")?;
        self.overlay.start().context("start overlay stage")?;
        self.overlay
            .set_caps(display)
            .context("negotiate display flow")?;
        self.started = true;
        log::info!(
            "pipeline started: display {} inference {}",
            display,
            self.tee.output_info()?
        );
        Ok(())
    }

    pub fn stop(&mut self) -> Result<()> {
        self.inference.stop();
        self.overlay.stop()?;
        self.started = false;
        Ok(())
    }

    pub fn inference(&self) -> &InferenceStage {
        &self.inference
    }

    pub fn overlay(&self) -> &OverlayStage {
        &self.overlay
    }

    /// Run one display frame through both flows in order: tee, infer,
    /// publish, draw. A JSON result lands on the display frame as a text meta.
    pub fn step(&mut self, frame: &mut Frame) -> Result<StepReport, FlowError> {
        let mut branched = self
            .tee
            .branch(frame)
            .map_err(|err| FlowError::InvalidFrame(format!("{err:#}")))?;
        let flow = self.inference.process(&mut branched)?;
        if let Some(meta) = branched.text_meta() {
            frame.attach_text(meta.clone());
        }
        self.overlay.receive_inference(branched)?;
        let render = draw(&mut self.overlay, frame)?;
        Ok(StepReport { flow, render })
    }

    /// Drive `source` until it is exhausted or `running` clears, with
    /// inference on a worker thread. The worker takes at most one frame at a
    /// time; frames arriving while it is busy skip inference but are still
    /// drawn and handed to `downstream`.
    pub fn run<F>(
        &mut self,
        source: &mut FrameSource,
        running: &AtomicBool,
        mut downstream: F,
    ) -> Result<PipelineReport>
    where
        F: FnMut(Frame) -> Result<()>,
    {
        if !self.started {
            return Err(FlowError::NotStarted.into());
        }
        let tee = self.tee;
        let sink = self.overlay.inference_sink();
        let Self {
            inference, overlay, ..
        } = self;

        let (frame_tx, frame_rx) = bounded::<Frame>(1);
        let (text_tx, text_rx) = unbounded::<TextMeta>();
        let mut report = PipelineReport::default();

        thread::scope(|scope| -> Result<()> {
            let worker = scope.spawn(move || -> Result<(), FlowError> {
                for mut frame in frame_rx.iter() {
                    match inference.process(&mut frame) {
                        Ok(_) => {}
                        Err(err) if err.is_fatal() => return Err(err),
                        Err(_) => continue,
                    }
                    if let Some(meta) = frame.text_meta() {
                        // Receiver outlives the worker inside this scope.
                        let _ = text_tx.send(meta.clone());
                    }
                    sink.receive(frame)?;
                }
                Ok(())
            });

            let mut loop_result = Ok(());
            while running.load(Ordering::SeqCst) {
                let mut frame = match source.next_frame() {
                    Ok(Some(frame)) => frame,
                    Ok(None) => break,
                    Err(err) => {
                        loop_result = Err(err.context("source failed"));
                        break;
                    }
                };
                report.display_frames += 1;

                let branched = match tee.branch(&frame) {
                    Ok(branched) => branched,
                    Err(err) => {
                        loop_result = Err(err);
                        break;
                    }
                };
                match frame_tx.try_send(branched) {
                    Ok(()) => report.queued += 1,
                    Err(TrySendError::Full(_)) => report.dropped += 1,
                    Err(TrySendError::Disconnected(_)) => {
                        log::warn!("inference worker exited; stopping display flow");
                        break;
                    }
                }

                for meta in text_rx.try_iter() {
                    report.texts += 1;
                    frame.attach_text(meta);
                }
                if let Err(err) = draw(overlay, &mut frame) {
                    loop_result = Err(err.into());
                    break;
                }
                if let Err(err) = downstream(frame) {
                    loop_result = Err(err.context("downstream rejected frame"));
                    break;
                }
            }
            drop(frame_tx);

            let worker_result = worker
                .join()
                .map_err(|_| anyhow!("inference worker panicked"))?;
            report.texts += text_rx.try_iter().count() as u64;
            loop_result?;
            worker_result.context("inference worker failed")?;
            Ok(())
        })?;

        report.inference = self.inference.stats();
        report.overlay = self.overlay.stats();
        log::info!(
            "pipeline run finished: {} display frames, {} queued, {} dropped, {} inferences",
            report.display_frames,
            report.queued,
            report.dropped,
            report.inference.inferences
        );
        Ok(report)
    }
}

/// Draw on a display frame; undrawable formats pass through.
fn draw(overlay: &mut OverlayStage, frame: &mut Frame) -> Result<Option<RenderOutcome>, FlowError> {
    match overlay.transform(frame) {
        Ok(outcome) => Ok(Some(outcome)),
        Err(err) if !err.is_fatal() => {
            log::debug!("frame {} passed through: {}", frame.sequence(), err);
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

impl Drop for AnnotationPipeline {
    fn drop(&mut self) {
        if self.started {
            if let Err(err) = self.stop() {
                log::error!("pipeline teardown failed: {}", err);
            }
        }
    }
}
