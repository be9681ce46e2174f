//! annotate - run a source through the inference and overlay stages
//!
//! Settings come from `ANNOTATE_CONFIG` and `ANNOTATE_*` variables; flags
//! override both. In `json` output mode each result is printed to stdout as
//! one line.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use infer_overlay::engine::{Network, StubNetwork};
use infer_overlay::tee::to_rgb_image;
use infer_overlay::{
    AnnotationPipeline, AnnotatorConfig, Frame, FrameSource, FrameTee, InferenceStage,
    OutputMode, OverlayStage, ResultKind, VideoFormat,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Model path; `stub://classifier` and `stub://detector` need no file.
    #[arg(long)]
    model: Option<PathBuf>,
    /// Post-processing mode: none, classifier or detector.
    #[arg(long)]
    mode: Option<ResultKind>,
    /// Output mode: overlay or json.
    #[arg(long)]
    output: Option<OutputMode>,
    /// Minimum confidence for drawing a result.
    #[arg(long)]
    threshold: Option<f32>,
    /// Maximum number of results kept per inference.
    #[arg(long)]
    num_inference: Option<usize>,
    /// Frames skipped between two inferences.
    #[arg(long)]
    frame_interval: Option<u32>,
    /// Label file (newline separated or {"labels": [...]}).
    #[arg(long)]
    labels: Option<PathBuf>,
    /// Model input width.
    #[arg(long)]
    model_width: Option<u32>,
    /// Model input height.
    #[arg(long)]
    model_height: Option<u32>,
    /// Source URI; `stub://...` generates a test pattern.
    #[arg(long)]
    source: Option<String>,
    /// Display format, e.g. BGRx or RGB16.
    #[arg(long)]
    format: Option<String>,
    /// Display width.
    #[arg(long)]
    width: Option<u32>,
    /// Display height.
    #[arg(long)]
    height: Option<u32>,
    /// Stop after this many display frames.
    #[arg(long)]
    frames: Option<u64>,
    /// Write the last annotated frame as JPEG.
    #[arg(long, env = "ANNOTATE_SNAPSHOT")]
    snapshot: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = AnnotatorConfig::load()?;
    apply_args(&mut cfg, &args)?;
    cfg.validate()?;

    let model = cfg
        .inference
        .model
        .clone()
        .ok_or_else(|| anyhow!("no model configured (use --model or ANNOTATE_MODEL)"))?;
    let network = network_for(&model, cfg.model_width, cfg.model_height)?;

    let inference = InferenceStage::new(cfg.inference.clone(), network);
    let overlay = OverlayStage::new(cfg.overlay.clone());
    let tee = FrameTee::new(cfg.model_width, cfg.model_height)?;
    let mut pipeline = AnnotationPipeline::new(tee, inference, overlay);

    let mut source = FrameSource::new(cfg.source.clone())?;
    source.connect()?;
    pipeline.start(source.info())?;

    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = running.clone();
    ctrlc::set_handler(move || {
        handler_flag.store(false, Ordering::SeqCst);
    })
    .context("install Ctrl-C handler")?;

    let json_output = cfg.inference.output == OutputMode::Json;
    let mut last_frame: Option<Frame> = None;
    let report = pipeline.run(&mut source, &running, |frame| {
        if json_output {
            if let Some(meta) = frame.text_meta() {
                println!("{}", meta.result);
            }
        }
        last_frame = Some(frame);
        Ok(())
    })?;
    pipeline.stop()?;

    log::info!(
        "annotate finished: {} frames, {} inferences, {} drawn, {} dropped at the tee",
        report.display_frames,
        report.inference.inferences,
        report.overlay.drawn,
        report.dropped
    );

    if let (Some(path), Some(frame)) = (&args.snapshot, &last_frame) {
        let image = to_rgb_image(frame)?;
        image
            .save_with_format(path, image::ImageFormat::Jpeg)
            .with_context(|| format!("failed to write snapshot {}", path.display()))?;
        log::info!("snapshot of frame {} written to {}", frame.sequence(), path.display());
    }
    Ok(())
}

fn apply_args(cfg: &mut AnnotatorConfig, args: &Args) -> Result<()> {
    if let Some(model) = &args.model {
        cfg.inference.model = Some(model.clone());
    }
    if let Some(mode) = args.mode {
        cfg.inference.mode = mode;
    }
    if let Some(output) = args.output {
        cfg.inference.output = output;
    }
    if args.threshold.is_some() {
        cfg.inference.confidence_threshold = args.threshold;
    }
    if args.num_inference.is_some() {
        cfg.inference.num_inference = args.num_inference;
    }
    if let Some(interval) = args.frame_interval {
        cfg.inference.frame_interval = interval;
    }
    if let Some(labels) = &args.labels {
        cfg.overlay.labels = Some(labels.clone());
    }
    if let Some(width) = args.model_width {
        cfg.model_width = width;
    }
    if let Some(height) = args.model_height {
        cfg.model_height = height;
    }
    if let Some(source) = &args.source {
        cfg.source.uri = source.clone();
    }
    if let Some(format) = &args.format {
        cfg.source.format = VideoFormat::from_name(format)?;
    }
    if let Some(width) = args.width {
        cfg.source.width = width;
    }
    if let Some(height) = args.height {
        cfg.source.height = height;
    }
    if args.frames.is_some() {
        cfg.source.max_frames = args.frames;
    }
    Ok(())
}

#[cfg_attr(not(feature = "backend-tract"), allow(unused_variables))]
fn network_for(model: &std::path::Path, width: u32, height: u32) -> Result<Box<dyn Network>> {
    if model.to_string_lossy().starts_with("stub://") {
        return Ok(Box::new(StubNetwork::new()));
    }
    #[cfg(feature = "backend-tract")]
    {
        Ok(Box::new(infer_overlay::engine::TractNetwork::new(width, height)))
    }
    #[cfg(not(feature = "backend-tract"))]
    {
        Err(anyhow!(
            "model {} needs the backend-tract feature",
            model.display()
        ))
    }
}
