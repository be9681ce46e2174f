//! Per-frame flow errors.
//!
//! Configuration and start-up failures use `anyhow`. Errors raised while a
//! frame is in flight are typed so the driver can decide whether the flow
//! keeps going.

use thiserror::Error;

use crate::frame::VideoFormat;

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("stage has not been started")]
    NotStarted,

    #[error("stream geometry has not been negotiated")]
    NotNegotiated,

    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("inference failed: {0:#}")]
    Inference(#[source] anyhow::Error),

    #[error("post-processing failed: {0:#}")]
    PostProcess(#[source] anyhow::Error),

    #[error("cannot draw on {0} frames")]
    UnsupportedFormat(VideoFormat),

    #[error("{0} lock poisoned")]
    LockPoisoned(&'static str),
}

impl FlowError {
    /// Whether the flow must stop. An unsupported format only skips drawing.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, FlowError::UnsupportedFormat(_))
    }
}
