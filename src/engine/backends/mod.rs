mod postproc;
mod stub;

#[cfg(feature = "backend-tract")]
mod tract;

pub use postproc::{RowDetector, TopKClassifier, ROW_WIDTH, ROW_WIDTH_WITH_POSE};
pub use stub::StubNetwork;

#[cfg(feature = "backend-tract")]
pub use tract::TractNetwork;
