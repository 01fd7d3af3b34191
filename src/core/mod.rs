pub mod config;
pub mod error;
pub mod pipeline;
pub mod project;
pub mod similarity;
pub mod text;
pub mod video;

pub use config::VisionConfig;
pub use error::{PipelineError, Result, Stage, VisionError};
pub use pipeline::{CancelFlag, Pipeline, PipelineReport, PipelineRun, SkippedItem};
