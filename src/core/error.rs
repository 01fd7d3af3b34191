use std::fmt;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum VisionError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Unreadable input {item}: {reason}")]
    UnreadableInput { item: String, reason: String },
    #[error("{collaborator} failed: {message}")]
    ExternalCollaborator {
        collaborator: &'static str,
        message: String,
    },
    #[error("Processing cancelled")]
    Cancelled,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

impl VisionError {
    pub fn invalid_config(message: impl Into<String>) -> Self {
        VisionError::InvalidConfiguration(message.into())
    }

    pub fn unreadable(item: impl fmt::Display, reason: impl fmt::Display) -> Self {
        VisionError::UnreadableInput {
            item: item.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn external(collaborator: &'static str, message: impl Into<String>) -> Self {
        VisionError::ExternalCollaborator {
            collaborator,
            message: message.into(),
        }
    }

    /// best-effort 模式下可以跳过的单条目错误
    pub fn is_item_level(&self) -> bool {
        matches!(
            self,
            VisionError::UnreadableInput { .. }
                | VisionError::ExternalCollaborator { .. }
                | VisionError::Image(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, VisionError>;

/// 流水线阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Sampling,
    FrameDedup,
    Recognition,
    TextClustering,
    Reconstruction,
    Emission,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Sampling => "sampling",
            Stage::FrameDedup => "frame dedup",
            Stage::Recognition => "recognition",
            Stage::TextClustering => "text clustering",
            Stage::Reconstruction => "reconstruction",
            Stage::Emission => "emission",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
#[error("{stage} stage failed after {processed} item(s): {source}")]
pub struct PipelineError {
    pub stage: Stage,
    pub processed: usize,
    #[source]
    pub source: VisionError,
}

impl PipelineError {
    pub fn new(stage: Stage, processed: usize, source: VisionError) -> Self {
        Self {
            stage,
            processed,
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_level_classification() {
        assert!(VisionError::unreadable("frame 3", "truncated png").is_item_level());
        assert!(VisionError::external("tesseract", "exit 1").is_item_level());
        assert!(!VisionError::invalid_config("threshold is NaN").is_item_level());
        assert!(!VisionError::Cancelled.is_item_level());
    }

    #[test]
    fn test_pipeline_error_message_names_stage() {
        let err = PipelineError::new(
            Stage::Recognition,
            4,
            VisionError::external("tesseract", "exit status 1"),
        );
        let msg = err.to_string();
        assert!(msg.contains("recognition"));
        assert!(msg.contains("4 item(s)"));
    }
}
