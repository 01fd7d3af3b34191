pub mod deduplicator;
pub mod frame;
pub mod quality;
pub mod source;
pub mod tools;

pub use deduplicator::{DedupDecision, DedupOutcome, DedupReason, FrameDeduplicator};
pub use frame::{format_timestamp, Frame, FrameInfo, ImageHandle};
pub use quality::BlurFilter;
pub use source::{parse_frame_timestamp, FfmpegSource, FrameSource, ImageDirSource, VecFrameSource};
