pub mod models;
pub mod scribe;

pub use scribe::{ScribeError, VisionScribe};
