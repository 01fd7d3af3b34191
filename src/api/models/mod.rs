pub mod documents;

pub use documents::{
    AnalysisDocument, BuildSummary, FramesDocument, JsonDocument, OcrDocument, OutputFormat, SimilarPair,
};
