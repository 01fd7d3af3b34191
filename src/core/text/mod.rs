pub mod block;
pub mod cluster;
pub mod recognizer;
pub mod tesseract;

pub use block::{BBox, TextBlock};
pub use cluster::{ClusterOutcome, DropReason, DroppedBlock, TextCluster, TextClusterer};
pub use recognizer::{MockTextRecognizer, RecognizedText, TextRecognizer};
pub use tesseract::TesseractRecognizer;
