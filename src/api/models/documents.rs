use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::core::error::Result;
use crate::core::pipeline::{PipelineReport, SkippedItem};
use crate::core::similarity::SimilarityMethod;
use crate::core::text::{DroppedBlock, TextBlock, TextCluster};
use crate::core::video::{DedupDecision, FrameInfo};

pub const FRAMES_DIR: &str = "frames";
pub const FRAMES_METADATA_FILE: &str = "frames_metadata.json";
pub const OCR_DATA_FILE: &str = "ocr_data.json";
pub const ANALYSIS_FILE: &str = "ai_analysis.json";
pub const BUILD_SUMMARY_FILE: &str = "build_summary.json";
pub const CODE_DIR: &str = "code";
pub const DOCS_FILE: &str = "docs.md";

/// 各阶段之间交换的 JSON 文档
pub trait JsonDocument: Serialize + DeserializeOwned {
    fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// 输出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// 只写代码文件树
    #[default]
    Code,
    /// 只写 Markdown 文档
    Docs,
    Both,
}

impl OutputFormat {
    pub fn wants_code(&self) -> bool {
        matches!(self, OutputFormat::Code | OutputFormat::Both)
    }

    pub fn wants_docs(&self) -> bool {
        matches!(self, OutputFormat::Docs | OutputFormat::Both)
    }
}

/// `frames` 命令的产物：保留帧的元数据
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FramesDocument {
    pub source: PathBuf,
    pub fps: f64,
    pub sampled_frames: usize,
    pub frames: Vec<FrameInfo>,
    /// 每个采样帧的去重决策
    #[serde(default)]
    pub decisions: Vec<DedupDecision>,
    #[serde(default)]
    pub skipped: Vec<SkippedItem>,
    pub created_at: DateTime<Utc>,
}

impl JsonDocument for FramesDocument {}

impl FramesDocument {
    pub fn unique_frames(&self) -> usize {
        self.frames.len()
    }
}

/// `ocr` 命令的产物
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrDocument {
    pub frames_dir: PathBuf,
    pub total_frames: usize,
    pub frames_with_text: usize,
    pub blocks: Vec<TextBlock>,
    #[serde(default)]
    pub skipped: Vec<SkippedItem>,
    pub created_at: DateTime<Utc>,
}

impl JsonDocument for OcrDocument {}

impl OcrDocument {
    pub fn new(frames_dir: &Path, total_frames: usize, blocks: Vec<TextBlock>, skipped: Vec<SkippedItem>) -> Self {
        let mut stamps: Vec<f64> = blocks
            .iter()
            .flat_map(|b| b.source_timestamps.iter().copied())
            .collect();
        stamps.sort_by(f64::total_cmp);
        stamps.dedup();

        Self {
            frames_dir: frames_dir.to_path_buf(),
            total_frames,
            frames_with_text: stamps.len(),
            blocks,
            skipped,
            created_at: Utc::now(),
        }
    }
}

/// 代表文本相近但未达到合并阈值的两个簇
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarPair {
    pub first: usize,
    pub second: usize,
    pub score: f64,
}

impl From<(usize, usize, f64)> for SimilarPair {
    fn from((first, second, score): (usize, usize, f64)) -> Self {
        Self { first, second, score }
    }
}

/// `analyze` 命令的产物
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisDocument {
    pub method: SimilarityMethod,
    pub threshold: f64,
    pub total_blocks: usize,
    pub clusters: Vec<TextCluster>,
    #[serde(default)]
    pub dropped: Vec<DroppedBlock>,
    #[serde(default)]
    pub similar_pairs: Vec<SimilarPair>,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl JsonDocument for AnalysisDocument {}

/// `build` / `run` 命令的汇总
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildSummary {
    pub project_name: String,
    pub reconstructor: String,
    pub output_dir: PathBuf,
    pub format: OutputFormat,
    pub files_generated: usize,
    pub total_size: usize,
    pub outputs: Vec<PathBuf>,
    /// 仅 `run` 命令有完整的流水线报告
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<PipelineReport>,
    pub created_at: DateTime<Utc>,
}

impl JsonDocument for BuildSummary {}
