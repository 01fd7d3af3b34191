//! 运行配置
//!
//! 配置文件为 `visionscribe.json`，用 json5 解析（允许注释和尾逗号）。
//! 所有字段都有默认值，文件里只需写要覆盖的部分。

use std::fs;
use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};

use crate::core::error::{Result, VisionError};
use crate::core::similarity::normalize::DEFAULT_MEANINGFUL_PUNCTUATION;
use crate::core::similarity::{ImageMethod, SimilarityMethod};

pub const DEFAULT_CONFIG_FILE: &str = "visionscribe.json";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    pub video: VideoConfig,
    pub frame_dedup: FrameDedupConfig,
    pub ocr: OcrConfig,
    pub text_dedup: TextDedupConfig,
    pub similarity: SimilarityConfig,
    pub ai: AiConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// 每秒采样帧数
    pub fps: f64,
    /// 采样上限，None 表示不限
    pub max_frames: Option<usize>,
    pub skip_blurry: bool,
    /// 拉普拉斯方差低于该值视为模糊
    pub blur_threshold: f64,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            fps: 1.0,
            max_frames: None,
            skip_blurry: false,
            blur_threshold: 100.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameDedupConfig {
    pub method: ImageMethod,
    pub threshold: f64,
    /// 超过该帧数时改为只比较最近的保留帧
    pub full_scan_cap: usize,
    pub recent_window: usize,
}

impl Default for FrameDedupConfig {
    fn default() -> Self {
        Self {
            method: ImageMethod::Ssim,
            threshold: 0.95,
            full_scan_cap: 2000,
            recent_window: 64,
        }
    }
}

impl FrameDedupConfig {
    pub fn validate(&self) -> Result<()> {
        check_unit("frame_dedup.threshold", self.threshold)?;
        if self.recent_window == 0 {
            return Err(VisionError::invalid_config(
                "frame_dedup.recent_window must be at least 1",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    /// tesseract 语言代码，如 `eng`、`chi_sim`
    pub languages: Vec<String>,
    /// 低于该置信度的识别结果直接丢弃
    pub confidence_threshold: f64,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            languages: vec!["eng".to_string()],
            confidence_threshold: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextDedupConfig {
    pub method: SimilarityMethod,
    pub threshold: f64,
    pub min_confidence: f64,
}

impl Default for TextDedupConfig {
    fn default() -> Self {
        Self {
            method: SimilarityMethod::EditDistance,
            threshold: 0.85,
            min_confidence: 0.5,
        }
    }
}

impl TextDedupConfig {
    pub fn validate(&self) -> Result<()> {
        check_unit("text_dedup.threshold", self.threshold)?;
        check_unit("text_dedup.min_confidence", self.min_confidence)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityConfig {
    /// 归一化时除字母数字和空白外保留的字符
    pub meaningful_punctuation: String,
    /// 图像比较前把最长边缩到该值，0 表示原尺寸
    pub working_size: u32,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            meaningful_punctuation: DEFAULT_MEANINGFUL_PUNCTUATION.to_string(),
            working_size: 256,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    /// `openai`（任何兼容 chat completions 的服务）或 `passthrough`
    pub provider: String,
    pub model: String,
    pub endpoint: String,
    /// 从该环境变量读取 API key
    pub api_key_env: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4".to_string(),
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            temperature: 0.7,
            max_tokens: 4000,
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// 单帧失败时跳过而不是中止
    pub best_effort: bool,
    /// OCR 线程数，0 表示按 CPU 核数
    pub workers: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            best_effort: true,
            workers: 0,
        }
    }
}

impl PipelineConfig {
    pub fn worker_count(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get().max(1)
        } else {
            self.workers
        }
    }
}

fn check_unit(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(VisionError::invalid_config(format!(
            "{} must be within [0, 1], got {}",
            name, value
        )));
    }
    Ok(())
}

impl VisionConfig {
    pub fn from_json5(text: &str) -> Result<Self> {
        let config: VisionConfig = json5::from_str(text)
            .map_err(|e| VisionError::invalid_config(format!("config parse failed: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config = Self::from_json5(&text)?;
        info!("⚙️ Loaded config from {}", path.display());
        Ok(config)
    }

    /// 文件存在则加载，否则使用默认配置
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text)?;
        info!("💾 Config written to {}", path.display());
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !self.video.fps.is_finite() || self.video.fps <= 0.0 {
            return Err(VisionError::invalid_config(format!(
                "video.fps must be positive, got {}",
                self.video.fps
            )));
        }
        if !self.video.blur_threshold.is_finite() || self.video.blur_threshold < 0.0 {
            return Err(VisionError::invalid_config(
                "video.blur_threshold must be a non-negative number",
            ));
        }
        if self.video.max_frames == Some(0) {
            return Err(VisionError::invalid_config("video.max_frames must be at least 1"));
        }
        self.frame_dedup.validate()?;
        check_unit("ocr.confidence_threshold", self.ocr.confidence_threshold)?;
        if self.ocr.languages.is_empty() {
            return Err(VisionError::invalid_config("ocr.languages must not be empty"));
        }
        self.text_dedup.validate()?;
        if !self.ai.temperature.is_finite() || !(0.0..=2.0).contains(&self.ai.temperature) {
            return Err(VisionError::invalid_config("ai.temperature must be within [0, 2]"));
        }
        Ok(())
    }
}
