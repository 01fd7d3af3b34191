//! 相似度引擎
//!
//! 文本先归一化一次（[`NormalizedText`]），再交给具体指标打分；图像先解码为
//! [`ImageSignature`]，再做 SSIM 或感知哈希比较。所有分数都在 [0, 1] 内且对称。

pub mod normalize;
pub mod text;
pub mod visual;

use std::fmt;
use std::str::FromStr;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::core::config::SimilarityConfig;
use crate::core::error::{Result, VisionError};
use crate::core::video::ImageHandle;

pub use visual::ImageSignature;
pub use normalize::{NormalizedText, TextNormalizer};
pub use text::TfIdfCorpus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SimilarityMethod {
    Exact,
    Jaccard,
    WordOverlap,
    EditDistance,
    CosineTfidf,
}

impl SimilarityMethod {
    pub const ALL: [SimilarityMethod; 5] = [
        SimilarityMethod::Exact,
        SimilarityMethod::Jaccard,
        SimilarityMethod::WordOverlap,
        SimilarityMethod::EditDistance,
        SimilarityMethod::CosineTfidf,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SimilarityMethod::Exact => "exact",
            SimilarityMethod::Jaccard => "jaccard",
            SimilarityMethod::WordOverlap => "word_overlap",
            SimilarityMethod::EditDistance => "edit_distance",
            SimilarityMethod::CosineTfidf => "cosine_tfidf",
        }
    }
}

impl fmt::Display for SimilarityMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SimilarityMethod {
    type Err = VisionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "exact" => Ok(SimilarityMethod::Exact),
            "jaccard" => Ok(SimilarityMethod::Jaccard),
            "word_overlap" => Ok(SimilarityMethod::WordOverlap),
            "edit_distance" | "levenshtein" => Ok(SimilarityMethod::EditDistance),
            "cosine_tfidf" | "cosine" => Ok(SimilarityMethod::CosineTfidf),
            other => Err(VisionError::invalid_config(format!(
                "unknown similarity method '{}'",
                other
            ))),
        }
    }
}

impl TryFrom<String> for SimilarityMethod {
    type Error = VisionError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<SimilarityMethod> for String {
    fn from(method: SimilarityMethod) -> Self {
        method.as_str().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ImageMethod {
    Ssim,
    PerceptualHash,
}

impl ImageMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageMethod::Ssim => "ssim",
            ImageMethod::PerceptualHash => "phash",
        }
    }
}

impl fmt::Display for ImageMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageMethod {
    type Err = VisionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "ssim" => Ok(ImageMethod::Ssim),
            "phash" | "perceptual_hash" => Ok(ImageMethod::PerceptualHash),
            other => Err(VisionError::invalid_config(format!(
                "unknown image similarity method '{}'",
                other
            ))),
        }
    }
}

impl TryFrom<String> for ImageMethod {
    type Error = VisionError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ImageMethod> for String {
    fn from(method: ImageMethod) -> Self {
        method.as_str().to_string()
    }
}

/// 相似度引擎，无全局状态，配置在构造时注入
#[derive(Debug, Clone)]
pub struct SimilarityEngine {
    normalizer: TextNormalizer,
    working_size: u32,
}

impl SimilarityEngine {
    pub fn new() -> Self {
        Self::with_config(&SimilarityConfig::default())
    }

    pub fn with_config(config: &SimilarityConfig) -> Self {
        Self {
            normalizer: TextNormalizer::with_punctuation(&config.meaningful_punctuation),
            working_size: config.working_size,
        }
    }

    pub fn normalize(&self, raw: &str) -> NormalizedText {
        self.normalizer.normalize(raw)
    }

    /// 归一化两段原始文本后打分
    pub fn similarity(&self, a: &str, b: &str, method: SimilarityMethod) -> f64 {
        let (a, b) = (self.normalize(a), self.normalize(b));
        self.score(&a, &b, method, None)
    }

    /// 对已归一化文本打分；`corpus` 给出 TF-IDF 的 IDF 来源，缺省时只用这一对文本
    pub fn score(
        &self,
        a: &NormalizedText,
        b: &NormalizedText,
        method: SimilarityMethod,
        corpus: Option<&TfIdfCorpus>,
    ) -> f64 {
        if !a.is_empty() && a == b {
            return 1.0;
        }

        let score = match method {
            SimilarityMethod::Exact => text::exact(a, b),
            SimilarityMethod::Jaccard | SimilarityMethod::WordOverlap => text::jaccard(a, b),
            SimilarityMethod::EditDistance => text::edit_similarity(a, b),
            SimilarityMethod::CosineTfidf => match corpus {
                Some(corpus) => corpus.cosine(a, b),
                None => text::cosine_tfidf(a, b),
            },
        };
        score.clamp(0.0, 1.0)
    }

    pub fn similarity_matrix(&self, texts: &[&str], method: SimilarityMethod) -> Vec<Vec<f64>> {
        let normalized: Vec<NormalizedText> = texts.iter().map(|t| self.normalize(t)).collect();
        let n = normalized.len();
        let mut matrix = vec![vec![0.0; n]; n];
        for i in 0..n {
            matrix[i][i] = 1.0;
            for j in (i + 1)..n {
                let s = self.score(&normalized[i], &normalized[j], method, None);
                matrix[i][j] = s;
                matrix[j][i] = s;
            }
        }
        matrix
    }

    /// 相似度不低于阈值的文本对，按分数降序（同分按下标）
    pub fn find_similar_pairs(
        &self,
        texts: &[&str],
        threshold: f64,
        method: SimilarityMethod,
    ) -> Vec<(usize, usize, f64)> {
        let normalized: Vec<NormalizedText> = texts.iter().map(|t| self.normalize(t)).collect();
        let mut pairs = Vec::new();
        for i in 0..normalized.len() {
            for j in (i + 1)..normalized.len() {
                let s = self.score(&normalized[i], &normalized[j], method, None);
                if s >= threshold {
                    pairs.push((i, j, s));
                }
            }
        }
        pairs.sort_by(|a, b| b.2.total_cmp(&a.2).then_with(|| (a.0, a.1).cmp(&(b.0, b.1))));
        pairs
    }

    pub fn image_signature(&self, handle: &ImageHandle) -> Result<ImageSignature> {
        let image = handle.load()?;
        Ok(ImageSignature::from_image(&image, self.working_size))
    }

    pub fn compare_images(&self, a: &ImageSignature, b: &ImageSignature, method: ImageMethod) -> f64 {
        match method {
            ImageMethod::Ssim => visual::ssim(a, b),
            ImageMethod::PerceptualHash => visual::phash_similarity(a, b),
        }
    }

    /// 任一图像无法加载时返回 0.0
    pub fn image_similarity(&self, a: &ImageHandle, b: &ImageHandle, method: ImageMethod) -> f64 {
        let signatures = self.image_signature(a).and_then(|sa| Ok((sa, self.image_signature(b)?)));
        match signatures {
            Ok((sa, sb)) => self.compare_images(&sa, &sb, method),
            Err(e) => {
                warn!("⚠️ Image similarity undefined, scoring 0.0: {}", e);
                0.0
            }
        }
    }
}

impl Default for SimilarityEngine {
    fn default() -> Self {
        Self::new()
    }
}
