use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::frame::Frame;
use crate::core::config::FrameDedupConfig;
use crate::core::error::{Result, VisionError};
use crate::core::similarity::{ImageMethod, ImageSignature, SimilarityEngine};

/// 贪心在线去重器
///
/// 候选帧与所有已保留帧比较（不只是上一帧），屏幕回滚到旧状态时也能识别。
/// 输入帧数超过 `full_scan_cap` 时只比较最近 `recent_window` 个保留帧。
pub struct FrameDeduplicator {
    engine: SimilarityEngine,
    method: ImageMethod,
    threshold: f64,
    full_scan_cap: usize,
    recent_window: usize,
    /// 已保留帧及其特征（无法解码的帧没有特征）
    retained: Vec<(Frame, Option<ImageSignature>)>,
    seen: usize,
    window_warned: bool,
}

/// 去重决策结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupDecision {
    pub frame_id: u64,
    pub timestamp: f64,
    pub reason: DedupReason,
    /// 与已保留帧的最高相似度
    pub similarity: f64,
    /// 最相似的已保留帧
    pub matched: Option<u64>,
}

impl DedupDecision {
    pub fn is_duplicate(&self) -> bool {
        self.reason == DedupReason::Duplicate
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupReason {
    First,      // 首帧，直接保留
    Distinct,   // 与所有已保留帧都不相似，保留
    Duplicate,  // 与某个已保留帧相似，丢弃
    Unreadable, // 无法解码，相似度按 0.0 计，保留
}

#[derive(Debug, Clone)]
pub struct DedupOutcome {
    pub frames: Vec<Frame>,
    pub decisions: Vec<DedupDecision>,
}

impl FrameDeduplicator {
    pub fn new(engine: SimilarityEngine, config: &FrameDedupConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            engine,
            method: config.method,
            threshold: config.threshold,
            full_scan_cap: config.full_scan_cap,
            recent_window: config.recent_window,
            retained: Vec::new(),
            seen: 0,
            window_warned: false,
        })
    }

    pub fn with_threshold(threshold: f64, method: ImageMethod) -> Result<Self> {
        let config = FrameDedupConfig {
            threshold,
            method,
            ..FrameDedupConfig::default()
        };
        Self::new(SimilarityEngine::new(), &config)
    }

    /// 批量去重，返回输入顺序下的保留子序列
    pub fn dedupe(&mut self, frames: Vec<Frame>) -> Vec<Frame> {
        self.dedupe_with_decisions(frames).frames
    }

    pub fn dedupe_with_decisions(&mut self, frames: Vec<Frame>) -> DedupOutcome {
        self.clear();
        let total = frames.len();

        if total <= 1 {
            let decisions = frames
                .iter()
                .map(|f| DedupDecision {
                    frame_id: f.id,
                    timestamp: f.timestamp,
                    reason: DedupReason::First,
                    similarity: 0.0,
                    matched: None,
                })
                .collect();
            return DedupOutcome { frames, decisions };
        }

        let bounded = total > self.full_scan_cap;

        // 特征提取互不依赖，并行计算；保留/丢弃决策按输入顺序串行应用
        let signatures: Vec<Option<ImageSignature>> = frames
            .par_iter()
            .map(|frame| self.signature_of(frame))
            .collect();

        let mut decisions = Vec::with_capacity(total);
        for (frame, signature) in frames.into_iter().zip(signatures) {
            decisions.push(self.decide(frame, signature, bounded));
        }

        let kept = self.retained.len();
        info!(
            "🧹 Deduplicated {} frames to {} unique frames ({}, threshold {:.2})",
            total, kept, self.method, self.threshold
        );

        DedupOutcome {
            frames: self.take_retained(),
            decisions,
        }
    }

    /// 在线接口：逐帧推入，已推入的帧数超过 `full_scan_cap` 后切换为窗口比较
    pub fn push(&mut self, frame: Frame) -> DedupDecision {
        let signature = self.signature_of(&frame);
        let bounded = self.seen >= self.full_scan_cap;
        self.decide(frame, signature, bounded)
    }

    fn signature_of(&self, frame: &Frame) -> Option<ImageSignature> {
        match self.engine.image_signature(&frame.image) {
            Ok(sig) => Some(sig),
            Err(e) => {
                warn!("⚠️ Frame {} unreadable, treated as distinct: {}", frame.id, e);
                None
            }
        }
    }

    fn decide(
        &mut self,
        frame: Frame,
        signature: Option<ImageSignature>,
        bounded: bool,
    ) -> DedupDecision {
        self.seen += 1;

        if self.retained.is_empty() {
            let decision = DedupDecision {
                frame_id: frame.id,
                timestamp: frame.timestamp,
                reason: DedupReason::First,
                similarity: 0.0,
                matched: None,
            };
            self.retained.push((frame, signature));
            return decision;
        }

        if bounded && !self.window_warned {
            warn!(
                "⚠️ Frame count exceeds {}, comparing against the {} most recent retained frames only",
                self.full_scan_cap, self.recent_window
            );
            self.window_warned = true;
        }

        let start = if bounded {
            self.retained.len().saturating_sub(self.recent_window)
        } else {
            0
        };

        let best = signature.as_ref().and_then(|sig| {
            self.retained[start..]
                .par_iter()
                .enumerate()
                .filter_map(|(offset, (kept, kept_sig))| {
                    let kept_sig = kept_sig.as_ref()?;
                    let score = self.engine.compare_images(sig, kept_sig, self.method);
                    Some((start + offset, kept.id, score))
                })
                // 分数相同取更早保留的帧
                .reduce_with(|a, b| if b.2 > a.2 || (b.2 == a.2 && b.0 < a.0) { b } else { a })
        });

        let (similarity, matched) = best.map(|(_, id, s)| (s, Some(id))).unwrap_or((0.0, None));

        let reason = if signature.is_none() {
            DedupReason::Unreadable
        } else if similarity >= self.threshold {
            DedupReason::Duplicate
        } else {
            DedupReason::Distinct
        };

        debug!(
            "frame {} @ {:.3}s → {:?} (similarity {:.4}, matched {:?})",
            frame.id, frame.timestamp, reason, similarity, matched
        );

        let decision = DedupDecision {
            frame_id: frame.id,
            timestamp: frame.timestamp,
            reason,
            similarity,
            matched,
        };

        if reason != DedupReason::Duplicate {
            self.retained.push((frame, signature));
        }
        decision
    }

    fn take_retained(&mut self) -> Vec<Frame> {
        std::mem::take(&mut self.retained)
            .into_iter()
            .map(|(frame, _)| frame)
            .collect()
    }

    /// 结束在线去重，取出保留帧
    pub fn finish(&mut self) -> Vec<Frame> {
        let frames = self.take_retained();
        self.clear();
        frames
    }

    pub fn clear(&mut self) {
        self.retained.clear();
        self.seen = 0;
        self.window_warned = false;
    }

    pub fn len(&self) -> usize {
        self.retained.len()
    }

    pub fn is_empty(&self) -> bool {
        self.retained.is_empty()
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }
}

impl TryFrom<&FrameDedupConfig> for FrameDeduplicator {
    type Error = VisionError;

    fn try_from(config: &FrameDedupConfig) -> Result<Self> {
        Self::new(SimilarityEngine::new(), config)
    }
}
