//! 最近代表聚类
//!
//! 按时间顺序单遍处理文字块：每个块只和各簇的代表文本比较，最高分不低于阈值
//! 则并入该簇，否则自成新簇。打分并行，合并由单个有序归约串行完成。

use std::cmp::Ordering;

use log::{debug, info};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::block::{merge_timestamps, TextBlock};
use crate::core::config::TextDedupConfig;
use crate::core::error::Result;
use crate::core::similarity::{NormalizedText, SimilarityEngine, SimilarityMethod, TfIdfCorpus};

/// 一组近似重复的文字块
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StoredCluster")]
pub struct TextCluster {
    pub representative_text: String,
    pub members: Vec<TextBlock>,
    pub merged_source_timestamps: Vec<f64>,
    pub confidence: f64,
    #[serde(skip)]
    representative: usize,
}

impl TextCluster {
    fn found(block: TextBlock) -> Self {
        let mut merged = Vec::with_capacity(block.source_timestamps.len());
        merge_timestamps(&mut merged, &block.source_timestamps);
        Self {
            representative_text: block.text.clone(),
            merged_source_timestamps: merged,
            confidence: block.confidence,
            members: vec![block],
            representative: 0,
        }
    }

    pub fn representative(&self) -> &TextBlock {
        &self.members[self.representative]
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn first_seen(&self) -> f64 {
        self.merged_source_timestamps
            .first()
            .copied()
            .unwrap_or(f64::INFINITY)
    }

    /// 并入新成员；返回代表是否改变
    fn absorb(&mut self, block: TextBlock) -> bool {
        merge_timestamps(&mut self.merged_source_timestamps, &block.source_timestamps);
        self.confidence = self.confidence.max(block.confidence);
        self.members.push(block);

        let best = pick_representative(&self.members);
        let changed = best != self.representative;
        self.representative = best;
        self.representative_text = self.members[best].text.clone();
        changed
    }

    /// 代表簇写回一个文字块（用于再次聚类或交给下游）
    pub fn to_block(&self) -> TextBlock {
        let rep = self.representative();
        TextBlock {
            text: self.representative_text.clone(),
            confidence: self.confidence,
            bbox: rep.bbox,
            source_timestamps: self.merged_source_timestamps.clone(),
            language: rep.language.clone(),
        }
    }
}

/// 从 JSON 读回的簇：代表下标不落盘，读回时重新选出
#[derive(Deserialize)]
struct StoredCluster {
    members: Vec<TextBlock>,
    #[serde(default)]
    merged_source_timestamps: Vec<f64>,
}

impl TryFrom<StoredCluster> for TextCluster {
    type Error = String;

    fn try_from(stored: StoredCluster) -> std::result::Result<Self, Self::Error> {
        if stored.members.is_empty() {
            return Err("cluster has no members".to_string());
        }
        let representative = pick_representative(&stored.members);
        let mut merged = stored.merged_source_timestamps;
        for member in &stored.members {
            merge_timestamps(&mut merged, &member.source_timestamps);
        }
        let confidence = stored
            .members
            .iter()
            .map(|m| m.confidence)
            .fold(f64::NEG_INFINITY, f64::max);
        Ok(Self {
            representative_text: stored.members[representative].text.clone(),
            merged_source_timestamps: merged,
            confidence,
            members: stored.members,
            representative,
        })
    }
}

/// 置信度最高；相同时取最早时间；再相同取先加入的成员
fn pick_representative(members: &[TextBlock]) -> usize {
    let mut best = 0;
    for (i, m) in members.iter().enumerate().skip(1) {
        let current = &members[best];
        let better = match m.confidence.total_cmp(&current.confidence) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => m.earliest_timestamp() < current.earliest_timestamp(),
        };
        if better {
            best = i;
        }
    }
    best
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    EmptyText,
    LowConfidence,
}

/// 聚类前被丢弃的块，`index` 为输入下标
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DroppedBlock {
    pub index: usize,
    pub reason: DropReason,
    pub confidence: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ClusterOutcome {
    pub clusters: Vec<TextCluster>,
    pub dropped: Vec<DroppedBlock>,
}

impl ClusterOutcome {
    pub fn member_count(&self) -> usize {
        self.clusters.iter().map(TextCluster::len).sum()
    }
}

pub struct TextClusterer {
    engine: SimilarityEngine,
    method: SimilarityMethod,
    threshold: f64,
    min_confidence: f64,
}

impl TextClusterer {
    pub fn new(engine: SimilarityEngine, config: &TextDedupConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            engine,
            method: config.method,
            threshold: config.threshold,
            min_confidence: config.min_confidence,
        })
    }

    /// 使用默认置信度下限
    pub fn with_threshold(threshold: f64, method: SimilarityMethod) -> Result<Self> {
        let config = TextDedupConfig {
            threshold,
            method,
            ..TextDedupConfig::default()
        };
        Self::new(SimilarityEngine::new(), &config)
    }

    pub fn with_min_confidence(mut self, min_confidence: f64) -> Result<Self> {
        TextDedupConfig {
            method: self.method,
            threshold: self.threshold,
            min_confidence,
        }
        .validate()?;
        self.min_confidence = min_confidence;
        Ok(self)
    }

    pub fn method(&self) -> SimilarityMethod {
        self.method
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn cluster(&self, blocks: Vec<TextBlock>) -> Vec<TextCluster> {
        self.cluster_with_report(blocks).clusters
    }

    pub fn cluster_with_report(&self, blocks: Vec<TextBlock>) -> ClusterOutcome {
        let total = blocks.len();
        let mut dropped = Vec::new();
        let mut kept: Vec<(TextBlock, NormalizedText)> = Vec::with_capacity(total);

        for (index, block) in blocks.into_iter().enumerate() {
            let normalized = self.engine.normalize(&block.text);
            let reason = if normalized.is_empty() {
                Some(DropReason::EmptyText)
            } else if block.confidence.is_nan() || block.confidence < self.min_confidence {
                Some(DropReason::LowConfidence)
            } else {
                None
            };

            match reason {
                Some(reason) => {
                    debug!("drop block {} ({:?}, confidence {:.2})", index, reason, block.confidence);
                    dropped.push(DroppedBlock {
                        index,
                        reason,
                        confidence: block.confidence,
                    });
                }
                None => kept.push((block, normalized)),
            }
        }

        // sort_by 是稳定排序，时间相同保持输入顺序
        kept.sort_by(|a, b| a.0.earliest_timestamp().total_cmp(&b.0.earliest_timestamp()));

        let corpus = match self.method {
            SimilarityMethod::CosineTfidf => Some(TfIdfCorpus::fit(kept.iter().map(|(_, n)| n))),
            _ => None,
        };

        let mut clusters: Vec<TextCluster> = Vec::new();
        // 与 clusters 一一对应的代表文本（已归一化）
        let mut representatives: Vec<NormalizedText> = Vec::new();
        let mut member_norms: Vec<Vec<NormalizedText>> = Vec::new();

        for (block, normalized) in kept {
            let best = representatives
                .par_iter()
                .enumerate()
                .map(|(i, rep)| (i, self.engine.score(&normalized, rep, self.method, corpus.as_ref())))
                // 同分取更早建立的簇
                .reduce_with(|a, b| if b.1 > a.1 || (b.1 == a.1 && b.0 < a.0) { b } else { a });

            match best {
                Some((i, score)) if score >= self.threshold => {
                    debug!("merge into cluster {} (score {:.3}): {}", i, score, normalized);
                    member_norms[i].push(normalized);
                    if clusters[i].absorb(block) {
                        representatives[i] = member_norms[i][clusters[i].representative].clone();
                    }
                }
                _ => {
                    debug!("found cluster {}: {}", clusters.len(), normalized);
                    representatives.push(normalized.clone());
                    member_norms.push(vec![normalized]);
                    clusters.push(TextCluster::found(block));
                }
            }
        }

        info!(
            "🧩 Clustered {} text blocks into {} clusters ({} dropped, {}, threshold {:.2})",
            total,
            clusters.len(),
            dropped.len(),
            self.method,
            self.threshold
        );

        ClusterOutcome { clusters, dropped }
    }
}
