//! 流水线编排
//!
//! 采样 → 帧去重 → OCR → 文本聚类 → 重建 → 输出。每个阶段只接收上一阶段的结果；
//! 第一个硬错误终止后续阶段。best-effort 模式下单帧的读取/识别失败记录后跳过。
//! 重建失败总是终止，输出只在重建成功后进行。

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, error, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::core::config::VisionConfig;
use crate::core::error::{PipelineError, Result, Stage, VisionError};
use crate::core::project::{OutputEmitter, ProjectReconstructor, ProjectTree};
use crate::core::similarity::SimilarityEngine;
use crate::core::text::{ClusterOutcome, DroppedBlock, TextBlock, TextCluster, TextClusterer, TextRecognizer};
use crate::core::video::{BlurFilter, DedupDecision, DedupOutcome, Frame, FrameDeduplicator, FrameSource};

/// 跨线程共享的取消标记
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// best-effort 模式下被跳过的条目
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedItem {
    pub stage: Stage,
    pub item: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineReport {
    pub sampled_frames: usize,
    pub blurry_frames: usize,
    pub retained_frames: usize,
    pub frame_decisions: Vec<DedupDecision>,
    pub recognized_blocks: usize,
    /// 低于 `ocr.confidence_threshold` 而未进入聚类的区域数
    #[serde(default)]
    pub below_ocr_floor: usize,
    pub clusters: usize,
    pub dropped_blocks: Vec<DroppedBlock>,
    pub skipped: Vec<SkippedItem>,
    pub outputs: Vec<PathBuf>,
}

/// 完整运行的产物
#[derive(Debug)]
pub struct PipelineRun {
    pub clusters: Vec<TextCluster>,
    pub tree: ProjectTree,
    pub report: PipelineReport,
}

pub struct Pipeline {
    config: VisionConfig,
    engine: SimilarityEngine,
    recognizer: Option<Arc<dyn TextRecognizer>>,
    reconstructor: Option<Arc<dyn ProjectReconstructor>>,
    cancel: CancelFlag,
    pool: rayon::ThreadPool,
}

impl Pipeline {
    pub fn new(config: VisionConfig) -> Result<Self> {
        config.validate()?;
        let workers = config.pipeline.worker_count();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("visionscribe-ocr-{}", i))
            .build()
            .map_err(|e| VisionError::invalid_config(format!("worker pool: {}", e)))?;

        info!(
            "🚀 Pipeline ready: workers={}, best_effort={}",
            workers, config.pipeline.best_effort
        );

        Ok(Self {
            engine: SimilarityEngine::with_config(&config.similarity),
            config,
            recognizer: None,
            reconstructor: None,
            cancel: CancelFlag::new(),
            pool,
        })
    }

    pub fn with_recognizer(mut self, recognizer: Arc<dyn TextRecognizer>) -> Self {
        info!("🔤 Text recognizer: {}", recognizer.name());
        self.recognizer = Some(recognizer);
        self
    }

    pub fn with_reconstructor(mut self, reconstructor: Arc<dyn ProjectReconstructor>) -> Self {
        info!("🧠 Reconstructor: {}", reconstructor.name());
        self.reconstructor = Some(reconstructor);
        self
    }

    /// 与外部共享取消标记
    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &VisionConfig {
        &self.config
    }

    /// 取消标记，可交给其他线程（例如 Ctrl-C 处理）
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// 单个条目失败：best-effort 下记录并跳过，否则转为阶段错误
    fn absorb_failure(
        &self,
        stage: Stage,
        item: String,
        err: VisionError,
        processed: usize,
        report: &mut PipelineReport,
    ) -> std::result::Result<(), PipelineError> {
        if self.config.pipeline.best_effort && err.is_item_level() {
            warn!("⚠️ Skipping {} during {}: {}", item, stage, err);
            report.skipped.push(SkippedItem {
                stage,
                item,
                reason: err.to_string(),
            });
            Ok(())
        } else {
            error!("❌ {} failed on {}: {}", stage, item, err);
            Err(PipelineError::new(stage, processed, err))
        }
    }

    /// 从来源读取帧，按需过滤模糊帧
    pub fn sample(
        &self,
        source: &mut dyn FrameSource,
        report: &mut PipelineReport,
    ) -> std::result::Result<Vec<Frame>, PipelineError> {
        let blur = self
            .config
            .video
            .skip_blurry
            .then(|| BlurFilter::with_threshold(self.config.video.blur_threshold));
        let limit = self.config.video.max_frames.unwrap_or(usize::MAX);
        let mut frames = Vec::new();
        let mut position = 0usize;

        while frames.len() < limit {
            if self.cancel.is_cancelled() {
                return Err(PipelineError::new(Stage::Sampling, frames.len(), VisionError::Cancelled));
            }

            let frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    let item = format!("frame #{}", position);
                    position += 1;
                    self.absorb_failure(Stage::Sampling, item, e, frames.len(), report)?;
                    continue;
                }
            };
            position += 1;
            report.sampled_frames += 1;

            if let Some(filter) = &blur {
                match filter.is_sharp(&frame) {
                    Ok(true) => {}
                    Ok(false) => {
                        report.blurry_frames += 1;
                        continue;
                    }
                    Err(e) => {
                        let item = format!("frame {}", frame.id);
                        self.absorb_failure(Stage::Sampling, item, e, frames.len(), report)?;
                        continue;
                    }
                }
            }
            frames.push(frame);
        }

        info!(
            "🎞️ Sampled {} frames ({} blurry skipped)",
            frames.len(),
            report.blurry_frames
        );
        Ok(frames)
    }

    pub fn dedupe_frames(
        &self,
        frames: Vec<Frame>,
        report: &mut PipelineReport,
    ) -> std::result::Result<Vec<Frame>, PipelineError> {
        let mut deduper = FrameDeduplicator::new(self.engine.clone(), &self.config.frame_dedup)
            .map_err(|e| PipelineError::new(Stage::FrameDedup, 0, e))?;
        let DedupOutcome { frames, decisions } = deduper.dedupe_with_decisions(frames);
        report.retained_frames = frames.len();
        report.frame_decisions = decisions;
        Ok(frames)
    }

    /// 并行识别，结果按帧顺序串行归并
    pub fn recognize(
        &self,
        frames: &[Frame],
        report: &mut PipelineReport,
    ) -> std::result::Result<Vec<TextBlock>, PipelineError> {
        let Some(recognizer) = self.recognizer.as_deref() else {
            return Err(PipelineError::new(
                Stage::Recognition,
                0,
                VisionError::invalid_config("no text recognizer configured"),
            ));
        };
        let cancel = &self.cancel;

        let results: Vec<Result<Vec<TextBlock>>> = self.pool.install(|| {
            frames
                .par_iter()
                .map(|frame| {
                    if cancel.is_cancelled() {
                        return Err(VisionError::Cancelled);
                    }
                    let regions = recognizer.recognize(&frame.image)?;
                    Ok(regions
                        .into_iter()
                        .map(|r| r.into_block(frame.timestamp))
                        .collect())
                })
                .collect()
        });

        let floor = self.config.ocr.confidence_threshold;
        let mut blocks = Vec::new();
        let mut processed = 0usize;

        for (frame, result) in frames.iter().zip(results) {
            match result {
                Ok(found) => {
                    processed += 1;
                    let total = found.len();
                    let before = blocks.len();
                    blocks.extend(found.into_iter().filter(|b| b.confidence >= floor));
                    let below = total - (blocks.len() - before);
                    if below > 0 {
                        debug!("frame {}: {} regions below OCR floor {:.2}", frame.id, below, floor);
                        report.below_ocr_floor += below;
                    }
                }
                Err(VisionError::Cancelled) => {
                    return Err(PipelineError::new(Stage::Recognition, processed, VisionError::Cancelled));
                }
                Err(e) => {
                    let item = format!("frame {} @ {:.3}s", frame.id, frame.timestamp);
                    self.absorb_failure(Stage::Recognition, item, e, processed, report)?;
                }
            }
        }

        report.recognized_blocks = blocks.len();
        info!(
            "🔤 Recognized {} text blocks from {} frames",
            blocks.len(),
            processed
        );
        Ok(blocks)
    }

    pub fn cluster(
        &self,
        blocks: Vec<TextBlock>,
        report: &mut PipelineReport,
    ) -> std::result::Result<Vec<TextCluster>, PipelineError> {
        let clusterer = TextClusterer::new(self.engine.clone(), &self.config.text_dedup)
            .map_err(|e| PipelineError::new(Stage::TextClustering, 0, e))?;
        let ClusterOutcome { clusters, dropped } = clusterer.cluster_with_report(blocks);
        report.clusters = clusters.len();
        report.dropped_blocks = dropped;
        Ok(clusters)
    }

    /// 重建失败对该阶段总是终止性的
    pub fn reconstruct(&self, clusters: &[TextCluster]) -> std::result::Result<ProjectTree, PipelineError> {
        if self.cancel.is_cancelled() {
            return Err(PipelineError::new(Stage::Reconstruction, 0, VisionError::Cancelled));
        }
        let Some(reconstructor) = self.reconstructor.as_deref() else {
            return Err(PipelineError::new(
                Stage::Reconstruction,
                0,
                VisionError::invalid_config("no project reconstructor configured"),
            ));
        };
        reconstructor.reconstruct(clusters).map_err(|e| {
            error!("❌ Reconstruction failed: {}", e);
            PipelineError::new(Stage::Reconstruction, 0, e)
        })
    }

    pub fn emit(
        &self,
        tree: &ProjectTree,
        emitters: &[&dyn OutputEmitter],
    ) -> std::result::Result<Vec<PathBuf>, PipelineError> {
        let mut outputs = Vec::with_capacity(emitters.len());
        for emitter in emitters {
            let path = emitter
                .write(tree)
                .map_err(|e| PipelineError::new(Stage::Emission, outputs.len(), e))?;
            outputs.push(path);
        }
        Ok(outputs)
    }

    /// 从帧来源一路跑到输出
    pub fn run(
        &self,
        source: &mut dyn FrameSource,
        emitters: &[&dyn OutputEmitter],
    ) -> std::result::Result<PipelineRun, PipelineError> {
        let mut report = PipelineReport::default();

        let frames = self.sample(source, &mut report)?;
        let frames = self.dedupe_frames(frames, &mut report)?;
        let blocks = self.recognize(&frames, &mut report)?;
        let clusters = self.cluster(blocks, &mut report)?;
        let tree = self.reconstruct(&clusters)?;
        report.outputs = self.emit(&tree, emitters)?;

        info!(
            "🎉 Pipeline finished: {} frames → {} unique → {} blocks → {} clusters → {} files ({} skipped)",
            report.sampled_frames,
            report.retained_frames,
            report.recognized_blocks,
            report.clusters,
            tree.file_count(),
            report.skipped.len()
        );

        Ok(PipelineRun {
            clusters,
            tree,
            report,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::project::PassthroughReconstructor;
    use crate::core::similarity::ImageMethod;
    use crate::core::text::{BBox, MockTextRecognizer, RecognizedText};
    use crate::core::video::{ImageHandle, VecFrameSource};
    use image::{DynamicImage, GrayImage, Luma};
    use std::path::Path;

    /// 灰度值即“屏幕内容”，Mock 识别器据此返回文字
    fn screen(id: u64, t: f64, value: u8) -> Frame {
        let img = GrayImage::from_fn(32, 32, |x, y| {
            if (x / 4 + y / 4) % 2 == 0 {
                Luma([value])
            } else {
                Luma([255 - value])
            }
        });
        Frame::from_image(id, t, DynamicImage::ImageLuma8(img))
    }

    fn screen_value(handle: &ImageHandle) -> Result<u8> {
        let image = handle.load()?;
        Ok(image.to_luma8().get_pixel(0, 0).0[0])
    }

    fn scripted_recognizer() -> Arc<dyn TextRecognizer> {
        Arc::new(MockTextRecognizer::with_script(|image| {
            let value = screen_value(image)?;
            let text = match value {
                0 => "def foo():",
                60 => "def foo():",
                120 => "    return 42",
                _ => return Err(VisionError::external("mock", "unreadable screen")),
            };
            Ok(vec![RecognizedText::new(text, 0.9, BBox::default(), "en")])
        }))
    }

    fn config(best_effort: bool) -> VisionConfig {
        let mut config = VisionConfig::default();
        config.pipeline.best_effort = best_effort;
        config.pipeline.workers = 2;
        config.frame_dedup.method = ImageMethod::Ssim;
        config
    }

    fn pipeline(best_effort: bool) -> Pipeline {
        Pipeline::new(config(best_effort))
            .expect("pipeline")
            .with_recognizer(scripted_recognizer())
            .with_reconstructor(Arc::new(PassthroughReconstructor::default()))
    }

    #[test]
    fn test_full_run_in_memory() {
        let frames = vec![
            screen(0, 0.0, 0),
            screen(1, 1.0, 0),
            screen(2, 2.0, 60),
            screen(3, 3.0, 120),
            screen(4, 4.0, 120),
        ];
        let dir = tempfile::tempdir().expect("tempdir");
        let emitter = crate::core::project::FsEmitter::new(dir.path());

        let run = pipeline(false)
            .run(&mut VecFrameSource::new(frames), &[&emitter])
            .expect("run");

        assert_eq!(run.report.sampled_frames, 5);
        assert_eq!(run.report.retained_frames, 3);
        assert_eq!(run.clusters.len(), 2);
        assert_eq!(run.clusters[0].representative_text, "def foo():");
        assert_eq!(run.clusters[0].merged_source_timestamps, vec![0.0, 2.0]);
        assert_eq!(run.tree.file_count(), 2);
        assert_eq!(run.report.outputs, vec![dir.path().join("src")]);
        assert!(Path::new(&run.report.outputs[0]).join("snippet_001.py").is_file());
    }

    #[test]
    fn test_recognition_failure_aborts_without_best_effort() {
        let frames = vec![screen(0, 0.0, 0), screen(1, 1.0, 200), screen(2, 2.0, 120)];
        let mut report = PipelineReport::default();
        let err = pipeline(false).recognize(&frames, &mut report).unwrap_err();

        assert_eq!(err.stage, Stage::Recognition);
        assert_eq!(err.processed, 1);
        assert!(matches!(err.source, VisionError::ExternalCollaborator { .. }));
    }

    #[test]
    fn test_best_effort_skips_failed_frame() {
        let frames = vec![screen(0, 0.0, 0), screen(1, 1.0, 200), screen(2, 2.0, 120)];
        let mut report = PipelineReport::default();
        let blocks = pipeline(true).recognize(&frames, &mut report).expect("best effort");

        assert_eq!(blocks.len(), 2);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].stage, Stage::Recognition);
        assert!(report.skipped[0].item.contains("frame 1"));
    }

    #[test]
    fn test_ocr_floor_drops_are_counted() {
        let mut cfg = config(false);
        cfg.ocr.confidence_threshold = 0.95;
        let p = Pipeline::new(cfg)
            .expect("pipeline")
            .with_recognizer(scripted_recognizer());
        let frames = vec![screen(0, 0.0, 0), screen(1, 1.0, 120)];
        let mut report = PipelineReport::default();
        let blocks = p.recognize(&frames, &mut report).expect("recognize");

        assert!(blocks.is_empty());
        assert_eq!(report.recognized_blocks, 0);
        assert_eq!(report.below_ocr_floor, 2);
        assert!(report.skipped.is_empty());
    }

    #[test]
    fn test_unreadable_frame_skipped_in_best_effort() {
        let missing = Frame::new(9, 0.5, ImageHandle::Path("/nonexistent/f.png".into()), (32, 32));
        let frames = vec![screen(0, 0.0, 0), missing];
        let mut report = PipelineReport::default();
        let blocks = pipeline(true).recognize(&frames, &mut report).expect("best effort");
        assert_eq!(blocks.len(), 1);
        assert_eq!(report.skipped.len(), 1);
    }

    #[test]
    fn test_reconstruction_failure_is_terminal_and_nothing_emitted() {
        struct Failing;
        impl ProjectReconstructor for Failing {
            fn name(&self) -> &'static str {
                "failing"
            }
            fn reconstruct(&self, _: &[TextCluster]) -> Result<ProjectTree> {
                Err(VisionError::external("llm", "rate limited"))
            }
        }

        let p = Pipeline::new(config(true))
            .expect("pipeline")
            .with_recognizer(scripted_recognizer())
            .with_reconstructor(Arc::new(Failing));
        let dir = tempfile::tempdir().expect("tempdir");
        let emitter = crate::core::project::FsEmitter::new(dir.path());

        let err = p
            .run(&mut VecFrameSource::new(vec![screen(0, 0.0, 0)]), &[&emitter])
            .unwrap_err();
        assert_eq!(err.stage, Stage::Reconstruction);
        assert_eq!(std::fs::read_dir(dir.path()).expect("list").count(), 0);
    }

    #[test]
    fn test_cancelled_before_sampling() {
        let p = pipeline(true);
        p.cancel_flag().cancel();
        let err = p
            .run(&mut VecFrameSource::new(vec![screen(0, 0.0, 0)]), &[])
            .unwrap_err();
        assert_eq!(err.stage, Stage::Sampling);
        assert!(matches!(err.source, VisionError::Cancelled));
    }

    #[test]
    fn test_max_frames_limit() {
        let mut cfg = config(true);
        cfg.video.max_frames = Some(2);
        let p = Pipeline::new(cfg).expect("pipeline");
        let frames = (0..5).map(|i| screen(i, i as f64, 0)).collect();
        let mut report = PipelineReport::default();
        let sampled = p.sample(&mut VecFrameSource::new(frames), &mut report).expect("sample");
        assert_eq!(sampled.len(), 2);
    }

    #[test]
    fn test_invalid_config_rejected_up_front() {
        let mut cfg = config(true);
        cfg.text_dedup.threshold = f64::INFINITY;
        let result = Pipeline::new(cfg);
        assert!(matches!(result.err(), Some(VisionError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_missing_collaborators_are_reported() {
        let p = Pipeline::new(config(false)).expect("pipeline");
        let mut report = PipelineReport::default();
        let err = p.recognize(&[screen(0, 0.0, 0)], &mut report).unwrap_err();
        assert_eq!(err.stage, Stage::Recognition);
        assert!(matches!(err.source, VisionError::InvalidConfiguration(_)));

        let err = p.reconstruct(&[]).unwrap_err();
        assert_eq!(err.stage, Stage::Reconstruction);
    }
}
