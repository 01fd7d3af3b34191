//! 录屏转项目

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::api::models::documents::{
    AnalysisDocument, BuildSummary, FramesDocument, JsonDocument, OcrDocument, OutputFormat, SimilarPair,
    BUILD_SUMMARY_FILE, CODE_DIR, DOCS_FILE, FRAMES_DIR, FRAMES_METADATA_FILE,
};
use crate::core::config::VisionConfig;
use crate::core::error::{PipelineError, Stage, VisionError};
use crate::core::pipeline::{CancelFlag, Pipeline, PipelineReport, SkippedItem};
use crate::core::project::{
    FsEmitter, LlmReconstructor, MarkdownEmitter, OutputEmitter, PassthroughReconstructor, ProjectReconstructor,
    ProjectTree,
};
use crate::core::similarity::text::extract_keywords;
use crate::core::similarity::SimilarityEngine;
use crate::core::text::{TesseractRecognizer, TextRecognizer};
use crate::core::video::tools::{is_tool_available, FFMPEG_ENV};
use crate::core::video::{
    format_timestamp, FfmpegSource, Frame, FrameInfo, FrameSource, ImageDirSource, ImageHandle,
};

/// 代表文本得分达到合并阈值的这个比例即列为相近簇
const NEAR_MISS_RATIO: f64 = 0.8;
const MAX_KEYWORDS: usize = 20;

/// 对外错误类型，只包含可序列化字段
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScribeError {
    pub error_type: String,
    pub stage: Option<Stage>,
    pub message: String,
}

impl From<VisionError> for ScribeError {
    fn from(e: VisionError) -> Self {
        let error_type = match &e {
            VisionError::InvalidConfiguration(_) => "InvalidConfiguration",
            VisionError::UnreadableInput { .. } => "UnreadableInput",
            VisionError::ExternalCollaborator { .. } => "ExternalCollaborator",
            VisionError::Cancelled => "Cancelled",
            VisionError::Io(_) => "Io",
            VisionError::Json(_) => "Json",
            VisionError::Image(_) => "Image",
        };
        Self {
            error_type: error_type.to_string(),
            stage: None,
            message: e.to_string(),
        }
    }
}

impl From<PipelineError> for ScribeError {
    fn from(e: PipelineError) -> Self {
        let message = e.to_string();
        Self {
            stage: Some(e.stage),
            message,
            ..Self::from(e.source)
        }
    }
}

impl std::fmt::Display for ScribeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.error_type, self.message)
    }
}

impl std::error::Error for ScribeError {}

/// 录屏转项目：抽帧 → 识别 → 聚类 → 重建
///
/// 每一步都可单独运行，中间结果以 JSON 文档落盘：
///
/// ```ignore
/// let scribe = VisionScribe::create(VisionConfig::default())?;
/// let frames = scribe.extract_frames(Path::new("demo.mp4"), Path::new("out"))?;
/// let ocr = scribe.recognize_frames(Path::new("out/frames"), scribe.recognizer())?;
/// let analysis = scribe.analyze(&ocr)?;
/// let summary = scribe.build(&analysis, Path::new("out"), OutputFormat::Both, scribe.reconstructor()?)?;
/// ```
pub struct VisionScribe {
    config: VisionConfig,
    cancel: CancelFlag,
}

impl VisionScribe {
    pub fn create(config: VisionConfig) -> Result<Self, ScribeError> {
        config.validate()?;
        info!("🎬 VisionScribe: created");
        Ok(Self {
            config,
            cancel: CancelFlag::new(),
        })
    }

    pub fn config(&self) -> &VisionConfig {
        &self.config
    }

    /// 取消标记，对之后启动的所有步骤生效
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    fn pipeline(&self) -> Result<Pipeline, ScribeError> {
        Ok(Pipeline::new(self.config.clone())?.with_cancel_flag(self.cancel.clone()))
    }

    pub fn recognizer(&self) -> Arc<dyn TextRecognizer> {
        Arc::new(TesseractRecognizer::new(&self.config.ocr))
    }

    /// `ai.provider` 为 `passthrough` 时不调用模型
    pub fn reconstructor(&self) -> Result<Arc<dyn ProjectReconstructor>, ScribeError> {
        match self.config.ai.provider.as_str() {
            "passthrough" | "none" => Ok(Arc::new(PassthroughReconstructor::default())),
            _ => Ok(Arc::new(LlmReconstructor::new(&self.config.ai)?)),
        }
    }

    /// 抽帧并去重，保留帧写到 `output_dir/frames/`
    pub fn extract_frames(&self, video: &Path, output_dir: &Path) -> Result<FramesDocument, ScribeError> {
        let pipeline = self.pipeline()?;
        let mut report = PipelineReport::default();

        let mut source = open_video(video, &self.config)?;
        let frames = pipeline.sample(&mut source, &mut report)?;
        let frames = pipeline.dedupe_frames(frames, &mut report)?;

        let frames_dir = output_dir.join(FRAMES_DIR);
        let saved = save_frames(&frames, &frames_dir, &mut report)?;

        let document = FramesDocument {
            source: video.to_path_buf(),
            fps: self.config.video.fps,
            sampled_frames: report.sampled_frames,
            frames: saved,
            decisions: report.frame_decisions,
            skipped: report.skipped,
            created_at: Utc::now(),
        };
        document.save(&frames_dir.join(FRAMES_METADATA_FILE))?;

        info!(
            "✅ Kept {} of {} frames in {}",
            document.unique_frames(),
            document.sampled_frames,
            frames_dir.display()
        );
        Ok(document)
    }

    /// 对目录中的帧图像做 OCR
    pub fn recognize_frames(
        &self,
        frames_dir: &Path,
        recognizer: Arc<dyn TextRecognizer>,
    ) -> Result<OcrDocument, ScribeError> {
        let pipeline = self.pipeline()?.with_recognizer(recognizer);
        let mut report = PipelineReport::default();

        let mut source = ImageDirSource::open_limited(frames_dir, self.config.video.fps, self.config.video.max_frames)
            .map_err(|e| PipelineError::new(Stage::Sampling, 0, e))?;
        let frames = pipeline.sample(&mut source, &mut report)?;
        let blocks = pipeline.recognize(&frames, &mut report)?;

        Ok(OcrDocument::new(frames_dir, frames.len(), blocks, report.skipped))
    }

    /// 聚类识别结果，附带相近簇和关键词
    pub fn analyze(&self, ocr: &OcrDocument) -> Result<AnalysisDocument, ScribeError> {
        let pipeline = self.pipeline()?;
        let mut report = PipelineReport::default();
        let clusters = pipeline.cluster(ocr.blocks.clone(), &mut report)?;

        let method = self.config.text_dedup.method;
        let threshold = self.config.text_dedup.threshold;
        let texts: Vec<&str> = clusters.iter().map(|c| c.representative_text.as_str()).collect();

        let engine = SimilarityEngine::with_config(&self.config.similarity);
        let similar_pairs: Vec<SimilarPair> = engine
            .find_similar_pairs(&texts, threshold * NEAR_MISS_RATIO, method)
            .into_iter()
            .map(SimilarPair::from)
            .collect();
        let keywords = extract_keywords(&texts.join("\n"), MAX_KEYWORDS);

        info!(
            "🧠 Analysis: {} blocks → {} clusters, {} near pairs",
            ocr.blocks.len(),
            clusters.len(),
            similar_pairs.len()
        );

        Ok(AnalysisDocument {
            method,
            threshold,
            total_blocks: ocr.blocks.len(),
            clusters,
            dropped: report.dropped_blocks,
            similar_pairs,
            keywords,
            created_at: Utc::now(),
        })
    }

    /// 由分析结果重建项目并写出
    pub fn build(
        &self,
        analysis: &AnalysisDocument,
        output_dir: &Path,
        format: OutputFormat,
        reconstructor: Arc<dyn ProjectReconstructor>,
    ) -> Result<BuildSummary, ScribeError> {
        let name = reconstructor.name();
        let pipeline = self.pipeline()?.with_reconstructor(reconstructor);

        let tree = pipeline.reconstruct(&analysis.clusters)?;
        let outputs = emit(&pipeline, &tree, output_dir, format)?;

        let summary = summarize(&tree, name, output_dir, format, outputs, None);
        summary.save(&output_dir.join(BUILD_SUMMARY_FILE))?;
        info!("🎉 Build finished: {} files", summary.files_generated);
        Ok(summary)
    }

    /// 一条命令从视频到输出
    pub fn run(
        &self,
        video: &Path,
        output_dir: &Path,
        format: OutputFormat,
        recognizer: Arc<dyn TextRecognizer>,
        reconstructor: Arc<dyn ProjectReconstructor>,
    ) -> Result<BuildSummary, ScribeError> {
        let name = reconstructor.name();
        let pipeline = self
            .pipeline()?
            .with_recognizer(recognizer)
            .with_reconstructor(reconstructor);

        let mut source = open_video(video, &self.config)?;
        self.run_source(&pipeline, &mut source, output_dir, format, name)
    }

    fn run_source(
        &self,
        pipeline: &Pipeline,
        source: &mut dyn FrameSource,
        output_dir: &Path,
        format: OutputFormat,
        reconstructor: &str,
    ) -> Result<BuildSummary, ScribeError> {
        let code = FsEmitter::new(output_dir.join(CODE_DIR));
        let docs = MarkdownEmitter::new(output_dir.join(DOCS_FILE));
        let emitters = select_emitters(format, &code, &docs);

        let run = pipeline.run(source, &emitters)?;
        let outputs = run.report.outputs.clone();
        let summary = summarize(&run.tree, reconstructor, output_dir, format, outputs, Some(run.report));
        summary.save(&output_dir.join(BUILD_SUMMARY_FILE))?;
        Ok(summary)
    }
}

impl Drop for VisionScribe {
    fn drop(&mut self) {
        info!("🗑️ VisionScribe: released");
    }
}

fn open_video(video: &Path, config: &VisionConfig) -> Result<FfmpegSource, PipelineError> {
    if !is_tool_available("ffmpeg") {
        return Err(PipelineError::new(
            Stage::Sampling,
            0,
            VisionError::external("ffmpeg", format!("not found; install it or set {}", FFMPEG_ENV)),
        ));
    }
    FfmpegSource::new(video, &config.video).map_err(|e| PipelineError::new(Stage::Sampling, 0, e))
}

fn select_emitters<'a>(
    format: OutputFormat,
    code: &'a FsEmitter,
    docs: &'a MarkdownEmitter,
) -> Vec<&'a dyn OutputEmitter> {
    let mut emitters: Vec<&dyn OutputEmitter> = Vec::new();
    if format.wants_code() {
        emitters.push(code);
    }
    if format.wants_docs() {
        emitters.push(docs);
    }
    emitters
}

fn emit(
    pipeline: &Pipeline,
    tree: &ProjectTree,
    output_dir: &Path,
    format: OutputFormat,
) -> Result<Vec<PathBuf>, ScribeError> {
    let code = FsEmitter::new(output_dir.join(CODE_DIR));
    let docs = MarkdownEmitter::new(output_dir.join(DOCS_FILE));
    Ok(pipeline.emit(tree, &select_emitters(format, &code, &docs))?)
}

fn summarize(
    tree: &ProjectTree,
    reconstructor: &str,
    output_dir: &Path,
    format: OutputFormat,
    outputs: Vec<PathBuf>,
    report: Option<PipelineReport>,
) -> BuildSummary {
    BuildSummary {
        project_name: tree.name.clone(),
        reconstructor: reconstructor.to_string(),
        output_dir: output_dir.to_path_buf(),
        format,
        files_generated: tree.file_count(),
        total_size: tree.root.total_size(),
        outputs,
        report,
        created_at: Utc::now(),
    }
}

/// `frame_0003_000102_500.png`：序号 + 时:分:秒 + 毫秒
pub fn frame_file_name(index: usize, timestamp: f64) -> String {
    let stamp = format_timestamp(timestamp).replace(':', "").replace('.', "_");
    format!("frame_{:04}_{}.png", index, stamp)
}

/// 保留帧按顺序另存，无法解码的帧记录后跳过
fn save_frames(
    frames: &[Frame],
    frames_dir: &Path,
    report: &mut PipelineReport,
) -> Result<Vec<FrameInfo>, ScribeError> {
    fs::create_dir_all(frames_dir).map_err(VisionError::from)?;
    let mut saved = Vec::with_capacity(frames.len());

    for frame in frames {
        let image = match frame.image.load() {
            Ok(image) => image,
            Err(e) => {
                warn!("⚠️ Not saving frame {}: {}", frame.id, e);
                report.skipped.push(SkippedItem {
                    stage: Stage::FrameDedup,
                    item: format!("frame {}", frame.id),
                    reason: e.to_string(),
                });
                continue;
            }
        };

        let path = frames_dir.join(frame_file_name(saved.len(), frame.timestamp));
        image.save(&path).map_err(VisionError::from)?;
        let stored = Frame::new(saved.len() as u64, frame.timestamp, ImageHandle::Path(path), frame.size);
        saved.push(stored.info());
    }
    Ok(saved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::text::{BBox, MockTextRecognizer, RecognizedText};
    use crate::core::video::{parse_frame_timestamp, VecFrameSource};
    use image::{DynamicImage, GrayImage, Luma};

    fn config() -> VisionConfig {
        let mut config = VisionConfig::default();
        config.ai.provider = "passthrough".to_string();
        config.pipeline.workers = 2;
        config
    }

    fn stripes(value: u8) -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_fn(32, 32, |x, _| {
            if (x / 4) % 2 == 0 {
                Luma([value])
            } else {
                Luma([255 - value])
            }
        }))
    }

    fn write_frames(dir: &Path) {
        fs::create_dir_all(dir).expect("mkdir");
        stripes(0).save(dir.join(frame_file_name(0, 0.0))).expect("frame 0");
        stripes(0).save(dir.join(frame_file_name(1, 1.0))).expect("frame 1");
        stripes(200).save(dir.join(frame_file_name(2, 2.5))).expect("frame 2");
    }

    /// 按帧左上角灰度返回文字
    fn recognizer() -> Arc<dyn TextRecognizer> {
        Arc::new(MockTextRecognizer::with_script(|image| {
            let value = image.load()?.to_luma8().get_pixel(0, 0).0[0];
            let text = if value == 0 { "def foo():" } else { "def bar():" };
            Ok(vec![RecognizedText::new(text, 0.9, BBox::new(0.0, 0.0, 50.0, 10.0), "en")])
        }))
    }

    #[test]
    fn test_frame_file_name_round_trips_timestamp() {
        let name = frame_file_name(3, 62.5);
        assert_eq!(name, "frame_0003_000102_500.png");
        assert_eq!(parse_frame_timestamp(&name), Some(62.5));
    }

    #[test]
    fn test_error_conversion_keeps_stage() {
        let err: ScribeError =
            PipelineError::new(Stage::Recognition, 4, VisionError::external("tesseract", "exit 1")).into();
        assert_eq!(err.error_type, "ExternalCollaborator");
        assert_eq!(err.stage, Some(Stage::Recognition));
        assert!(err.message.contains("4 item(s)"));

        let err: ScribeError = VisionError::invalid_config("fps").into();
        assert_eq!(err.error_type, "InvalidConfiguration");
        assert_eq!(err.stage, None);
    }

    #[test]
    fn test_create_rejects_invalid_config() {
        let mut config = config();
        config.video.fps = 0.0;
        assert!(VisionScribe::create(config).is_err());
    }

    #[test]
    fn test_passthrough_provider_needs_no_api_key() {
        let scribe = VisionScribe::create(config()).expect("scribe");
        assert_eq!(scribe.reconstructor().expect("reconstructor").name(), "passthrough");
    }

    #[test]
    fn test_staged_commands_end_to_end() {
        let dir = tempfile::tempdir().expect("tempdir");
        let frames_dir = dir.path().join(FRAMES_DIR);
        write_frames(&frames_dir);

        let scribe = VisionScribe::create(config()).expect("scribe");
        let ocr = scribe.recognize_frames(&frames_dir, recognizer()).expect("ocr");
        assert_eq!(ocr.total_frames, 3);
        assert_eq!(ocr.blocks.len(), 3);
        assert_eq!(ocr.blocks[2].source_timestamps, vec![2.5]);

        let analysis = scribe.analyze(&ocr).expect("analyze");
        assert_eq!(analysis.clusters.len(), 2);
        assert_eq!(analysis.clusters[0].merged_source_timestamps, vec![0.0, 1.0]);
        assert!(analysis.keywords.contains(&"foo".to_string()));

        let out = dir.path().join("out");
        let summary = scribe
            .build(&analysis, &out, OutputFormat::Both, scribe.reconstructor().expect("passthrough"))
            .expect("build");
        assert_eq!(summary.files_generated, 2);
        assert_eq!(summary.outputs.len(), 2);
        assert!(out.join(CODE_DIR).join("src/snippet_001.py").is_file());
        assert!(out.join(DOCS_FILE).is_file());

        let reloaded = BuildSummary::load(&out.join(BUILD_SUMMARY_FILE)).expect("summary");
        assert_eq!(reloaded.reconstructor, "passthrough");
    }

    #[test]
    fn test_run_source_writes_summary_with_report() {
        let dir = tempfile::tempdir().expect("tempdir");
        let scribe = VisionScribe::create(config()).expect("scribe");
        let pipeline = scribe
            .pipeline()
            .expect("pipeline")
            .with_recognizer(recognizer())
            .with_reconstructor(Arc::new(PassthroughReconstructor::default()));

        let mut source = VecFrameSource::new(vec![
            Frame::from_image(0, 0.0, stripes(0)),
            Frame::from_image(1, 1.0, stripes(0)),
            Frame::from_image(2, 2.0, stripes(200)),
        ]);
        let summary = scribe
            .run_source(&pipeline, &mut source, dir.path(), OutputFormat::Code, "passthrough")
            .expect("run");

        let report = summary.report.expect("report");
        assert_eq!(report.sampled_frames, 3);
        assert_eq!(report.retained_frames, 2);
        assert_eq!(summary.outputs, vec![dir.path().join(CODE_DIR).join("src")]);
        assert!(!dir.path().join(DOCS_FILE).exists());
    }

    #[test]
    fn test_save_frames_uses_sequential_names() {
        let dir = tempfile::tempdir().expect("tempdir");
        let frames = vec![Frame::from_image(7, 0.0, stripes(0)), Frame::from_image(9, 3.25, stripes(200))];
        let mut report = PipelineReport::default();
        let saved = save_frames(&frames, dir.path(), &mut report).expect("save");

        assert_eq!(saved.len(), 2);
        assert_eq!(saved[1].frame_id, 1);
        assert_eq!(saved[1].time_format, "00:00:03.250");
        assert!(dir.path().join("frame_0001_000003_250.png").is_file());
        assert!(report.skipped.is_empty());
    }
}
