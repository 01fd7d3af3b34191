//! 帧来源：按时间顺序惰性产出有限帧序列

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use log::{debug, error, info};
use once_cell::sync::Lazy;
use regex::Regex;
use tempfile::TempDir;

use super::frame::{Frame, ImageHandle};
use super::tools::ffmpeg_path;
use crate::core::config::VideoConfig;
use crate::core::error::{Result, VisionError};

/// `frame_0001_000102_500.png` → 第 1 帧，00:01:02.500
static FRAME_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"frame_(\d+)_(\d{2})(\d{2})(\d{2})_(\d{3})").expect("static regex")
});

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp"];

pub trait FrameSource {
    /// 下一帧；`Ok(None)` 表示结束。单帧读取失败后仍可继续调用。
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// 帧总数（已知时）
    fn len_hint(&self) -> Option<usize> {
        None
    }

    fn collect_frames(&mut self) -> Result<Vec<Frame>> {
        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame()? {
            frames.push(frame);
        }
        Ok(frames)
    }
}

/// 内存帧来源（测试与上层已解码的帧）
pub struct VecFrameSource {
    frames: std::vec::IntoIter<Frame>,
    total: usize,
}

impl VecFrameSource {
    pub fn new(frames: Vec<Frame>) -> Self {
        let total = frames.len();
        Self {
            frames: frames.into_iter(),
            total,
        }
    }
}

impl FrameSource for VecFrameSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        Ok(self.frames.next())
    }

    fn len_hint(&self) -> Option<usize> {
        Some(self.total)
    }
}

/// 从文件名解析时间戳（秒）
pub fn parse_frame_timestamp(file_name: &str) -> Option<f64> {
    let caps = FRAME_NAME.captures(file_name)?;
    let field = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u64>().ok());
    let hours = field(2)?;
    let minutes = field(3)?;
    let seconds = field(4)?;
    let millis = field(5)?;
    Some((hours * 3600 + minutes * 60 + seconds) as f64 + millis as f64 / 1000.0)
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// 读取目录中已抽取的帧图像
pub struct ImageDirSource {
    entries: Vec<(PathBuf, f64)>,
    cursor: usize,
}

impl ImageDirSource {
    pub fn open(dir: &Path, fps: f64) -> Result<Self> {
        Self::open_limited(dir, fps, None)
    }

    pub fn open_limited(dir: &Path, fps: f64, max_frames: Option<usize>) -> Result<Self> {
        if !dir.is_dir() {
            return Err(VisionError::unreadable(dir.display(), "not a directory"));
        }
        if !fps.is_finite() || fps <= 0.0 {
            return Err(VisionError::invalid_config(format!("fps must be positive, got {}", fps)));
        }

        let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && is_image_file(p))
            .collect();
        paths.sort();

        // 无法从文件名解析时按 序号 / fps 推算
        let mut entries: Vec<(PathBuf, f64)> = paths
            .into_iter()
            .enumerate()
            .map(|(index, path)| {
                let timestamp = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .and_then(parse_frame_timestamp)
                    .unwrap_or(index as f64 / fps);
                (path, timestamp)
            })
            .collect();
        entries.sort_by(|a, b| a.1.total_cmp(&b.1));

        if let Some(max) = max_frames {
            entries.truncate(max);
        }

        info!("📂 Found {} frame images in {}", entries.len(), dir.display());
        Ok(Self { entries, cursor: 0 })
    }
}

impl FrameSource for ImageDirSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some((path, timestamp)) = self.entries.get(self.cursor).cloned() else {
            return Ok(None);
        };
        let id = self.cursor as u64;
        self.cursor += 1;

        let size = image::image_dimensions(&path)
            .map_err(|e| VisionError::unreadable(path.display(), e))?;
        debug!("frame {} @ {:.3}s ← {}", id, timestamp, path.display());
        Ok(Some(Frame::new(id, timestamp, ImageHandle::Path(path), size)))
    }

    fn len_hint(&self) -> Option<usize> {
        Some(self.entries.len())
    }
}

/// 调用 ffmpeg 按固定帧率抽帧，再按目录读取
pub struct FfmpegSource {
    inner: ImageDirSource,
    frames_dir: PathBuf,
    // 未指定输出目录时抽帧结果放在临时目录，随来源一起释放
    _workspace: Option<TempDir>,
}

impl FfmpegSource {
    pub fn new(video: &Path, config: &VideoConfig) -> Result<Self> {
        let workspace = tempfile::Builder::new().prefix("visionscribe-frames").tempdir()?;
        let dir = workspace.path().to_path_buf();
        let mut source = Self::extract_into(video, &dir, config)?;
        source._workspace = Some(workspace);
        Ok(source)
    }

    /// 抽帧到指定目录（保留在磁盘上）
    pub fn extract_into(video: &Path, out_dir: &Path, config: &VideoConfig) -> Result<Self> {
        if !video.is_file() {
            return Err(VisionError::unreadable(video.display(), "video file not found"));
        }
        fs::create_dir_all(out_dir)?;

        let pattern = out_dir.join("frame_%06d.png");
        let mut cmd = Command::new(ffmpeg_path());
        cmd.args(["-hide_banner", "-loglevel", "error", "-y", "-i"])
            .arg(video)
            .args(["-vf", &format!("fps={}", config.fps)]);
        if let Some(max) = config.max_frames {
            cmd.args(["-frames:v", &max.to_string()]);
        }
        cmd.arg(&pattern);

        info!("🎬 Extracting frames from {} at {} fps", video.display(), config.fps);
        let output = cmd
            .output()
            .map_err(|e| VisionError::external("ffmpeg", format!("failed to launch: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            error!("❌ ffmpeg failed: {}", stderr);
            return Err(VisionError::external("ffmpeg", stderr));
        }

        let inner = ImageDirSource::open_limited(out_dir, config.fps, config.max_frames)?;
        Ok(Self {
            inner,
            frames_dir: out_dir.to_path_buf(),
            _workspace: None,
        })
    }

    pub fn frames_dir(&self) -> &Path {
        &self.frames_dir
    }
}

impl FrameSource for FfmpegSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        self.inner.next_frame()
    }

    fn len_hint(&self) -> Option<usize> {
        self.inner.len_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    fn write_png(dir: &Path, name: &str) {
        GrayImage::from_pixel(8, 6, Luma([100]))
            .save(dir.join(name))
            .expect("write png");
    }

    #[test]
    fn test_parse_frame_timestamp() {
        assert_eq!(parse_frame_timestamp("frame_0001_000102_500.png"), Some(62.5));
        assert_eq!(parse_frame_timestamp("frame_0002_010000_000.jpg"), Some(3600.0));
        assert_eq!(parse_frame_timestamp("frame_000003.png"), None);
    }

    #[test]
    fn test_image_dir_with_named_timestamps() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_png(dir.path(), "frame_0002_000005_000.png");
        write_png(dir.path(), "frame_0001_000001_250.png");
        fs::write(dir.path().join("notes.txt"), "ignored").expect("write");

        let mut source = ImageDirSource::open(dir.path(), 1.0).expect("open");
        assert_eq!(source.len_hint(), Some(2));

        let frames = source.collect_frames().expect("frames");
        let timestamps: Vec<f64> = frames.iter().map(|f| f.timestamp).collect();
        assert_eq!(timestamps, vec![1.25, 5.0]);
        assert_eq!(frames[0].size, (8, 6));
        assert_eq!(frames[1].id, 1);
    }

    #[test]
    fn test_image_dir_falls_back_to_fps() {
        let dir = tempfile::tempdir().expect("tempdir");
        for i in 1..=3 {
            write_png(dir.path(), &format!("frame_{:06}.png", i));
        }

        let frames = ImageDirSource::open(dir.path(), 2.0)
            .expect("open")
            .collect_frames()
            .expect("frames");
        let timestamps: Vec<f64> = frames.iter().map(|f| f.timestamp).collect();
        assert_eq!(timestamps, vec![0.0, 0.5, 1.0]);
    }

    #[test]
    fn test_max_frames_limit() {
        let dir = tempfile::tempdir().expect("tempdir");
        for i in 0..5 {
            write_png(dir.path(), &format!("frame_{:06}.png", i));
        }
        let source = ImageDirSource::open_limited(dir.path(), 1.0, Some(2)).expect("open");
        assert_eq!(source.len_hint(), Some(2));
    }

    #[test]
    fn test_corrupt_image_is_item_level_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("frame_000001.png"), b"not a png").expect("write");
        write_png(dir.path(), "frame_000002.png");

        let mut source = ImageDirSource::open(dir.path(), 1.0).expect("open");
        let err = source.next_frame().unwrap_err();
        assert!(err.is_item_level());
        // 出错后继续读取下一帧
        let next = source.next_frame().expect("second frame").expect("some");
        assert_eq!(next.id, 1);
        assert!(source.next_frame().expect("end").is_none());
    }

    #[test]
    fn test_missing_dir_and_video() {
        assert!(ImageDirSource::open(Path::new("/nonexistent/frames"), 1.0).is_err());
        let err = FfmpegSource::new(Path::new("/nonexistent/video.mp4"), &VideoConfig::default())
            .err()
            .expect("missing video");
        assert!(matches!(err, VisionError::UnreadableInput { .. }));
    }

    #[test]
    fn test_vec_source() {
        let frame = Frame::from_image(0, 0.0, image::DynamicImage::ImageLuma8(GrayImage::new(2, 2)));
        let mut source = VecFrameSource::new(vec![frame]);
        assert_eq!(source.len_hint(), Some(1));
        assert!(source.next_frame().expect("ok").is_some());
        assert!(source.next_frame().expect("ok").is_none());
    }
}
