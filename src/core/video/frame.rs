use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::DynamicImage;
use serde::{Deserialize, Serialize};

use crate::core::error::{Result, VisionError};

/// 帧图像句柄：磁盘路径或已解码的内存图像
#[derive(Clone)]
pub enum ImageHandle {
    Path(PathBuf),
    Memory(Arc<DynamicImage>),
}

impl ImageHandle {
    pub fn from_image(image: DynamicImage) -> Self {
        ImageHandle::Memory(Arc::new(image))
    }

    /// 加载图像（路径句柄在这里跨越 I/O 边界）
    pub fn load(&self) -> Result<DynamicImage> {
        match self {
            ImageHandle::Path(path) => {
                image::open(path).map_err(|e| VisionError::unreadable(path.display(), e))
            }
            ImageHandle::Memory(image) => Ok(image.as_ref().clone()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            ImageHandle::Path(path) => Some(path),
            ImageHandle::Memory(_) => None,
        }
    }
}

impl fmt::Debug for ImageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageHandle::Path(path) => f.debug_tuple("Path").field(path).finish(),
            ImageHandle::Memory(image) => f
                .debug_tuple("Memory")
                .field(&format_args!("{}x{}", image.width(), image.height()))
                .finish(),
        }
    }
}

/// 帧数据结构，创建后不再修改
#[derive(Debug, Clone)]
pub struct Frame {
    pub id: u64,
    /// 视频内时间（秒）
    pub timestamp: f64,
    pub image: ImageHandle,
    pub size: (u32, u32),
}

impl Frame {
    pub fn new(id: u64, timestamp: f64, image: ImageHandle, size: (u32, u32)) -> Self {
        Self {
            id,
            timestamp,
            image,
            size,
        }
    }

    pub fn from_image(id: u64, timestamp: f64, image: DynamicImage) -> Self {
        let size = (image.width(), image.height());
        Self::new(id, timestamp, ImageHandle::from_image(image), size)
    }

    pub fn pixel_count(&self) -> usize {
        (self.size.0 as usize) * (self.size.1 as usize)
    }

    pub fn info(&self) -> FrameInfo {
        FrameInfo::from_frame(self)
    }
}

/// 帧元数据（轻量级，用于序列化）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameInfo {
    pub frame_id: u64,
    pub file_path: Option<PathBuf>,
    pub timestamp: f64,
    pub time_format: String,
    pub size: (u32, u32),
}

impl FrameInfo {
    pub fn from_frame(frame: &Frame) -> Self {
        Self {
            frame_id: frame.id,
            file_path: frame.image.path().map(Path::to_path_buf),
            timestamp: frame.timestamp,
            time_format: format_timestamp(frame.timestamp),
            size: frame.size,
        }
    }
}

/// 秒 → `HH:MM:SS.mmm`
pub fn format_timestamp(seconds: f64) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms % 3_600_000) / 60_000;
    let secs = (total_ms % 60_000) / 1000;
    let millis = total_ms % 1000;
    format!("{:02}:{:02}:{:02}.{:03}", hours, minutes, secs, millis)
}
