use image::GrayImage;
use log::debug;

use super::frame::Frame;
use crate::core::error::Result;

/// 拉普拉斯方差，越大越清晰
pub fn laplacian_variance(gray: &GrayImage) -> f64 {
    let (width, height) = gray.dimensions();
    let w = width as usize;
    let h = height as usize;
    if w < 3 || h < 3 {
        return 0.0;
    }

    let data = gray.as_raw();
    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    let mut count = 0usize;

    for y in 1..(h - 1) {
        for x in 1..(w - 1) {
            let idx = y * w + x;
            // 4 邻域拉普拉斯核
            let lap = data[idx - w] as i32 + data[idx + w] as i32 + data[idx - 1] as i32
                + data[idx + 1] as i32
                - 4 * data[idx] as i32;
            let v = lap as f64;
            sum += v;
            sum_sq += v * v;
            count += 1;
        }
    }

    let mean = sum / count as f64;
    (sum_sq / count as f64 - mean * mean).max(0.0)
}

/// 模糊帧过滤器
pub struct BlurFilter {
    threshold: f64,
}

impl BlurFilter {
    pub fn with_threshold(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn is_blurry(&self, gray: &GrayImage) -> bool {
        laplacian_variance(gray) < self.threshold
    }

    /// 加载帧并判断是否清晰
    pub fn is_sharp(&self, frame: &Frame) -> Result<bool> {
        let gray = frame.image.load()?.to_luma8();
        let variance = laplacian_variance(&gray);
        let sharp = variance >= self.threshold;
        if !sharp {
            debug!(
                "frame {} blurry (variance {:.1} < {:.1})",
                frame.id, variance, self.threshold
            );
        }
        Ok(sharp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Luma};

    fn checkerboard(size: u32) -> GrayImage {
        GrayImage::from_fn(size, size, |x, y| {
            if (x + y) % 2 == 0 {
                Luma([0])
            } else {
                Luma([255])
            }
        })
    }

    #[test]
    fn test_flat_image_has_zero_variance() {
        let flat = GrayImage::from_pixel(32, 32, Luma([128]));
        assert_eq!(laplacian_variance(&flat), 0.0);
        assert!(BlurFilter::with_threshold(100.0).is_blurry(&flat));
    }

    #[test]
    fn test_sharp_edges_have_high_variance() {
        let board = checkerboard(32);
        assert!(laplacian_variance(&board) > 1000.0);
        assert!(!BlurFilter::with_threshold(100.0).is_blurry(&board));
    }

    #[test]
    fn test_tiny_image() {
        let tiny = GrayImage::from_pixel(2, 2, Luma([0]));
        assert_eq!(laplacian_variance(&tiny), 0.0);
    }

    #[test]
    fn test_is_sharp_on_frame() {
        let frame = Frame::from_image(0, 0.0, DynamicImage::ImageLuma8(checkerboard(16)));
        assert!(BlurFilter::with_threshold(100.0).is_sharp(&frame).expect("in-memory frame"));
    }
}
