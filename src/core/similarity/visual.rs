//! 图像相似度：SSIM 与 DCT 感知哈希

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage};
use rustdct::{Dct2, DctPlanner};

const SSIM_WINDOW: u32 = 7;
const SSIM_C1: f64 = (0.01 * 255.0) * (0.01 * 255.0);
const SSIM_C2: f64 = (0.03 * 255.0) * (0.03 * 255.0);
const PHASH_INPUT: usize = 32;
const PHASH_LOW_FREQ: usize = 8;

/// 预处理后的图像特征，去重时每帧只解码一次
#[derive(Debug, Clone)]
pub struct ImageSignature {
    gray: GrayImage,
    phash: u64,
}

impl ImageSignature {
    /// `working_size` 限制最长边（0 表示不缩放）
    pub fn from_image(image: &DynamicImage, working_size: u32) -> Self {
        let mut gray = image.to_luma8();
        let (w, h) = gray.dimensions();
        let longest = w.max(h);
        if working_size > 0 && longest > working_size {
            let scale = working_size as f64 / longest as f64;
            let tw = ((w as f64 * scale).round() as u32).max(1);
            let th = ((h as f64 * scale).round() as u32).max(1);
            gray = imageops::resize(&gray, tw, th, FilterType::Triangle);
        }
        let phash = perceptual_hash(&gray);
        Self { gray, phash }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.gray.dimensions()
    }

    pub fn phash(&self) -> u64 {
        self.phash
    }

    pub fn gray(&self) -> &GrayImage {
        &self.gray
    }
}

pub fn hamming_distance(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

pub fn phash_similarity(a: &ImageSignature, b: &ImageSignature) -> f64 {
    1.0 - hamming_distance(a.phash, b.phash) as f64 / 64.0
}

/// 32x32 灰度 → 二维 DCT-II → 取左上 8x8 低频，按中位数二值化
pub fn perceptual_hash(gray: &GrayImage) -> u64 {
    let small = imageops::resize(gray, PHASH_INPUT as u32, PHASH_INPUT as u32, FilterType::Triangle);
    let mut matrix: Vec<f32> = small.pixels().map(|p| p.0[0] as f32).collect();

    let mut planner = DctPlanner::new();
    let dct = planner.plan_dct2(PHASH_INPUT);

    for row in matrix.chunks_exact_mut(PHASH_INPUT) {
        dct.process_dct2(row);
    }
    let mut column = vec![0f32; PHASH_INPUT];
    for x in 0..PHASH_INPUT {
        for y in 0..PHASH_INPUT {
            column[y] = matrix[y * PHASH_INPUT + x];
        }
        dct.process_dct2(&mut column);
        for y in 0..PHASH_INPUT {
            matrix[y * PHASH_INPUT + x] = column[y];
        }
    }

    let mut low = Vec::with_capacity(PHASH_LOW_FREQ * PHASH_LOW_FREQ);
    for y in 0..PHASH_LOW_FREQ {
        for x in 0..PHASH_LOW_FREQ {
            low.push(matrix[y * PHASH_INPUT + x]);
        }
    }

    // 直流分量不参与中位数
    let mut sorted: Vec<f32> = low[1..].to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let median = sorted[sorted.len() / 2];

    let mut hash = 0u64;
    for (i, &val) in low.iter().enumerate() {
        if val > median {
            hash |= 1 << i;
        }
    }
    hash
}

/// 像素更多的一方缩放到另一方尺寸，保证 ssim(a, b) == ssim(b, a)
pub fn ssim(a: &ImageSignature, b: &ImageSignature) -> f64 {
    let (da, db) = (a.dimensions(), b.dimensions());
    if da == db {
        return ssim_gray(&a.gray, &b.gray);
    }

    let a_larger = (da.0 as u64 * da.1 as u64, da) > (db.0 as u64 * db.1 as u64, db);
    let (large, small) = if a_larger { (a, b) } else { (b, a) };
    let (sw, sh) = small.dimensions();
    let resized = imageops::resize(&large.gray, sw, sh, FilterType::Triangle);
    ssim_gray(&resized, &small.gray)
}

/// 7x7 均匀窗口的平均 SSIM，使用积分图，结果截断到 [0, 1]
pub fn ssim_gray(x: &GrayImage, y: &GrayImage) -> f64 {
    let (w, h) = x.dimensions();
    debug_assert_eq!((w, h), y.dimensions());
    if w == 0 || h == 0 {
        return 0.0;
    }

    let win = SSIM_WINDOW.min(w).min(h) as usize;
    let (w, h) = (w as usize, h as usize);
    let xs: Vec<f64> = x.as_raw().iter().map(|&v| v as f64).collect();
    let ys: Vec<f64> = y.as_raw().iter().map(|&v| v as f64).collect();

    let sx = integral(&xs, w, h);
    let sy = integral(&ys, w, h);
    let sxx = integral_pair(&xs, &xs, w, h);
    let syy = integral_pair(&ys, &ys, w, h);
    let sxy = integral_pair(&xs, &ys, w, h);

    let n = (win * win) as f64;
    let mut total = 0.0;
    let mut count = 0usize;

    for top in 0..=(h - win) {
        for left in 0..=(w - win) {
            let mx = window_sum(&sx, w, left, top, win) / n;
            let my = window_sum(&sy, w, left, top, win) / n;
            let vx = (window_sum(&sxx, w, left, top, win) / n - mx * mx).max(0.0);
            let vy = (window_sum(&syy, w, left, top, win) / n - my * my).max(0.0);
            let cov = window_sum(&sxy, w, left, top, win) / n - mx * my;

            let numerator = (2.0 * mx * my + SSIM_C1) * (2.0 * cov + SSIM_C2);
            let denominator = (mx * mx + my * my + SSIM_C1) * (vx + vy + SSIM_C2);
            total += numerator / denominator;
            count += 1;
        }
    }

    (total / count as f64).clamp(0.0, 1.0)
}

fn integral(values: &[f64], w: usize, h: usize) -> Vec<f64> {
    let stride = w + 1;
    let mut table = vec![0.0; stride * (h + 1)];
    for row in 0..h {
        let mut running = 0.0;
        for col in 0..w {
            running += values[row * w + col];
            table[(row + 1) * stride + col + 1] = table[row * stride + col + 1] + running;
        }
    }
    table
}

fn integral_pair(a: &[f64], b: &[f64], w: usize, h: usize) -> Vec<f64> {
    let stride = w + 1;
    let mut table = vec![0.0; stride * (h + 1)];
    for row in 0..h {
        let mut running = 0.0;
        for col in 0..w {
            let idx = row * w + col;
            running += a[idx] * b[idx];
            table[(row + 1) * stride + col + 1] = table[row * stride + col + 1] + running;
        }
    }
    table
}

fn window_sum(table: &[f64], w: usize, left: usize, top: usize, win: usize) -> f64 {
    let stride = w + 1;
    let (x0, y0, x1, y1) = (left, top, left + win, top + win);
    table[y1 * stride + x1] - table[y0 * stride + x1] - table[y1 * stride + x0] + table[y0 * stride + x0]
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, RgbaImage};

    fn uniform(width: u32, height: u32, fill: u8) -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(width, height, image::Rgba([fill, fill, fill, 255])))
    }

    fn stripes(width: u32, height: u32, period: u32) -> DynamicImage {
        let gray = GrayImage::from_fn(width, height, |x, _| {
            if (x / period) % 2 == 0 {
                Luma([255])
            } else {
                Luma([0])
            }
        });
        DynamicImage::ImageLuma8(gray)
    }

    #[test]
    fn test_ssim_identical_is_one() {
        let a = ImageSignature::from_image(&stripes(64, 48, 4), 0);
        let b = ImageSignature::from_image(&stripes(64, 48, 4), 0);
        assert!((ssim(&a, &b) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_ssim_black_vs_white_is_near_zero() {
        let a = ImageSignature::from_image(&uniform(32, 32, 0), 0);
        let b = ImageSignature::from_image(&uniform(32, 32, 255), 0);
        assert!(ssim(&a, &b) < 0.01);
    }

    #[test]
    fn test_ssim_symmetric_across_sizes() {
        let a = ImageSignature::from_image(&stripes(80, 60, 5), 0);
        let b = ImageSignature::from_image(&stripes(40, 30, 3), 0);
        assert_eq!(ssim(&a, &b), ssim(&b, &a));
    }

    #[test]
    fn test_working_size_downscales_longest_side() {
        let sig = ImageSignature::from_image(&uniform(400, 200, 10), 100);
        assert_eq!(sig.dimensions(), (100, 50));
    }

    #[test]
    fn test_phash_identical_and_inverted() {
        let a = ImageSignature::from_image(&stripes(64, 64, 32), 0);
        let b = ImageSignature::from_image(&stripes(64, 64, 32), 0);
        assert_eq!(phash_similarity(&a, &b), 1.0);

        let mut inverted = stripes(64, 64, 32);
        inverted.invert();
        let c = ImageSignature::from_image(&inverted, 0);
        assert!(phash_similarity(&a, &c) < 1.0);
    }

    #[test]
    fn test_hamming_distance() {
        assert_eq!(hamming_distance(0b0, 0b0), 0);
        assert_eq!(hamming_distance(0b1111, 0b0000), 4);
    }
}
