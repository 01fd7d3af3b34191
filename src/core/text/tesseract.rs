//! tesseract 命令行适配，输出 TSV 按行聚合

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Command;

use log::debug;

use super::block::BBox;
use super::recognizer::{RecognizedText, TextRecognizer};
use crate::core::config::OcrConfig;
use crate::core::error::{Result, VisionError};
use crate::core::video::tools::tesseract_path;
use crate::core::video::ImageHandle;

const WORD_LEVEL: u32 = 5;

/// 返回全部识别行；置信度下限由流水线统一过滤
pub struct TesseractRecognizer {
    languages: Vec<String>,
}

impl TesseractRecognizer {
    pub fn new(config: &OcrConfig) -> Self {
        Self {
            languages: config.languages.clone(),
        }
    }

    fn run(&self, path: &Path) -> Result<String> {
        let output = Command::new(tesseract_path())
            .arg(path)
            .arg("stdout")
            .args(["-l", &self.languages.join("+")])
            .arg("tsv")
            .output()
            .map_err(|e| VisionError::external("tesseract", format!("failed to launch: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(VisionError::external("tesseract", stderr));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn language(&self) -> &str {
        self.languages.first().map(String::as_str).unwrap_or("eng")
    }
}

impl TextRecognizer for TesseractRecognizer {
    fn name(&self) -> &'static str {
        "tesseract"
    }

    fn recognize(&self, image: &ImageHandle) -> Result<Vec<RecognizedText>> {
        let tsv = match image.path() {
            Some(path) => self.run(path)?,
            None => {
                // 内存图像先落盘
                let staged = tempfile::Builder::new().suffix(".png").tempfile()?;
                image.load()?.save_with_format(staged.path(), image::ImageFormat::Png)?;
                self.run(staged.path())?
            }
        };

        let lines = parse_tsv(&tsv, self.language());
        debug!("tesseract recognized {} lines", lines.len());
        Ok(lines)
    }
}

#[derive(Default)]
struct LineAccumulator {
    words: Vec<String>,
    confidence_sum: f64,
    bbox: Option<BBox>,
}

/// 解析 `tesseract ... tsv` 输出：单词按 (page, block, par, line) 归并为行，
/// 行置信度为单词置信度均值（换算到 0-1）
pub fn parse_tsv(tsv: &str, language: &str) -> Vec<RecognizedText> {
    let mut lines: BTreeMap<(u32, u32, u32, u32), LineAccumulator> = BTreeMap::new();

    for row in tsv.lines().skip(1) {
        let cols: Vec<&str> = row.split('\t').collect();
        if cols.len() < 12 {
            continue;
        }
        let num = |i: usize| cols[i].trim().parse::<u32>().ok();
        let (Some(level), Some(page), Some(block), Some(par), Some(line)) =
            (num(0), num(1), num(2), num(3), num(4))
        else {
            continue;
        };
        if level != WORD_LEVEL {
            continue;
        }

        let text = cols[11].trim();
        let conf = cols[10].trim().parse::<f64>().unwrap_or(-1.0);
        if text.is_empty() || conf < 0.0 {
            continue;
        }

        let coord = |i: usize| cols[i].trim().parse::<f64>().unwrap_or(0.0);
        let (left, top, width, height) = (coord(6), coord(7), coord(8), coord(9));
        let word_box = BBox::new(left, top, left + width, top + height);

        let acc = lines.entry((page, block, par, line)).or_default();
        acc.words.push(text.to_string());
        acc.confidence_sum += conf;
        acc.bbox = Some(match acc.bbox {
            Some(b) => b.union(&word_box),
            None => word_box,
        });
    }

    lines
        .into_values()
        .filter(|acc| !acc.words.is_empty())
        .map(|acc| {
            let confidence = (acc.confidence_sum / acc.words.len() as f64 / 100.0).clamp(0.0, 1.0);
            RecognizedText::new(
                acc.words.join(" "),
                confidence,
                acc.bbox.unwrap_or_default(),
                language,
            )
        })
        .collect()
}
