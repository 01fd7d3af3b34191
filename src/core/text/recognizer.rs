use serde::{Deserialize, Serialize};

use super::block::{BBox, TextBlock};
use crate::core::error::Result;
use crate::core::video::ImageHandle;

/// 识别器返回的一个文字区域
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognizedText {
    pub text: String,
    pub confidence: f64,
    pub bbox: BBox,
    pub language: String,
}

impl RecognizedText {
    pub fn new(text: impl Into<String>, confidence: f64, bbox: BBox, language: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            confidence,
            bbox,
            language: language.into(),
        }
    }

    /// 绑定帧时间戳，成为聚类输入
    pub fn into_block(self, timestamp: f64) -> TextBlock {
        TextBlock::new(self.text, self.confidence, self.bbox, timestamp).with_language(self.language)
    }
}

/// OCR 引擎接口，每次调用相互独立，一帧失败不影响其他帧
pub trait TextRecognizer: Send + Sync {
    fn name(&self) -> &'static str;

    fn recognize(&self, image: &ImageHandle) -> Result<Vec<RecognizedText>>;
}

type Script = Box<dyn Fn(&ImageHandle) -> Result<Vec<RecognizedText>> + Send + Sync>;

/// 按脚本返回识别结果（测试用）
pub struct MockTextRecognizer {
    script: Option<Script>,
}

impl MockTextRecognizer {
    /// 任何图像都识别不到文字
    pub fn new() -> Self {
        Self { script: None }
    }

    pub fn with_script<F>(script: F) -> Self
    where
        F: Fn(&ImageHandle) -> Result<Vec<RecognizedText>> + Send + Sync + 'static,
    {
        Self {
            script: Some(Box::new(script)),
        }
    }

    /// 每张图像都返回同一组结果
    pub fn with_fixed(regions: Vec<RecognizedText>) -> Self {
        Self::with_script(move |_| Ok(regions.clone()))
    }
}

impl Default for MockTextRecognizer {
    fn default() -> Self {
        Self::new()
    }
}

impl TextRecognizer for MockTextRecognizer {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn recognize(&self, image: &ImageHandle) -> Result<Vec<RecognizedText>> {
        match &self.script {
            Some(script) => script(image),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::VisionError;
    use image::{DynamicImage, GrayImage};

    fn handle() -> ImageHandle {
        ImageHandle::from_image(DynamicImage::ImageLuma8(GrayImage::new(4, 4)))
    }

    #[test]
    fn test_default_mock_finds_nothing() {
        let recognizer = MockTextRecognizer::default();
        assert!(recognizer.recognize(&handle()).expect("ok").is_empty());
    }

    #[test]
    fn test_fixed_and_scripted() {
        let region = RecognizedText::new("x = 1", 0.9, BBox::default(), "en");
        let fixed = MockTextRecognizer::with_fixed(vec![region.clone()]);
        assert_eq!(fixed.recognize(&handle()).expect("ok"), vec![region]);

        let failing = MockTextRecognizer::with_script(|_| Err(VisionError::external("mock", "boom")));
        assert!(failing.recognize(&handle()).is_err());
    }

    #[test]
    fn test_into_block_carries_timestamp() {
        let block = RecognizedText::new("let y", 0.7, BBox::new(1.0, 1.0, 2.0, 2.0), "rust").into_block(9.5);
        assert_eq!(block.source_timestamps, vec![9.5]);
        assert_eq!(block.language, "rust");
        assert_eq!(block.confidence, 0.7);
    }
}
