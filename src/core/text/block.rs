use serde::{Deserialize, Deserializer, Serialize};

/// 文字区域外接框 `(x1, y1, x2, y2)`，序列化为四元数组
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct BBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BBox {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f64 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f64 {
        (self.y2 - self.y1).max(0.0)
    }

    /// 两个框的最小外接框
    pub fn union(&self, other: &BBox) -> BBox {
        BBox {
            x1: self.x1.min(other.x1),
            y1: self.y1.min(other.y1),
            x2: self.x2.max(other.x2),
            y2: self.y2.max(other.y2),
        }
    }
}

impl From<[f64; 4]> for BBox {
    fn from(v: [f64; 4]) -> Self {
        BBox::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BBox> for [f64; 4] {
    fn from(b: BBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

/// 一次 OCR 读到的文字块
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBlock {
    pub text: String,
    pub confidence: f64,
    pub bbox: BBox,
    /// 升序、去重
    #[serde(deserialize_with = "deserialize_timestamps")]
    pub source_timestamps: Vec<f64>,
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_language() -> String {
    "en".to_string()
}

/// 读回时重新排序去重，丢掉非有限值
fn deserialize_timestamps<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f64>, D::Error> {
    let raw = Vec::<f64>::deserialize(deserializer)?;
    let mut merged = Vec::with_capacity(raw.len());
    merge_timestamps(&mut merged, &raw);
    Ok(merged)
}

impl TextBlock {
    pub fn new(text: impl Into<String>, confidence: f64, bbox: BBox, timestamp: f64) -> Self {
        let mut source_timestamps = Vec::with_capacity(1);
        merge_timestamps(&mut source_timestamps, &[timestamp]);
        Self {
            text: text.into(),
            confidence,
            bbox,
            source_timestamps,
            language: default_language(),
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_timestamps(mut self, timestamps: &[f64]) -> Self {
        self.source_timestamps.clear();
        merge_timestamps(&mut self.source_timestamps, timestamps);
        self
    }

    /// 最早出现时间；没有时间戳的块排在最后
    pub fn earliest_timestamp(&self) -> f64 {
        self.source_timestamps
            .iter()
            .copied()
            .fold(f64::INFINITY, f64::min)
    }
}

/// 把 `incoming` 合并进已排序的 `merged`，结果升序且无重复
pub fn merge_timestamps(merged: &mut Vec<f64>, incoming: &[f64]) {
    merged.extend(incoming.iter().copied().filter(|t| t.is_finite()));
    merged.sort_by(f64::total_cmp);
    merged.dedup();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_json_schema() {
        let block = TextBlock::new("fn main() {}", 0.92, BBox::new(1.0, 2.0, 30.0, 12.0), 4.5)
            .with_language("rust");
        let json = serde_json::to_value(&block).expect("serialize");
        assert_eq!(json["bbox"], serde_json::json!([1.0, 2.0, 30.0, 12.0]));
        assert_eq!(json["source_timestamps"], serde_json::json!([4.5]));
        assert_eq!(json["language"], "rust");

        let back: TextBlock = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, block);
    }

    #[test]
    fn test_language_defaults_when_missing() {
        let json = r#"{"text":"x","confidence":0.5,"bbox":[0,0,1,1],"source_timestamps":[2.0]}"#;
        let block: TextBlock = serde_json::from_str(json).expect("deserialize");
        assert_eq!(block.language, "en");
    }

    #[test]
    fn test_merge_timestamps_sorted_unique() {
        let mut merged = vec![1.0, 3.0];
        merge_timestamps(&mut merged, &[2.0, 3.0, 0.5, f64::NAN]);
        assert_eq!(merged, vec![0.5, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_earliest_timestamp() {
        let block = TextBlock::new("x", 1.0, BBox::default(), 5.0).with_timestamps(&[7.0, 2.0]);
        assert_eq!(block.source_timestamps, vec![2.0, 7.0]);
        assert_eq!(block.earliest_timestamp(), 2.0);
    }

    #[test]
    fn test_timestamps_normalized_on_load_and_new() {
        let json = r#"{"text":"x","confidence":0.5,"bbox":[0,0,1,1],"source_timestamps":[5.0,1.0,5.0]}"#;
        let block: TextBlock = serde_json::from_str(json).expect("deserialize");
        assert_eq!(block.source_timestamps, vec![1.0, 5.0]);

        let block = TextBlock::new("let x = 1;", 0.9, BBox::default(), f64::NAN);
        assert!(block.source_timestamps.is_empty());
        assert_eq!(block.earliest_timestamp(), f64::INFINITY);
    }

    #[test]
    fn test_bbox_union() {
        let a = BBox::new(0.0, 0.0, 10.0, 5.0);
        let b = BBox::new(5.0, -2.0, 12.0, 4.0);
        let u = a.union(&b);
        assert_eq!(<[f64; 4]>::from(u), [0.0, -2.0, 12.0, 5.0]);
        assert_eq!(u.width(), 12.0);
        assert_eq!(u.height(), 7.0);
    }
}
