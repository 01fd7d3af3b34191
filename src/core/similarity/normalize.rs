use std::collections::HashSet;
use std::fmt;

/// 默认保留的标点（字母数字和空白之外）
pub const DEFAULT_MEANINGFUL_PUNCTUATION: &str = "_-.()[]{}:;#@$%^&*+=<>/?!'\"~`|\\";

/// 已归一化的文本
///
/// 只能由 [`TextNormalizer`] 构造，保证每段文本只归一化一次。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NormalizedText(String);

impl NormalizedText {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn char_len(&self) -> usize {
        self.0.chars().count()
    }

    pub fn words(&self) -> impl Iterator<Item = &str> {
        self.0.split(' ').filter(|w| !w.is_empty())
    }
}

impl fmt::Display for NormalizedText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// OCR 文本归一化：小写、去除无意义字符、折叠空白
#[derive(Debug, Clone)]
pub struct TextNormalizer {
    punctuation: HashSet<char>,
}

impl TextNormalizer {
    pub fn new() -> Self {
        Self::with_punctuation(DEFAULT_MEANINGFUL_PUNCTUATION)
    }

    pub fn with_punctuation(punctuation: &str) -> Self {
        Self {
            punctuation: punctuation.chars().collect(),
        }
    }

    fn is_meaningful(&self, c: char) -> bool {
        c.is_alphanumeric() || c.is_whitespace() || self.punctuation.contains(&c)
    }

    pub fn normalize(&self, raw: &str) -> NormalizedText {
        let mut out = String::with_capacity(raw.len());
        let mut pending_space = false;

        for c in raw.chars().flat_map(char::to_lowercase) {
            if !self.is_meaningful(c) {
                continue;
            }
            if c.is_whitespace() {
                pending_space = !out.is_empty();
                continue;
            }
            if pending_space {
                out.push(' ');
                pending_space = false;
            }
            out.push(c);
        }

        NormalizedText(out)
    }
}

impl Default for TextNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collapses_whitespace_and_lowercases() {
        let n = TextNormalizer::new();
        assert_eq!(n.normalize("  Def   Foo():\n\tpass  ").as_str(), "def foo(): pass");
    }

    #[test]
    fn test_strips_noise_characters() {
        let n = TextNormalizer::new();
        // © 和 • 属于 OCR 噪声，去掉后不能留下连续空格
        assert_eq!(n.normalize("x = 1 © • y").as_str(), "x = 1 y");
        assert_eq!(n.normalize("a,b").as_str(), "ab");
    }

    #[test]
    fn test_custom_punctuation_set() {
        let n = TextNormalizer::with_punctuation(",");
        assert_eq!(n.normalize("a, b; c").as_str(), "a, b c");
    }

    #[test]
    fn test_empty_and_noise_only_input() {
        let n = TextNormalizer::new();
        assert!(n.normalize("").is_empty());
        assert!(n.normalize("   \n ").is_empty());
        assert!(n.normalize("© ©").is_empty());
    }

    #[test]
    fn test_normalizing_is_stable() {
        let n = TextNormalizer::new();
        let once = n.normalize("Hello   WORLD!!");
        let twice = n.normalize(once.as_str());
        assert_eq!(once, twice);
    }
}
