//! 文本相似度指标，全部作用在已归一化的文本上

use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::normalize::NormalizedText;

pub fn exact(a: &NormalizedText, b: &NormalizedText) -> f64 {
    if a == b {
        1.0
    } else {
        0.0
    }
}

/// |交集| / |并集|，两边都为空时定义为 0.0
pub fn jaccard(a: &NormalizedText, b: &NormalizedText) -> f64 {
    let words_a: BTreeSet<&str> = a.words().collect();
    let words_b: BTreeSet<&str> = b.words().collect();

    let union = words_a.union(&words_b).count();
    if union == 0 {
        return 0.0;
    }
    let intersection = words_a.intersection(&words_b).count();
    intersection as f64 / union as f64
}

pub fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            curr[j + 1] = if ca == cb {
                prev[j]
            } else {
                1 + prev[j].min(prev[j + 1]).min(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// 1 - distance / max_len，两边都为空时为 1.0
pub fn edit_similarity(a: &NormalizedText, b: &NormalizedText) -> f64 {
    let max_len = a.char_len().max(b.char_len());
    if max_len == 0 {
        return 1.0;
    }
    let distance = levenshtein_distance(a.as_str(), b.as_str());
    1.0 - distance as f64 / max_len as f64
}

/// IDF 表，平滑公式 ln((1 + n) / (1 + df)) + 1
#[derive(Debug, Clone, Default)]
pub struct TfIdfCorpus {
    documents: usize,
    document_frequency: HashMap<String, usize>,
}

impl TfIdfCorpus {
    pub fn fit<'a, I>(documents: I) -> Self
    where
        I: IntoIterator<Item = &'a NormalizedText>,
    {
        let mut corpus = TfIdfCorpus::default();
        for doc in documents {
            corpus.documents += 1;
            let unique: BTreeSet<&str> = doc.words().collect();
            for word in unique {
                *corpus.document_frequency.entry(word.to_string()).or_insert(0) += 1;
            }
        }
        corpus
    }

    pub fn len(&self) -> usize {
        self.documents
    }

    pub fn is_empty(&self) -> bool {
        self.documents == 0
    }

    pub fn idf(&self, term: &str) -> f64 {
        let df = self.document_frequency.get(term).copied().unwrap_or(0);
        ((1.0 + self.documents as f64) / (1.0 + df as f64)).ln() + 1.0
    }

    fn vectorize<'t>(&self, text: &'t NormalizedText) -> BTreeMap<&'t str, f64> {
        let mut tf: BTreeMap<&str, f64> = BTreeMap::new();
        for word in text.words() {
            *tf.entry(word).or_insert(0.0) += 1.0;
        }
        for (term, weight) in tf.iter_mut() {
            *weight *= self.idf(term);
        }
        tf
    }

    pub fn cosine(&self, a: &NormalizedText, b: &NormalizedText) -> f64 {
        let va = self.vectorize(a);
        let vb = self.vectorize(b);
        cosine_of(&va, &vb)
    }
}

/// 向量按词项字典序累加，保证 cos(a, b) 与 cos(b, a) 逐位相等
fn cosine_of(va: &BTreeMap<&str, f64>, vb: &BTreeMap<&str, f64>) -> f64 {
    let norm_a = va.values().map(|w| w * w).sum::<f64>().sqrt();
    let norm_b = vb.values().map(|w| w * w).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    let terms: BTreeSet<&str> = va.keys().chain(vb.keys()).copied().collect();
    let dot: f64 = terms
        .iter()
        .map(|t| va.get(t).copied().unwrap_or(0.0) * vb.get(t).copied().unwrap_or(0.0))
        .sum();

    (dot / (norm_a * norm_b)).clamp(0.0, 1.0)
}

/// 只用这一对文本拟合 IDF 的余弦相似度
pub fn cosine_tfidf(a: &NormalizedText, b: &NormalizedText) -> f64 {
    TfIdfCorpus::fit([a, b]).cosine(a, b)
}

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by", "is",
    "are", "was", "were", "be", "been", "being", "have", "has", "had", "do", "does", "did", "will",
    "would", "could", "should", "may", "might", "must", "can", "this", "that", "these", "those",
    "i", "you", "he", "she", "it", "we", "they", "me", "him", "her", "us", "them", "my", "your",
    "his", "its", "our", "their",
];

/// 按词频提取关键词（去停用词、去掉长度不超过 2 的词）
pub fn extract_keywords(text: &str, max_keywords: usize) -> Vec<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut first_seen: HashMap<String, usize> = HashMap::new();

    let lowered = text.to_lowercase();
    let words = lowered
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| w.chars().count() > 2 && !STOP_WORDS.contains(w));

    for (position, word) in words.enumerate() {
        *counts.entry(word.to_string()).or_insert(0) += 1;
        first_seen.entry(word.to_string()).or_insert(position);
    }

    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|(wa, ca), (wb, cb)| cb.cmp(ca).then_with(|| first_seen[wa].cmp(&first_seen[wb])));
    ranked.into_iter().take(max_keywords).map(|(w, _)| w).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::similarity::normalize::TextNormalizer;

    fn norm(s: &str) -> NormalizedText {
        TextNormalizer::new().normalize(s)
    }

    #[test]
    fn test_levenshtein_classic_cases() {
        assert_eq!(levenshtein_distance("kitten", "sitting"), 3);
        assert_eq!(levenshtein_distance("", "abc"), 3);
        assert_eq!(levenshtein_distance("abc", ""), 3);
        assert_eq!(levenshtein_distance("flaw", "lawn"), 2);
        assert_eq!(levenshtein_distance("函数", "函数名"), 1);
    }

    #[test]
    fn test_edit_similarity_bounds() {
        assert_eq!(edit_similarity(&norm(""), &norm("")), 1.0);
        assert_eq!(edit_similarity(&norm("abc"), &norm("")), 0.0);
        let s = edit_similarity(&norm("print(x)"), &norm("prlnt(x)"));
        assert!((s - 0.875).abs() < 1e-9);
    }

    #[test]
    fn test_jaccard_empty_is_not_similar() {
        assert_eq!(jaccard(&norm(""), &norm("")), 0.0);
        assert_eq!(jaccard(&norm("a b"), &norm("")), 0.0);
        assert!((jaccard(&norm("a b c"), &norm("b c d")) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_cosine_identical_and_disjoint() {
        let a = norm("let x = 1");
        assert!((cosine_tfidf(&a, &a) - 1.0).abs() < 1e-9);
        assert_eq!(cosine_tfidf(&norm("alpha beta"), &norm("gamma delta")), 0.0);
        assert_eq!(cosine_tfidf(&norm(""), &norm("gamma")), 0.0);
    }

    #[test]
    fn test_corpus_idf_downweights_common_terms() {
        let docs = [norm("import os"), norm("import sys"), norm("import re")];
        let corpus = TfIdfCorpus::fit(docs.iter());
        assert_eq!(corpus.len(), 3);
        assert!(corpus.idf("import") < corpus.idf("os"));
        assert!((corpus.idf("import") - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_extract_keywords_orders_by_frequency() {
        let keywords = extract_keywords("The parser reads tokens; the parser emits tokens and nodes", 2);
        assert_eq!(keywords, vec!["parser".to_string(), "tokens".to_string()]);
    }
}
