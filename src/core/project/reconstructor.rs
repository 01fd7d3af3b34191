use std::path::PathBuf;

use log::info;
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};

use super::tree::{DirectoryNode, FileNode, ProjectTree};
use crate::core::error::Result;
use crate::core::text::TextCluster;

/// 由聚类结果重建项目文件树
pub trait ProjectReconstructor: Send + Sync {
    fn name(&self) -> &'static str;

    fn reconstruct(&self, clusters: &[TextCluster]) -> Result<ProjectTree>;
}

/// 按顺序匹配，第一个命中的语言胜出
static LANGUAGE_PATTERNS: Lazy<Vec<(&'static str, Vec<Regex>)>> = Lazy::new(|| {
    let table: &[(&str, &[&str])] = &[
        ("python", &[r"def\s+\w+", r"^\s*import\s+\w+", r"from\s+\w+\s+import", r"class\s+\w+\s*[:(]"]),
        ("rust", &[r"fn\s+\w+\s*\(", r"let\s+mut\s+\w+", r"use\s+\w+::", r"impl\s+\w+"]),
        ("javascript", &[r"function\s+\w+\s*\(", r"const\s+\w+\s*=", r"let\s+\w+\s*=", r"var\s+\w+\s*=", r"console\.log"]),
        ("java", &[r"public\s+class\s+\w+", r"private\s+class\s+\w+", r"public\s+static\s+void"]),
        ("cpp", &[r"#include\s*<\w+", r"using\s+namespace", r"int\s+main", r"std::"]),
        ("html", &[r"<(html|div|span|script|style)\b"]),
        ("sql", &[r"select\s+.*\s+from", r"insert\s+into", r"update\s+\w+\s+set"]),
        ("bash", &[r"#!/bin/(ba)?sh", r"echo\s+['\x22]", r"\bls\s+-"]),
        ("css", &[r"[a-z-]+\s*\{[^}]*:\s*[^;]+;"]),
    ];

    table
        .iter()
        .map(|(language, patterns)| {
            let compiled = patterns
                .iter()
                .filter_map(|p| {
                    RegexBuilder::new(p)
                        .case_insensitive(true)
                        .multi_line(true)
                        .build()
                        .ok()
                })
                .collect();
            (*language, compiled)
        })
        .collect()
});

/// 根据关键字猜测编程语言，无法判断时返回 `unknown`
pub fn detect_language(text: &str) -> &'static str {
    LANGUAGE_PATTERNS
        .iter()
        .find(|(_, patterns)| patterns.iter().any(|re| re.is_match(text)))
        .map(|(language, _)| *language)
        .unwrap_or("unknown")
}

pub fn extension_for(language: &str) -> &'static str {
    match language {
        "python" => "py",
        "rust" => "rs",
        "javascript" => "js",
        "java" => "java",
        "cpp" => "cpp",
        "html" => "html",
        "sql" => "sql",
        "bash" => "sh",
        "css" => "css",
        _ => "txt",
    }
}

/// 不调用模型：每个簇输出为一个文件，扩展名按内容猜测
pub struct PassthroughReconstructor {
    project_name: String,
}

impl PassthroughReconstructor {
    pub fn new(project_name: impl Into<String>) -> Self {
        Self {
            project_name: project_name.into(),
        }
    }
}

impl Default for PassthroughReconstructor {
    fn default() -> Self {
        Self::new("Reconstructed Project")
    }
}

impl ProjectReconstructor for PassthroughReconstructor {
    fn name(&self) -> &'static str {
        "passthrough"
    }

    fn reconstruct(&self, clusters: &[TextCluster]) -> Result<ProjectTree> {
        let mut root = DirectoryNode::new("src");
        let width = clusters.len().to_string().len().max(3);

        for (i, cluster) in clusters.iter().enumerate() {
            let ext = extension_for(detect_language(&cluster.representative_text));
            let name = format!("snippet_{:0width$}.{}", i + 1, ext, width = width);
            let file = FileNode::new(name.clone(), cluster.representative_text.clone())
                .with_confidence(cluster.confidence);
            root.insert(&PathBuf::from(name), file)?;
        }

        info!("📝 Passthrough reconstruction: {} files", root.file_count());
        Ok(ProjectTree::new(self.project_name.clone(), root)
            .with_metadata("created_by", self.name())
            .with_metadata("clusters", clusters.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::similarity::SimilarityMethod;
    use crate::core::text::{BBox, TextBlock, TextClusterer};

    #[test]
    fn test_detect_language() {
        assert_eq!(detect_language("def foo():\n    return 1"), "python");
        assert_eq!(detect_language("fn main() { let mut x = 1; }"), "rust");
        assert_eq!(detect_language("const x = require('fs');"), "javascript");
        assert_eq!(detect_language("#include <stdio.h>\nint main() {}"), "cpp");
        assert_eq!(detect_language("SELECT id FROM users"), "sql");
        assert_eq!(detect_language("hello there"), "unknown");
        assert_eq!(extension_for("unknown"), "txt");
    }

    #[test]
    fn test_passthrough_one_file_per_cluster() {
        let blocks = vec![
            TextBlock::new("def foo():", 0.9, BBox::default(), 0.0),
            TextBlock::new("console.log('hi')", 0.8, BBox::default(), 1.0),
        ];
        let clusters = TextClusterer::with_threshold(0.9, SimilarityMethod::EditDistance)
            .expect("valid")
            .cluster(blocks);

        let tree = PassthroughReconstructor::default().reconstruct(&clusters).expect("tree");
        assert_eq!(tree.file_count(), 2);
        assert_eq!(tree.root.files[0].name, "snippet_001.py");
        assert_eq!(tree.root.files[0].content, "def foo():");
        assert_eq!(tree.root.files[1].name, "snippet_002.js");
        assert_eq!(tree.metadata["created_by"], "passthrough");
        assert!(tree.validate().is_ok());
    }

    #[test]
    fn test_passthrough_empty() {
        let tree = PassthroughReconstructor::default().reconstruct(&[]).expect("tree");
        assert_eq!(tree.file_count(), 0);
    }
}
