//! 重建出的项目文件树

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::error::{Result, VisionError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileNode {
    pub name: String,
    /// 相对项目根目录
    pub path: String,
    pub content: String,
    #[serde(default)]
    pub file_type: String,
    #[serde(default)]
    pub size: usize,
    #[serde(default)]
    pub confidence: f64,
}

impl FileNode {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        let name = name.into();
        let content = content.into();
        let file_type = Path::new(&name)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("txt")
            .to_string();
        Self {
            path: name.clone(),
            size: content.len(),
            name,
            content,
            file_type,
            confidence: 0.0,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DirectoryNode {
    pub name: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub files: Vec<FileNode>,
    #[serde(default)]
    pub subdirectories: Vec<DirectoryNode>,
}

impl DirectoryNode {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            path: name.clone(),
            name,
            files: Vec::new(),
            subdirectories: Vec::new(),
        }
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
            + self
                .subdirectories
                .iter()
                .map(DirectoryNode::file_count)
                .sum::<usize>()
    }

    pub fn total_size(&self) -> usize {
        self.files.iter().map(|f| f.content.len()).sum::<usize>()
            + self
                .subdirectories
                .iter()
                .map(DirectoryNode::total_size)
                .sum::<usize>()
    }

    /// 深度优先列出 (相对路径, 文件)
    pub fn walk(&self) -> Vec<(PathBuf, &FileNode)> {
        let mut out = Vec::new();
        self.walk_into(PathBuf::new(), &mut out);
        out
    }

    fn walk_into<'a>(&'a self, base: PathBuf, out: &mut Vec<(PathBuf, &'a FileNode)>) {
        for file in &self.files {
            out.push((base.join(&file.name), file));
        }
        for dir in &self.subdirectories {
            dir.walk_into(base.join(&dir.name), out);
        }
    }

    /// 按相对路径插入文件，中间目录按需创建
    pub fn insert(&mut self, relative: &Path, file: FileNode) -> Result<()> {
        let parts = sanitize_relative(relative)?;
        let Some((file_name, dirs)) = parts.split_last() else {
            return Err(VisionError::invalid_config("empty file path"));
        };

        let mut current = self;
        let mut path = PathBuf::from(&current.path);
        for dir in dirs {
            path.push(dir);
            let index = match current.subdirectories.iter().position(|d| &d.name == dir) {
                Some(index) => index,
                None => {
                    current.subdirectories.push(DirectoryNode {
                        name: dir.clone(),
                        path: path.to_string_lossy().into_owned(),
                        files: Vec::new(),
                        subdirectories: Vec::new(),
                    });
                    current.subdirectories.len() - 1
                }
            };
            current = &mut current.subdirectories[index];
        }

        let mut file = file;
        file.name = file_name.clone();
        file.path = path.join(file_name).to_string_lossy().into_owned();
        current.files.retain(|f| f.name != file.name);
        current.files.push(file);
        Ok(())
    }

    /// 检查整棵树的名称，拒绝绝对路径与 `..`
    pub fn validate(&self) -> Result<()> {
        for file in &self.files {
            check_name(&file.name)?;
        }
        for dir in &self.subdirectories {
            check_name(&dir.name)?;
            dir.validate()?;
        }
        Ok(())
    }
}

fn check_name(name: &str) -> Result<()> {
    let parts = sanitize_relative(Path::new(name))?;
    if parts.len() != 1 {
        return Err(VisionError::invalid_config(format!(
            "node name '{}' must be a single path component",
            name
        )));
    }
    Ok(())
}

/// 拆分为普通路径组件；绝对路径、`..` 和空路径视为非法
pub fn sanitize_relative(path: &Path) -> Result<Vec<String>> {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::CurDir => {}
            _ => {
                return Err(VisionError::invalid_config(format!(
                    "unsafe path in project tree: {}",
                    path.display()
                )))
            }
        }
    }
    if parts.is_empty() {
        return Err(VisionError::invalid_config("empty path in project tree"));
    }
    Ok(parts)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectTree {
    pub name: String,
    pub root: DirectoryNode,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl ProjectTree {
    pub fn new(name: impl Into<String>, root: DirectoryNode) -> Self {
        Self {
            name: name.into(),
            root,
            metadata: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn file_count(&self) -> usize {
        self.root.file_count()
    }

    pub fn validate(&self) -> Result<()> {
        check_name(&self.root.name)?;
        self.root.validate()
    }
}
