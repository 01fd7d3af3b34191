//! 输出：写入文件树或渲染 Markdown 文档
//!
//! 写盘先落到同目录下的临时目录，全部成功后再 rename 到目标位置，
//! 失败时不会留下写了一半的输出。

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use log::info;

use super::tree::{DirectoryNode, ProjectTree};
use crate::core::error::Result;

pub trait OutputEmitter {
    /// 写出并返回产物路径
    fn write(&self, tree: &ProjectTree) -> Result<PathBuf>;

    fn render(&self, tree: &ProjectTree) -> String {
        render_markdown(tree)
    }
}

/// 把文件树写到 `output_dir/<root.name>/`
pub struct FsEmitter {
    output_dir: PathBuf,
}

impl FsEmitter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }
}

fn write_dir(dir: &DirectoryNode, target: &Path) -> Result<()> {
    fs::create_dir_all(target)?;
    for file in &dir.files {
        fs::write(target.join(&file.name), &file.content)?;
    }
    for sub in &dir.subdirectories {
        write_dir(sub, &target.join(&sub.name))?;
    }
    Ok(())
}

impl OutputEmitter for FsEmitter {
    fn write(&self, tree: &ProjectTree) -> Result<PathBuf> {
        tree.validate()?;
        fs::create_dir_all(&self.output_dir)?;

        let staging = tempfile::Builder::new()
            .prefix(".visionscribe-")
            .tempdir_in(&self.output_dir)?;
        // 新树写在 build/ 下，旧输出移到 previous，根目录叫什么都不会撞名
        let built = staging.path().join("build").join(&tree.root.name);
        write_dir(&tree.root, &built)?;

        let target = self.output_dir.join(&tree.root.name);
        if target.exists() {
            // 旧输出随临时目录一起删除
            fs::rename(&target, staging.path().join("previous"))?;
        }
        fs::rename(&built, &target)?;

        info!(
            "📁 Wrote {} files to {}",
            tree.file_count(),
            target.display()
        );
        Ok(target)
    }
}

/// 把 Markdown 文档写到指定文件
pub struct MarkdownEmitter {
    output_file: PathBuf,
}

impl MarkdownEmitter {
    pub fn new(output_file: impl Into<PathBuf>) -> Self {
        Self {
            output_file: output_file.into(),
        }
    }
}

impl OutputEmitter for MarkdownEmitter {
    fn write(&self, tree: &ProjectTree) -> Result<PathBuf> {
        let document = self.render(tree);
        let parent = match self.output_file.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)?;

        let mut staged = tempfile::Builder::new()
            .prefix(".visionscribe-")
            .suffix(".md")
            .tempfile_in(&parent)?;
        std::io::Write::write_all(&mut staged, document.as_bytes())?;
        staged.persist(&self.output_file).map_err(|e| e.error)?;

        info!("📄 Documentation written to {}", self.output_file.display());
        Ok(self.output_file.clone())
    }
}

pub fn render_markdown(tree: &ProjectTree) -> String {
    render_markdown_at(tree, Local::now())
}

pub fn render_markdown_at(tree: &ProjectTree, generated: DateTime<Local>) -> String {
    let mut doc = Vec::new();
    doc.push(format!("# {}", tree.name));
    doc.push(String::new());
    doc.push(format!("Generated on: {}", generated.format("%Y-%m-%d %H:%M:%S")));
    doc.push(String::new());

    doc.push("## Project Structure".to_string());
    doc.push(String::new());
    doc.push("```".to_string());
    doc.push(format!("{}/", tree.root.name));
    draw_tree(&tree.root, "", &mut doc);
    doc.push("```".to_string());
    doc.push(String::new());

    doc.push("## File Contents".to_string());
    doc.push(String::new());
    for (path, file) in tree.root.walk() {
        doc.push(format!("### {}", path.display()));
        doc.push(String::new());
        let fence = fence_for(&file.content);
        doc.push(format!("{}{}", fence, file.file_type));
        doc.push(file.content.trim_end_matches('\n').to_string());
        doc.push(fence);
        doc.push(String::new());
    }

    doc.join("\n")
}

/// 内容里有 ``` 时加长围栏
fn fence_for(content: &str) -> String {
    let mut longest = 0;
    let mut run = 0;
    for c in content.chars() {
        if c == '`' {
            run += 1;
            longest = longest.max(run);
        } else {
            run = 0;
        }
    }
    "`".repeat(longest.max(2) + 1)
}

fn draw_tree(dir: &DirectoryNode, indent: &str, out: &mut Vec<String>) {
    let total = dir.files.len() + dir.subdirectories.len();
    let mut index = 0;

    for file in &dir.files {
        index += 1;
        let branch = if index == total { "└── " } else { "├── " };
        out.push(format!("{}{}{}", indent, branch, file.name));
    }

    for sub in &dir.subdirectories {
        index += 1;
        let last = index == total;
        let branch = if last { "└── " } else { "├── " };
        out.push(format!("{}{}{}/", indent, branch, sub.name));
        let child_indent = format!("{}{}", indent, if last { "    " } else { "│   " });
        draw_tree(sub, &child_indent, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::project::tree::FileNode;
    use chrono::TimeZone;

    fn sample_tree() -> ProjectTree {
        let mut root = DirectoryNode::new("demo");
        root.insert(Path::new("main.py"), FileNode::new("main.py", "print('hi')\n"))
            .expect("insert");
        root.insert(Path::new("lib/util.py"), FileNode::new("util.py", "def f():\n    return 1"))
            .expect("insert");
        ProjectTree::new("Demo", root)
    }

    #[test]
    fn test_render_markdown_layout() {
        let generated = Local.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).single().expect("valid time");
        let doc = render_markdown_at(&sample_tree(), generated);

        assert!(doc.starts_with("# Demo\n\nGenerated on: 2024-05-06 07:08:09"));
        assert!(doc.contains("demo/\n├── main.py\n└── lib/\n    └── util.py"));
        assert!(doc.contains("### main.py\n\n```py\nprint('hi')\n```"));
        assert!(doc.contains("### lib/util.py"));
    }

    #[test]
    fn test_fence_grows_with_content() {
        assert_eq!(fence_for("plain"), "```");
        assert_eq!(fence_for("```rust\n```"), "````");
    }

    #[test]
    fn test_fs_emitter_writes_tree() {
        let dir = tempfile::tempdir().expect("tempdir");
        let emitter = FsEmitter::new(dir.path());
        let target = emitter.write(&sample_tree()).expect("write");

        assert_eq!(target, dir.path().join("demo"));
        assert_eq!(fs::read_to_string(target.join("main.py")).expect("read"), "print('hi')\n");
        assert!(target.join("lib/util.py").is_file());

        // 只剩目标目录，没有残留的临时目录
        let entries: Vec<_> = fs::read_dir(dir.path()).expect("list").collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_fs_emitter_replaces_previous_output() {
        let dir = tempfile::tempdir().expect("tempdir");
        let emitter = FsEmitter::new(dir.path());
        emitter.write(&sample_tree()).expect("first write");

        let mut root = DirectoryNode::new("demo");
        root.insert(Path::new("only.txt"), FileNode::new("only.txt", "x")).expect("insert");
        let target = emitter.write(&ProjectTree::new("Demo", root)).expect("second write");

        assert!(target.join("only.txt").is_file());
        assert!(!target.join("main.py").exists());
    }

    #[test]
    fn test_fs_emitter_root_named_like_staging_entries() {
        let dir = tempfile::tempdir().expect("tempdir");
        let emitter = FsEmitter::new(dir.path());
        for name in ["previous", "build"] {
            for content in ["v1", "v2"] {
                let mut root = DirectoryNode::new(name);
                root.insert(Path::new("a.txt"), FileNode::new("a.txt", content)).expect("insert");
                let target = emitter.write(&ProjectTree::new("Demo", root)).expect("write");
                assert_eq!(target, dir.path().join(name));
                assert_eq!(fs::read_to_string(target.join("a.txt")).expect("read"), content);
            }
        }
        assert_eq!(fs::read_dir(dir.path()).expect("list").count(), 2);
    }

    #[test]
    fn test_fs_emitter_rejects_unsafe_tree_without_output() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut tree = sample_tree();
        tree.root.files.push(FileNode::new("../escape.txt", "x"));

        assert!(FsEmitter::new(dir.path()).write(&tree).is_err());
        assert_eq!(fs::read_dir(dir.path()).expect("list").count(), 0);
    }

    #[test]
    fn test_markdown_emitter_writes_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("docs/README.md");
        let written = MarkdownEmitter::new(&path).write(&sample_tree()).expect("write");
        assert_eq!(written, path);
        let text = fs::read_to_string(&path).expect("read");
        assert!(text.starts_with("# Demo"));
    }
}
