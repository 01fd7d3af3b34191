//! 外部工具路径解析（ffmpeg / tesseract）
//!
//! 解析顺序：环境变量覆盖 → 可执行文件同目录 → `bin/` 子目录 → PATH

use std::env;
use std::path::PathBuf;
use std::process::Command;

pub const FFMPEG_ENV: &str = "VISIONSCRIBE_FFMPEG_PATH";
pub const TESSERACT_ENV: &str = "VISIONSCRIBE_TESSERACT_PATH";

fn exe_dir() -> Option<PathBuf> {
    env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|d| d.to_path_buf()))
}

pub(crate) fn resolve_tool(env_key: &str, default_name: &str) -> PathBuf {
    if let Ok(v) = env::var(env_key) {
        let p = PathBuf::from(&v);
        if p.exists() {
            return p;
        }
    }

    let mut filename = default_name.to_string();
    if cfg!(windows) && !filename.to_lowercase().ends_with(".exe") {
        filename.push_str(".exe");
    }

    if let Some(dir) = exe_dir() {
        for candidate in [dir.join(&filename), dir.join("bin").join(&filename)] {
            if candidate.exists() {
                return candidate;
            }
        }
    }

    PathBuf::from(default_name)
}

pub fn ffmpeg_path() -> PathBuf {
    resolve_tool(FFMPEG_ENV, "ffmpeg")
}

pub fn tesseract_path() -> PathBuf {
    resolve_tool(TESSERACT_ENV, "tesseract")
}

/// 工具是否可用（PATH 回退时实际执行一次 `-version`）
pub fn is_tool_available(tool: &str) -> bool {
    let path = match tool {
        "ffmpeg" => ffmpeg_path(),
        "tesseract" => tesseract_path(),
        _ => return false,
    };

    if path.is_absolute() && path.exists() {
        return true;
    }

    Command::new(&path)
        .arg("-version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}
