//! 兼容 OpenAI chat completions 接口的模型重建

use std::env;
use std::path::Path;
use std::time::Duration;

use log::{debug, error, info};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use super::reconstructor::ProjectReconstructor;
use super::tree::{DirectoryNode, FileNode, ProjectTree};
use crate::core::config::AiConfig;
use crate::core::error::{Result, VisionError};
use crate::core::text::TextCluster;
use crate::core::video::format_timestamp;

const COLLABORATOR: &str = "llm";

const SYSTEM_PROMPT: &str = "You reconstruct source code projects from OCR text captured from a screen recording. \
The snippets are ordered by first appearance and may contain OCR noise; later snippets usually \
supersede earlier versions of the same code. Reply with JSON only: \
{\"name\": string, \"files\": [{\"path\": relative path, \"content\": string}]}.";

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    content: Option<String>,
}

/// 模型回复的项目描述
#[derive(Debug, Deserialize)]
struct ProjectReply {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    files: Vec<FileReply>,
}

#[derive(Debug, Deserialize)]
struct FileReply {
    path: String,
    #[serde(default)]
    content: String,
}

pub struct LlmReconstructor {
    client: Client,
    config: AiConfig,
    api_key: String,
}

impl LlmReconstructor {
    /// API key 从 `api_key_env` 指定的环境变量读取，缺失时在处理前报错
    pub fn new(config: &AiConfig) -> Result<Self> {
        let api_key = env::var(&config.api_key_env).map_err(|_| {
            VisionError::invalid_config(format!(
                "environment variable {} is not set",
                config.api_key_env
            ))
        })?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &AiConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| VisionError::external(COLLABORATOR, e.to_string()))?;
        Ok(Self {
            client,
            config: config.clone(),
            api_key: api_key.into(),
        })
    }

    fn complete(&self, prompt: String) -> Result<String> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .map_err(|e| VisionError::external(COLLABORATOR, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            error!("❌ Model request failed: HTTP {}", status);
            return Err(VisionError::external(
                COLLABORATOR,
                format!("HTTP {}: {}", status, body.trim()),
            ));
        }

        let parsed: ChatResponse = response
            .json()
            .map_err(|e| VisionError::external(COLLABORATOR, format!("bad response: {}", e)))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| VisionError::external(COLLABORATOR, "empty completion"))
    }
}

impl ProjectReconstructor for LlmReconstructor {
    fn name(&self) -> &'static str {
        "llm"
    }

    fn reconstruct(&self, clusters: &[TextCluster]) -> Result<ProjectTree> {
        let prompt = build_prompt(clusters);
        info!(
            "🤖 Requesting reconstruction from {} ({} snippets)",
            self.config.model,
            clusters.len()
        );
        let reply = self.complete(prompt)?;
        debug!("model reply: {} chars", reply.len());

        let tree = parse_reply(&reply)?
            .with_metadata("created_by", self.name())
            .with_metadata("model", self.config.model.clone())
            .with_metadata("clusters", clusters.len());
        info!("✅ Model reconstructed {} files", tree.file_count());
        Ok(tree)
    }
}

/// 按首次出现顺序列出各簇代表文本
pub fn build_prompt(clusters: &[TextCluster]) -> String {
    let mut prompt = String::from("Snippets:\n\n");
    for (i, cluster) in clusters.iter().enumerate() {
        prompt.push_str(&format!(
            "### Snippet {} (first seen {}, confidence {:.2}, seen {} times)\n{}\n\n",
            i + 1,
            format_timestamp(cluster.first_seen()),
            cluster.confidence,
            cluster.merged_source_timestamps.len(),
            cluster.representative_text
        ));
    }
    prompt
}

/// 去掉代码围栏，截取最外层 JSON 对象
fn extract_json(reply: &str) -> Option<&str> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    (start < end).then(|| &reply[start..=end])
}

/// 宽松解析模型回复（json5 容忍尾逗号与注释）
pub fn parse_reply(reply: &str) -> Result<ProjectTree> {
    let json = extract_json(reply)
        .ok_or_else(|| VisionError::external(COLLABORATOR, "reply contains no JSON object"))?;
    let parsed: ProjectReply = json5::from_str(json)
        .map_err(|e| VisionError::external(COLLABORATOR, format!("unparseable reply: {}", e)))?;

    let mut root = DirectoryNode::new("project");
    for file in parsed.files {
        let path = Path::new(&file.path);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        root.insert(path, FileNode::new(name, file.content))
            .map_err(|e| VisionError::external(COLLABORATOR, e.to_string()))?;
    }

    let name = parsed
        .name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| "Reconstructed Project".to_string());
    Ok(ProjectTree::new(name, root))
}
