pub mod emitter;
pub mod llm;
pub mod reconstructor;
pub mod tree;

pub use emitter::{render_markdown, FsEmitter, MarkdownEmitter, OutputEmitter};
pub use llm::LlmReconstructor;
pub use reconstructor::{detect_language, PassthroughReconstructor, ProjectReconstructor};
pub use tree::{DirectoryNode, FileNode, ProjectTree};
