//! Tools: read_file / write_file / list_dir over the runtime data
//! directory. Reads may roam the whole data dir; writes are confined to
//! the memory directory so the model cannot clobber config or sessions.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use super::{Tool, ToolResult};

/// Cap on read_file output to keep a single file from flooding a turn.
const READ_MAX_BYTES: usize = 8 * 1024;

/// Resolve `rel` under `root`, rejecting absolute paths and any `..`
/// traversal.
fn resolve(root: &Path, rel: &str) -> Option<PathBuf> {
    let rel = Path::new(rel);
    if rel.is_absolute() {
        return None;
    }
    if rel
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return None;
    }
    Some(root.join(rel))
}

pub struct ReadFileTool {
    root: Arc<PathBuf>,
}

impl ReadFileTool {
    pub fn new(root: Arc<PathBuf>) -> Self {
        Self { root }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a file under the data directory (path is relative, e.g. \
         memory/MEMORY.md or config/SOUL.md)."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path relative to the data directory."
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let Some(path) = input.get("path").and_then(|v| v.as_str()) else {
            return ToolResult::error("missing required parameter: path");
        };
        let Some(full) = resolve(&self.root, path) else {
            return ToolResult::error(format!("path not allowed: {path}"));
        };
        match std::fs::read_to_string(&full) {
            Ok(mut content) => {
                if content.len() > READ_MAX_BYTES {
                    let mut cut = READ_MAX_BYTES;
                    while !content.is_char_boundary(cut) {
                        cut -= 1;
                    }
                    content.truncate(cut);
                    content.push_str("\n...[file truncated]");
                }
                ToolResult::success(content)
            }
            Err(e) => ToolResult::error(format!("failed to read '{path}': {e}")),
        }
    }
}

pub struct WriteFileTool {
    root: Arc<PathBuf>,
}

impl WriteFileTool {
    /// `root` should be the memory directory; nothing outside it is
    /// writable through this tool.
    pub fn new(root: Arc<PathBuf>) -> Self {
        Self { root }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write or overwrite a file under the memory directory (path is \
         relative, e.g. notes/ideas.md)."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path relative to the memory directory."
                },
                "content": {
                    "type": "string",
                    "description": "Full file content to write."
                }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let Some(path) = input.get("path").and_then(|v| v.as_str()) else {
            return ToolResult::error("missing required parameter: path");
        };
        let Some(content) = input.get("content").and_then(|v| v.as_str()) else {
            return ToolResult::error("missing required parameter: content");
        };
        let Some(full) = resolve(&self.root, path) else {
            return ToolResult::error(format!("path not allowed: {path}"));
        };
        if let Some(parent) = full.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                return ToolResult::error(format!("failed to create '{path}': {e}"));
            }
        }
        match std::fs::write(&full, content) {
            Ok(()) => ToolResult::success(format!("wrote {} bytes to {path}", content.len())),
            Err(e) => ToolResult::error(format!("failed to write '{path}': {e}")),
        }
    }
}

pub struct ListDirTool {
    root: Arc<PathBuf>,
}

impl ListDirTool {
    pub fn new(root: Arc<PathBuf>) -> Self {
        Self { root }
    }
}

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "List entries of a directory under the data directory."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory relative to the data directory; omit for the root."
                }
            }
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let rel = input.get("path").and_then(|v| v.as_str()).unwrap_or("");
        let Some(full) = resolve(&self.root, rel) else {
            return ToolResult::error(format!("path not allowed: {rel}"));
        };
        let entries = match std::fs::read_dir(&full) {
            Ok(entries) => entries,
            Err(e) => return ToolResult::error(format!("failed to list '{rel}': {e}")),
        };
        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .map(|e| {
                let mut name = e.file_name().to_string_lossy().into_owned();
                if e.path().is_dir() {
                    name.push('/');
                }
                name
            })
            .collect();
        names.sort();
        ToolResult::success(names.join("\n"))
    }
}
