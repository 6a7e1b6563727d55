use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::output::ToolOutput;
use super::registry::{ToolHandler, ToolSpec};
use super::vfs::Vfs;
use crate::errors::{AgentError, AgentResult};
use crate::models::tool::Tool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileOp {
    ListDir,
    ReadFile,
    Search,
    WriteFile,
    Move,
    Delete,
}

struct FileTool {
    op: FileOp,
    vfs: Arc<dyn Vfs>,
}

fn required_str<'a>(arguments: &'a Map<String, Value>, key: &str) -> AgentResult<&'a str> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| AgentError::InvalidParameters(format!("Missing '{}' parameter", key)))
}

fn optional_str<'a>(arguments: &'a Map<String, Value>, key: &str, default: &'a str) -> &'a str {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or(default)
}

#[async_trait]
impl ToolHandler for FileTool {
    async fn call(&self, arguments: Map<String, Value>) -> AgentResult<ToolOutput> {
        match self.op {
            FileOp::ListDir => {
                let path = optional_str(&arguments, "path", "/");
                let listing = self.vfs.list_dir(path).await?;
                let summary = format!("{} entries in {}", listing.len(), path);
                let items = listing
                    .iter()
                    .map(|entry| json!(entry))
                    .collect();
                Ok(ToolOutput::list(summary, items))
            }
            FileOp::ReadFile => {
                let path = required_str(&arguments, "path")?;
                Ok(ToolOutput::text(self.vfs.read_file(path).await?))
            }
            FileOp::Search => {
                let query = required_str(&arguments, "query")?;
                let path = optional_str(&arguments, "path", "/");
                let hits = self.vfs.search(query, path).await?;
                let summary = format!("{} matches for '{}'", hits.len(), query);
                Ok(ToolOutput::list(
                    summary,
                    hits.iter().map(|hit| json!(hit)).collect(),
                ))
            }
            FileOp::WriteFile => {
                let path = required_str(&arguments, "path")?;
                let content = required_str(&arguments, "content")?;
                self.vfs.write_file(path, content).await?;
                Ok(ToolOutput::from_value(json!({
                    "summary": format!("Wrote {}", path),
                    "path": path,
                    "bytes": content.len(),
                })))
            }
            FileOp::Move => {
                let from = required_str(&arguments, "from")?;
                let to = required_str(&arguments, "to")?;
                self.vfs.move_path(from, to).await?;
                Ok(ToolOutput::from_value(json!({
                    "summary": format!("Moved {} to {}", from, to),
                    "from": from,
                    "to": to,
                })))
            }
            FileOp::Delete => {
                let path = required_str(&arguments, "path")?;
                self.vfs.delete(path).await?;
                Ok(ToolOutput::from_value(json!({
                    "summary": format!("Deleted {}", path),
                    "path": path,
                })))
            }
        }
    }
}

fn path_schema(description: &str, required: bool) -> Value {
    let required: Vec<&str> = if required { vec!["path"] } else { Vec::new() };
    json!({
        "type": "object",
        "required": required,
        "properties": {
            "path": {"type": "string", "description": description}
        }
    })
}

/// The workspace file tools. Anything that changes the workspace needs confirmation.
pub fn file_tools(vfs: Arc<dyn Vfs>) -> Vec<ToolSpec> {
    let spec = |op: FileOp, tool: Tool| {
        ToolSpec::new(
            tool,
            FileTool {
                op,
                vfs: Arc::clone(&vfs),
            },
        )
    };

    vec![
        spec(
            FileOp::ListDir,
            Tool::new(
                "vfs_list_dir",
                "List the files and folders in a workspace directory.",
                path_schema("Directory to list, e.g. /docs. Defaults to the root.", false),
            ),
        ),
        spec(
            FileOp::ReadFile,
            Tool::new(
                "vfs_read_file",
                "Read a text file from the workspace.",
                path_schema("File to read, e.g. /docs/readme.md", true),
            ),
        ),
        spec(
            FileOp::Search,
            Tool::new(
                "vfs_search",
                "Search workspace text files for lines containing a phrase (case-insensitive).",
                json!({
                    "type": "object",
                    "required": ["query"],
                    "properties": {
                        "query": {"type": "string", "description": "Text to look for."},
                        "path": {"type": "string", "description": "Directory to search in. Defaults to the root."}
                    }
                }),
            ),
        ),
        spec(
            FileOp::WriteFile,
            Tool::new(
                "vfs_write_file",
                "Create or overwrite a text file in the workspace.",
                json!({
                    "type": "object",
                    "required": ["path", "content"],
                    "properties": {
                        "path": {"type": "string", "description": "File to write."},
                        "content": {"type": "string", "description": "The full new contents."}
                    }
                }),
            ),
        )
        .with_confirmation(),
        spec(
            FileOp::Move,
            Tool::new(
                "vfs_move",
                "Move or rename a file or directory in the workspace.",
                json!({
                    "type": "object",
                    "required": ["from", "to"],
                    "properties": {
                        "from": {"type": "string", "description": "Current path."},
                        "to": {"type": "string", "description": "New path. Must not exist yet."}
                    }
                }),
            ),
        )
        .with_confirmation(),
        spec(
            FileOp::Delete,
            Tool::new(
                "vfs_delete",
                "Delete a file or directory (recursively) from the workspace.",
                path_schema("Path to delete.", true),
            ),
        )
        .with_confirmation(),
    ]
}
