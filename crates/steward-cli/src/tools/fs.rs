//! Session-scoped file operations
//!
//! Every path is relative to `<workspace>/<session-id>`. Absolute paths and
//! `..` components are rejected before touching the disk.

use async_trait::async_trait;
use serde_json::json;
use similar::{ChangeTag, TextDiff};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use steward_agent::CapabilityProvider;
use steward_agent::tool::{BoxedTool, Tool, ToolResult};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

const MAX_LINES: usize = 2000;
const MAX_LINE_LENGTH: usize = 2000;
const MAX_DIFF_LINES: usize = 50;

/// Root directory all file capabilities resolve against
#[derive(Debug)]
pub struct Sandbox {
    root: PathBuf,
}

impl Sandbox {
    /// Create `<workspace>/<session>` if needed
    pub fn open(workspace: &Path, session: &str) -> std::io::Result<Self> {
        let root = workspace.join(session);
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a relative file name into the sandbox
    pub fn resolve(&self, file_name: &str) -> Result<PathBuf, String> {
        let relative = Path::new(file_name);
        if file_name.trim().is_empty() {
            return Err("File name must not be empty".to_string());
        }
        for component in relative.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                Component::ParentDir => {
                    return Err(format!("Path escapes the workspace: {}", file_name));
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(format!(
                        "Paths must be relative to the workspace: {}",
                        file_name
                    ));
                }
            }
        }
        Ok(self.root.join(relative))
    }
}

/// Contributes create_file, modify_file, read_file and write_file
pub struct FilesystemProvider {
    sandbox: Arc<Sandbox>,
}

impl FilesystemProvider {
    pub fn new(sandbox: Arc<Sandbox>) -> Self {
        Self { sandbox }
    }
}

impl CapabilityProvider for FilesystemProvider {
    fn name(&self) -> &str {
        "filesystem"
    }

    fn capabilities(&self) -> Vec<BoxedTool> {
        let sandbox = &self.sandbox;
        vec![
            Arc::new(CreateFileTool(sandbox.clone())),
            Arc::new(ModifyFileTool(sandbox.clone())),
            Arc::new(ReadFileTool(sandbox.clone())),
            Arc::new(WriteFileTool(sandbox.clone())),
        ]
    }
}

fn str_arg<'a>(arguments: &'a serde_json::Value, name: &str) -> Result<&'a str, ToolResult> {
    arguments
        .get(name)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolResult::error(format!("Missing '{}' argument", name)))
}

async fn ensure_parent(path: &Path) -> Result<(), ToolResult> {
    match path.parent() {
        Some(parent) if !parent.exists() => fs::create_dir_all(parent)
            .await
            .map_err(|e| ToolResult::error(format!("Failed to create directory: {}", e))),
        _ => Ok(()),
    }
}

pub struct CreateFileTool(Arc<Sandbox>);

#[async_trait]
impl Tool for CreateFileTool {
    fn name(&self) -> &str {
        "create_file"
    }

    fn description(&self) -> &str {
        "Create a new file with the given content. Fails if the file already exists."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "file_name": {
                    "type": "string",
                    "description": "Path of the file, relative to the workspace"
                },
                "content": {
                    "type": "string",
                    "description": "Content to write"
                }
            },
            "required": ["file_name", "content"]
        })
    }

    async fn execute(
        &self,
        _tool_call_id: &str,
        arguments: serde_json::Value,
        cancel: CancellationToken,
    ) -> ToolResult {
        let (file_name, content) = match (str_arg(&arguments, "file_name"), str_arg(&arguments, "content")) {
            (Ok(f), Ok(c)) => (f, c),
            (Err(e), _) | (_, Err(e)) => return e,
        };
        let path = match self.0.resolve(file_name) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };

        if cancel.is_cancelled() {
            return ToolResult::error("Operation cancelled");
        }
        if path.exists() {
            return ToolResult::error(format!("File already exists: {}", file_name));
        }
        if let Err(e) = ensure_parent(&path).await {
            return e;
        }

        let file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await;
        let written = match file {
            Ok(mut f) => f.write_all(content.as_bytes()).await,
            Err(e) => Err(e),
        };
        match written {
            Ok(()) => ToolResult::text(format!(
                "Created {} ({} bytes)",
                file_name,
                content.len()
            )),
            Err(e) => ToolResult::error(format!("Failed to create file {}: {}", file_name, e)),
        }
    }
}

pub struct ModifyFileTool(Arc<Sandbox>);

#[async_trait]
impl Tool for ModifyFileTool {
    fn name(&self) -> &str {
        "modify_file"
    }

    fn description(&self) -> &str {
        "Replace every occurrence of old_content in a file with new_content. The old content must match exactly."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "file_name": {
                    "type": "string",
                    "description": "Path of the file, relative to the workspace"
                },
                "old_content": {
                    "type": "string",
                    "description": "Exact text to replace"
                },
                "new_content": {
                    "type": "string",
                    "description": "Replacement text"
                }
            },
            "required": ["file_name", "old_content", "new_content"]
        })
    }

    async fn execute(
        &self,
        _tool_call_id: &str,
        arguments: serde_json::Value,
        cancel: CancellationToken,
    ) -> ToolResult {
        let file_name = match str_arg(&arguments, "file_name") {
            Ok(v) => v,
            Err(e) => return e,
        };
        let old_content = match str_arg(&arguments, "old_content") {
            Ok(v) => v,
            Err(e) => return e,
        };
        let new_content = match str_arg(&arguments, "new_content") {
            Ok(v) => v,
            Err(e) => return e,
        };
        if old_content.is_empty() {
            return ToolResult::error("old_content must not be empty");
        }
        let path = match self.0.resolve(file_name) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };

        if cancel.is_cancelled() {
            return ToolResult::error("Operation cancelled");
        }

        let current = match fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return ToolResult::error(format!("File not found: {}", file_name));
            }
            Err(e) => return ToolResult::error(format!("Failed to read file: {}", e)),
        };

        let occurrences = current.matches(old_content).count();
        if occurrences == 0 {
            return ToolResult::error(format!("Old content not found in file {}", file_name));
        }

        let modified = current.replace(old_content, new_content);
        let diff = generate_diff(&current, &modified);

        match fs::write(&path, &modified).await {
            Ok(()) => ToolResult::text(format!(
                "Replaced {} occurrence(s) in {}.\n\nDiff:\n{}",
                occurrences, file_name, diff
            ))
            .with_details(json!({ "diff": diff, "occurrences": occurrences })),
            Err(e) => ToolResult::error(format!("Failed to write file: {}", e)),
        }
    }
}

pub struct ReadFileTool(Arc<Sandbox>);

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a file from the workspace. For large files, use offset and limit."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "file_name": {
                    "type": "string",
                    "description": "Path of the file, relative to the workspace"
                },
                "offset": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "Line number to start reading from (1-indexed)"
                },
                "limit": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "Maximum number of lines to read"
                }
            },
            "required": ["file_name"]
        })
    }

    async fn execute(
        &self,
        _tool_call_id: &str,
        arguments: serde_json::Value,
        cancel: CancellationToken,
    ) -> ToolResult {
        let file_name = match str_arg(&arguments, "file_name") {
            Ok(v) => v,
            Err(e) => return e,
        };
        let path = match self.0.resolve(file_name) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };

        if cancel.is_cancelled() {
            return ToolResult::error("Operation cancelled");
        }
        if path.is_dir() {
            return ToolResult::error(format!("Path is not a file: {}", file_name));
        }

        let content = match fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return ToolResult::error(format!("File not found: {}", file_name));
            }
            Err(e) => return ToolResult::error(format!("Failed to read file: {}", e)),
        };

        let offset = arguments
            .get("offset")
            .and_then(|v| v.as_u64())
            .map(|o| (o as usize).saturating_sub(1))
            .unwrap_or(0);
        let limit = arguments
            .get("limit")
            .and_then(|v| v.as_u64())
            .map(|l| l as usize)
            .unwrap_or(MAX_LINES);

        ToolResult::text(window(&content, offset, limit))
    }
}

/// Select `limit` lines starting at 0-indexed `offset`, with notices for what was cut
fn window(content: &str, offset: usize, limit: usize) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let total = lines.len();
    if total == 0 {
        return String::new();
    }
    if offset >= total {
        return format!(
            "(offset {} is beyond end of file, {} lines total)",
            offset + 1,
            total
        );
    }

    let end = offset.saturating_add(limit).min(total);
    let mut had_truncated = false;
    let selected: Vec<String> = lines[offset..end]
        .iter()
        .map(|line| match line.char_indices().nth(MAX_LINE_LENGTH) {
            Some((idx, _)) => {
                had_truncated = true;
                line[..idx].to_string()
            }
            None => line.to_string(),
        })
        .collect();

    let mut output = selected.join("\n");
    let mut notices = Vec::new();
    if had_truncated {
        notices.push(format!(
            "Some lines were truncated to {} characters",
            MAX_LINE_LENGTH
        ));
    }
    if end < total {
        notices.push(format!(
            "{} more lines not shown. Use offset={} to continue reading",
            total - end,
            end + 1
        ));
    }
    if !notices.is_empty() {
        output.push_str(&format!("\n\n... ({})", notices.join(". ")));
    }
    output
}

pub struct WriteFileTool(Arc<Sandbox>);

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Append content to a file, creating it and its parent directories if needed."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "file_name": {
                    "type": "string",
                    "description": "Path of the file, relative to the workspace"
                },
                "content": {
                    "type": "string",
                    "description": "Content to append"
                }
            },
            "required": ["file_name", "content"]
        })
    }

    async fn execute(
        &self,
        _tool_call_id: &str,
        arguments: serde_json::Value,
        cancel: CancellationToken,
    ) -> ToolResult {
        let (file_name, content) = match (str_arg(&arguments, "file_name"), str_arg(&arguments, "content")) {
            (Ok(f), Ok(c)) => (f, c),
            (Err(e), _) | (_, Err(e)) => return e,
        };
        let path = match self.0.resolve(file_name) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };

        if cancel.is_cancelled() {
            return ToolResult::error("Operation cancelled");
        }
        if let Err(e) = ensure_parent(&path).await {
            return e;
        }

        let file = fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&path)
            .await;
        let written = match file {
            Ok(mut f) => f.write_all(content.as_bytes()).await,
            Err(e) => Err(e),
        };
        match written {
            Ok(()) => ToolResult::text(format!(
                "Appended {} bytes to {}",
                content.len(),
                file_name
            )),
            Err(e) => ToolResult::error(format!("Failed to write file {}: {}", file_name, e)),
        }
    }
}

/// Generate a line diff, capped at `MAX_DIFF_LINES`
fn generate_diff(old: &str, new: &str) -> String {
    let diff = TextDiff::from_lines(old, new);
    let mut output = Vec::new();

    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => "-",
            ChangeTag::Insert => "+",
            ChangeTag::Equal => " ",
        };
        output.push(format!("{}{}", sign, change));
    }

    if output.len() > MAX_DIFF_LINES {
        output.truncate(MAX_DIFF_LINES);
        output.push("... (diff truncated)\n".to_string());
    }

    output.join("")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sandbox() -> Arc<Sandbox> {
        let workspace = std::env::temp_dir().join(format!("steward-fs-{}", uuid::Uuid::new_v4()));
        Arc::new(Sandbox::open(&workspace, "session").unwrap())
    }

    async fn call(tool: &dyn Tool, args: serde_json::Value) -> ToolResult {
        tool.execute("call_1", args, CancellationToken::new()).await
    }

    #[test]
    fn test_resolve_rejects_escapes() {
        let sb = sandbox();
        assert!(sb.resolve("notes/a.txt").unwrap().starts_with(sb.root()));
        assert!(sb.resolve("./a.txt").is_ok());
        assert!(sb.resolve("../a.txt").is_err());
        assert!(sb.resolve("notes/../../a.txt").is_err());
        assert!(sb.resolve("/etc/passwd").is_err());
        assert!(sb.resolve("  ").is_err());
    }

    #[tokio::test]
    async fn test_create_then_create_again_fails() {
        let sb = sandbox();
        let create = CreateFileTool(sb.clone());
        let args = json!({"file_name": "dir/a.txt", "content": "hello"});

        let first = call(&create, args.clone()).await;
        assert!(!first.is_error, "{}", first.text_content());
        assert_eq!(std::fs::read_to_string(sb.root().join("dir/a.txt")).unwrap(), "hello");

        let second = call(&create, args).await;
        assert!(second.is_error);
        assert!(second.text_content().contains("already exists"));
    }

    #[tokio::test]
    async fn test_write_appends() {
        let sb = sandbox();
        let write = WriteFileTool(sb.clone());
        call(&write, json!({"file_name": "log.txt", "content": "one\n"})).await;
        call(&write, json!({"file_name": "log.txt", "content": "two\n"})).await;
        assert_eq!(std::fs::read_to_string(sb.root().join("log.txt")).unwrap(), "one\ntwo\n");
    }

    #[tokio::test]
    async fn test_modify_replaces_every_occurrence() {
        let sb = sandbox();
        std::fs::write(sb.root().join("f.txt"), "a b a\n").unwrap();
        let modify = ModifyFileTool(sb.clone());

        let result = call(
            &modify,
            json!({"file_name": "f.txt", "old_content": "a", "new_content": "z"}),
        )
        .await;
        assert!(!result.is_error);
        assert!(result.text_content().contains("2 occurrence"));
        assert!(result.text_content().contains("+z b z"));
        assert_eq!(std::fs::read_to_string(sb.root().join("f.txt")).unwrap(), "z b z\n");
    }

    #[tokio::test]
    async fn test_modify_missing_text_or_file() {
        let sb = sandbox();
        std::fs::write(sb.root().join("f.txt"), "content").unwrap();
        let modify = ModifyFileTool(sb.clone());

        let absent = call(
            &modify,
            json!({"file_name": "f.txt", "old_content": "nope", "new_content": "x"}),
        )
        .await;
        assert!(absent.is_error);
        assert!(absent.text_content().contains("not found in file"));

        let missing = call(
            &modify,
            json!({"file_name": "g.txt", "old_content": "a", "new_content": "x"}),
        )
        .await;
        assert!(missing.is_error);
        assert!(missing.text_content().contains("File not found"));
    }

    #[tokio::test]
    async fn test_read_file_window() {
        let sb = sandbox();
        let body: String = (1..=10).map(|i| format!("line {}\n", i)).collect();
        std::fs::write(sb.root().join("r.txt"), body).unwrap();
        let read = ReadFileTool(sb.clone());

        let all = call(&read, json!({"file_name": "r.txt"})).await;
        assert!(all.text_content().starts_with("line 1\nline 2"));

        let part = call(&read, json!({"file_name": "r.txt", "offset": 3, "limit": 2})).await;
        let text = part.text_content();
        assert!(text.starts_with("line 3\nline 4"));
        assert!(text.contains("6 more lines not shown. Use offset=5"));
    }

    #[tokio::test]
    async fn test_read_missing_and_escape() {
        let sb = sandbox();
        let read = ReadFileTool(sb);
        assert!(call(&read, json!({"file_name": "none.txt"})).await.is_error);
        assert!(call(&read, json!({"file_name": "../x"})).await.is_error);
    }

    #[test]
    fn test_window_truncates_long_lines_on_char_boundary() {
        let line = "é".repeat(MAX_LINE_LENGTH + 5);
        let out = window(&line, 0, 10);
        assert!(out.starts_with(&"é".repeat(MAX_LINE_LENGTH)));
        assert!(out.contains("truncated to 2000 characters"));
    }
}
