use ao_domain::{ErrorReason, ToolDefinition, ToolExecutionResult, ToolInvocation};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::trait_def::{Tool, ToolContext};

fn param_str(invocation: &ToolInvocation, key: &str) -> Option<String> {
    invocation
        .parameters
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

/// Reads a file's contents. Bypasses the Approval Gate: it cannot mutate anything.
pub struct FileRead;

#[async_trait]
impl Tool for FileRead {
    fn name(&self) -> &str {
        "file_read"
    }

    fn spec(&self) -> ToolDefinition {
        ToolDefinition {
            name: "file_read".into(),
            description: "Reads the contents of a file at the given path.".into(),
            parameters: json!({
                "type": "object",
                "properties": { "path": { "type": "string" } },
                "required": ["path"],
            }),
        }
    }

    async fn call(&self, invocation: &ToolInvocation, _ctx: &ToolContext) -> ToolExecutionResult {
        let Some(path) = param_str(invocation, "path") else {
            return ToolExecutionResult::error(
                invocation.id.clone(),
                "file_read",
                "missing required parameter: path",
                ErrorReason::InvalidInput,
            );
        };
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => ToolExecutionResult::success(invocation.id.clone(), "file_read", content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ToolExecutionResult::error(
                invocation.id.clone(),
                "file_read",
                format!("file not found: {path}"),
                ErrorReason::NotFound,
            ),
            Err(e) => ToolExecutionResult::error(
                invocation.id.clone(),
                "file_read",
                format!("failed to read {path}: {e}"),
                ErrorReason::InvalidInput,
            ),
        }
    }
}

/// Creates a new file with the given content. Requires approval: it mutates the filesystem.
/// Honors `edit_instruction`: when present, the write is skipped
/// and the tool surfaces the instruction back to the model as an `edited` error instead.
pub struct FileNew;

#[async_trait]
impl Tool for FileNew {
    fn name(&self) -> &str {
        "file_new"
    }

    fn spec(&self) -> ToolDefinition {
        ToolDefinition {
            name: "file_new".into(),
            description: "Creates a new file with the given content.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "file_path": { "type": "string" },
                    "content": { "type": "string" },
                },
                "required": ["file_path", "content"],
            }),
        }
    }

    async fn call(&self, invocation: &ToolInvocation, _ctx: &ToolContext) -> ToolExecutionResult {
        if let Some(instruction) = &invocation.edit_instruction {
            return ToolExecutionResult::error(
                invocation.id.clone(),
                "file_new",
                format!("{instruction}\n(write was not performed; revise and retry)"),
                ErrorReason::Edited,
            );
        }
        let (Some(file_path), Some(content)) = (
            param_str(invocation, "file_path"),
            param_str(invocation, "content"),
        ) else {
            return ToolExecutionResult::error(
                invocation.id.clone(),
                "file_new",
                "missing required parameter: file_path or content",
                ErrorReason::InvalidInput,
            );
        };
        match tokio::fs::write(&file_path, &content).await {
            Ok(()) => ToolExecutionResult::success(
                invocation.id.clone(),
                "file_new",
                format!("wrote {} bytes to {file_path}", content.len()),
            ),
            Err(e) => ToolExecutionResult::error(
                invocation.id.clone(),
                "file_new",
                format!("failed to write {file_path}: {e}"),
                ErrorReason::InvalidInput,
            ),
        }
    }
}

/// Lists a directory's immediate entries. Bypasses the Approval Gate.
pub struct DirLs;

#[async_trait]
impl Tool for DirLs {
    fn name(&self) -> &str {
        "dir_ls"
    }

    fn spec(&self) -> ToolDefinition {
        ToolDefinition {
            name: "dir_ls".into(),
            description: "Lists the immediate entries of a directory.".into(),
            parameters: json!({
                "type": "object",
                "properties": { "path": { "type": "string" } },
                "required": ["path"],
            }),
        }
    }

    async fn call(&self, invocation: &ToolInvocation, _ctx: &ToolContext) -> ToolExecutionResult {
        let path = param_str(invocation, "path").unwrap_or_else(|| ".".to_string());
        let mut entries = match tokio::fs::read_dir(&path).await {
            Ok(r) => r,
            Err(e) => {
                return ToolExecutionResult::error(
                    invocation.id.clone(),
                    "dir_ls",
                    format!("failed to list {path}: {e}"),
                    ErrorReason::NotFound,
                )
            }
        };
        let mut names = Vec::new();
        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => names.push(entry.file_name().to_string_lossy().to_string()),
                Ok(None) => break,
                Err(e) => {
                    return ToolExecutionResult::error(
                        invocation.id.clone(),
                        "dir_ls",
                        format!("failed while listing {path}: {e}"),
                        ErrorReason::InvalidInput,
                    )
                }
            }
        }
        names.sort();
        ToolExecutionResult::success(invocation.id.clone(), "dir_ls", names.join("\n"))
    }
}

/// Stand-in for a real web search backend. Always bypassed, always returns a result explaining
/// that no search provider is configured so the model falls back to its own knowledge or the
/// filesystem tools.
pub struct WebSearchStub;

#[async_trait]
impl Tool for WebSearchStub {
    fn name(&self) -> &str {
        "web_search"
    }

    fn spec(&self) -> ToolDefinition {
        ToolDefinition {
            name: "web_search".into(),
            description: "Searches the web (unconfigured in this deployment).".into(),
            parameters: json!({
                "type": "object",
                "properties": { "query": { "type": "string" } },
                "required": ["query"],
            }),
        }
    }

    async fn call(&self, invocation: &ToolInvocation, _ctx: &ToolContext) -> ToolExecutionResult {
        ToolExecutionResult::success(
            invocation.id.clone(),
            "web_search",
            "no web search provider is configured; answer from existing knowledge or use file_read/dir_ls",
        )
    }
}

/// Stand-in for a real URL-fetch backend. See [`WebSearchStub`].
pub struct WebFetchStub;

#[async_trait]
impl Tool for WebFetchStub {
    fn name(&self) -> &str {
        "web_fetch"
    }

    fn spec(&self) -> ToolDefinition {
        ToolDefinition {
            name: "web_fetch".into(),
            description: "Fetches a URL (unconfigured in this deployment).".into(),
            parameters: json!({
                "type": "object",
                "properties": { "url": { "type": "string" } },
                "required": ["url"],
            }),
        }
    }

    async fn call(&self, invocation: &ToolInvocation, _ctx: &ToolContext) -> ToolExecutionResult {
        ToolExecutionResult::success(
            invocation.id.clone(),
            "web_fetch",
            "no web fetch provider is configured in this deployment",
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TodoItem {
    text: String,
    done: bool,
}

/// In-process todo list shared by [`TodoWrite`]/[`TodoRead`]. A real deployment would key this
/// per conversation; this reference implementation keeps one list per tool instance, which is
/// enough to exercise the bypass-set behavior.
#[derive(Default)]
struct TodoListState {
    items: Mutex<Vec<TodoItem>>,
}

/// Replaces the todo list wholesale. Bypassed: it only affects an ephemeral, user-visible list.
pub struct TodoWrite {
    state: std::sync::Arc<TodoListState>,
}

/// Reads back the current todo list. Bypassed, and shares state with [`TodoWrite`] when
/// constructed via [`todo_pair`].
pub struct TodoRead {
    state: std::sync::Arc<TodoListState>,
}

pub fn todo_pair() -> (TodoWrite, TodoRead) {
    let state = std::sync::Arc::new(TodoListState::default());
    (
        TodoWrite {
            state: state.clone(),
        },
        TodoRead { state },
    )
}

#[async_trait]
impl Tool for TodoWrite {
    fn name(&self) -> &str {
        "todo_write"
    }

    fn spec(&self) -> ToolDefinition {
        ToolDefinition {
            name: "todo_write".into(),
            description: "Replaces the current todo list with the given items.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "items": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "text": { "type": "string" },
                                "done": { "type": "boolean" },
                            },
                        },
                    },
                },
                "required": ["items"],
            }),
        }
    }

    async fn call(&self, invocation: &ToolInvocation, _ctx: &ToolContext) -> ToolExecutionResult {
        let items: Vec<TodoItem> = invocation
            .parameters
            .get("items")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();
        let count = items.len();
        *self.state.items.lock() = items;
        ToolExecutionResult::success(invocation.id.clone(), "todo_write", format!("saved {count} items"))
    }
}

#[async_trait]
impl Tool for TodoRead {
    fn name(&self) -> &str {
        "todo_read"
    }

    fn spec(&self) -> ToolDefinition {
        ToolDefinition {
            name: "todo_read".into(),
            description: "Returns the current todo list.".into(),
            parameters: json!({ "type": "object", "properties": {} }),
        }
    }

    async fn call(&self, invocation: &ToolInvocation, _ctx: &ToolContext) -> ToolExecutionResult {
        let items = self.state.items.lock().clone();
        let json = serde_json::to_string(&items).unwrap_or_else(|_| "[]".to_string());
        ToolExecutionResult::success_json(invocation.id.clone(), "todo_read", json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ao_domain::CancelToken;
    use std::collections::HashMap;
    use std::sync::Arc;

    struct NullSink;

    #[async_trait]
    impl ao_domain::EventSink for NullSink {
        async fn publish(&self, _event: ao_domain::Event) {}
    }

    fn ctx() -> ToolContext {
        ToolContext {
            conversation_id: "c1".into(),
            agent_id: "a1".into(),
            message_id: "m1".into(),
            events: Arc::new(NullSink),
            cancel: CancelToken::new(),
        }
    }

    fn invocation(id: &str, params: HashMap<String, serde_json::Value>) -> ToolInvocation {
        ToolInvocation {
            id: id.into(),
            name: "test".into(),
            parameters: params,
            edit_instruction: None,
        }
    }

    #[tokio::test]
    async fn file_read_not_found_is_error_with_reason() {
        let tool = FileRead;
        let mut params = HashMap::new();
        params.insert("path".into(), json!("/nonexistent/path/x.txt"));
        let result = tool.call(&invocation("c1", params), &ctx()).await;
        assert!(result.is_error());
        assert_eq!(result.metadata.error_reason, Some(ErrorReason::NotFound));
    }

    #[tokio::test]
    async fn file_new_writes_and_file_read_reads_it_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.txt");

        let write_tool = FileNew;
        let mut params = HashMap::new();
        params.insert("file_path".into(), json!(path.to_string_lossy()));
        params.insert("content".into(), json!("hi there"));
        let result = write_tool.call(&invocation("c1", params), &ctx()).await;
        assert!(!result.is_error());

        let read_tool = FileRead;
        let mut params = HashMap::new();
        params.insert("path".into(), json!(path.to_string_lossy()));
        let result = read_tool.call(&invocation("c2", params), &ctx()).await;
        assert!(!result.is_error());
        assert_eq!(result.result, "hi there");
    }

    #[tokio::test]
    async fn file_new_with_edit_instruction_surfaces_edited_reason() {
        let tool = FileNew;
        let mut params = HashMap::new();
        params.insert("file_path".into(), json!("x.txt"));
        params.insert("content".into(), json!("hi"));
        let mut inv = invocation("c1", params);
        inv.edit_instruction = Some("use /tmp/x.txt".into());
        let result = tool.call(&inv, &ctx()).await;
        assert!(result.is_error());
        assert_eq!(result.metadata.error_reason, Some(ErrorReason::Edited));
        assert!(result.result.starts_with("use /tmp/x.txt"));
    }

    #[tokio::test]
    async fn todo_write_then_todo_read_round_trips() {
        let (write, read) = todo_pair();
        let mut params = HashMap::new();
        params.insert("items".into(), json!([{"text": "a", "done": false}]));
        write.call(&invocation("c1", params), &ctx()).await;
        let result = read.call(&invocation("c2", HashMap::new()), &ctx()).await;
        assert!(result.result.contains("\"text\":\"a\""));
    }

    #[tokio::test]
    async fn web_search_stub_always_succeeds() {
        let tool = WebSearchStub;
        let mut params = HashMap::new();
        params.insert("query".into(), json!("rust async"));
        let result = tool.call(&invocation("c1", params), &ctx()).await;
        assert!(!result.is_error());
    }
}
