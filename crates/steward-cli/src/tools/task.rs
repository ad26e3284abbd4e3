//! Sectioned task list persisted in the blob store

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use steward_agent::blob::{SharedBlobStore, get_typed, set_typed};
use steward_agent::CapabilityProvider;
use steward_agent::tool::{BoxedTool, Tool, ToolResult};
use tokio_util::sync::CancellationToken;

/// Blob store key holding the current sections
pub const SECTIONS_KEY: &str = "sections";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub content: String,
    pub status: TaskStatus,
}

impl Task {
    fn new(content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content: content.into(),
            status: TaskStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub id: String,
    pub title: String,
    pub tasks: Vec<Task>,
}

/// Shape of one entry in `create_tasks`
#[derive(Debug, Deserialize)]
struct SectionInput {
    title: String,
    #[serde(default)]
    tasks: Vec<String>,
}

fn load(store: &SharedBlobStore) -> Vec<Section> {
    get_typed(store.as_ref(), SECTIONS_KEY).unwrap_or_default()
}

fn save(store: &SharedBlobStore, sections: &[Section]) -> Result<(), ToolResult> {
    set_typed(store.as_ref(), SECTIONS_KEY, &sections)
        .map_err(|e| ToolResult::error(format!("Failed to save tasks: {}", e)))
}

/// Append `input`'s tasks to the section with the same title, creating it if needed
fn merge_section(sections: &mut Vec<Section>, input: SectionInput) {
    let tasks = input.tasks.into_iter().map(Task::new);
    match sections.iter_mut().find(|s| s.title == input.title) {
        Some(section) => section.tasks.extend(tasks),
        None => sections.push(Section {
            id: uuid::Uuid::new_v4().to_string(),
            title: input.title,
            tasks: tasks.collect(),
        }),
    }
}

fn success(sections: &[Section]) -> ToolResult {
    ToolResult::json(&json!({ "status": "Success", "sections": sections }))
}

/// Contributes create_tasks, view_tasks and update_task
pub struct TaskProvider {
    store: SharedBlobStore,
}

impl TaskProvider {
    pub fn new(store: SharedBlobStore) -> Self {
        Self { store }
    }
}

impl CapabilityProvider for TaskProvider {
    fn name(&self) -> &str {
        "tasks"
    }

    fn capabilities(&self) -> Vec<BoxedTool> {
        vec![
            Arc::new(CreateTasksTool(self.store.clone())),
            Arc::new(ViewTasksTool(self.store.clone())),
            Arc::new(UpdateTaskTool(self.store.clone())),
        ]
    }
}

struct CreateTasksTool(SharedBlobStore);

#[async_trait]
impl Tool for CreateTasksTool {
    fn name(&self) -> &str {
        "create_tasks"
    }

    fn description(&self) -> &str {
        "Add tasks organized by sections. Tasks go into the existing section with the same title, or into a new section when none matches; existing tasks are kept. Create tasks in the exact order they will be executed; each task should be a single, specific operation. Returns every section with allocated ids, which must be used in later updates."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "sections": {
                    "type": "array",
                    "description": "Sections with their tasks, e.g. [{\"title\": \"Setup\", \"tasks\": [\"Research requirements\", \"Create project plan\"]}]",
                    "items": {
                        "type": "object",
                        "properties": {
                            "title": {"type": "string"},
                            "tasks": {"type": "array", "items": {"type": "string"}}
                        },
                        "required": ["title", "tasks"]
                    }
                }
            },
            "required": ["sections"]
        })
    }

    async fn execute(
        &self,
        _tool_call_id: &str,
        arguments: serde_json::Value,
        _cancel: CancellationToken,
    ) -> ToolResult {
        let inputs: Vec<SectionInput> = match arguments
            .get("sections")
            .cloned()
            .map(serde_json::from_value)
        {
            Some(Ok(inputs)) => inputs,
            Some(Err(e)) => return ToolResult::error(format!("Invalid sections: {}", e)),
            None => return ToolResult::error("Missing 'sections' argument"),
        };

        let mut sections = load(&self.0);
        let added: usize = inputs.iter().map(|input| input.tasks.len()).sum();
        for input in inputs {
            merge_section(&mut sections, input);
        }

        if let Err(e) = save(&self.0, &sections) {
            return e;
        }
        tracing::info!(sections = sections.len(), added, "tasks created");
        success(&sections)
    }
}

struct ViewTasksTool(SharedBlobStore);

#[async_trait]
impl Tool for ViewTasksTool {
    fn name(&self) -> &str {
        "view_tasks"
    }

    fn description(&self) -> &str {
        "View the current task list with section and task ids."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(
        &self,
        _tool_call_id: &str,
        _arguments: serde_json::Value,
        _cancel: CancellationToken,
    ) -> ToolResult {
        success(&load(&self.0))
    }
}

struct UpdateTaskTool(SharedBlobStore);

#[async_trait]
impl Tool for UpdateTaskTool {
    fn name(&self) -> &str {
        "update_task"
    }

    fn description(&self) -> &str {
        "Update the status of one or more tasks in a section. Batch several finished tasks into a single call instead of updating them one by one."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "section_id": {
                    "type": "string",
                    "description": "Section ID to which the task(s) belong"
                },
                "task_ids": {
                    "description": "Task ID or array of task IDs to update",
                    "anyOf": [
                        {"type": "string"},
                        {"type": "array", "items": {"type": "string"}}
                    ]
                },
                "status": {
                    "type": "string",
                    "enum": ["pending", "completed", "cancelled"],
                    "description": "New status for the task(s)"
                }
            },
            "required": ["section_id", "task_ids", "status"]
        })
    }

    async fn execute(
        &self,
        _tool_call_id: &str,
        arguments: serde_json::Value,
        _cancel: CancellationToken,
    ) -> ToolResult {
        let Some(section_id) = arguments.get("section_id").and_then(|v| v.as_str()) else {
            return ToolResult::error("Missing 'section_id' argument");
        };
        let task_ids: Vec<&str> = match arguments.get("task_ids") {
            Some(serde_json::Value::String(id)) => vec![id.as_str()],
            Some(serde_json::Value::Array(ids)) => ids.iter().filter_map(|v| v.as_str()).collect(),
            _ => return ToolResult::error("Missing 'task_ids' argument"),
        };
        let status: TaskStatus = match arguments.get("status").cloned().map(serde_json::from_value) {
            Some(Ok(status)) => status,
            _ => return ToolResult::error("'status' must be one of pending, completed, cancelled"),
        };

        let mut sections = load(&self.0);
        let Some(section) = sections.iter_mut().find(|s| s.id == section_id) else {
            let ids: Vec<&str> = sections.iter().map(|s| s.id.as_str()).collect();
            return ToolResult::error(format!(
                "Invalid section id. Current section ids: {:?}",
                ids
            ));
        };

        let mut updated = 0;
        for task in section.tasks.iter_mut().filter(|t| task_ids.contains(&t.id.as_str())) {
            task.status = status;
            updated += 1;
        }
        tracing::debug!(section_id, updated, ?status, "tasks updated");

        if let Err(e) = save(&self.0, &sections) {
            return e;
        }
        success(&sections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use steward_agent::MemoryBlobStore;

    fn provider() -> (SharedBlobStore, Vec<BoxedTool>) {
        let store: SharedBlobStore = Arc::new(MemoryBlobStore::new());
        let tools = TaskProvider::new(store.clone()).capabilities();
        (store, tools)
    }

    async fn call(tools: &[BoxedTool], name: &str, args: serde_json::Value) -> ToolResult {
        let tool = tools.iter().find(|t| t.name() == name).unwrap();
        tool.execute("call_1", args, CancellationToken::new()).await
    }

    fn sections_of(result: &ToolResult) -> Vec<Section> {
        let details = result.details.clone().unwrap();
        assert_eq!(details["status"], "Success");
        serde_json::from_value(details["sections"].clone()).unwrap()
    }

    #[tokio::test]
    async fn test_view_without_tasks_is_empty() {
        let (_, tools) = provider();
        let result = call(&tools, "view_tasks", json!({})).await;
        assert!(!result.is_error);
        assert!(sections_of(&result).is_empty());
    }

    #[tokio::test]
    async fn test_create_assigns_ids_and_persists() {
        let (store, tools) = provider();
        let result = call(
            &tools,
            "create_tasks",
            json!({"sections": [
                {"title": "Setup", "tasks": ["Research", "Plan"]},
                {"title": "Build", "tasks": ["Code"]}
            ]}),
        )
        .await;
        let created = sections_of(&result);
        assert_eq!(created.len(), 2);
        assert_eq!(created[0].tasks[1].content, "Plan");
        assert!(created.iter().flat_map(|s| &s.tasks).all(|t| t.status == TaskStatus::Pending));

        let stored: Vec<Section> = get_typed(store.as_ref(), SECTIONS_KEY).unwrap();
        assert_eq!(stored, created);
    }

    #[tokio::test]
    async fn test_create_keeps_earlier_tasks() {
        let (store, tools) = provider();
        let first = sections_of(
            &call(
                &tools,
                "create_tasks",
                json!({"sections": [{"title": "A", "tasks": ["a1", "a2"]}]}),
            )
            .await,
        );
        let a1 = first[0].tasks[0].id.clone();

        call(
            &tools,
            "create_tasks",
            json!({"sections": [{"title": "B", "tasks": ["b1"]}, {"title": "A", "tasks": ["a3"]}]}),
        )
        .await;

        let stored: Vec<Section> = get_typed(store.as_ref(), SECTIONS_KEY).unwrap();
        let titles: Vec<&str> = stored.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["A", "B"]);
        assert_eq!(stored[0].id, first[0].id);
        let a_tasks: Vec<&str> = stored[0].tasks.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(a_tasks, vec!["a1", "a2", "a3"]);
        assert_eq!(stored[0].tasks[0].id, a1);
        assert_eq!(stored[1].tasks[0].content, "b1");
    }

    #[tokio::test]
    async fn test_update_single_and_batch() {
        let (_, tools) = provider();
        let created = sections_of(
            &call(
                &tools,
                "create_tasks",
                json!({"sections": [{"title": "S", "tasks": ["a", "b", "c"]}]}),
            )
            .await,
        );
        let section = &created[0];

        let result = call(
            &tools,
            "update_task",
            json!({"section_id": section.id, "task_ids": [section.tasks[0].id, section.tasks[2].id], "status": "completed"}),
        )
        .await;
        let updated = sections_of(&result);
        let statuses: Vec<TaskStatus> = updated[0].tasks.iter().map(|t| t.status).collect();
        assert_eq!(
            statuses,
            vec![TaskStatus::Completed, TaskStatus::Pending, TaskStatus::Completed]
        );

        let result = call(
            &tools,
            "update_task",
            json!({"section_id": section.id, "task_ids": section.tasks[1].id, "status": "cancelled"}),
        )
        .await;
        assert_eq!(sections_of(&result)[0].tasks[1].status, TaskStatus::Cancelled);

        let viewed = sections_of(&call(&tools, "view_tasks", json!({})).await);
        assert_eq!(viewed[0].tasks.len(), 3);
    }

    #[tokio::test]
    async fn test_update_unknown_section() {
        let (_, tools) = provider();
        let result = call(
            &tools,
            "update_task",
            json!({"section_id": "nope", "task_ids": ["x"], "status": "completed"}),
        )
        .await;
        assert!(result.is_error);
        assert!(result.text_content().starts_with("Invalid section id"));
    }

    #[tokio::test]
    async fn test_update_rejects_bad_status() {
        let (_, tools) = provider();
        let result = call(
            &tools,
            "update_task",
            json!({"section_id": "s", "task_ids": ["x"], "status": "done"}),
        )
        .await;
        assert!(result.is_error);
    }
}
