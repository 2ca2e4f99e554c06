use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::models::{CallerId, Task, TaskChanges, TaskDraft};
use crate::db::TaskStore;

use super::tools::{
    AddTaskArgs, CompleteTaskArgs, DeleteTaskArgs, ListTasksArgs, ToolInvocation, ToolRequest,
    UpdateTaskArgs,
};

pub const MAX_TITLE_CHARS: usize = 200;
pub const MAX_DESCRIPTION_CHARS: usize = 1000;

/// Closed set of machine-readable tool failure codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ToolErrorCode {
    ValidationError,
    TaskNotFound,
    InternalError,
}

/// Structured result of one tool execution. Success payloads are flattened
/// alongside the `success` flag, matching the record shape persisted on
/// assistant messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ToolErrorCode>,
    #[serde(flatten)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

impl ToolOutcome {
    fn ok<T: Serialize>(details: T) -> Self {
        let details = match serde_json::to_value(details) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        };
        Self {
            success: true,
            error: None,
            error_code: None,
            details,
        }
    }

    fn fail(code: ToolErrorCode, error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            error_code: Some(code),
            details: serde_json::Map::new(),
        }
    }

    /// The human-readable summary line, when the tool produced one.
    pub fn message(&self) -> Option<&str> {
        self.details.get("message").and_then(|v| v.as_str())
    }
}

#[derive(Debug, Serialize)]
struct AddTaskResult {
    task_id: i64,
    title: String,
    description: String,
    status: &'static str,
    message: String,
}

#[derive(Debug, Serialize)]
struct TaskSummary {
    task_id: i64,
    title: String,
    description: String,
    completed: bool,
    due_date: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct ListTasksResult {
    tasks: Vec<TaskSummary>,
    count: usize,
    message: String,
}

#[derive(Debug, Serialize)]
struct CompleteTaskResult {
    task_id: i64,
    title: String,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    completed_at: Option<DateTime<Utc>>,
    message: String,
}

#[derive(Debug, Serialize)]
struct DeleteTaskResult {
    task_id: i64,
    title: String,
    message: String,
}

#[derive(Debug, Serialize)]
struct UpdateTaskResult {
    task_id: i64,
    title: String,
    description: String,
    updated_at: DateTime<Utc>,
    message: String,
}

/// Execute one raw tool request on behalf of `caller`.
///
/// Never returns an error to the orchestrator: unknown tools, malformed
/// arguments, missing tasks, and store faults all come back as structured
/// outcomes the model can read and explain.
pub async fn execute(
    store: &dyn TaskStore,
    caller: &CallerId,
    request: &ToolRequest,
) -> ToolOutcome {
    let invocation = match ToolInvocation::parse(request) {
        Ok(invocation) => invocation,
        Err(reason) => return ToolOutcome::fail(ToolErrorCode::ValidationError, reason),
    };

    let result = match invocation {
        ToolInvocation::AddTask(args) => add_task(store, caller, args).await,
        ToolInvocation::ListTasks(args) => list_tasks(store, caller, args).await,
        ToolInvocation::CompleteTask(args) => complete_task(store, caller, args).await,
        ToolInvocation::DeleteTask(args) => delete_task(store, caller, args).await,
        ToolInvocation::UpdateTask(args) => update_task(store, caller, args).await,
    };

    match result {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!("tool {} failed: {:#}", request.name, e);
            ToolOutcome::fail(
                ToolErrorCode::InternalError,
                "The operation could not be completed.",
            )
        }
    }
}

fn task_not_found() -> ToolOutcome {
    // One outcome for absent, deleted, and foreign-owned tasks alike.
    ToolOutcome::fail(ToolErrorCode::TaskNotFound, "Task not found")
}

/// Fetch an active task and verify ownership. The caller id comes from the
/// verified request context, never from tool arguments.
async fn fetch_owned(
    store: &dyn TaskStore,
    caller: &CallerId,
    task_id: i64,
) -> anyhow::Result<Result<Task, ToolOutcome>> {
    match store.fetch_task(task_id).await? {
        Some(task) if task.owner_id == caller.as_str() => Ok(Ok(task)),
        Some(task) => {
            tracing::warn!(
                "cross-owner task access: caller {} attempted task {} owned by {}",
                caller,
                task_id,
                task.owner_id
            );
            Ok(Err(task_not_found()))
        }
        None => Ok(Err(task_not_found())),
    }
}

fn parse_due_date(raw: &str) -> Result<DateTime<Utc>, ToolOutcome> {
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(date.and_time(NaiveTime::MIN).and_utc());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    Err(ToolOutcome::fail(
        ToolErrorCode::ValidationError,
        format!("Invalid date format: {}. Use YYYY-MM-DD.", raw),
    ))
}

async fn add_task(
    store: &dyn TaskStore,
    caller: &CallerId,
    args: AddTaskArgs,
) -> anyhow::Result<ToolOutcome> {
    let title = args.title.trim().to_string();
    if title.is_empty() {
        return Ok(ToolOutcome::fail(
            ToolErrorCode::ValidationError,
            "Title cannot be empty.",
        ));
    }
    if title.chars().count() > MAX_TITLE_CHARS {
        return Ok(ToolOutcome::fail(
            ToolErrorCode::ValidationError,
            format!("Title is too long (max {} characters).", MAX_TITLE_CHARS),
        ));
    }

    let description = args.description.trim().to_string();
    if description.chars().count() > MAX_DESCRIPTION_CHARS {
        return Ok(ToolOutcome::fail(
            ToolErrorCode::ValidationError,
            format!(
                "Description is too long (max {} characters).",
                MAX_DESCRIPTION_CHARS
            ),
        ));
    }

    let due_date = match args.due_date.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => match parse_due_date(raw) {
            Ok(parsed) => Some(parsed),
            Err(outcome) => return Ok(outcome),
        },
        None => None,
    };

    let task = store
        .insert_task(
            caller,
            TaskDraft {
                title,
                description,
                due_date,
            },
        )
        .await?;

    Ok(ToolOutcome::ok(AddTaskResult {
        task_id: task.id,
        title: task.title.clone(),
        description: task.description,
        status: "pending",
        message: format!("Task '{}' created successfully.", task.title),
    }))
}

async fn list_tasks(
    store: &dyn TaskStore,
    caller: &CallerId,
    args: ListTasksArgs,
) -> anyhow::Result<ToolOutcome> {
    let tasks = store.list_tasks(caller, args.status).await?;

    let summaries: Vec<TaskSummary> = tasks
        .into_iter()
        .map(|t| TaskSummary {
            task_id: t.id,
            title: t.title,
            description: t.description,
            completed: t.completed,
            due_date: t.due_date,
            created_at: t.created_at,
        })
        .collect();

    let count = summaries.len();
    Ok(ToolOutcome::ok(ListTasksResult {
        tasks: summaries,
        count,
        message: format!("Found {} task(s).", count),
    }))
}

async fn complete_task(
    store: &dyn TaskStore,
    caller: &CallerId,
    args: CompleteTaskArgs,
) -> anyhow::Result<ToolOutcome> {
    let task = match fetch_owned(store, caller, args.task_id).await? {
        Ok(task) => task,
        Err(outcome) => return Ok(outcome),
    };

    // Idempotent: re-completing is a success, not an error, and leaves the
    // row untouched.
    if task.completed {
        return Ok(ToolOutcome::ok(CompleteTaskResult {
            task_id: task.id,
            title: task.title.clone(),
            status: "completed",
            completed_at: None,
            message: format!("Task '{}' is already completed.", task.title),
        }));
    }

    let task = store.mark_completed(task.id).await?;
    Ok(ToolOutcome::ok(CompleteTaskResult {
        task_id: task.id,
        title: task.title.clone(),
        status: "completed",
        completed_at: Some(task.updated_at),
        message: format!("Task '{}' marked as completed.", task.title),
    }))
}

async fn delete_task(
    store: &dyn TaskStore,
    caller: &CallerId,
    args: DeleteTaskArgs,
) -> anyhow::Result<ToolOutcome> {
    let task = match fetch_owned(store, caller, args.task_id).await? {
        Ok(task) => task,
        Err(outcome) => return Ok(outcome),
    };

    let task = store.soft_delete_task(task.id).await?;
    Ok(ToolOutcome::ok(DeleteTaskResult {
        task_id: task.id,
        title: task.title.clone(),
        message: format!("Task '{}' deleted successfully.", task.title),
    }))
}

async fn update_task(
    store: &dyn TaskStore,
    caller: &CallerId,
    args: UpdateTaskArgs,
) -> anyhow::Result<ToolOutcome> {
    if args.title.is_none() && args.description.is_none() && args.due_date.is_none() {
        return Ok(ToolOutcome::fail(
            ToolErrorCode::ValidationError,
            "At least one field (title, description, or due_date) must be provided.",
        ));
    }

    let task = match fetch_owned(store, caller, args.task_id).await? {
        Ok(task) => task,
        Err(outcome) => return Ok(outcome),
    };

    let mut changes = TaskChanges::default();
    if let Some(title) = &args.title {
        let title = title.trim();
        if title.is_empty() {
            return Ok(ToolOutcome::fail(
                ToolErrorCode::ValidationError,
                "Title cannot be empty.",
            ));
        }
        if title.chars().count() > MAX_TITLE_CHARS {
            return Ok(ToolOutcome::fail(
                ToolErrorCode::ValidationError,
                format!("Title is too long (max {} characters).", MAX_TITLE_CHARS),
            ));
        }
        changes.title = Some(title.to_string());
    }
    if let Some(description) = &args.description {
        let description = description.trim();
        if description.chars().count() > MAX_DESCRIPTION_CHARS {
            return Ok(ToolOutcome::fail(
                ToolErrorCode::ValidationError,
                format!(
                    "Description is too long (max {} characters).",
                    MAX_DESCRIPTION_CHARS
                ),
            ));
        }
        changes.description = Some(description.to_string());
    }
    if let Some(raw) = &args.due_date {
        match parse_due_date(raw) {
            Ok(parsed) => changes.due_date = Some(parsed),
            Err(outcome) => return Ok(outcome),
        }
    }

    let task = store.apply_changes(task.id, changes).await?;
    Ok(ToolOutcome::ok(UpdateTaskResult {
        task_id: task.id,
        title: task.title.clone(),
        description: task.description.clone(),
        updated_at: task.updated_at,
        message: format!("Task '{}' updated successfully.", task.title),
    }))
}
