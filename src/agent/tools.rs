use serde::{Deserialize, Serialize};

use crate::db::models::StatusFilter;

/// Defines a tool the model capability can invoke.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// A raw tool invocation requested by the model: a name and a bag of
/// arguments. Validated into [`ToolInvocation`] before anything runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRequest {
    pub name: String,
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddTaskArgs {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub due_date: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListTasksArgs {
    #[serde(default)]
    pub status: StatusFilter,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompleteTaskArgs {
    pub task_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeleteTaskArgs {
    pub task_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateTaskArgs {
    pub task_id: i64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub due_date: Option<String>,
}

/// The closed set of task operations. Adding or removing a tool is a
/// compile-time-checked change: the executor matches exhaustively.
#[derive(Debug, Clone)]
pub enum ToolInvocation {
    AddTask(AddTaskArgs),
    ListTasks(ListTasksArgs),
    CompleteTask(CompleteTaskArgs),
    DeleteTask(DeleteTaskArgs),
    UpdateTask(UpdateTaskArgs),
}

impl ToolInvocation {
    /// Validate a raw request into the typed union. The error string is
    /// safe to hand back to the model as a structured failure.
    pub fn parse(request: &ToolRequest) -> Result<Self, String> {
        let args = if request.arguments.is_null() {
            serde_json::json!({})
        } else {
            request.arguments.clone()
        };

        match request.name.as_str() {
            "add_task" => serde_json::from_value(args)
                .map(ToolInvocation::AddTask)
                .map_err(|e| format!("Invalid arguments for add_task: {}", e)),
            "list_tasks" => serde_json::from_value(args)
                .map(ToolInvocation::ListTasks)
                .map_err(|e| format!("Invalid arguments for list_tasks: {}", e)),
            "complete_task" => serde_json::from_value(args)
                .map(ToolInvocation::CompleteTask)
                .map_err(|e| format!("Invalid arguments for complete_task: {}", e)),
            "delete_task" => serde_json::from_value(args)
                .map(ToolInvocation::DeleteTask)
                .map_err(|e| format!("Invalid arguments for delete_task: {}", e)),
            "update_task" => serde_json::from_value(args)
                .map(ToolInvocation::UpdateTask)
                .map_err(|e| format!("Invalid arguments for update_task: {}", e)),
            other => Err(format!("Unknown tool: {}", other)),
        }
    }
}

/// The fixed five-tool catalog handed to the model capability.
pub fn catalog() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "add_task".to_string(),
            description: "Create a new todo task for the user.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "title": {
                        "type": "string",
                        "description": "The task title (required, 1-200 characters)"
                    },
                    "description": {
                        "type": "string",
                        "description": "Optional task description (up to 1000 characters)"
                    },
                    "due_date": {
                        "type": "string",
                        "description": "Optional due date in ISO format (YYYY-MM-DD)"
                    }
                },
                "required": ["title"]
            }),
        },
        ToolDefinition {
            name: "list_tasks".to_string(),
            description: "List the user's todo tasks, optionally filtered by status.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "status": {
                        "type": "string",
                        "enum": ["all", "pending", "completed"],
                        "description": "Filter by status (defaults to 'all')"
                    }
                }
            }),
        },
        ToolDefinition {
            name: "complete_task".to_string(),
            description: "Mark a task as completed by its ID.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "task_id": {
                        "type": "integer",
                        "description": "The ID of the task to complete"
                    }
                },
                "required": ["task_id"]
            }),
        },
        ToolDefinition {
            name: "delete_task".to_string(),
            description: "Delete a task by its ID.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "task_id": {
                        "type": "integer",
                        "description": "The ID of the task to delete"
                    }
                },
                "required": ["task_id"]
            }),
        },
        ToolDefinition {
            name: "update_task".to_string(),
            description: "Update an existing task's title, description, or due date.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "task_id": {
                        "type": "integer",
                        "description": "The ID of the task to update"
                    },
                    "title": {
                        "type": "string",
                        "description": "New title (optional)"
                    },
                    "description": {
                        "type": "string",
                        "description": "New description (optional)"
                    },
                    "due_date": {
                        "type": "string",
                        "description": "New due date in ISO format YYYY-MM-DD (optional)"
                    }
                },
                "required": ["task_id"]
            }),
        },
    ]
}

/// Generate a human-readable description of the catalog for the system
/// prompt, including the JSON envelope the model must use to call a tool.
pub fn describe_for_prompt(tools: &[ToolDefinition]) -> String {
    let mut desc = String::from(
        "You have access to the following tools. To use a tool, respond with ONLY a JSON \
         object in the format: {\"tool\": \"tool_name\", \"args\": {...}}. To use several \
         tools in one turn, respond with a JSON array of such objects.\n\n",
    );

    for tool in tools {
        desc.push_str(&format!(
            "- **{}**: {}\n  Parameters: {}\n\n",
            tool.name,
            tool.description,
            serde_json::to_string_pretty(&tool.parameters).unwrap_or_default()
        ));
    }

    desc
}

#[derive(Debug, Deserialize)]
struct RawCall {
    tool: String,
    #[serde(default)]
    args: serde_json::Value,
}

impl From<RawCall> for ToolRequest {
    fn from(raw: RawCall) -> Self {
        ToolRequest {
            name: raw.tool,
            arguments: raw.args,
        }
    }
}

/// Try to extract tool requests from the model's text reply.
///
/// Returns the leading free text (often empty when the reply is a bare
/// envelope) and the parsed requests. Anything that does not parse as the
/// envelope is treated as plain text.
pub fn parse_tool_requests(text: &str) -> (String, Vec<ToolRequest>) {
    let trimmed = text.trim();

    // Array envelope: [{"tool": ..., "args": {...}}, ...]
    if let (Some(start), Some(end)) = (trimmed.find('['), trimmed.rfind(']')) {
        if start < end {
            if let Ok(raw) = serde_json::from_str::<Vec<RawCall>>(&trimmed[start..=end]) {
                if !raw.is_empty() {
                    let lead = trimmed[..start].trim().to_string();
                    return (lead, raw.into_iter().map(Into::into).collect());
                }
            }
        }
    }

    // Single-object envelope: {"tool": ..., "args": {...}}
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            if let Ok(raw) = serde_json::from_str::<RawCall>(&trimmed[start..=end]) {
                let lead = trimmed[..start].trim().to_string();
                return (lead, vec![raw.into()]);
            }
        }
    }

    (trimmed.to_string(), Vec::new())
}
