use crate::ai::llm::ChatMessage;
use crate::db::models::{Message, ToolCallRecord};

/// Fixed assistant persona, sent as the first context message on every
/// request. The tool-calling protocol itself is appended by the capability
/// client from the catalog.
pub const SYSTEM_PROMPT: &str = "\
You are TodoAssistant, a friendly and helpful assistant for managing a personal task list.

You can add, list, complete, delete, and update the user's tasks using your tools.

Guidelines:
- Be concise and friendly.
- When the user wants to add, create, or make a task, use add_task.
- When the user wants to see their tasks, use list_tasks.
- When the user says a task is done or finished, use complete_task.
- When the user wants to remove a task, use delete_task.
- When the user wants to change or rename a task, use update_task.
- If the user's intent is ambiguous (for example, several tasks could match), \
ask a clarifying question instead of calling a tool.
- When listing tasks, include their IDs so the user can reference them.
- If a tool reports an error, explain it helpfully in plain language.";

/// Reply used when the model returns no usable text at all.
pub const EMPTY_REPLY_FALLBACK: &str = "I'm not sure how to help with that. You can ask me to \
                                        add, list, complete, delete, or update tasks.";

/// Map bounded, oldest-first history into the role-tagged context for the
/// capability. Past tool records are not replayed; only the spoken turns.
pub fn assemble(history: &[Message]) -> Vec<ChatMessage> {
    let mut out = Vec::with_capacity(history.len() + 1);
    out.push(ChatMessage::system(SYSTEM_PROMPT));
    for m in history {
        out.push(ChatMessage {
            role: m.role.clone(),
            content: m.content.clone(),
        });
    }
    out
}

/// Extend the context with executed tool results so the capability can
/// phrase the closing reply. No further tool calls are honored after this.
pub fn push_tool_results(context: &mut Vec<ChatMessage>, records: &[ToolCallRecord]) {
    let results = serde_json::to_string(records).unwrap_or_else(|_| "[]".to_string());
    context.push(ChatMessage::system(format!(
        "You invoked tools for the user's last message. The results were: {}\n\
         Reply to the user with one or two short sentences summarizing what happened, \
         including anything that failed. Do not call any more tools.",
        results
    )));
}
