use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ai::llm::{ChatMessage, ModelCapability, ModelReply};
use crate::config::AppConfig;
use crate::db::models::{CallerId, Role, ToolCallRecord};
use crate::db::{TaskStore, TranscriptStore};
use crate::error::{AppError, Resource};
use crate::ratelimit::{RateLimiter, Tier};

use super::context;
use super::executor;
use super::tools::{self, ToolDefinition};

pub const MAX_MESSAGE_CHARS: usize = 2000;
pub const DEFAULT_HISTORY_LIMIT: u32 = 50;
pub const MAX_HISTORY_LIMIT: u32 = 100;

/// Pipeline knobs, split out from `AppConfig` so the orchestrator never
/// sees secrets or connection strings.
#[derive(Debug, Clone)]
pub struct ChatSettings {
    /// Max messages loaded as model context per request
    pub history_limit: u32,
    /// Extra attempts after a transient capability failure
    pub capability_retries: u32,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            history_limit: DEFAULT_HISTORY_LIMIT,
            capability_retries: 2,
        }
    }
}

impl ChatSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            history_limit: config.history_limit,
            capability_retries: config.capability_retries,
        }
    }
}

/// One inbound send request. The caller identity arrives separately and is
/// never part of the request body.
#[derive(Debug, Clone, Deserialize)]
pub struct SendRequest {
    pub conversation_id: Option<Uuid>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SendReply {
    pub conversation_id: Uuid,
    pub response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallRecord>>,
}

/// One message in a history read.
#[derive(Debug, Clone, Serialize)]
pub struct MessageView {
    pub id: Uuid,
    pub role: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallRecord>>,
    pub created_at: DateTime<Utc>,
}

/// The per-request pipeline over shared collaborators.
///
/// Holds only borrows and plain settings, no owned mutable state, so a
/// fresh value per request behaves identically to a long-lived one and any
/// server instance can serve any conversation.
pub struct Orchestrator<'a> {
    pub transcripts: &'a dyn TranscriptStore,
    pub tasks: &'a dyn TaskStore,
    pub capability: &'a dyn ModelCapability,
    pub limiter: &'a RateLimiter,
    pub settings: ChatSettings,
}

impl Orchestrator<'_> {
    /// Drive one message through the pipeline: resolve the conversation,
    /// persist the inbound text, invoke the capability with bounded context,
    /// execute any requested tools, persist the outbound message, reply.
    pub async fn send_message(
        &self,
        caller: &CallerId,
        request: SendRequest,
    ) -> Result<SendReply, AppError> {
        self.check_limit(caller, Tier::Send)?;

        // ── 1. Validate the inbound text ───────────────────────────────
        let text = request.message.trim();
        if text.is_empty() {
            return Err(AppError::validation("message", "Message cannot be empty."));
        }
        if text.chars().count() > MAX_MESSAGE_CHARS {
            return Err(AppError::validation(
                "message",
                format!("Message is too long (max {} characters).", MAX_MESSAGE_CHARS),
            ));
        }

        // ── 2. Resolve or create the conversation ──────────────────────
        let conversation = match request.conversation_id {
            Some(id) => self
                .transcripts
                .get_conversation(id, caller)
                .await
                .map_err(AppError::Internal)?
                .ok_or(AppError::NotFound(Resource::Conversation))?,
            None => self
                .transcripts
                .create_conversation(caller)
                .await
                .map_err(AppError::Internal)?,
        };

        // ── 3. Persist the user message before the model can fail ──────
        self.transcripts
            .append_message(conversation.id, caller, Role::User, text, None)
            .await
            .map_err(AppError::Internal)?;

        // ── 4. Assemble bounded context (includes the new message) ─────
        let recent = self
            .transcripts
            .load_recent_messages(conversation.id, self.settings.history_limit)
            .await
            .map_err(AppError::Internal)?;
        let mut messages = context::assemble(&recent);

        // ── 5. Invoke the model capability ─────────────────────────────
        let catalog = tools::catalog();
        let reply = self.invoke_capability(&messages, &catalog).await?;

        // ── 6. Execute requested tools with the verified caller ────────
        let mut records: Vec<ToolCallRecord> = Vec::new();
        let mut response_text = reply.text.clone();

        if !reply.tool_requests.is_empty() {
            for tool_request in &reply.tool_requests {
                let outcome = executor::execute(self.tasks, caller, tool_request).await;
                records.push(ToolCallRecord {
                    tool: tool_request.name.clone(),
                    args: tool_request.arguments.clone(),
                    result: serde_json::to_value(&outcome).unwrap_or(serde_json::Value::Null),
                });
            }

            // ── 7. One closing turn to phrase the outcome ──────────────
            // The side effects already happened, so a capability failure
            // here degrades to a deterministic summary instead of erroring.
            context::push_tool_results(&mut messages, &records);
            match self.invoke_capability(&messages, &[]).await {
                Ok(closing) if !closing.text.trim().is_empty() => {
                    response_text = closing.text.trim().to_string();
                }
                Ok(_) => response_text = summarize_outcomes(&records),
                Err(e) => {
                    tracing::warn!("closing capability turn failed after tool execution: {}", e);
                    response_text = summarize_outcomes(&records);
                }
            }
        } else if response_text.trim().is_empty() {
            response_text = context::EMPTY_REPLY_FALLBACK.to_string();
        }

        // ── 8. Persist the assistant message with its tool records ─────
        let tool_calls = if records.is_empty() {
            None
        } else {
            Some(records)
        };
        self.transcripts
            .append_message(
                conversation.id,
                caller,
                Role::Assistant,
                &response_text,
                tool_calls.as_deref(),
            )
            .await
            .map_err(AppError::Internal)?;

        Ok(SendReply {
            conversation_id: conversation.id,
            response: response_text,
            tool_calls,
        })
    }

    /// Ordered message history for a conversation the caller owns.
    pub async fn read_history(
        &self,
        caller: &CallerId,
        conversation_id: Uuid,
        limit: Option<u32>,
    ) -> Result<Vec<MessageView>, AppError> {
        self.check_limit(caller, Tier::Read)?;

        let limit = limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
        if limit == 0 || limit > MAX_HISTORY_LIMIT {
            return Err(AppError::validation(
                "limit",
                format!("limit must be between 1 and {}.", MAX_HISTORY_LIMIT),
            ));
        }

        self.transcripts
            .get_conversation(conversation_id, caller)
            .await
            .map_err(AppError::Internal)?
            .ok_or(AppError::NotFound(Resource::Conversation))?;

        let messages = self
            .transcripts
            .load_recent_messages(conversation_id, limit)
            .await
            .map_err(AppError::Internal)?;

        Ok(messages
            .iter()
            .map(|m| MessageView {
                id: m.id,
                role: m.role.clone(),
                content: m.content.clone(),
                tool_calls: m.tool_call_records(),
                created_at: m.created_at,
            })
            .collect())
    }

    /// Soft-delete a conversation the caller owns. Absent and foreign-owned
    /// report the same not-found.
    pub async fn delete_conversation(
        &self,
        caller: &CallerId,
        conversation_id: Uuid,
    ) -> Result<(), AppError> {
        let deleted = self
            .transcripts
            .soft_delete_conversation(conversation_id, caller)
            .await
            .map_err(AppError::Internal)?;
        if deleted {
            Ok(())
        } else {
            Err(AppError::NotFound(Resource::Conversation))
        }
    }

    fn check_limit(&self, caller: &CallerId, tier: Tier) -> Result<(), AppError> {
        self.limiter
            .check(caller.as_str(), tier)
            .map_err(|retry_after| AppError::RateLimited {
                retry_after_secs: retry_after.as_secs().max(1),
            })
    }

    async fn invoke_capability(
        &self,
        messages: &[ChatMessage],
        catalog: &[ToolDefinition],
    ) -> Result<ModelReply, AppError> {
        let mut attempt = 0u32;
        loop {
            match self.capability.complete(messages, catalog).await {
                Ok(reply) => return Ok(reply),
                Err(e) if e.is_transient() && attempt < self.settings.capability_retries => {
                    attempt += 1;
                    tracing::warn!("capability call failed (attempt {}): {}", attempt, e);
                }
                Err(e) => {
                    tracing::error!("capability unavailable: {}", e);
                    return Err(AppError::CapabilityUnavailable(e.to_string()));
                }
            }
        }
    }
}

/// Deterministic closing text when the capability cannot phrase one:
/// stitch the outcome messages together so the user still learns what
/// happened.
fn summarize_outcomes(records: &[ToolCallRecord]) -> String {
    let mut lines = Vec::with_capacity(records.len());
    for record in records {
        let success = record
            .result
            .get("success")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let message = record
            .result
            .get("message")
            .and_then(|v| v.as_str())
            .or_else(|| record.result.get("error").and_then(|v| v.as_str()));
        match message {
            Some(m) => lines.push(m.to_string()),
            None if success => lines.push(format!("{} succeeded.", record.tool)),
            None => lines.push(format!("{} failed.", record.tool)),
        }
    }
    lines.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_summary_prefers_tool_messages() {
        let records = vec![
            ToolCallRecord {
                tool: "add_task".to_string(),
                args: serde_json::json!({"title": "buy milk"}),
                result: serde_json::json!({
                    "success": true,
                    "message": "Task 'buy milk' created successfully."
                }),
            },
            ToolCallRecord {
                tool: "delete_task".to_string(),
                args: serde_json::json!({"task_id": 9}),
                result: serde_json::json!({
                    "success": false,
                    "error": "Task not found",
                    "error_code": "TASK_NOT_FOUND"
                }),
            },
        ];
        let summary = summarize_outcomes(&records);
        assert!(summary.contains("created successfully"));
        assert!(summary.contains("Task not found"));
    }
}
