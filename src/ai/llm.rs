use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::agent::tools::{self, ToolDefinition, ToolRequest};
use crate::config::AppConfig;

const GROQ_CHAT_URL: &str = "https://api.groq.com/openai/v1/chat/completions";

/// A simple (role, content) pair for building the messages array.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// One capability turn: free text plus zero or more requested tool
/// invocations.
#[derive(Debug, Clone)]
pub struct ModelReply {
    pub text: String,
    pub tool_requests: Vec<ToolRequest>,
}

impl ModelReply {
    pub fn text_only(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_requests: Vec::new(),
        }
    }
}

/// Failure modes of one capability call.
#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("model call timed out after {0:?}")]
    Timeout(Duration),
    #[error("model endpoint error: {0}")]
    Transport(String),
    #[error("model returned an unusable reply: {0}")]
    Malformed(String),
}

impl CapabilityError {
    /// Timeouts and transport hiccups are worth a bounded retry; a reply we
    /// cannot decode is not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CapabilityError::Timeout(_) | CapabilityError::Transport(_)
        )
    }
}

/// The black-box language model collaborator: an ordered message list plus
/// the tool catalog in, text plus structured tool requests out.
#[async_trait]
pub trait ModelCapability: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ModelReply, CapabilityError>;
}

#[derive(Debug, Clone, Serialize)]
struct GroqMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct GroqResponse {
    choices: Vec<GroqChoice>,
}

#[derive(Debug, Deserialize)]
struct GroqChoice {
    message: GroqMessageContent,
}

#[derive(Debug, Deserialize)]
struct GroqMessageContent {
    content: String,
}

/// Groq-backed capability over the OpenAI-compatible chat completions API.
/// Tool requests travel as a JSON envelope in the completion text and are
/// parsed leniently on the way out.
pub struct LlmClient {
    client: Client,
    api_key: String,
    model: String,
    timeout: Duration,
}

impl LlmClient {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            api_key: config.groq_api_key.clone(),
            model: config.groq_model.clone(),
            timeout: Duration::from_secs(config.capability_timeout_secs),
        }
    }
}

#[async_trait]
impl ModelCapability for LlmClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ModelReply, CapabilityError> {
        let mut groq_messages: Vec<GroqMessage> = Vec::with_capacity(messages.len() + 1);
        if !tools.is_empty() {
            groq_messages.push(GroqMessage {
                role: "system".to_string(),
                content: tools::describe_for_prompt(tools),
            });
        }
        groq_messages.extend(messages.iter().map(|m| GroqMessage {
            role: m.role.clone(),
            content: m.content.clone(),
        }));

        let body = serde_json::json!({
            "model": self.model,
            "messages": groq_messages,
            "temperature": 0.7,
            "max_tokens": 2048,
        });

        let send = self
            .client
            .post(GROQ_CHAT_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send();

        // Hard cap on the whole call: exceeding it aborts this request only.
        let resp = tokio::time::timeout(self.timeout, send)
            .await
            .map_err(|_| CapabilityError::Timeout(self.timeout))?
            .map_err(|e| CapabilityError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let err_body = resp.text().await.unwrap_or_default();
            return Err(CapabilityError::Transport(format!(
                "{}: {}",
                status, err_body
            )));
        }

        let groq_resp: GroqResponse = resp
            .json()
            .await
            .map_err(|e| CapabilityError::Malformed(e.to_string()))?;

        let raw = groq_resp
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .unwrap_or_default();

        let (text, tool_requests) = tools::parse_tool_requests(&raw);
        Ok(ModelReply {
            text,
            tool_requests,
        })
    }
}
