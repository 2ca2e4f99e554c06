#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use todo_assistant::agent::tools::{ToolDefinition, ToolRequest};
use todo_assistant::agent::{ChatSettings, Orchestrator};
use todo_assistant::ai::llm::{CapabilityError, ChatMessage, ModelCapability, ModelReply};
use todo_assistant::db::memory::MemoryStore;
use todo_assistant::db::models::CallerId;
use todo_assistant::ratelimit::RateLimiter;

/// Scripted stand-in for the model capability. Pops one queued reply per
/// call and records how many context messages each call received. An empty
/// queue yields a bland text reply so unrelated tests don't have to script
/// every turn.
pub struct ScriptedCapability {
    replies: Mutex<VecDeque<Result<ModelReply, CapabilityError>>>,
    context_sizes: Mutex<Vec<usize>>,
}

impl ScriptedCapability {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            context_sizes: Mutex::new(Vec::new()),
        }
    }

    pub fn push_text(&self, text: &str) {
        self.push_reply(ModelReply::text_only(text));
    }

    pub fn push_tool_call(&self, text: &str, tool: &str, args: serde_json::Value) {
        self.push_reply(ModelReply {
            text: text.to_string(),
            tool_requests: vec![ToolRequest {
                name: tool.to_string(),
                arguments: args,
            }],
        });
    }

    pub fn push_reply(&self, reply: ModelReply) {
        self.replies.lock().unwrap().push_back(Ok(reply));
    }

    pub fn push_failure(&self, error: CapabilityError) {
        self.replies.lock().unwrap().push_back(Err(error));
    }

    /// Number of capability calls made so far.
    pub fn calls(&self) -> usize {
        self.context_sizes.lock().unwrap().len()
    }

    /// Context length (message count) each call received, in order.
    pub fn context_sizes(&self) -> Vec<usize> {
        self.context_sizes.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelCapability for ScriptedCapability {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        _tools: &[ToolDefinition],
    ) -> Result<ModelReply, CapabilityError> {
        self.context_sizes.lock().unwrap().push(messages.len());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(ModelReply::text_only("Okay.")))
    }
}

/// Shared collaborators for one test: an in-memory store standing in for
/// Postgres, a scripted capability, and the production rate-limit tiers.
pub struct Harness {
    pub store: MemoryStore,
    pub capability: ScriptedCapability,
    pub limiter: RateLimiter,
    pub settings: ChatSettings,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            store: MemoryStore::new(),
            capability: ScriptedCapability::new(),
            limiter: RateLimiter::per_minute(10, 30),
            settings: ChatSettings::default(),
        }
    }

    pub fn with_limiter(limiter: RateLimiter) -> Self {
        Self {
            limiter,
            ..Self::new()
        }
    }

    /// A fresh orchestrator over the shared collaborators, the way a new
    /// server worker would build one. Nothing carries over between calls.
    pub fn orchestrator(&self) -> Orchestrator<'_> {
        Orchestrator {
            transcripts: &self.store,
            tasks: &self.store,
            capability: &self.capability,
            limiter: &self.limiter,
            settings: self.settings.clone(),
        }
    }
}

pub fn caller(id: &str) -> CallerId {
    CallerId::verified(id).expect("verified caller")
}
