use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::models::{
    CallerId, Conversation, Message, Role, StatusFilter, Task, TaskChanges, TaskDraft,
    ToolCallRecord,
};
use super::{TaskStore, TranscriptStore};

/// In-memory twin of the Postgres store, used by the test suite and by the
/// console when no database is configured. Semantics match `Database`
/// operation for operation, including soft deletes and sequence ordering.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

struct Inner {
    conversations: HashMap<Uuid, Conversation>,
    messages: Vec<Message>,
    tasks: Vec<Task>,
    next_task_id: i64,
    next_seq: i64,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            conversations: HashMap::new(),
            messages: Vec::new(),
            tasks: Vec::new(),
            next_task_id: 1,
            next_seq: 1,
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("memory store lock poisoned")
    }

    /// Audit access: the raw conversation row regardless of soft-delete
    /// state. Deletion must never remove rows.
    pub fn conversation_row(&self, id: Uuid) -> Option<Conversation> {
        self.lock().conversations.get(&id).cloned()
    }

    /// Audit access: the raw task row regardless of soft-delete state.
    pub fn task_row(&self, id: i64) -> Option<Task> {
        self.lock().tasks.iter().find(|t| t.id == id).cloned()
    }

    /// Total persisted messages for a conversation, in sequence order.
    pub fn message_rows(&self, conversation_id: Uuid) -> Vec<Message> {
        self.lock()
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl TranscriptStore for MemoryStore {
    async fn create_conversation(&self, owner: &CallerId) -> anyhow::Result<Conversation> {
        let now = Utc::now();
        let conv = Conversation {
            id: Uuid::new_v4(),
            owner_id: owner.as_str().to_string(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        self.lock().conversations.insert(conv.id, conv.clone());
        Ok(conv)
    }

    async fn get_conversation(
        &self,
        id: Uuid,
        owner: &CallerId,
    ) -> anyhow::Result<Option<Conversation>> {
        Ok(self
            .lock()
            .conversations
            .get(&id)
            .filter(|c| c.owner_id == owner.as_str() && c.deleted_at.is_none())
            .cloned())
    }

    async fn append_message(
        &self,
        conversation_id: Uuid,
        owner: &CallerId,
        role: Role,
        content: &str,
        tool_calls: Option<&[ToolCallRecord]>,
    ) -> anyhow::Result<Message> {
        let tool_calls_json = tool_calls.map(serde_json::to_value).transpose()?;
        let mut inner = self.lock();

        let now = Utc::now();
        {
            let conv = inner.conversations.get_mut(&conversation_id).ok_or_else(|| {
                anyhow::anyhow!("conversation {} does not exist", conversation_id)
            })?;
            conv.updated_at = now;
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;

        let msg = Message {
            id: Uuid::new_v4(),
            seq,
            conversation_id,
            owner_id: owner.as_str().to_string(),
            role: role.as_str().to_string(),
            content: content.to_string(),
            tool_calls: tool_calls_json,
            created_at: now,
        };
        inner.messages.push(msg.clone());
        Ok(msg)
    }

    async fn load_recent_messages(
        &self,
        conversation_id: Uuid,
        limit: u32,
    ) -> anyhow::Result<Vec<Message>> {
        let inner = self.lock();
        let mut msgs: Vec<Message> = inner
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect();
        msgs.sort_by_key(|m| m.seq);

        // Newest-first truncation to the cap, re-ordered oldest first.
        let skip = msgs.len().saturating_sub(limit as usize);
        Ok(msgs.split_off(skip))
    }

    async fn soft_delete_conversation(&self, id: Uuid, owner: &CallerId) -> anyhow::Result<bool> {
        let mut inner = self.lock();
        match inner.conversations.get_mut(&id) {
            Some(conv) if conv.owner_id == owner.as_str() && conv.deleted_at.is_none() => {
                let now = Utc::now();
                conv.deleted_at = Some(now);
                conv.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn insert_task(&self, owner: &CallerId, draft: TaskDraft) -> anyhow::Result<Task> {
        let mut inner = self.lock();
        let id = inner.next_task_id;
        inner.next_task_id += 1;

        let now = Utc::now();
        let task = Task {
            id,
            owner_id: owner.as_str().to_string(),
            title: draft.title,
            description: draft.description,
            completed: false,
            due_date: draft.due_date,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        inner.tasks.push(task.clone());
        Ok(task)
    }

    async fn fetch_task(&self, id: i64) -> anyhow::Result<Option<Task>> {
        Ok(self
            .lock()
            .tasks
            .iter()
            .find(|t| t.id == id && t.deleted_at.is_none())
            .cloned())
    }

    async fn list_tasks(
        &self,
        owner: &CallerId,
        filter: StatusFilter,
    ) -> anyhow::Result<Vec<Task>> {
        let inner = self.lock();
        let mut tasks: Vec<Task> = inner
            .tasks
            .iter()
            .filter(|t| t.owner_id == owner.as_str() && t.deleted_at.is_none())
            .filter(|t| match filter {
                StatusFilter::All => true,
                StatusFilter::Pending => !t.completed,
                StatusFilter::Completed => t.completed,
            })
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(tasks)
    }

    async fn mark_completed(&self, id: i64) -> anyhow::Result<Task> {
        let mut inner = self.lock();
        let task = inner
            .tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| anyhow::anyhow!("task {} does not exist", id))?;
        task.completed = true;
        task.updated_at = Utc::now();
        Ok(task.clone())
    }

    async fn apply_changes(&self, id: i64, changes: TaskChanges) -> anyhow::Result<Task> {
        let mut inner = self.lock();
        let task = inner
            .tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| anyhow::anyhow!("task {} does not exist", id))?;
        if let Some(title) = changes.title {
            task.title = title;
        }
        if let Some(description) = changes.description {
            task.description = description;
        }
        if let Some(due_date) = changes.due_date {
            task.due_date = Some(due_date);
        }
        task.updated_at = Utc::now();
        Ok(task.clone())
    }

    async fn soft_delete_task(&self, id: i64) -> anyhow::Result<Task> {
        let mut inner = self.lock();
        let task = inner
            .tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| anyhow::anyhow!("task {} does not exist", id))?;
        let now = Utc::now();
        task.deleted_at = Some(now);
        task.updated_at = now;
        Ok(task.clone())
    }
}
