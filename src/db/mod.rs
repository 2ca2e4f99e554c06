pub mod memory;
pub mod models;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use self::models::{
    CallerId, Conversation, Message, Role, StatusFilter, Task, TaskChanges, TaskDraft,
    ToolCallRecord,
};

/// Conversation and message persistence.
///
/// Every call goes straight to the backing store; there is no cache, so any
/// server instance can pick up any conversation.
#[async_trait]
pub trait TranscriptStore: Send + Sync {
    async fn create_conversation(&self, owner: &CallerId) -> anyhow::Result<Conversation>;

    /// `None` covers absent, soft-deleted, and foreign-owned alike; callers
    /// cannot tell the cases apart.
    async fn get_conversation(
        &self,
        id: Uuid,
        owner: &CallerId,
    ) -> anyhow::Result<Option<Conversation>>;

    /// Appends a message and bumps the conversation's `updated_at`.
    async fn append_message(
        &self,
        conversation_id: Uuid,
        owner: &CallerId,
        role: Role,
        content: &str,
        tool_calls: Option<&[ToolCallRecord]>,
    ) -> anyhow::Result<Message>;

    /// The newest `limit` messages of a conversation, returned oldest first.
    async fn load_recent_messages(
        &self,
        conversation_id: Uuid,
        limit: u32,
    ) -> anyhow::Result<Vec<Message>>;

    /// Sets `deleted_at`; the row stays behind for audit. Returns false when
    /// nothing matched (absent, already deleted, or not owned).
    async fn soft_delete_conversation(&self, id: Uuid, owner: &CallerId) -> anyhow::Result<bool>;
}

/// Task CRUD substrate. Reads exclude soft-deleted rows; the ownership
/// decision itself lives in the tool layer, which fetches and compares
/// before mutating.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn insert_task(&self, owner: &CallerId, draft: TaskDraft) -> anyhow::Result<Task>;

    /// Active (not soft-deleted) row by id, any owner.
    async fn fetch_task(&self, id: i64) -> anyhow::Result<Option<Task>>;

    async fn list_tasks(
        &self,
        owner: &CallerId,
        filter: StatusFilter,
    ) -> anyhow::Result<Vec<Task>>;

    async fn mark_completed(&self, id: i64) -> anyhow::Result<Task>;

    async fn apply_changes(&self, id: i64, changes: TaskChanges) -> anyhow::Result<Task>;

    /// Sets `deleted_at`; never removes the row.
    async fn soft_delete_task(&self, id: i64) -> anyhow::Result<Task>;
}

#[derive(Debug, Clone)]
pub struct Database {
    pub pool: PgPool,
}

impl Database {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> anyhow::Result<()> {
        // Each CREATE TABLE must be a separate query (Postgres doesn't allow
        // multiple commands in a single prepared statement).

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS conversations (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                owner_id TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                deleted_at TIMESTAMPTZ
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS messages (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                seq BIGSERIAL,
                conversation_id UUID NOT NULL REFERENCES conversations(id),
                owner_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                tool_calls JSONB,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS tasks (
                id BIGSERIAL PRIMARY KEY,
                owner_id TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                completed BOOLEAN NOT NULL DEFAULT FALSE,
                due_date TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                deleted_at TIMESTAMPTZ
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_conv_seq ON messages(conversation_id, seq)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_conversations_owner ON conversations(owner_id, deleted_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_tasks_owner_active ON tasks(owner_id, deleted_at, created_at DESC)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl TranscriptStore for Database {
    async fn create_conversation(&self, owner: &CallerId) -> anyhow::Result<Conversation> {
        let conv = sqlx::query_as::<_, Conversation>(
            "INSERT INTO conversations (owner_id) VALUES ($1) RETURNING *",
        )
        .bind(owner.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(conv)
    }

    async fn get_conversation(
        &self,
        id: Uuid,
        owner: &CallerId,
    ) -> anyhow::Result<Option<Conversation>> {
        let conv = sqlx::query_as::<_, Conversation>(
            "SELECT * FROM conversations WHERE id = $1 AND owner_id = $2 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(owner.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(conv)
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

        let msg = sqlx::query_as::<_, Message>(
            r#"
            INSERT INTO messages (conversation_id, owner_id, role, content, tool_calls)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(conversation_id)
        .bind(owner.as_str())
        .bind(role.as_str())
        .bind(content)
        .bind(tool_calls_json)
        .fetch_one(&self.pool)
        .await?;

        // Touch the conversation's updated_at
        sqlx::query("UPDATE conversations SET updated_at = NOW() WHERE id = $1")
            .bind(conversation_id)
            .execute(&self.pool)
            .await?;

        Ok(msg)
    }

    async fn load_recent_messages(
        &self,
        conversation_id: Uuid,
        limit: u32,
    ) -> anyhow::Result<Vec<Message>> {
        // Newest-first truncation to the cap, re-ordered oldest first.
        let msgs = sqlx::query_as::<_, Message>(
            r#"
            SELECT * FROM (
                SELECT * FROM messages
                WHERE conversation_id = $1
                ORDER BY seq DESC
                LIMIT $2
            ) recent
            ORDER BY seq ASC
            "#,
        )
        .bind(conversation_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(msgs)
    }

    async fn soft_delete_conversation(&self, id: Uuid, owner: &CallerId) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE conversations
            SET deleted_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND owner_id = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .bind(owner.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl TaskStore for Database {
    async fn insert_task(&self, owner: &CallerId, draft: TaskDraft) -> anyhow::Result<Task> {
        let task = sqlx::query_as::<_, Task>(
            r#"
            INSERT INTO tasks (owner_id, title, description, due_date)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(owner.as_str())
        .bind(&draft.title)
        .bind(&draft.description)
        .bind(draft.due_date)
        .fetch_one(&self.pool)
        .await?;
        Ok(task)
    }

    async fn fetch_task(&self, id: i64) -> anyhow::Result<Option<Task>> {
        let task = sqlx::query_as::<_, Task>(
            "SELECT * FROM tasks WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(task)
    }

    async fn list_tasks(
        &self,
        owner: &CallerId,
        filter: StatusFilter,
    ) -> anyhow::Result<Vec<Task>> {
        let query = match filter {
            StatusFilter::All => {
                "SELECT * FROM tasks WHERE owner_id = $1 AND deleted_at IS NULL \
                 ORDER BY created_at DESC, id DESC"
            }
            StatusFilter::Pending => {
                "SELECT * FROM tasks WHERE owner_id = $1 AND deleted_at IS NULL \
                 AND completed = FALSE ORDER BY created_at DESC, id DESC"
            }
            StatusFilter::Completed => {
                "SELECT * FROM tasks WHERE owner_id = $1 AND deleted_at IS NULL \
                 AND completed = TRUE ORDER BY created_at DESC, id DESC"
            }
        };
        let tasks = sqlx::query_as::<_, Task>(query)
            .bind(owner.as_str())
            .fetch_all(&self.pool)
            .await?;
        Ok(tasks)
    }

    async fn mark_completed(&self, id: i64) -> anyhow::Result<Task> {
        let task = sqlx::query_as::<_, Task>(
            "UPDATE tasks SET completed = TRUE, updated_at = NOW() WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        Ok(task)
    }

    async fn apply_changes(&self, id: i64, changes: TaskChanges) -> anyhow::Result<Task> {
        let task = sqlx::query_as::<_, Task>(
            r#"
            UPDATE tasks
            SET title = COALESCE($2, title),
                description = COALESCE($3, description),
                due_date = COALESCE($4, due_date),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(changes.title)
        .bind(changes.description)
        .bind(changes.due_date)
        .fetch_one(&self.pool)
        .await?;
        Ok(task)
    }

    async fn soft_delete_task(&self, id: i64) -> anyhow::Result<Task> {
        let task = sqlx::query_as::<_, Task>(
            "UPDATE tasks SET deleted_at = NOW(), updated_at = NOW() WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        Ok(task)
    }
}
