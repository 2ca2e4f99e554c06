use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use todo_assistant::agent::{ChatSettings, Orchestrator, SendRequest};
use todo_assistant::ai::llm::LlmClient;
use todo_assistant::config::AppConfig;
use todo_assistant::db::memory::MemoryStore;
use todo_assistant::db::models::CallerId;
use todo_assistant::db::{Database, TaskStore, TranscriptStore};
use todo_assistant::ratelimit::RateLimiter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Starting TodoAssistant console...");

    // Load config
    let config = AppConfig::from_env()?;
    tracing::info!("Config loaded. Model: {}", config.groq_model);

    // The console stands in for the upstream identity verifier: one fixed,
    // pre-verified caller for the whole session.
    let caller = CallerId::verified(
        std::env::var("CALLER_ID").unwrap_or_else(|_| "console-user".to_string()),
    )?;

    // Initialize the store: Postgres when configured, in-memory otherwise
    let database = match &config.database_url {
        Some(url) => {
            let db = Database::connect(url).await?;
            db.run_migrations().await?;
            tracing::info!("Database connected and migrations applied.");
            Some(db)
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using the in-memory store.");
            None
        }
    };
    let memory = MemoryStore::new();

    let llm = LlmClient::new(&config);
    let limiter =
        RateLimiter::per_minute(config.send_limit_per_minute, config.read_limit_per_minute);
    let settings = ChatSettings::from_config(&config);

    println!("TodoAssistant console. Type a message, or 'quit' to exit.");

    let mut conversation_id = None;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input == "quit" || input == "exit" {
            break;
        }

        // A fresh orchestrator per message, exactly as a server worker
        // would build one: all state lives behind the store handles.
        let orchestrator = Orchestrator {
            transcripts: database
                .as_ref()
                .map(|db| db as &dyn TranscriptStore)
                .unwrap_or(&memory),
            tasks: database
                .as_ref()
                .map(|db| db as &dyn TaskStore)
                .unwrap_or(&memory),
            capability: &llm,
            limiter: &limiter,
            settings: settings.clone(),
        };

        let request = SendRequest {
            conversation_id,
            message: input.to_string(),
        };
        match orchestrator.send_message(&caller, request).await {
            Ok(reply) => {
                conversation_id = Some(reply.conversation_id);
                if let Some(calls) = &reply.tool_calls {
                    for call in calls {
                        tracing::info!("tool {} -> {}", call.tool, call.result);
                    }
                }
                println!("{}", reply.response);
            }
            Err(e) => {
                println!("[{}] {}", e.code(), e.user_message());
            }
        }
    }

    Ok(())
}
