use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub groq_api_key: String,
    pub groq_model: String,

    /// Postgres connection string. When unset the console falls back to the
    /// in-memory store (see `main.rs`).
    pub database_url: Option<String>,

    /// Max messages loaded as model context per request
    pub history_limit: u32,

    /// Hard timeout for one model capability call, in seconds
    pub capability_timeout_secs: u64,
    /// Extra attempts after a transient capability failure
    pub capability_retries: u32,

    /// Per-caller sliding-window limits, counted per minute
    pub send_limit_per_minute: u32,
    pub read_limit_per_minute: u32,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            groq_api_key: std::env::var("GROQ_API_KEY")?,
            groq_model: std::env::var("GROQ_MODEL")
                .unwrap_or_else(|_| "llama-3.3-70b-versatile".to_string()),
            database_url: std::env::var("DATABASE_URL").ok(),
            history_limit: std::env::var("HISTORY_LIMIT")
                .unwrap_or_else(|_| "50".to_string())
                .parse()
                .unwrap_or(50),
            capability_timeout_secs: std::env::var("CAPABILITY_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .unwrap_or(30),
            capability_retries: std::env::var("CAPABILITY_RETRIES")
                .unwrap_or_else(|_| "2".to_string())
                .parse()
                .unwrap_or(2),
            send_limit_per_minute: std::env::var("SEND_LIMIT_PER_MINUTE")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .unwrap_or(10),
            read_limit_per_minute: std::env::var("READ_LIMIT_PER_MINUTE")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .unwrap_or(30),
        })
    }
}
