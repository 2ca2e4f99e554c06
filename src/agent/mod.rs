pub mod context;
pub mod executor;
pub mod orchestrator;
pub mod tools;

pub use self::executor::{ToolErrorCode, ToolOutcome};
pub use self::orchestrator::{ChatSettings, MessageView, Orchestrator, SendReply, SendRequest};
