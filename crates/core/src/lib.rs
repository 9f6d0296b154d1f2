pub mod agent;
pub mod conversation;
pub mod prompt;
pub mod session;
pub mod tools;

#[cfg(test)]
mod testing;

pub use agent::{run_turn, AgentConfig, AgentEvent};
pub use conversation::Conversation;
pub use session::AssistantSession;
pub use tools::snapshot::SnapshotExecutor;
pub use tools::{ResourceType, ToolCall, ToolError, ToolExecutor, ToolOutput};
