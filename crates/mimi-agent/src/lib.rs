//! The LLM side of the runtime: provider abstraction, tool registry,
//! system-prompt assembly, user-content hints, and the turn orchestrator
//! that drives one inbound message to one outbound response.

pub mod anthropic;
pub mod hints;
pub mod orchestrator;
pub mod prompt;
pub mod provider;
pub mod stats;
pub mod tools;

pub use anthropic::AnthropicModel;
pub use orchestrator::Orchestrator;
pub use provider::{ChatMessage, ChatModel, ChatReply, ContentBlock, ProviderError};
pub use stats::{StatsTracker, TurnStats};
pub use tools::ToolRegistry;
