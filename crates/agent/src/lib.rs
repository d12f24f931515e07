//! The Buddy request pipeline.
//!
//! Each user message goes through the same steps:
//!
//! 1. **Assemble** recent and semantically relevant turns within a token
//!    budget ([`ContextAssembler`])
//! 2. **Compose** a prompt around them and ask the model ([`ResponseComposer`])
//! 3. **Write** the finished turn to the store and the index ([`MemoryWriter`])
//! 4. **Capture** tasks and profile facts ([`TaskManager`], [`ProfileManager`])
//!
//! [`Assistant`] wires the steps together behind one call.

pub mod assistant;
pub mod composer;
pub mod context;
pub mod conversation;
pub mod profile;
pub mod tasks;
pub mod writer;

#[cfg(test)]
mod test_helpers;

pub use assistant::{Assistant, AssistantError, AssistantReply, AssistantSettings};
pub use composer::{ComposeRequest, ComposerConfig, Composition, ResponseComposer, build_messages};
pub use conversation::{ConversationLog, ResetError, ResetReport};
pub use context::{
    AssemblerConfig, ContextAssembler, FillReport, HeuristicEstimator, TiktokenEstimator,
    TokenEstimator, estimator_for, fill_budget,
};
pub use profile::{ProfileError, ProfileManager};
pub use tasks::{TaskManager, extract_tasks};
pub use writer::{IndexingError, MemoryWriter, ReindexReport};
