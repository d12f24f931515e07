//! LLM Provider implementations for Buddy.
//!
//! All providers implement the `buddy_core::Provider` trait.
//! [`build_from_config`] assembles the model fallback chain.

pub mod builder;
pub mod fallback;
pub mod openai_compat;

pub use builder::build_from_config;
pub use fallback::FallbackProvider;
pub use openai_compat::OpenAiCompatProvider;
