//! Subcommand implementations.

pub mod chat;
pub mod history;
pub mod init;
pub mod profile;
pub mod reindex;
pub mod reset;
pub mod tasks;

mod runtime;
