//! `buddy reset` — Forget the conversation with a user.

use buddy_agent::ConversationLog;

use super::runtime::{self, CmdResult};

pub async fn run(user: &str) -> CmdResult {
    let config = runtime::load_config()?;
    let memory = runtime::open_memory(&config).await?;

    let result = ConversationLog::new(memory.store.clone(), memory.index.clone())
        .reset(user)
        .await;
    memory.close().await;

    let report = result?;
    println!(
        "🧹 Forgot {} turns for {user}. Profile and tasks were kept.",
        report.turns
    );
    Ok(())
}
