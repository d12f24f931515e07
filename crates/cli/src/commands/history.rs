//! `buddy history` — Show recent turns.

use buddy_agent::ConversationLog;
use buddy_core::Turn;

use super::runtime::{self, CmdResult};

pub async fn run(user: &str, limit: usize) -> CmdResult {
    let config = runtime::load_config()?;
    let memory = runtime::open_memory(&config).await?;

    let log = ConversationLog::new(memory.store.clone(), memory.index.clone());
    let turns = log.history(user, limit).await?;
    let total = log.count(user).await?;

    println!("💬 Conversation with {user} ({} of {total} turns)", turns.len());
    println!("==========================================");
    if turns.is_empty() {
        println!("   Nothing yet. Start with `buddy chat`.");
    }
    for turn in &turns {
        print_turn(turn, "Buddy");
    }

    memory.close().await;
    Ok(())
}

pub fn print_turn(turn: &Turn, name: &str) {
    println!();
    println!("  #{} · {}", turn.id, turn.timestamp.format("%Y-%m-%d %H:%M"));
    println!("  You   > {}", turn.message);
    println!("  {name} > {}", turn.response);
}
