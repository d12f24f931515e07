//! `buddy profile` — Show the stored profile.

use super::runtime::{self, CmdResult};

pub async fn run(user: &str) -> CmdResult {
    let config = runtime::load_config()?;
    let memory = runtime::open_memory(&config).await?;

    match memory.store.fetch_profile(user).await? {
        Some(profile) => println!("{}", serde_json::to_string_pretty(&profile)?),
        None => println!("No profile for {user} yet. Chat a little first."),
    }

    memory.close().await;
    Ok(())
}
