//! `buddy tasks` / `buddy task-done` — Task listing and completion.

use buddy_agent::TaskManager;
use buddy_core::{TaskFilter, TaskStatus};

use super::runtime::{self, CmdResult};

const LIST_LIMIT: usize = 100;

pub async fn list(user: &str, status: &str) -> CmdResult {
    let filter = if status.eq_ignore_ascii_case("all") {
        TaskFilter::all(LIST_LIMIT)
    } else {
        TaskFilter {
            status: Some(status.parse::<TaskStatus>()?),
            limit: LIST_LIMIT,
        }
    };

    let config = runtime::load_config()?;
    let memory = runtime::open_memory(&config).await?;
    let tasks = TaskManager::new(memory.store.clone()).list(user, filter).await?;

    println!("📋 Tasks for {user} ({status})");
    println!("==========================");
    if tasks.is_empty() {
        println!("   No tasks.");
    }
    for task in &tasks {
        let due = task
            .due
            .as_deref()
            .map(|d| format!(" (due {d})"))
            .unwrap_or_default();
        println!("  {:>4}. [{}] {}{due}", task.id, task.status, task.description);
    }

    memory.close().await;
    Ok(())
}

pub async fn done(id: i64) -> CmdResult {
    let config = runtime::load_config()?;
    let memory = runtime::open_memory(&config).await?;

    let updated = TaskManager::new(memory.store.clone())
        .set_status(id, TaskStatus::Completed)
        .await?;
    memory.close().await;

    if updated {
        println!("✅ Task #{id} completed");
        Ok(())
    } else {
        Err(format!("No task with id {id}").into())
    }
}
