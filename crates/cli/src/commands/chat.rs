//! `buddy chat` — Interactive or single-message chat mode.

use buddy_agent::{Assistant, AssistantReply};
use buddy_core::Task;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use super::history::print_turn;
use super::runtime::{self, CmdResult};

/// Unindexed turns picked up before the first message.
const STARTUP_REINDEX_LIMIT: usize = 200;

/// Turns and tasks shown by the in-chat `history` and `tasks` commands.
const PEEK_LIMIT: usize = 5;

pub async fn run(user: &str, message: Option<String>) -> CmdResult {
    let config = runtime::load_config()?;
    let provider = runtime::open_provider(&config)?;
    let memory = runtime::open_memory(&config).await?;
    let assistant = runtime::build_assistant(&config, &memory, provider);

    if config.memory.reindex_on_start {
        match assistant.writer().reindex_pending(STARTUP_REINDEX_LIMIT).await {
            Ok(report) if report.failed > 0 => {
                tracing::warn!(failed = report.failed, "Some turns are still unindexed");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Startup reindex skipped"),
        }
    }

    if let Some(msg) = message {
        // Single message mode
        eprint!("  Thinking...");
        let reply = assistant.process_message(user, &msg).await;
        eprint!("\r              \r");
        println!("{}", reply?.text);
    } else {
        interactive(&assistant, user, &config.provider.default_model).await?;
    }

    memory.close().await;
    Ok(())
}

async fn interactive(assistant: &Assistant, user: &str, model: &str) -> CmdResult {
    println!();
    println!("  ╔══════════════════════════════════════════════╗");
    println!("  ║          Buddy — Interactive Mode            ║");
    println!("  ╚══════════════════════════════════════════════╝");
    println!();
    println!("  Assistant: {}", assistant.name());
    println!("  Model:     {model}");
    println!("  User:      {user}");
    println!();
    println!("  Type your message and press Enter.");
    println!("  Type 'history' or 'tasks' to look back, 'reset' to forget this conversation.");
    println!("  Type 'exit' or Ctrl+D to quit.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"  You > ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let text = line.trim();
        match text {
            "" => continue,
            "exit" | "quit" => break,
            "reset" => {
                match assistant.reset_conversation(user).await {
                    Ok(report) => println!("  Forgot {} turns.\n", report.turns),
                    Err(e) => eprintln!("  [Error] {e}\n"),
                }
                continue;
            }
            "history" => {
                match assistant.history(user, PEEK_LIMIT).await {
                    Ok(turns) => turns.iter().for_each(|t| print_turn(t, assistant.name())),
                    Err(e) => eprintln!("  [Error] {e}"),
                }
                println!();
                continue;
            }
            "tasks" => {
                match assistant.tasks().pending(user, PEEK_LIMIT).await {
                    Ok(tasks) if tasks.is_empty() => println!("  No pending tasks."),
                    Ok(tasks) => {
                        for task in &tasks {
                            print_task_line(task);
                        }
                    }
                    Err(e) => eprintln!("  [Error] {e}"),
                }
                println!();
                continue;
            }
            _ => {}
        }

        eprint!("  ...");
        let result = assistant.process_message(user, text).await;
        eprint!("\r     \r");
        match result {
            Ok(reply) => print_reply(assistant.name(), &reply),
            Err(e) => {
                eprintln!("  [Error] {e}");
                println!();
            }
        }
    }

    println!();
    println!("  Goodbye! 👋");
    println!();
    Ok(())
}

fn print_reply(name: &str, reply: &AssistantReply) {
    println!();
    for line in reply.text.lines() {
        println!("  {name} > {line}");
    }
    for task in &reply.tasks_recorded {
        print!("  📝 Saved:");
        print_task_line(task);
    }
    if reply.degraded {
        println!("  (older memories were unavailable for this reply)");
    }
    println!();
}

fn print_task_line(task: &Task) {
    match &task.due {
        Some(due) => println!("  #{} {} (due {due})", task.id, task.description),
        None => println!("  #{} {}", task.id, task.description),
    }
}
