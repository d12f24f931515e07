//! `buddy reindex` — Index turns the writer could not index at the time.

use buddy_agent::MemoryWriter;

use super::runtime::{self, CmdResult};

pub async fn run(limit: usize) -> CmdResult {
    let config = runtime::load_config()?;
    let provider = runtime::open_provider(&config)?;
    let memory = runtime::open_memory(&config).await?;

    let writer = MemoryWriter::new(
        memory.store.clone(),
        memory.index.clone(),
        provider,
        config.provider.embedding_model.clone(),
    );
    let report = writer.reindex_pending(limit).await?;
    memory.close().await;

    println!("🔁 Reindex");
    println!("==========");
    println!("  Scanned:  {}", report.scanned);
    println!("  Indexed:  {}", report.indexed);
    println!("  Failed:   {}", report.failed);
    if report.scanned == limit {
        println!("\n  More may be pending; run again.");
    }

    Ok(())
}
