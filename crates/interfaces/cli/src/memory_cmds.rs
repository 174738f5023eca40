use anyhow::Result;

use continuum_memory::{MemoryId, MemoryRecord, truncate_str};
use continuum_runtime::ContinuumRuntime;

const PREVIEW: usize = 80;

fn print_records(title: &str, records: &[MemoryRecord]) {
    println!("── {title} ─────────────────────────────────────────");
    for record in records {
        let tags = if record.tags.is_empty() {
            String::new()
        } else {
            format!(
                " [{}]",
                record.tags.iter().cloned().collect::<Vec<_>>().join(", ")
            )
        };
        println!(
            "  {} {:.2} {:<12} {}{}",
            record.created_at.format("%Y-%m-%d %H:%M"),
            record.depth(),
            record.consolidation_tier().slug(),
            truncate_str(&record.content, PREVIEW),
            tags
        );
        println!("      {}", record.id);
    }
    println!("  ({} shown)", records.len());
}

pub(crate) async fn run_recent(runtime: &ContinuumRuntime, limit: usize) -> Result<()> {
    let records = runtime.memories.recent(limit).await?;
    print_records("recent memories", &records);
    Ok(())
}

pub(crate) async fn run_identity(runtime: &ContinuumRuntime) -> Result<()> {
    let records = runtime.memories.identity_memories().await?;
    print_records("identity memories", &records);
    Ok(())
}

pub(crate) async fn run_depth(runtime: &ContinuumRuntime, min: f64, max: f64, limit: usize) -> Result<()> {
    if min > max {
        anyhow::bail!("--min ({min}) must not exceed --max ({max})");
    }
    let records = runtime.memories.query_by_depth_range(min, max, limit).await?;
    print_records(&format!("depth {min:.2}..={max:.2}"), &records);
    Ok(())
}

pub(crate) async fn run_pending(runtime: &ContinuumRuntime) -> Result<()> {
    let records = runtime.memories.pending_consolidation().await?;
    print_records("pending consolidation", &records);
    Ok(())
}

pub(crate) async fn run_recall(runtime: &ContinuumRuntime, id: &str) -> Result<()> {
    let record = runtime.memories.recall(&MemoryId::from(id)).await?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

pub(crate) async fn run_promote(runtime: &ContinuumRuntime, id: &str, depth: f64) -> Result<()> {
    let record = runtime.memories.promote(&MemoryId::from(id), depth).await?;
    println!(
        "{} promoted to depth {:.2} ({})",
        record.id,
        record.depth(),
        record.consolidation_tier().label()
    );
    Ok(())
}

pub(crate) async fn run_tiers(runtime: &ContinuumRuntime) -> Result<()> {
    let counts = runtime.memories.tier_counts().await?;
    println!("── tiers ────────────────────────────────────────────");
    for (tier, count) in counts {
        println!("  {:<16} {count}", tier.label());
    }
    Ok(())
}
