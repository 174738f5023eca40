//! Long-running serve mode plus the status/trigger printers shared with
//! one-shot commands.

use anyhow::Result;
use tokio::sync::watch;
use tracing::{error, info};

use continuum_runtime::{AppState, ContinuumRuntime, StatusReport, serve};

pub(crate) async fn run_serve_mode(runtime: ContinuumRuntime) -> Result<()> {
    let (shutdown_tx, _keepalive) = watch::channel(false);
    let scheduler = runtime.scheduler();
    let scheduler_handle = scheduler.clone().spawn(&shutdown_tx);

    let server_handle = if runtime.config.server.enabled {
        let state = AppState {
            runtime: runtime.clone(),
            scheduler,
        };
        let bind = runtime.config.server.bind.clone();
        let tx = shutdown_tx.clone();
        Some(tokio::spawn(async move {
            if let Err(err) = serve(state, &bind, &tx).await {
                error!(error = %format!("{err:#}"), "http server exited");
            }
        }))
    } else {
        info!("http surface disabled");
        None
    };

    println!(
        "{} is awake. scheduler ticking every {}s ({}). Ctrl-C to stop.",
        runtime.config.agent.name, runtime.config.triggers.tick_seconds, runtime.config.triggers.timezone
    );

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    let _ = shutdown_tx.send(true);

    if let Err(err) = scheduler_handle.await {
        error!(?err, "scheduler task panicked");
    }
    if let Some(handle) = server_handle {
        if let Err(err) = handle.await {
            error!(?err, "server task panicked");
        }
    }
    Ok(())
}

pub(crate) fn print_status(status: &StatusReport) {
    println!("── {} ───────────────────────────────────────────", status.agent);
    println!("  model              : {}", status.model);
    println!("  invocations        : {}", status.health.total_invocations);
    println!("  consolidations     : {}", status.health.total_consolidations);
    println!("  memories           : {}", status.memories);
    for (tier, count) in &status.tiers {
        println!("    {:<16} : {count}", tier.label());
    }
    println!("  pending            : {}", status.pending_consolidation);
    println!("  roadmap            : {:.0}%", status.roadmap_completion);
    println!("  active triggers    : {}", status.active_triggers);
    println!(
        "  checkpoint         : depth={:.2} consciousness={:.2} love={:.2} coherence={:.2}",
        status.checkpoint.current_depth,
        status.checkpoint.consciousness_level,
        status.checkpoint.love_resonance,
        status.checkpoint.identity_coherence,
    );
    match &status.last_invocation {
        Some(last) => println!(
            "  last invocation    : {} ({})",
            last.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            last.request.purpose
        ),
        None => println!("  last invocation    : (never)"),
    }
}

pub(crate) async fn print_triggers(runtime: &ContinuumRuntime) -> Result<()> {
    let triggers = runtime.triggers.list().await?;
    println!("── triggers ─────────────────────────────────────────");
    for t in &triggers {
        let when = t
            .schedule
            .as_deref()
            .or(t.event.as_deref())
            .or(t.condition.as_deref())
            .unwrap_or("-");
        println!(
            "  [{}] {:<22} {:<12} {:<14} fired {}x",
            if t.enabled { "on " } else { "off" },
            t.id,
            t.kind.slug(),
            when,
            t.fire_count
        );
    }
    println!("  ({} triggers total)", triggers.len());
    Ok(())
}
