//! Command handlers.

use crate::config::DaemonConfig;
use crate::daemon::{Daemon, Storage};
use anyhow::Context;
use console::style;
use oxide_poller::PollOutcome;
use oxide_scheduler::ImmediateScheduler;
use tokio::sync::watch;
use tracing::{error, info};

/// Run every poller and scheduler until Ctrl-C.
pub async fn run(config: &DaemonConfig) -> anyhow::Result<()> {
    let storage = Storage::open(config).await?;
    storage.migrate().await?;

    let daemon = Daemon::start(config, &storage).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles = daemon.spawn_polling(&shutdown_rx);

    info!(
        pollers = daemon.pollers.len(),
        schedulers = daemon.schedulers.len(),
        "Daemon running"
    );

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    info!("Shutdown requested");

    let _ = shutdown_tx.send(true);
    for handle in handles {
        if let Err(e) = handle.await {
            error!(error = %e, "Polling task failed");
        }
    }
    daemon.stop();
    Ok(())
}

/// One poll cycle per poller.
pub async fn poll(config: &DaemonConfig) -> anyhow::Result<()> {
    let storage = Storage::open(config).await?;
    storage.migrate().await?;
    let daemon = Daemon::start(config, &storage).await?;

    let mut failures = 0;
    for poller in &daemon.pollers {
        let name = &poller.config().name;
        match poller.poll().await {
            Ok(PollOutcome::Emitted(count)) => {
                println!("{} {}: {} new change(s)", style("✓").green(), name, count);
            }
            Ok(PollOutcome::NoChanges) => {
                println!("{} {}: up to date", style("✓").green(), name);
            }
            Ok(PollOutcome::Skipped) => {
                println!("{} {}: poll already in progress", style("i").blue(), name);
            }
            Ok(PollOutcome::Aborted(reason)) => {
                failures += 1;
                println!("{} {}: aborted: {}", style("!").yellow(), name, reason);
            }
            Err(e) => {
                failures += 1;
                println!("{} {}: {}", style("✗").red(), name, e);
            }
        }
    }
    daemon.stop();

    if failures > 0 {
        anyhow::bail!("{} poller(s) did not complete", failures);
    }
    Ok(())
}

pub async fn migrate(config: &DaemonConfig) -> anyhow::Result<()> {
    let db = Storage::postgres(config).await?;
    db.migrate().await.context("running migrations")?;
    println!("{} Migrations applied", style("✓").green());
    Ok(())
}

pub fn validate(config: &DaemonConfig) -> anyhow::Result<()> {
    println!("{} Configuration is valid", style("✓").green());
    println!("  Pollers: {}", config.pollers.len());
    for poller in &config.pollers {
        println!("    - {} ({} @ {})", poller.name, poller.repourl, poller.branch);
    }
    println!("  Schedulers: {}", config.schedulers.len());
    for scheduler in &config.schedulers {
        println!(
            "    - {} -> {}",
            scheduler.name,
            scheduler.builder_names.join(", ")
        );
    }
    Ok(())
}

pub async fn state_get(config: &DaemonConfig, scheduler: &str, key: &str) -> anyhow::Result<()> {
    ensure_scheduler(config, scheduler)?;
    let db = Storage::postgres(config).await?;
    let state = db.scheduler_state();
    let id = state
        .scheduler_id(scheduler, ImmediateScheduler::CLASS_NAME)
        .await?;

    match state.get_state(id, key).await? {
        Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        None => anyhow::bail!("scheduler {} has no state for key {:?}", scheduler, key),
    }
    Ok(())
}

pub async fn state_set(
    config: &DaemonConfig,
    scheduler: &str,
    key: &str,
    value: &str,
) -> anyhow::Result<()> {
    ensure_scheduler(config, scheduler)?;
    let value: serde_json::Value =
        serde_json::from_str(value).context("value must be valid JSON")?;

    let db = Storage::postgres(config).await?;
    let state = db.scheduler_state();
    let id = state
        .scheduler_id(scheduler, ImmediateScheduler::CLASS_NAME)
        .await?;
    state.set_state(id, key, &value).await?;

    println!("{} {}.{} updated", style("✓").green(), scheduler, key);
    Ok(())
}

fn ensure_scheduler(config: &DaemonConfig, scheduler: &str) -> anyhow::Result<()> {
    if config.schedulers.iter().any(|s| s.name == scheduler) {
        Ok(())
    } else {
        anyhow::bail!("no scheduler named {:?} in configuration", scheduler)
    }
}
