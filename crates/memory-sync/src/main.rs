// memory-sync/src/main.rs

#[cfg(feature = "cli")]
use clap::{Parser, Subcommand};
#[cfg(feature = "cli")]
use memory_sync::{telemetry, SyncConfig, SyncOrchestrator, WakeupHandler, WakeupOutcome};
#[cfg(feature = "cli")]
use std::sync::Arc;

#[cfg(feature = "cli")]
#[derive(Parser)]
#[command(name = "memory-sync")]
#[command(about = "Synchronize Memories with the remote server")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[cfg(feature = "cli")]
#[derive(Subcommand)]
enum Command {
    /// Push every local Memory
    Push,
    /// Pull remote Memories and reconcile images
    Pull {
        #[arg(long)]
        dependent_update: bool,
    },
    /// Pull and push on the configured interval
    Watch,
    /// Delete a Memory locally and remotely
    Delete { storage_id: String },
    /// Undelete a Memory on the server
    Restore { storage_id: String },
    /// Fetch the account settings
    Settings,
    /// Handle a wakeup payload as if the server had sent it
    Wakeup { payload: String },
}

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing();
    let cli = Cli::parse();

    let cfg = SyncConfig::from_env()?;
    cfg.print_config();
    let engine = Arc::new(SyncOrchestrator::from_config(&cfg)?);

    let ok = match cli.cmd {
        Command::Push => engine.push_all().await,
        Command::Pull { dependent_update } => engine.pull_all(dependent_update).await,
        Command::Watch => {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(cfg.sync_interval_seconds.max(1)));
            loop {
                ticker.tick().await;
                let pulled = engine.pull_all(true).await;
                let pushed = engine.push_all().await;
                tracing::info!("Sync cycle finished (pull: {}, push: {})", pulled, pushed);
            }
        }
        Command::Delete { storage_id } => engine.delete(&storage_id).await,
        Command::Restore { storage_id } => engine.restore(&storage_id).await,
        Command::Settings => {
            let mut events = engine.subscribe();
            let ok = engine.refresh_settings().await;
            if let Ok(memory_sync::SyncEvent::SettingsRefreshed(settings)) = events.try_recv() {
                println!("{}", serde_json::to_string_pretty(&settings)?);
            }
            ok
        }
        Command::Wakeup { payload } => {
            let handler = WakeupHandler::new(Arc::clone(&engine));
            !matches!(
                handler.handle_raw(&payload).await,
                WakeupOutcome::Handled { success: false }
            )
        }
    };

    if ok {
        println!("done");
        Ok(())
    } else {
        Err(anyhow::anyhow!("operation did not complete; see log for details"))
    }
}

#[cfg(not(feature = "cli"))]
fn main() {
    println!("CLI feature not enabled. Enable with --features cli");
}
