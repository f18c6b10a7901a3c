//! StampSync CLI
//!
//! Thin wrapper around stampsync-core for inspecting the protocol and
//! exercising a host/companion pair in one process.
//!
//! ## Usage
//!
//! ```bash
//! # Print the action catalog
//! stampsync actions
//!
//! # Same, as JSON
//! stampsync actions --json
//!
//! # Run a host and companion over the loopback link for 3 seconds
//! stampsync demo --duration-secs 3
//!
//! # Drop and restore the link mid-run
//! stampsync demo --flaky
//!
//! # Load timing from a config file
//! stampsync --config sync.json demo
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use stampsync_core::{
    logging, Action, ButtonAction, CompanionHandle, CompanionState, HostSyncController,
    LoopbackLink, MemoryButtonStore, MemoryEventLog, PeerSyncClient, SyncConfig, SystemClock,
};
use tracing::info;

/// How long the demo waits for the pair to settle before giving up
const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

/// StampSync - host/companion button sync
#[derive(Parser)]
#[command(name = "stampsync")]
#[command(version = "0.1.0")]
#[command(about = "StampSync - host/companion button sync")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// JSON config file (poll_interval_ms, context_republish_secs)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List request actions and their fields
    Actions {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run a host and a companion over an in-process link
    Demo {
        /// Keep the pair running this long before printing state
        #[arg(long, default_value_t = 2)]
        duration_secs: u64,

        /// Take the link down and back up during the run
        #[arg(long)]
        flaky: bool,

        /// Show relative (elapsed) time instead of wall-clock time
        #[arg(long)]
        elapsed: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let config = match &cli.config {
        Some(path) => SyncConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => SyncConfig::default(),
    };

    match cli.command {
        Commands::Actions { json } => print_actions(json)?,
        Commands::Demo {
            duration_secs,
            flaky,
            elapsed,
        } => run_demo(&config, duration_secs, flaky, elapsed).await?,
    }

    Ok(())
}

fn print_actions(as_json: bool) -> Result<()> {
    if as_json {
        let catalog: Vec<_> = Action::ALL
            .iter()
            .map(|action| {
                json!({
                    "action": action.as_str(),
                    "request": action.required_fields(),
                    "reply": action.reply_fields(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&catalog)?);
        return Ok(());
    }

    println!("Actions:");
    for action in Action::ALL {
        println!("  {}", action);
        println!("    request: {}", field_list(action.required_fields()));
        println!("    reply:   {}", field_list(action.reply_fields()));
    }
    Ok(())
}

fn field_list(fields: &[&str]) -> String {
    if fields.is_empty() {
        "(none)".to_string()
    } else {
        fields.join(", ")
    }
}

fn sample_buttons() -> Vec<ButtonAction> {
    vec![
        ButtonAction::new("Coffee", "red"),
        ButtonAction::new("Walk", "green"),
        ButtonAction::new("Generic Event", "Default"),
    ]
}

async fn run_demo(config: &SyncConfig, duration_secs: u64, flaky: bool, elapsed: bool) -> Result<()> {
    let (link, host_end, companion_end) = LoopbackLink::pair();

    let clock = if elapsed {
        SystemClock::ElapsedSince(chrono::Utc::now())
    } else {
        SystemClock::Absolute
    };
    let log = Arc::new(MemoryEventLog::new());
    let host = HostSyncController::new(
        host_end.into_session(),
        Arc::new(MemoryButtonStore::new(sample_buttons())),
        Arc::new(clock),
        log.clone(),
    )
    .start(config);
    let companion = PeerSyncClient::new(companion_end.into_session()).start(config);

    wait_for(&companion, |s| s.is_connected && !s.buttons.is_empty())
        .await
        .context("Companion never received the host's buttons")?;
    info!("Companion connected");

    let captured = capture_when_ready(&companion, "Generic Event", "Default").await;
    println!("Captured: Generic Event -> {}", captured);

    if flaky {
        link.set_link_up(false);
        wait_for(&companion, |s| !s.is_connected)
            .await
            .context("Companion never noticed the link going down")?;
        let offline = companion.capture("Offline", "grey").await;
        println!("Link down, capture -> {}", offline);

        link.set_link_up(true);
        wait_for(&companion, |s| s.is_connected)
            .await
            .context("Companion never reconnected")?;
        println!("Link restored");
    }

    tokio::time::sleep(Duration::from_secs(duration_secs)).await;

    print_state(&companion.state());
    println!("Events recorded: {}", log.len());

    companion.shutdown();
    host.shutdown();
    Ok(())
}

/// Capture once the companion's session has caught up with the link
async fn capture_when_ready(companion: &CompanionHandle, name: &str, color: &str) -> bool {
    let attempt = async {
        loop {
            if companion.capture(name, color).await {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(SETTLE_TIMEOUT, attempt)
        .await
        .unwrap_or(false)
}

async fn wait_for(
    companion: &CompanionHandle,
    mut predicate: impl FnMut(&CompanionState) -> bool,
) -> Result<()> {
    let mut rx = companion.subscribe();
    let settle = async {
        loop {
            if predicate(&rx.borrow_and_update()) {
                return Ok(());
            }
            if rx.changed().await.is_err() {
                bail!("Companion stopped");
            }
        }
    };
    tokio::time::timeout(SETTLE_TIMEOUT, settle).await?
}

fn print_state(state: &CompanionState) {
    println!("Buttons:");
    for button in &state.buttons {
        println!("  {} ({})", button.name, button.color);
    }
    let mode = if state.is_absolute_time {
        "absolute"
    } else {
        "elapsed"
    };
    println!("Time: {} ({})", state.current_time, mode);
    println!(
        "Connected: {}",
        if state.is_connected { "yes" } else { "no" }
    );
}
