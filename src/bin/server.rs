// TheMachine - orchestration server
// Runs the platform and its worker pool until Ctrl-C
// Run with: cargo run --bin server

//! # TheMachine Server Binary
//!
//! Starts the orchestration core as a long-running process:
//!
//! ```text
//! main()
//!   ↓ loads
//! Settings (defaults, themachine.toml, MACHINE_* environment)
//!   ↓ builds
//! Platform (registry, engines, worker pool)
//!   ↓ seeds
//! Development catalog (optional)
//!   ↓ runs until
//! Ctrl-C, then shuts the worker pool down
//! ```
//!
//! A transport layer (HTTP, gRPC) would hold the same `Platform` and call its
//! operations; this binary only keeps the workers busy and reports progress.

use anyhow::Result;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use themachine::models::ModelProvider;
use themachine::settings::BackendKind;
use themachine::{seed, EngineEvent, Platform, Settings};

/// Interval between statistics lines
const STATS_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::var("MACHINE_CONFIG").ok().map(PathBuf::from);
    let settings = Settings::load(config_path.as_deref())?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.log_filter()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("🚀 Starting {} ...", settings.project_name);
    info!("=====================================");
    info!("Workers: {}", settings.worker_count);
    info!("Backend: {:?}", settings.backend);
    match settings.cost_limit_daily {
        Some(limit) => info!("Daily cost limit: ${:.2}", limit),
        None => info!("Daily cost limit: none"),
    }

    // Report which providers can be reached without exposing the keys
    if settings.backend == BackendKind::Http {
        for provider in [ModelProvider::OpenAI, ModelProvider::Anthropic] {
            if settings.providers.api_key_for(provider).is_some() {
                info!("✅ {} API key configured", provider);
            } else {
                warn!("{} API key missing; calls to its models will fail", provider);
            }
        }
    }

    let platform = Platform::builder(settings.clone()).build()?;

    if settings.seed_catalog {
        let summary = seed::seed_catalog(&platform).await?;
        info!(
            "📋 Seeded {} models, {} agents and workflow {}",
            summary.models.len(),
            summary.agents.len(),
            summary.workflow_id
        );
    }

    let mut events = platform.subscribe();
    let mut stats_tick = tokio::time::interval(STATS_INTERVAL);
    stats_tick.tick().await;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    info!("✅ Ready; press Ctrl-C to stop");

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Received Ctrl-C");
                break;
            }
            _ = stats_tick.tick() => {
                match platform.stats().await {
                    Ok(stats) => info!(
                        agents = stats.agents,
                        models = stats.models,
                        workflows = stats.workflows,
                        running = stats.executions_in_progress,
                        completed = stats.executions_completed,
                        failed = stats.executions_failed,
                        tasks = stats.tasks,
                        spent_today = stats.spent_today,
                        "📊 Platform statistics"
                    ),
                    Err(e) => warn!(error = %e, "Could not collect statistics"),
                }
            }
            event = events.recv() => match event {
                Ok(EngineEvent::ExecutionFailed { execution_id, error }) => {
                    warn!(%execution_id, %error, "Execution failed");
                }
                Ok(EngineEvent::StepAwaitingSignal { execution_id, step_id }) => {
                    info!(%execution_id, %step_id, "Execution waiting for a human decision");
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event listener lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    platform.shutdown().await;
    info!("👋 Shutdown complete");
    Ok(())
}
