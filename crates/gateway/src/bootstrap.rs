//! AppState construction extracted from `main.rs`.

use std::sync::Arc;

use parley_domain::config::{Config, ConfigSeverity};
use parley_providers::anthropic::AnthropicClient;
use parley_providers::ModelClient;
use parley_store::memory::{MemorySessionRepo, MemoryTurnRepo, MemoryUsageRepo};

use crate::runtime::gate::{ConfigFeatureProvider, SessionGate};
use crate::runtime::persist::PersistenceCoordinator;
use crate::runtime::slots::PipelineSlots;
use crate::runtime::tools::HttpToolDispatcher;
use crate::state::AppState;

/// Validate config, initialize every subsystem and return a fully-wired
/// [`AppState`].
pub async fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    let error_count = issues
        .iter()
        .filter(|i| i.severity == ConfigSeverity::Error)
        .count();
    if error_count > 0 {
        anyhow::bail!("config validation failed with {error_count} error(s)");
    }

    // ── Storage ──────────────────────────────────────────────────
    let sessions: Arc<dyn parley_store::SessionRepo> = Arc::new(MemorySessionRepo::new());
    let turns: Arc<dyn parley_store::TurnRepo> = Arc::new(MemoryTurnRepo::new());
    let usage: Arc<dyn parley_store::UsageRepo> = Arc::new(MemoryUsageRepo::new());

    // ── Model client ─────────────────────────────────────────────
    let model = Arc::new(AnthropicClient::from_config(&config.model)?);
    tracing::info!(model = model.model_id(), "model client ready");

    // ── Tool dispatcher ──────────────────────────────────────────
    let tools = Arc::new(HttpToolDispatcher::connect(&config.tools).await?);

    // ── Runtime wiring ───────────────────────────────────────────
    let gate = Arc::new(SessionGate::new(
        Arc::new(ConfigFeatureProvider::new(config.features.clone())),
        usage.clone(),
    ));
    let persistence = Arc::new(PersistenceCoordinator::new(
        sessions.clone(),
        turns.clone(),
        usage.clone(),
    ));
    let pipeline_slots = Arc::new(PipelineSlots::new(config.server.pipeline_slots_per_user));

    Ok(AppState {
        config,
        model,
        sessions,
        turns,
        usage,
        gate,
        tools,
        persistence,
        pipeline_slots,
    })
}
