//! Shared application state handed to every handler.

use std::sync::Arc;

use parley_domain::config::Config;
use parley_providers::ModelClient;
use parley_store::{SessionRepo, TurnRepo, UsageRepo};

use crate::runtime::gate::SessionGate;
use crate::runtime::persist::PersistenceCoordinator;
use crate::runtime::slots::PipelineSlots;
use crate::runtime::tools::ToolDispatcher;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub model: Arc<dyn ModelClient>,
    pub sessions: Arc<dyn SessionRepo>,
    pub turns: Arc<dyn TurnRepo>,
    pub usage: Arc<dyn UsageRepo>,
    pub gate: Arc<SessionGate>,
    pub tools: Arc<dyn ToolDispatcher>,
    pub persistence: Arc<PersistenceCoordinator>,
    pub pipeline_slots: Arc<PipelineSlots>,
}
