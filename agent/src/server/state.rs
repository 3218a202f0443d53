//! Server state

use std::sync::Arc;

use crate::app::state::{AppState, BackgroundDeployments};
use crate::deploy::pipeline::Orchestrator;

/// Server state shared across handlers
pub struct ServerState {
    pub orchestrator: Arc<Orchestrator>,
    pub background: Arc<BackgroundDeployments>,
}

impl ServerState {
    pub fn new(orchestrator: Arc<Orchestrator>, background: Arc<BackgroundDeployments>) -> Self {
        Self {
            orchestrator,
            background,
        }
    }

    pub fn from_app_state(app_state: &AppState) -> Self {
        Self::new(app_state.orchestrator.clone(), app_state.background.clone())
    }
}
