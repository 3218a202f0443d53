//! Application state management

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::app::options::AppOptions;
use crate::deploy::pipeline::Orchestrator;
use crate::deploy::probe::TcpProbe;
use crate::deploy::stages::ShellStages;
use crate::errors::AgentError;
use crate::http::diagnosis::ChatCompletionDiagnoser;
use crate::http::notify::ServerChanNotifier;
use crate::models::deployment::DeploymentJob;

/// Deployments running detached from the request that started them
pub struct BackgroundDeployments {
    orchestrator: Arc<Orchestrator>,
    tasks: Mutex<JoinSet<()>>,
    abort: watch::Sender<bool>,
}

impl BackgroundDeployments {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            tasks: Mutex::new(JoinSet::new()),
            abort: watch::Sender::new(false),
        }
    }

    /// Run `job` in the background; its outcome is only reported through
    /// the notifier and the logs
    pub fn spawn(&self, job: DeploymentJob) {
        let orchestrator = self.orchestrator.clone();
        let mut abort_rx = self.abort.subscribe();
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        while tasks.try_join_next().is_some() {}
        tasks.spawn(async move {
            let aborted = async move {
                let _ = abort_rx.wait_for(|aborted| *aborted).await;
            };
            let outcome = orchestrator.execute_until(job, aborted).await;
            info!(
                task_id = %outcome.task_id,
                "Background deployment finished (success: {})",
                outcome.success
            );
        });
    }

    /// Number of deployments not yet reaped
    pub fn len(&self) -> usize {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait for running deployments. Those still running after `grace` are
    /// aborted and finish by sending their failure notification.
    pub async fn drain(&self, grace: Duration) {
        let mut tasks = {
            let mut guard = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *guard)
        };
        if !tasks.is_empty() {
            info!("Waiting for {} background deployment(s)...", tasks.len());
        }

        let deadline = tokio::time::sleep(grace);
        tokio::pin!(deadline);
        let mut aborting = false;

        loop {
            tokio::select! {
                next = tasks.join_next() => match next {
                    Some(Err(e)) => error!("Background deployment panicked: {}", e),
                    Some(Ok(())) => {}
                    None => break,
                },
                _ = &mut deadline, if !aborting => {
                    warn!(
                        "Aborting {} background deployment(s) still running after {:?}",
                        tasks.len(),
                        grace
                    );
                    self.abort.send_replace(true);
                    aborting = true;
                }
            }
        }
    }
}

/// Main application state
pub struct AppState {
    /// Deployment orchestrator
    pub orchestrator: Arc<Orchestrator>,

    /// Fire-and-forget deployments
    pub background: Arc<BackgroundDeployments>,
}

impl AppState {
    /// Wire the orchestrator and its collaborators from options
    pub fn init(options: &AppOptions) -> Result<Self, AgentError> {
        info!("Initializing application state...");

        let probe = Arc::new(TcpProbe::new(
            options.probe_host.clone(),
            options.probe_connect_timeout,
        ));
        let stages = Arc::new(ShellStages::new(options.stages.clone(), probe));
        let mut orchestrator = Orchestrator::new(options.pipeline.clone(), stages);

        match &options.diagnosis {
            Some(diagnosis) => {
                let diagnoser = ChatCompletionDiagnoser::new(diagnosis.clone())?;
                info!("AI diagnosis enabled ({})", diagnoser.endpoint());
                orchestrator = orchestrator.with_diagnoser(Arc::new(diagnoser));
            }
            None => info!("AI diagnosis disabled: no API key configured"),
        }

        match &options.notification {
            Some(notification) => {
                let notifier = ServerChanNotifier::new(notification.clone())?;
                info!("Push notifications enabled");
                orchestrator = orchestrator.with_notifier(Arc::new(notifier));
            }
            None => info!("Push notifications disabled: no send key configured"),
        }

        let orchestrator = Arc::new(orchestrator);
        let background = Arc::new(BackgroundDeployments::new(orchestrator.clone()));

        Ok(Self {
            orchestrator,
            background,
        })
    }

    /// Shutdown application state, giving background deployments `grace`
    /// to finish before aborting them
    pub async fn shutdown(&self, grace: Duration) -> Result<(), AgentError> {
        info!("Shutting down application state...");
        self.background.drain(grace).await;
        Ok(())
    }
}
