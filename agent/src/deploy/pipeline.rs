//! Deployment orchestrator: fetch, install, start, verify, then notify

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::deploy::locks::TargetLocks;
use crate::deploy::report::{self, Notification};
use crate::deploy::stages::{StageResult, Stages};
use crate::errors::{AgentError, StageError};
use crate::http::diagnosis::Diagnoser;
use crate::http::notify::Notifier;
use crate::models::deployment::{
    DeploymentJob, DeploymentOutcome, DeploymentRequest, DiagnosisOutcome, JobDefaults,
    NotificationOutcome, Stage, StepResult, StepStatus,
};

/// Orchestrator settings
#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    /// Values for request fields left unset
    pub defaults: JobDefaults,

    /// Host used in the access URL reported on success
    pub public_host: Option<String>,
}

/// Runs deployments. Diagnosis and notification are optional best-effort
/// collaborators; leaving one out turns it into a no-op.
pub struct Orchestrator {
    options: PipelineOptions,
    stages: Arc<dyn Stages>,
    diagnoser: Option<Arc<dyn Diagnoser>>,
    notifier: Option<Arc<dyn Notifier>>,
    locks: TargetLocks,
}

impl Orchestrator {
    pub fn new(options: PipelineOptions, stages: Arc<dyn Stages>) -> Self {
        Self {
            options,
            stages,
            diagnoser: None,
            notifier: None,
            locks: TargetLocks::new(),
        }
    }

    pub fn with_diagnoser(mut self, diagnoser: Arc<dyn Diagnoser>) -> Self {
        self.diagnoser = Some(diagnoser);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn public_host(&self) -> Option<&str> {
        self.options.public_host.as_deref()
    }

    /// Validate a request and resolve its defaults
    pub fn prepare(&self, request: &DeploymentRequest) -> Result<DeploymentJob, AgentError> {
        request.resolve(&self.options.defaults)
    }

    /// Run a deployment request end to end. Only an invalid request is an
    /// error; pipeline failures are reported in the outcome.
    pub async fn run(&self, request: DeploymentRequest) -> Result<DeploymentOutcome, AgentError> {
        let job = self.prepare(&request)?;
        Ok(self.execute(job).await)
    }

    /// Run a prepared job end to end
    pub async fn execute(&self, job: DeploymentJob) -> DeploymentOutcome {
        self.execute_until(job, std::future::pending()).await
    }

    /// Run a prepared job, giving up on the pending or running stage once
    /// `abort` resolves. An aborted deployment is still reported and
    /// notified as a failure.
    pub async fn execute_until<A>(&self, job: DeploymentJob, abort: A) -> DeploymentOutcome
    where
        A: Future<Output = ()>,
    {
        info!(
            task_id = %job.task_id,
            "Deploying {} (branch: {}) to {}",
            job.repo_url,
            job.branch_label(),
            job.target_dir.display()
        );

        tokio::pin!(abort);
        let guard = tokio::select! {
            guard = self.locks.acquire(job.target()) => Some(guard),
            _ = &mut abort => None,
        };
        let (steps, failure) = match guard {
            Some(_guard) => self.run_stages(&job, abort.as_mut()).await,
            None => {
                warn!(task_id = %job.task_id, "Aborted while waiting for the target lock");
                (Vec::new(), Some(StageError::Aborted { stage: Stage::Fetch }))
            }
        };

        let diagnosis = match &failure {
            Some(err) if !err.is_aborted() => self.diagnose(&job, &steps, err).await,
            _ => DiagnosisOutcome::Skipped,
        };

        let success = failure.is_none();
        let access_url = match (&self.options.public_host, success) {
            (Some(host), true) => Some(format!("http://{}:{}", host, job.port)),
            _ => None,
        };

        let mut outcome = DeploymentOutcome {
            task_id: job.task_id,
            app_name: job.app_name,
            repo_url: job.repo_url,
            port: job.port,
            success,
            failed_stage: failure.as_ref().map(StageError::stage),
            error: failure.as_ref().map(ToString::to_string),
            steps,
            diagnosis,
            notification: NotificationOutcome::Skipped,
            access_url,
        };

        outcome.notification = self.notify(&report::render(&outcome)).await;

        if outcome.success {
            info!(task_id = %outcome.task_id, "Deployment succeeded");
        } else {
            warn!(
                task_id = %outcome.task_id,
                "Deployment failed at {}: {}",
                outcome.failed_stage.map(|s| s.as_str()).unwrap_or("unknown"),
                outcome.error.as_deref().unwrap_or_default()
            );
        }

        outcome
    }

    async fn run_stages<A>(
        &self,
        job: &DeploymentJob,
        mut abort: Pin<&mut A>,
    ) -> (Vec<StepResult>, Option<StageError>)
    where
        A: Future<Output = ()>,
    {
        let mut steps = Vec::with_capacity(Stage::ALL.len());

        for stage in Stage::ALL {
            info!(task_id = %job.task_id, "Stage {} starting", stage);
            let started_at = Utc::now();
            let timer = Instant::now();

            // dropping a running stage kills its child process
            let result: StageResult = tokio::select! {
                result = self.run_stage(stage, job) => result,
                _ = abort.as_mut() => Err(StageError::Aborted { stage }.into()),
            };
            let elapsed_ms = timer.elapsed().as_millis() as u64;

            match result {
                Ok(output) => steps.push(StepResult {
                    stage,
                    status: StepStatus::Ok,
                    exit_code: output.exit_code,
                    stdout: output.stdout,
                    stderr: output.stderr,
                    error: None,
                    started_at,
                    elapsed_ms,
                }),
                Err(failure) => {
                    error!(task_id = %job.task_id, "Stage {} failed: {}", stage, failure.error);
                    steps.push(StepResult {
                        stage,
                        status: StepStatus::Failed,
                        exit_code: failure.output.exit_code,
                        stdout: failure.output.stdout,
                        stderr: failure.output.stderr,
                        error: Some(failure.error.to_string()),
                        started_at,
                        elapsed_ms,
                    });
                    return (steps, Some(failure.error));
                }
            }
        }

        (steps, None)
    }

    async fn run_stage(&self, stage: Stage, job: &DeploymentJob) -> StageResult {
        match stage {
            Stage::Fetch => self.stages.fetch(job).await,
            Stage::Install => self.stages.install(job).await,
            Stage::Start => self.stages.start(job).await,
            Stage::Verify => self.stages.verify(job).await,
        }
    }

    async fn diagnose(
        &self,
        job: &DeploymentJob,
        steps: &[StepResult],
        failure: &StageError,
    ) -> DiagnosisOutcome {
        let Some(diagnoser) = &self.diagnoser else {
            return DiagnosisOutcome::Skipped;
        };

        let context = report::failure_context(job, steps, failure);
        match diagnoser.diagnose(&context).await {
            Ok(text) => DiagnosisOutcome::Suggested { text },
            Err(e) => {
                warn!(task_id = %job.task_id, "AI diagnosis failed: {}", e);
                DiagnosisOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }

    async fn notify(&self, notification: &Notification) -> NotificationOutcome {
        let Some(notifier) = &self.notifier else {
            return NotificationOutcome::Skipped;
        };

        match notifier.send(notification).await {
            Ok(()) => NotificationOutcome::Sent,
            Err(e) => {
                error!("Failed to send notification '{}': {}", notification.title, e);
                NotificationOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }
}
