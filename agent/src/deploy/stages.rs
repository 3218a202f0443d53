//! Pipeline stage implementations

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::deploy::command::CommandOutput;
use crate::deploy::git::{self, GitCredentials};
use crate::deploy::install;
use crate::deploy::probe::{self, PortProbe, TcpProbe, VerifyOptions};
use crate::deploy::service;
use crate::errors::StageError;
use crate::models::deployment::DeploymentJob;

/// A failed stage together with whatever output it produced
#[derive(Debug, Clone)]
pub struct StageFailure {
    pub error: StageError,
    pub output: CommandOutput,
}

impl StageFailure {
    pub fn new(error: StageError) -> Self {
        Self {
            error,
            output: CommandOutput::default(),
        }
    }

    pub fn with_output(mut self, output: CommandOutput) -> Self {
        self.output = output;
        self
    }
}

impl From<StageError> for StageFailure {
    fn from(error: StageError) -> Self {
        Self::new(error)
    }
}

pub type StageResult = Result<CommandOutput, StageFailure>;

/// The four pipeline stages. Implemented over real processes by
/// [`ShellStages`]; tests substitute their own.
#[async_trait]
pub trait Stages: Send + Sync {
    async fn fetch(&self, job: &DeploymentJob) -> StageResult;

    async fn install(&self, job: &DeploymentJob) -> StageResult;

    async fn start(&self, job: &DeploymentJob) -> StageResult;

    async fn verify(&self, job: &DeploymentJob) -> StageResult;
}

/// Settings for the process-backed stages
#[derive(Debug, Clone)]
pub struct StageOptions {
    pub command_timeout: Duration,
    pub pip_extra_args: Vec<String>,
    pub credentials: Option<GitCredentials>,
    pub verify: VerifyOptions,
}

impl Default for StageOptions {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(300),
            pip_extra_args: vec!["--user".to_string()],
            credentials: None,
            verify: VerifyOptions::default(),
        }
    }
}

/// Stages backed by git, pip, bash and a TCP probe
pub struct ShellStages {
    options: StageOptions,
    probe: Arc<dyn PortProbe>,
}

impl ShellStages {
    pub fn new(options: StageOptions, probe: Arc<dyn PortProbe>) -> Self {
        Self { options, probe }
    }
}

impl Default for ShellStages {
    fn default() -> Self {
        Self::new(StageOptions::default(), Arc::new(TcpProbe::default()))
    }
}

#[async_trait]
impl Stages for ShellStages {
    async fn fetch(&self, job: &DeploymentJob) -> StageResult {
        git::sync_repository(
            job,
            self.options.credentials.as_ref(),
            self.options.command_timeout,
        )
        .await
    }

    async fn install(&self, job: &DeploymentJob) -> StageResult {
        install::install_dependencies(
            job,
            &self.options.pip_extra_args,
            self.options.command_timeout,
        )
        .await
    }

    async fn start(&self, job: &DeploymentJob) -> StageResult {
        service::stop_previous(job, self.options.command_timeout).await;

        // anything still on the port would pass verification for us
        let released = probe::wait_for_port_release(
            self.probe.as_ref(),
            job.port,
            &self.options.verify,
            tokio::time::sleep,
        )
        .await;
        if !released {
            return Err(StageError::StartError(format!(
                "port {} is already in use by another process",
                job.port
            ))
            .into());
        }

        service::start_service(job, self.options.command_timeout).await
    }

    async fn verify(&self, job: &DeploymentJob) -> StageResult {
        let attempt = probe::wait_for_port(
            self.probe.as_ref(),
            job.port,
            &self.options.verify,
            tokio::time::sleep,
        )
        .await?;

        Ok(CommandOutput {
            exit_code: None,
            success: true,
            stdout: format!("port {} accepted a connection on attempt {}", job.port, attempt),
            stderr: String::new(),
        })
    }
}
