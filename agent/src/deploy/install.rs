//! Dependency install stage

use std::time::Duration;

use tracing::info;

use crate::deploy::command::{CommandOutput, ExternalCommand};
use crate::deploy::stages::StageFailure;
use crate::errors::StageError;
use crate::models::deployment::DeploymentJob;

/// `python<runtime> -m pip install -r <manifest> <extra args>` in the checkout
pub fn install_command(job: &DeploymentJob, extra_args: &[String], timeout: Duration) -> ExternalCommand {
    ExternalCommand::new(format!("python{}", job.runtime))
        .current_dir(job.target())
        .args(["-m", "pip", "install", "-r", job.manifest.as_str()])
        .args(extra_args.iter().cloned())
        .timeout(timeout)
}

pub async fn install_dependencies(
    job: &DeploymentJob,
    extra_args: &[String],
    timeout: Duration,
) -> Result<CommandOutput, StageFailure> {
    let manifest = job.target().join(&job.manifest);
    if !manifest.is_file() {
        return Err(StageFailure::new(StageError::InstallError(format!(
            "manifest not found: {}",
            manifest.display()
        ))));
    }

    let cmd = install_command(job, extra_args, timeout);
    info!("Running install command: {}", cmd.describe());

    let output = cmd
        .run()
        .await
        .map_err(|e| StageFailure::new(StageError::InstallError(e.to_string())))?;

    if !output.success {
        let message = format!("{} failed: {}", cmd.describe(), output.combined());
        return Err(StageFailure::new(StageError::InstallError(message)).with_output(output));
    }

    Ok(output)
}
