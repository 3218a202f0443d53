//! Service start stage

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::deploy::command::{CommandOutput, ExternalCommand};
use crate::deploy::stages::StageFailure;
use crate::errors::StageError;
use crate::models::deployment::DeploymentJob;

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Launch the start command detached, logging to `<target>/app.log` and
/// recording its pid in `<target>/app.pid`
pub fn start_command(job: &DeploymentJob, timeout: Duration) -> ExternalCommand {
    let script = format!(
        "nohup {} > {} 2>&1 & echo $! > {}",
        job.start_cmd,
        shell_quote(&job.log_file().to_string_lossy()),
        shell_quote(&job.pid_file().to_string_lossy())
    );
    ExternalCommand::shell(script)
        .current_dir(job.target())
        .timeout(timeout)
}

/// Stop the instance recorded in the pidfile by an earlier deployment.
///
/// Returns the pid that was signalled. A stale pidfile is removed without
/// error.
pub async fn stop_previous(job: &DeploymentJob, timeout: Duration) -> Option<u32> {
    let pid_file = job.pid_file();
    let contents = tokio::fs::read_to_string(&pid_file).await.ok()?;
    if let Err(e) = tokio::fs::remove_file(&pid_file).await {
        warn!("Failed to remove {}: {}", pid_file.display(), e);
    }

    let pid = match contents.trim().parse::<u32>() {
        Ok(pid) if pid > 1 => pid,
        _ => {
            warn!("Ignoring malformed pidfile {}", pid_file.display());
            return None;
        }
    };

    let result = ExternalCommand::new("kill")
        .arg(pid.to_string())
        .timeout(timeout)
        .run()
        .await;
    match result {
        Ok(output) if output.success => {
            info!("Stopped previous instance (pid {})", pid);
            Some(pid)
        }
        Ok(output) => {
            debug!("Previous instance (pid {}) already gone: {}", pid, output.combined());
            None
        }
        Err(e) => {
            warn!("Failed to stop previous instance (pid {}): {}", pid, e);
            None
        }
    }
}

/// Launch the service. Success only means the launch was accepted; whether
/// the service serves is checked by the verify stage.
pub async fn start_service(job: &DeploymentJob, timeout: Duration) -> Result<CommandOutput, StageFailure> {
    if !job.target().is_dir() {
        return Err(StageFailure::new(StageError::StartError(format!(
            "target directory missing: {}",
            job.target_dir.display()
        ))));
    }

    let cmd = start_command(job, timeout);
    info!("Starting application: {}", job.start_cmd);

    let output = cmd
        .run()
        .await
        .map_err(|e| StageFailure::new(StageError::StartError(e.to_string())))?;

    if !output.success {
        let message = format!("launch of '{}' failed: {}", job.start_cmd, output.combined());
        return Err(StageFailure::new(StageError::StartError(message)).with_output(output));
    }

    Ok(output)
}
