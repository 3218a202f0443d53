//! Notification and diagnosis text built from deployment results

use std::fmt::Write as _;

use crate::errors::StageError;
use crate::models::deployment::{DeploymentJob, DeploymentOutcome, StepResult};
use crate::utils::tail;

/// Characters of command output kept per step in messages
const OUTPUT_TAIL_CHARS: usize = 2000;

/// A rendered push notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    /// Markdown body
    pub body: String,
}

/// Failure description sent to the AI completion API
pub fn failure_context(job: &DeploymentJob, steps: &[StepResult], error: &StageError) -> String {
    let mut text = format!(
        "Stage '{}' failed while deploying {} (branch {}) into {} on port {}.\nError: {}\n",
        error.stage(),
        job.repo_url,
        job.branch_label(),
        job.target_dir.display(),
        job.port,
        error
    );
    if let StageError::VerifyTimeoutError { .. } = error {
        let _ = writeln!(text, "Start command: {}", job.start_cmd);
        let _ = writeln!(text, "Service log: {}", job.log_file().display());
    }
    if let Some(step) = steps.last() {
        if !step.stdout.trim().is_empty() {
            let _ = write!(text, "stdout:\n{}\n", tail(step.stdout.trim(), OUTPUT_TAIL_CHARS));
        }
        if !step.stderr.trim().is_empty() {
            let _ = write!(text, "stderr:\n{}\n", tail(step.stderr.trim(), OUTPUT_TAIL_CHARS));
        }
    }
    text
}

/// Render the notification for a finished deployment
pub fn render(outcome: &DeploymentOutcome) -> Notification {
    let title = if outcome.success {
        format!("Deployment succeeded[{}]", outcome.task_id)
    } else {
        format!("Deployment failed[{}]", outcome.task_id)
    };

    let mut body = format!(
        "### Deployment task [{}]\nApp: {}\nRepository: {}\nPort: {}\n\n",
        outcome.task_id, outcome.app_name, outcome.repo_url, outcome.port
    );

    for (index, step) in outcome.steps.iter().enumerate() {
        let _ = writeln!(
            body,
            "#### Step {}: {} ({}, {} ms)",
            index + 1,
            step.stage,
            if step.is_ok() { "ok" } else { "failed" },
            step.elapsed_ms
        );
        if let Some(error) = &step.error {
            let _ = writeln!(body, "{}", tail(error, OUTPUT_TAIL_CHARS));
        } else if !step.stdout.trim().is_empty() {
            let _ = writeln!(body, "{}", tail(step.stdout.trim(), OUTPUT_TAIL_CHARS));
        }
        body.push('\n');
    }

    if outcome.success {
        body.push_str("#### Deployment succeeded\n");
        if let Some(url) = &outcome.access_url {
            let _ = writeln!(body, "Available at: {}", url);
        }
    } else if let Some(suggestion) = outcome.diagnosis.suggestion() {
        let _ = write!(body, "#### Suggested fix\n{}\n", suggestion);
    }

    Notification { title, body }
}
