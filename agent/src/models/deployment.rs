//! Deployment models

use std::fmt;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::AgentError;
use crate::utils::generate_task_id;

/// Placeholder substituted with the requested port in start commands
pub const PORT_PLACEHOLDER: &str = "{port}";

/// A pipeline stage, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Fetch,
    Install,
    Start,
    Verify,
}

impl Stage {
    /// All stages in the order they run
    pub const ALL: [Stage; 4] = [Stage::Fetch, Stage::Install, Stage::Start, Stage::Verify];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Fetch => "fetch",
            Stage::Install => "install",
            Stage::Start => "start",
            Stage::Verify => "verify",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A deployment request as received over HTTP
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeploymentRequest {
    /// Application name, used for the task id and the default target directory
    #[serde(default)]
    pub app_name: Option<String>,

    /// Git repository URL
    #[serde(alias = "repo")]
    pub repo_url: String,

    /// Branch to deploy
    #[serde(default)]
    pub branch: Option<String>,

    /// Directory the code is checked out into
    #[serde(default, alias = "target")]
    pub target_dir: Option<PathBuf>,

    /// Runtime version the package manager is scoped to (e.g. "3.9")
    #[serde(default)]
    pub runtime: Option<String>,

    /// Command that launches the service; `{port}` is substituted
    #[serde(default)]
    pub start_cmd: Option<String>,

    /// Port the service must listen on
    pub port: u16,

    /// Remove the target directory first and clone from scratch
    #[serde(default)]
    pub clean_checkout: bool,

    /// Dependency manifest inside the checkout
    #[serde(default)]
    pub manifest: Option<String>,
}

/// Values used for request fields the caller left out
#[derive(Debug, Clone)]
pub struct JobDefaults {
    pub deploy_root: PathBuf,
    /// None checks out the remote's default branch
    pub branch: Option<String>,
    pub runtime: String,
    pub manifest: String,
}

impl Default for JobDefaults {
    fn default() -> Self {
        Self {
            deploy_root: PathBuf::from("/opt"),
            branch: None,
            runtime: "3.9".to_string(),
            manifest: "requirements.txt".to_string(),
        }
    }
}

/// A validated request with every field resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentJob {
    pub task_id: String,
    pub app_name: String,
    pub repo_url: String,
    pub branch: Option<String>,
    pub target_dir: PathBuf,
    pub runtime: String,
    pub start_cmd: String,
    pub port: u16,
    pub clean_checkout: bool,
    pub manifest: String,
}

impl DeploymentRequest {
    /// Validate the request and fill in defaults
    pub fn resolve(&self, defaults: &JobDefaults) -> Result<DeploymentJob, AgentError> {
        let repo_url = self.repo_url.trim();
        if repo_url.is_empty() {
            return Err(AgentError::ValidationError("repo_url is required".to_string()));
        }
        validate_repo_url(repo_url)?;

        if self.port == 0 {
            return Err(AgentError::ValidationError("port must be non-zero".to_string()));
        }

        let app_name = match self.app_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => app_name_from_repo(repo_url).ok_or_else(|| {
                AgentError::ValidationError(format!(
                    "cannot derive an app name from {}",
                    repo_url
                ))
            })?,
        };
        if !is_safe_name(&app_name) {
            return Err(AgentError::ValidationError(format!(
                "invalid app name: {}",
                app_name
            )));
        }

        let target_dir = match &self.target_dir {
            Some(dir) => {
                validate_target_dir(dir)?;
                dir.clone()
            }
            None => defaults.deploy_root.join(&app_name),
        };

        // a clean checkout deletes the target, so keep it inside the deploy root
        if self.clean_checkout
            && (!target_dir.starts_with(&defaults.deploy_root) || target_dir == defaults.deploy_root)
        {
            return Err(AgentError::ValidationError(format!(
                "clean checkout target must be inside {}: {}",
                defaults.deploy_root.display(),
                target_dir.display()
            )));
        }

        let runtime = non_empty(&self.runtime).unwrap_or_else(|| defaults.runtime.clone());
        let branch = non_empty(&self.branch).or_else(|| defaults.branch.clone());
        let manifest = non_empty(&self.manifest).unwrap_or_else(|| defaults.manifest.clone());
        let start_cmd = non_empty(&self.start_cmd)
            .unwrap_or_else(|| default_start_cmd(&runtime))
            .replace(PORT_PLACEHOLDER, &self.port.to_string());

        Ok(DeploymentJob {
            task_id: generate_task_id(&app_name, self.port),
            app_name,
            repo_url: repo_url.to_string(),
            branch,
            target_dir,
            runtime,
            start_cmd,
            port: self.port,
            clean_checkout: self.clean_checkout,
            manifest,
        })
    }
}

impl DeploymentJob {
    pub fn log_file(&self) -> PathBuf {
        self.target_dir.join("app.log")
    }

    /// Pid of the service launched by the last deployment
    pub fn pid_file(&self) -> PathBuf {
        self.target_dir.join("app.pid")
    }

    pub fn target(&self) -> &Path {
        &self.target_dir
    }

    /// Branch for logs and messages
    pub fn branch_label(&self) -> &str {
        self.branch.as_deref().unwrap_or("default branch")
    }
}

fn validate_target_dir(dir: &Path) -> Result<(), AgentError> {
    if !dir.is_absolute() {
        return Err(AgentError::ValidationError(format!(
            "target directory must be absolute: {}",
            dir.display()
        )));
    }
    if dir.components().any(|c| c == Component::ParentDir) {
        return Err(AgentError::ValidationError(format!(
            "target directory must not contain '..': {}",
            dir.display()
        )));
    }
    if dir.parent().is_none() {
        return Err(AgentError::ValidationError(
            "target directory must not be the filesystem root".to_string(),
        ));
    }
    Ok(())
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Gunicorn serving `app:app` on all interfaces
pub fn default_start_cmd(runtime: &str) -> String {
    format!(
        "python{} -m gunicorn -w 4 -b 0.0.0.0:{} app:app",
        runtime, PORT_PLACEHOLDER
    )
}

fn validate_repo_url(repo_url: &str) -> Result<(), AgentError> {
    // scp-like syntax (git@host:owner/repo.git) is not a URL but git accepts it
    if let Some((user_host, path)) = repo_url.split_once(':') {
        if user_host.contains('@') && !user_host.contains('/') && !path.starts_with("//") {
            return Ok(());
        }
    }
    url::Url::parse(repo_url)?;
    Ok(())
}

fn app_name_from_repo(repo_url: &str) -> Option<String> {
    let last = repo_url
        .trim_end_matches('/')
        .rsplit(['/', ':'])
        .next()?;
    let name = last.strip_suffix(".git").unwrap_or(last);
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

fn is_safe_name(name: &str) -> bool {
    name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Step status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Ok,
    Failed,
}

/// Result of one attempted pipeline stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub stage: Stage,
    pub status: StepStatus,

    /// Exit code of the external command, if one ran to completion
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,

    pub stdout: String,
    pub stderr: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl StepResult {
    pub fn is_ok(&self) -> bool {
        self.status == StepStatus::Ok
    }
}

/// Outcome of the best-effort AI diagnosis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DiagnosisOutcome {
    /// Diagnosis was not attempted
    Skipped,
    Suggested { text: String },
    Failed { error: String },
}

impl DiagnosisOutcome {
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            DiagnosisOutcome::Suggested { text } => Some(text),
            _ => None,
        }
    }
}

/// Outcome of the best-effort push notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NotificationOutcome {
    Skipped,
    Sent,
    Failed { error: String },
}

/// Everything known about a finished deployment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentOutcome {
    pub task_id: String,
    pub app_name: String,
    pub repo_url: String,
    pub port: u16,
    pub success: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<Stage>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Attempted stages in order; ends at the first failure
    pub steps: Vec<StepResult>,

    pub diagnosis: DiagnosisOutcome,
    pub notification: NotificationOutcome,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(repo_url: &str, port: u16) -> DeploymentRequest {
        DeploymentRequest {
            repo_url: repo_url.to_string(),
            port,
            ..Default::default()
        }
    }

    #[test]
    fn test_resolve_fills_defaults() {
        let job = request("https://github.com/acme/test_flask_app.git", 8080)
            .resolve(&JobDefaults::default())
            .unwrap();

        assert_eq!(job.app_name, "test_flask_app");
        assert_eq!(job.target_dir, PathBuf::from("/opt/test_flask_app"));
        assert_eq!(job.branch, None);
        assert_eq!(job.branch_label(), "default branch");
        assert_eq!(job.runtime, "3.9");
        assert_eq!(job.manifest, "requirements.txt");
        assert_eq!(
            job.start_cmd,
            "python3.9 -m gunicorn -w 4 -b 0.0.0.0:8080 app:app"
        );
        assert!(job.task_id.starts_with("test_flask_app_8080_"));
    }

    #[test]
    fn test_resolve_keeps_explicit_fields() {
        let req: DeploymentRequest = serde_json::from_value(serde_json::json!({
            "repo": "https://example/repo",
            "branch": "main",
            "target": "/srv/app",
            "runtime": "3.9",
            "start_cmd": "gunicorn app:app",
            "port": 8000
        }))
        .unwrap();
        let job = req.resolve(&JobDefaults::default()).unwrap();

        assert_eq!(job.app_name, "repo");
        assert_eq!(job.branch.as_deref(), Some("main"));
        assert_eq!(job.target_dir, PathBuf::from("/srv/app"));
        assert_eq!(job.start_cmd, "gunicorn app:app");
        assert_eq!(job.log_file(), PathBuf::from("/srv/app/app.log"));
    }

    #[test]
    fn test_resolve_substitutes_port_placeholder() {
        let mut req = request("https://example/repo", 9000);
        req.start_cmd = Some("uvicorn main:app --port {port}".to_string());
        let job = req.resolve(&JobDefaults::default()).unwrap();
        assert_eq!(job.start_cmd, "uvicorn main:app --port 9000");
    }

    #[test]
    fn test_resolve_accepts_scp_like_urls() {
        let job = request("git@github.com:acme/shop.git", 8000)
            .resolve(&JobDefaults::default())
            .unwrap();
        assert_eq!(job.app_name, "shop");
    }

    #[test]
    fn test_resolve_rejects_invalid_requests() {
        let defaults = JobDefaults::default();

        assert!(request("", 8000).resolve(&defaults).is_err());
        assert!(request("not a url", 8000).resolve(&defaults).is_err());
        assert!(request("https://example/repo", 0).resolve(&defaults).is_err());

        let mut relative = request("https://example/repo", 8000);
        relative.target_dir = Some(PathBuf::from("srv/app"));
        assert!(relative.resolve(&defaults).is_err());

        let mut traversal = request("https://example/repo", 8000);
        traversal.app_name = Some("../etc".to_string());
        assert!(traversal.resolve(&defaults).is_err());

        let mut root = request("https://example/repo", 8000);
        root.target_dir = Some(PathBuf::from("/"));
        assert!(root.resolve(&defaults).is_err());

        let mut parent_dir = request("https://example/repo", 8000);
        parent_dir.target_dir = Some(PathBuf::from("/opt/app/../../etc"));
        assert!(parent_dir.resolve(&defaults).is_err());
    }

    #[test]
    fn test_clean_checkout_stays_inside_deploy_root() {
        let defaults = JobDefaults::default();

        let mut outside = request("https://example/repo", 8000);
        outside.clean_checkout = true;
        outside.target_dir = Some(PathBuf::from("/etc"));
        assert!(outside.resolve(&defaults).is_err());

        let mut root_itself = request("https://example/repo", 8000);
        root_itself.clean_checkout = true;
        root_itself.target_dir = Some(PathBuf::from("/opt"));
        assert!(root_itself.resolve(&defaults).is_err());

        // "/opt-other" shares a string prefix but not a path prefix
        let mut sibling = request("https://example/repo", 8000);
        sibling.clean_checkout = true;
        sibling.target_dir = Some(PathBuf::from("/opt-other/repo"));
        assert!(sibling.resolve(&defaults).is_err());

        let mut inside = request("https://example/repo", 8000);
        inside.clean_checkout = true;
        inside.target_dir = Some(PathBuf::from("/opt/repo"));
        assert!(inside.resolve(&defaults).is_ok());

        let mut by_default = request("https://example/repo", 8000);
        by_default.clean_checkout = true;
        assert_eq!(
            by_default.resolve(&defaults).unwrap().target_dir,
            PathBuf::from("/opt/repo")
        );
    }

    #[test]
    fn test_outcome_serializes_stage_names() {
        let step = StepResult {
            stage: Stage::Fetch,
            status: StepStatus::Ok,
            exit_code: Some(0),
            stdout: String::new(),
            stderr: String::new(),
            error: None,
            started_at: Utc::now(),
            elapsed_ms: 3,
        };
        let value = serde_json::to_value(&step).unwrap();
        assert_eq!(value["stage"], "fetch");
        assert_eq!(value["status"], "ok");
        assert!(value.get("error").is_none());

        let diagnosis = serde_json::to_value(DiagnosisOutcome::Skipped).unwrap();
        assert_eq!(diagnosis["status"], "skipped");
    }
}
