//! Git fetch stage

use std::path::Path;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};

use crate::deploy::command::{CommandOutput, ExternalCommand};
use crate::deploy::stages::StageFailure;
use crate::errors::StageError;
use crate::models::deployment::DeploymentJob;

/// Output fragments that mean git failed even when it exited cleanly
const FATAL_MARKERS: [&str; 5] = [
    "fatal:",
    "error:",
    "Repository not found",
    "Could not resolve host",
    "Permission denied",
];

/// HTTP credentials for private repositories
#[derive(Debug, Clone)]
pub struct GitCredentials {
    pub username: String,
    pub token: SecretString,
}

impl GitCredentials {
    fn basic_header(&self) -> String {
        let raw = format!("{}:{}", self.username, self.token.expose_secret());
        format!("Authorization: Basic {}", STANDARD.encode(raw))
    }
}

/// Returns the first fatal marker found in the output, if any
pub fn find_fatal_marker(output: &CommandOutput) -> Option<&'static str> {
    FATAL_MARKERS
        .iter()
        .find(|marker| output.stdout.contains(**marker) || output.stderr.contains(**marker))
        .copied()
}

fn is_checkout(dir: &Path) -> bool {
    dir.join(".git").exists()
}

/// Compare remote URLs, ignoring a trailing slash or `.git`
pub fn same_remote(a: &str, b: &str) -> bool {
    fn normalize(url: &str) -> &str {
        let url = url.trim().trim_end_matches('/');
        url.strip_suffix(".git").unwrap_or(url)
    }
    normalize(a) == normalize(b)
}

/// Build the git command for the job: pull inside an existing checkout,
/// clone otherwise. Without a branch, the clone takes the remote's default
/// branch and the pull follows the checkout's current one.
pub fn fetch_command(
    job: &DeploymentJob,
    credentials: Option<&GitCredentials>,
    timeout: Duration,
) -> ExternalCommand {
    let cmd = if is_checkout(job.target()) {
        let cmd = ExternalCommand::new("git").current_dir(job.target()).arg("pull");
        match &job.branch {
            Some(branch) => cmd.args(["origin", branch.as_str()]),
            None => cmd,
        }
    } else {
        let cmd = ExternalCommand::new("git").arg("clone");
        let cmd = match &job.branch {
            Some(branch) => cmd.args(["-b", branch.as_str()]),
            None => cmd,
        };
        cmd.arg(job.repo_url.as_str())
            .arg(job.target_dir.to_string_lossy())
    };

    // Passed through the environment so the header never shows up in argv
    let cmd = match credentials {
        Some(creds) => cmd
            .env("GIT_CONFIG_COUNT", "1")
            .env("GIT_CONFIG_KEY_0", "http.extraHeader")
            .env("GIT_CONFIG_VALUE_0", creds.basic_header()),
        None => cmd,
    };

    cmd.env("GIT_TERMINAL_PROMPT", "0").timeout(timeout)
}

/// Sync the job's repository into its target directory
pub async fn sync_repository(
    job: &DeploymentJob,
    credentials: Option<&GitCredentials>,
    timeout: Duration,
) -> Result<CommandOutput, StageFailure> {
    info!(
        "Syncing Git repository: {} (branch: {}) to {}",
        job.repo_url,
        job.branch_label(),
        job.target_dir.display()
    );

    // only ever delete something git put there
    if job.clean_checkout && is_checkout(job.target()) {
        debug!("Removing {} for a clean checkout", job.target_dir.display());
        tokio::fs::remove_dir_all(job.target()).await.map_err(|e| {
            StageFailure::new(StageError::FetchError(format!(
                "failed to remove {}: {}",
                job.target_dir.display(),
                e
            )))
        })?;
    }

    if let Some(parent) = job.target().parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|e| {
            StageFailure::new(StageError::FetchError(format!(
                "failed to create {}: {}",
                parent.display(),
                e
            )))
        })?;
    }

    if is_checkout(job.target()) {
        ensure_origin(job, timeout).await?;
    }

    let cmd = fetch_command(job, credentials, timeout);
    let output = cmd
        .run()
        .await
        .map_err(|e| StageFailure::new(StageError::FetchError(e.to_string())))?;

    if !output.success {
        warn!("{} exited with {:?}", cmd.describe(), output.exit_code);
        let message = format!("{} failed: {}", cmd.describe(), output.combined());
        return Err(StageFailure::new(StageError::FetchError(message)).with_output(output));
    }

    if let Some(marker) = find_fatal_marker(&output) {
        warn!("{} reported '{}'", cmd.describe(), marker);
        let message = format!("{} reported an error: {}", cmd.describe(), output.combined());
        return Err(StageFailure::new(StageError::FetchError(message)).with_output(output));
    }

    info!("Successfully synced Git repository");
    Ok(output)
}

/// Fail unless the existing checkout was cloned from the requested repository
async fn ensure_origin(job: &DeploymentJob, timeout: Duration) -> Result<(), StageFailure> {
    let output = ExternalCommand::new("git")
        .current_dir(job.target())
        .args(["remote", "get-url", "origin"])
        .timeout(timeout)
        .run()
        .await
        .map_err(|e| StageFailure::new(StageError::FetchError(e.to_string())))?;

    let origin = output.stdout.trim();
    if !output.success || !same_remote(origin, &job.repo_url) {
        let found = if output.success { origin } else { "no origin remote" };
        let message = format!(
            "{} already holds a checkout of {}, not {}; request a clean checkout to replace it",
            job.target_dir.display(),
            found,
            job.repo_url
        );
        return Err(StageFailure::new(StageError::FetchError(message)).with_output(output));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::deployment::{DeploymentRequest, JobDefaults};

    fn job_in(dir: &Path) -> DeploymentJob {
        DeploymentRequest {
            repo_url: "https://example.com/acme/web.git".to_string(),
            target_dir: Some(dir.join("web")),
            port: 8000,
            ..Default::default()
        }
        .resolve(&JobDefaults::default())
        .unwrap()
    }

    fn with_branch(mut job: DeploymentJob, branch: &str) -> DeploymentJob {
        job.branch = Some(branch.to_string());
        job
    }

    #[test]
    fn test_clone_without_branch_uses_remote_default() {
        let dir = tempfile::tempdir().unwrap();
        let job = job_in(dir.path());
        let cmd = fetch_command(&job, None, Duration::from_secs(5));
        assert_eq!(
            cmd.describe(),
            format!(
                "git clone https://example.com/acme/web.git {}",
                job.target_dir.display()
            )
        );
    }

    #[test]
    fn test_clone_requested_branch() {
        let dir = tempfile::tempdir().unwrap();
        let job = with_branch(job_in(dir.path()), "develop");
        let cmd = fetch_command(&job, None, Duration::from_secs(5));
        assert_eq!(
            cmd.describe(),
            format!(
                "git clone -b develop https://example.com/acme/web.git {}",
                job.target_dir.display()
            )
        );
    }

    #[test]
    fn test_pull_inside_existing_checkout() {
        let dir = tempfile::tempdir().unwrap();
        let job = job_in(dir.path());
        std::fs::create_dir_all(job.target_dir.join(".git")).unwrap();

        let cmd = fetch_command(&job, None, Duration::from_secs(5));
        assert_eq!(cmd.describe(), "git pull");

        let cmd = fetch_command(&with_branch(job, "main"), None, Duration::from_secs(5));
        assert_eq!(cmd.describe(), "git pull origin main");
    }

    #[test]
    fn test_same_remote() {
        assert!(same_remote(
            "https://example.com/acme/web.git",
            "https://example.com/acme/web"
        ));
        assert!(same_remote("https://example.com/acme/web/\n", "https://example.com/acme/web"));
        assert!(!same_remote(
            "https://example.com/acme/web.git",
            "https://example.com/other/web.git"
        ));
    }

    #[test]
    fn test_credentials_stay_out_of_argv() {
        let dir = tempfile::tempdir().unwrap();
        let job = job_in(dir.path());
        let creds = GitCredentials {
            username: "deploy".to_string(),
            token: SecretString::from("ghp_secret".to_string()),
        };
        let cmd = fetch_command(&job, Some(&creds), Duration::from_secs(5));
        assert!(!cmd.describe().contains("ghp_secret"));
        assert_eq!(
            creds.basic_header(),
            format!("Authorization: Basic {}", STANDARD.encode("deploy:ghp_secret"))
        );
    }

    #[test]
    fn test_fatal_markers() {
        let clean = CommandOutput {
            exit_code: Some(0),
            success: true,
            stdout: String::new(),
            stderr: "Cloning into '/opt/web'...\n".to_string(),
        };
        assert_eq!(find_fatal_marker(&clean), None);

        let fatal = CommandOutput {
            stderr: "fatal: repository 'x' not found".to_string(),
            ..clean.clone()
        };
        assert_eq!(find_fatal_marker(&fatal), Some("fatal:"));

        let dns = CommandOutput {
            stdout: "Could not resolve host: example.com".to_string(),
            ..clean
        };
        assert_eq!(find_fatal_marker(&dns), Some("Could not resolve host"));
    }

    // Local repositories exercised through real git

    fn git(dir: &Path, args: &[&str]) {
        let status = std::process::Command::new("git")
            .args(["-c", "user.name=deploybot", "-c", "user.email=deploybot@localhost"])
            .args(args)
            .current_dir(dir)
            .output()
            .unwrap();
        assert!(status.status.success(), "git {:?}: {:?}", args, status);
    }

    /// A repository holding a single `<name>.txt`
    fn init_repo(root: &Path, name: &str) -> String {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        git(&dir, &["init", "-q"]);
        std::fs::write(dir.join(format!("{}.txt", name)), name).unwrap();
        git(&dir, &["add", "."]);
        git(&dir, &["commit", "-q", "-m", "initial"]);
        format!("file://{}", dir.display())
    }

    fn local_job(root: &Path, repo_url: &str, clean_checkout: bool) -> DeploymentJob {
        let defaults = JobDefaults {
            deploy_root: root.join("deploy"),
            ..JobDefaults::default()
        };
        DeploymentRequest {
            app_name: Some("app".to_string()),
            repo_url: repo_url.to_string(),
            port: 8000,
            clean_checkout,
            ..Default::default()
        }
        .resolve(&defaults)
        .unwrap()
    }

    #[tokio::test]
    async fn test_checkout_of_other_repository_is_refused() {
        let root = tempfile::tempdir().unwrap();
        let repo_a = init_repo(root.path(), "a");
        let repo_b = init_repo(root.path(), "b");
        let timeout = Duration::from_secs(30);

        let job_a = local_job(root.path(), &repo_a, false);
        sync_repository(&job_a, None, timeout).await.unwrap();
        assert!(job_a.target_dir.join("a.txt").is_file());

        // pulling the same repository again is fine
        sync_repository(&job_a, None, timeout).await.unwrap();

        let job_b = local_job(root.path(), &repo_b, false);
        let failure = sync_repository(&job_b, None, timeout).await.unwrap_err();
        match failure.error {
            StageError::FetchError(message) => assert!(message.contains(&repo_a)),
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(job_b.target_dir.join("a.txt").is_file());
        assert!(!job_b.target_dir.join("b.txt").exists());
    }

    #[tokio::test]
    async fn test_clean_checkout_replaces_other_repository() {
        let root = tempfile::tempdir().unwrap();
        let repo_a = init_repo(root.path(), "a");
        let repo_b = init_repo(root.path(), "b");
        let timeout = Duration::from_secs(30);

        sync_repository(&local_job(root.path(), &repo_a, false), None, timeout)
            .await
            .unwrap();

        let job_b = local_job(root.path(), &repo_b, true);
        sync_repository(&job_b, None, timeout).await.unwrap();
        assert!(job_b.target_dir.join("b.txt").is_file());
        assert!(!job_b.target_dir.join("a.txt").exists());
    }

    #[tokio::test]
    async fn test_clean_checkout_keeps_non_git_directory() {
        let root = tempfile::tempdir().unwrap();
        let repo_a = init_repo(root.path(), "a");
        let job = local_job(root.path(), &repo_a, true);
        std::fs::create_dir_all(&job.target_dir).unwrap();
        std::fs::write(job.target_dir.join("keep.txt"), "data").unwrap();

        // git refuses to clone into a non-empty directory
        let failure = sync_repository(&job, None, Duration::from_secs(30))
            .await
            .unwrap_err();
        assert!(matches!(failure.error, StageError::FetchError(_)));
        assert!(job.target_dir.join("keep.txt").is_file());
    }
}
