//! Application configuration options

use std::time::Duration;

use crate::deploy::git::GitCredentials;
use crate::deploy::pipeline::PipelineOptions;
use crate::deploy::probe::VerifyOptions;
use crate::deploy::stages::StageOptions;
use crate::http::diagnosis::DiagnosisOptions;
use crate::http::notify::NotificationOptions;
use crate::models::deployment::JobDefaults;
use crate::storage::settings::Settings;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Server configuration
    pub server: ServerOptions,

    /// Orchestrator configuration
    pub pipeline: PipelineOptions,

    /// Stage configuration
    pub stages: StageOptions,

    /// Host probed during port verification
    pub probe_host: String,

    /// Per-connect timeout of the port probe
    pub probe_connect_timeout: Duration,

    /// AI diagnosis; disabled when None
    pub diagnosis: Option<DiagnosisOptions>,

    /// Push notifications; disabled when None
    pub notification: Option<NotificationOptions>,
}

impl AppOptions {
    /// Build options from settings. Diagnosis and notification are only
    /// enabled when their keys are present.
    pub fn from_settings(settings: &Settings) -> Self {
        let credentials = match (&settings.git.username, &settings.git.token) {
            (Some(username), Some(token)) => Some(GitCredentials {
                username: username.clone(),
                token: token.clone(),
            }),
            _ => None,
        };

        let diagnosis = settings
            .diagnosis
            .api_key
            .as_ref()
            .filter(|_| settings.diagnosis.enabled)
            .map(|api_key| DiagnosisOptions {
                base_url: settings.diagnosis.base_url.clone(),
                model: settings.diagnosis.model.clone(),
                api_key: api_key.clone(),
                temperature: settings.diagnosis.temperature,
                max_tokens: settings.diagnosis.max_tokens,
                timeout: Duration::from_secs(settings.diagnosis.timeout_secs),
            });

        let notification = settings
            .notification
            .sendkey
            .as_ref()
            .filter(|_| settings.notification.enabled)
            .map(|sendkey| NotificationOptions {
                endpoint: settings.notification.endpoint.clone(),
                sendkey: sendkey.clone(),
                timeout: Duration::from_secs(settings.notification.timeout_secs),
            });

        Self {
            lifecycle: LifecycleOptions::new(
                Duration::from_secs(settings.shutdown_delay_secs),
                Duration::from_secs(settings.diagnosis.timeout_secs)
                    + Duration::from_secs(settings.notification.timeout_secs),
            ),
            server: ServerOptions {
                host: settings.server.host.clone(),
                port: settings.server.port,
            },
            pipeline: PipelineOptions {
                defaults: JobDefaults {
                    deploy_root: settings.deploy_root.clone(),
                    branch: settings.default_branch.clone(),
                    runtime: settings.runtime_version.clone(),
                    manifest: settings.manifest.clone(),
                },
                public_host: settings.public_host.clone(),
            },
            stages: StageOptions {
                command_timeout: Duration::from_secs(settings.command_timeout_secs),
                pip_extra_args: settings.pip_extra_args.clone(),
                credentials,
                verify: VerifyOptions {
                    attempts: settings.verify.attempts,
                    interval: Duration::from_millis(settings.verify.interval_ms),
                    initial_delay: Duration::from_millis(settings.verify.initial_delay_ms),
                    deadline: Duration::from_secs(settings.verify.deadline_secs),
                },
            },
            probe_host: "127.0.0.1".to_string(),
            probe_connect_timeout: Duration::from_millis(settings.verify.connect_timeout_ms),
            diagnosis,
            notification,
        }
    }
}

impl Default for AppOptions {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

/// Lifecycle options
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Time background deployments get to finish before they are aborted
    pub deployment_grace: Duration,

    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl LifecycleOptions {
    /// Margin for stopping the server and killing aborted commands
    const SHUTDOWN_MARGIN: Duration = Duration::from_secs(10);

    /// `reporting` bounds what a deployment still does after its stages
    /// stop: diagnosis and notification
    pub fn new(deployment_grace: Duration, reporting: Duration) -> Self {
        Self {
            deployment_grace,
            max_shutdown_delay: deployment_grace + reporting + Self::SHUTDOWN_MARGIN,
        }
    }
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self::new(Duration::from_secs(30), Duration::from_secs(70))
    }
}

/// Local HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}
