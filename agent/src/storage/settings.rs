//! Settings file management

use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::{Deserialize, Deserializer};
use tracing::debug;

use crate::errors::AgentError;
use crate::logs::LogLevel;

/// Default location of the settings file
pub const DEFAULT_SETTINGS_PATH: &str = "/etc/deploybot/settings.json";

/// Bot settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub log_level: LogLevel,

    /// Emit JSON logs on stdout
    pub log_json: bool,

    /// Directory for rolling log files
    pub log_dir: Option<PathBuf>,

    pub server: ServerSettings,

    /// Public host or IP used to build the access URL in notifications
    pub public_host: Option<String>,

    /// Parent of per-app checkouts when a request gives no target directory
    pub deploy_root: PathBuf,

    pub runtime_version: String,

    /// Branch used when a request names none; unset means the remote's default
    pub default_branch: Option<String>,
    pub manifest: String,

    /// Extra arguments appended to the pip install command
    pub pip_extra_args: Vec<String>,

    /// Upper bound for each external command
    pub command_timeout_secs: u64,

    pub verify: VerifySettings,
    pub git: GitSettings,
    pub diagnosis: DiagnosisSettings,
    pub notification: NotificationSettings,

    /// Time in-flight deployments get on shutdown before they are aborted
    /// and reported as failed
    pub shutdown_delay_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_dir: None,
            server: ServerSettings::default(),
            public_host: None,
            deploy_root: PathBuf::from("/opt"),
            runtime_version: "3.9".to_string(),
            default_branch: None,
            manifest: "requirements.txt".to_string(),
            pip_extra_args: vec!["--user".to_string()],
            command_timeout_secs: 300,
            verify: VerifySettings::default(),
            git: GitSettings::default(),
            diagnosis: DiagnosisSettings::default(),
            notification: NotificationSettings::default(),
            shutdown_delay_secs: 30,
        }
    }
}

/// Local HTTP server settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

/// Port verification settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VerifySettings {
    pub attempts: u32,
    pub interval_ms: u64,

    /// Grace period between launching the service and the first poll
    pub initial_delay_ms: u64,

    pub deadline_secs: u64,
    pub connect_timeout_ms: u64,
}

impl Default for VerifySettings {
    fn default() -> Self {
        Self {
            attempts: 10,
            interval_ms: 1000,
            initial_delay_ms: 2000,
            deadline_secs: 30,
            connect_timeout_ms: 500,
        }
    }
}

/// Repository credentials
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GitSettings {
    pub username: Option<String>,

    #[serde(deserialize_with = "deserialize_secret")]
    pub token: Option<SecretString>,
}

/// AI completion settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiagnosisSettings {
    pub enabled: bool,
    pub base_url: String,
    pub model: String,

    #[serde(deserialize_with = "deserialize_secret")]
    pub api_key: Option<SecretString>,

    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for DiagnosisSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://api.deepseek.com/v1".to_string(),
            model: "deepseek-chat".to_string(),
            api_key: None,
            temperature: 0.1,
            max_tokens: 1500,
            timeout_secs: 60,
        }
    }
}

/// Push gateway settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    pub enabled: bool,
    pub endpoint: String,

    #[serde(deserialize_with = "deserialize_secret")]
    pub sendkey: Option<SecretString>,

    pub timeout_secs: u64,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "https://sctapi.ftqq.com".to_string(),
            sendkey: None,
            timeout_secs: 10,
        }
    }
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|v| !v.is_empty()).map(SecretString::from))
}

impl Settings {
    /// Read settings from a JSON file, falling back to defaults when it is absent
    pub async fn load(path: &Path) -> Result<Self, AgentError> {
        match tokio::fs::read_to_string(path).await {
            Ok(contents) => {
                debug!("Loaded settings from {}", path.display());
                serde_json::from_str(&contents).map_err(|e| {
                    AgentError::ConfigError(format!("{}: {}", path.display(), e))
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No settings file at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Apply overrides from the process environment
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable lookup
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(key) = get("DEEPSEEK_API_KEY") {
            self.diagnosis.api_key = Some(SecretString::from(key));
        }
        if let Some(key) = get("SERVERCHAN_SENDKEY") {
            self.notification.sendkey = Some(SecretString::from(key));
        }
        if let Some(host) = get("SERVER_PUBLIC_IP") {
            self.public_host = Some(host);
        }
        if let Some(username) = get("DEPLOYBOT_GIT_USERNAME") {
            self.git.username = Some(username);
        }
        if let Some(token) = get("DEPLOYBOT_GIT_TOKEN") {
            self.git.token = Some(SecretString::from(token));
        }
        if let Some(level) = get("DEPLOYBOT_LOG_LEVEL") {
            match level.parse() {
                Ok(level) => self.log_level = level,
                // logging is not initialized yet
                Err(e) => eprintln!("Ignoring DEPLOYBOT_LOG_LEVEL: {e}"),
            }
        }
        self
    }
}
