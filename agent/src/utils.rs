//! Utility functions

use serde::{Deserialize, Serialize};

/// Version information for the bot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Get version information
pub fn version_info() -> VersionInfo {
    VersionInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: option_env!("GIT_HASH").unwrap_or("unknown").to_string(),
        build_time: option_env!("BUILD_TIME").unwrap_or("unknown").to_string(),
    }
}

/// Generate a task id of the form `<app>_<port>_<suffix>`
pub fn generate_task_id(app_name: &str, port: u16) -> String {
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    format!("{}_{}_{}", app_name, port, &uuid[..8])
}

/// Keep at most `max_chars` characters from the end of `text`
pub fn tail(text: &str, max_chars: usize) -> &str {
    let count = text.chars().count();
    if count <= max_chars {
        return text;
    }
    match text.char_indices().nth(count - max_chars) {
        Some((idx, _)) => &text[idx..],
        None => text,
    }
}
