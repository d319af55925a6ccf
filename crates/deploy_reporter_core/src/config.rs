use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_FILENAME: &str = "deploy-reporter.toml";
pub const DEFAULT_DATE_FIELD_ID: &str = "customfield_10817";
pub const DEFAULT_PARENT_PAGE_ID: &str = "4596203549";
pub const DEFAULT_STATE_DIR: &str = ".deploy-reporter";
pub const DEFAULT_NOTIFY_HOURS: (u32, u32) = (8, 20);
pub const DEFAULT_USER_AGENT: &str = "deploy-reporter/0.2";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ConfigFile {
    #[serde(default)]
    pub reporter: ReporterSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ReporterSection {
    pub atlassian_url: Option<String>,
    pub username: Option<String>,
    pub api_token: Option<String>,
    pub project_key: Option<String>,
    pub space_key: Option<String>,
    pub parent_page_id: Option<String>,
    pub date_field_id: Option<String>,
    pub slack_webhook_url: Option<String>,
    pub slack_bot_token: Option<String>,
    pub notify_hours: Option<[u32; 2]>,
    pub state_dir: Option<String>,
    pub log_dir: Option<String>,
    #[serde(default)]
    pub approvers: Vec<Approver>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Approver {
    pub email: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpSettings {
    pub user_agent: String,
    pub timeout_ms: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_ms: 30_000,
            max_retries: 2,
            retry_delay_ms: 500,
        }
    }
}

/// Fully resolved settings handed to the orchestrator and the clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReporterConfig {
    pub atlassian_url: Option<String>,
    pub username: Option<String>,
    pub api_token: Option<String>,
    pub project_key: Option<String>,
    pub space_key: Option<String>,
    pub parent_page_id: String,
    pub date_field_id: String,
    pub slack_webhook_url: Option<String>,
    pub slack_bot_token: Option<String>,
    pub notify_hours: (u32, u32),
    pub state_dir: PathBuf,
    pub log_dir: PathBuf,
    pub approvers: Vec<Approver>,
    pub http: HttpSettings,
}

/// The connection parameters a run cannot start without.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub atlassian_url: String,
    pub username: String,
    pub api_token: String,
    pub project_key: String,
    pub space_key: String,
}

impl ReporterConfig {
    /// Resolve every setting: env > config file > default.
    pub fn resolve(file: &ConfigFile) -> Self {
        Self::resolve_with(file, |key| env::var(key).ok())
    }

    pub fn resolve_with<F>(file: &ConfigFile, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let section = &file.reporter;
        let pick = |key: &str, fallback: &Option<String>| -> Option<String> {
            non_empty(lookup(key)).or_else(|| non_empty(fallback.clone()))
        };

        let state_dir = PathBuf::from(
            pick("REPORTER_STATE_DIR", &section.state_dir)
                .unwrap_or_else(|| DEFAULT_STATE_DIR.to_string()),
        );
        let log_dir = pick("REPORTER_LOG_DIR", &section.log_dir)
            .map(PathBuf::from)
            .unwrap_or_else(|| state_dir.join("logs"));

        let file_hours = section
            .notify_hours
            .map(|[start, end]| (start, end))
            .unwrap_or(DEFAULT_NOTIFY_HOURS);
        let notify_hours = (
            parse_or(lookup("NOTIFY_START_HOUR"), file_hours.0),
            parse_or(lookup("NOTIFY_END_HOUR"), file_hours.1),
        );

        let defaults = HttpSettings::default();
        let http = HttpSettings {
            user_agent: non_empty(lookup("REPORTER_USER_AGENT")).unwrap_or(defaults.user_agent),
            timeout_ms: parse_or(lookup("REPORTER_HTTP_TIMEOUT_MS"), defaults.timeout_ms),
            max_retries: parse_or(lookup("REPORTER_HTTP_RETRIES"), defaults.max_retries),
            retry_delay_ms: parse_or(
                lookup("REPORTER_HTTP_RETRY_DELAY_MS"),
                defaults.retry_delay_ms,
            ),
        };

        Self {
            atlassian_url: pick("ATLASSIAN_URL", &section.atlassian_url)
                .map(|url| url.trim_end_matches('/').to_string()),
            username: pick("ATLASSIAN_USERNAME", &section.username),
            api_token: pick("ATLASSIAN_API_TOKEN", &section.api_token),
            project_key: pick("JIRA_PROJECT_KEY", &section.project_key),
            space_key: pick("CONFLUENCE_SPACE_KEY", &section.space_key),
            parent_page_id: pick("CONFLUENCE_PARENT_PAGE_ID", &section.parent_page_id)
                .unwrap_or_else(|| DEFAULT_PARENT_PAGE_ID.to_string()),
            date_field_id: pick("JIRA_DEPLOY_DATE_FIELD_ID", &section.date_field_id)
                .unwrap_or_else(|| DEFAULT_DATE_FIELD_ID.to_string()),
            slack_webhook_url: pick("SLACK_WEBHOOK_URL", &section.slack_webhook_url),
            slack_bot_token: pick("SLACK_BOT_TOKEN", &section.slack_bot_token),
            notify_hours,
            state_dir,
            log_dir,
            approvers: section.approvers.clone(),
            http,
        }
    }

    /// Fails before any I/O when a required connection parameter is missing.
    pub fn require_connection(&self) -> Result<ConnectionSettings> {
        let required = [
            ("ATLASSIAN_URL", &self.atlassian_url),
            ("ATLASSIAN_USERNAME", &self.username),
            ("ATLASSIAN_API_TOKEN", &self.api_token),
            ("JIRA_PROJECT_KEY", &self.project_key),
            ("CONFLUENCE_SPACE_KEY", &self.space_key),
        ];
        let missing = required
            .iter()
            .filter(|(_, value)| value.is_none())
            .map(|(key, _)| *key)
            .collect::<Vec<_>>();
        if !missing.is_empty() {
            bail!("missing required configuration: {}", missing.join(", "));
        }

        Ok(ConnectionSettings {
            atlassian_url: self.atlassian_url.clone().unwrap_or_default(),
            username: self.username.clone().unwrap_or_default(),
            api_token: self.api_token.clone().unwrap_or_default(),
            project_key: self.project_key.clone().unwrap_or_default(),
            space_key: self.space_key.clone().unwrap_or_default(),
        })
    }

    pub fn snapshot_path(&self, slot: &str) -> PathBuf {
        self.state_dir.join(format!("snapshot_{slot}.json"))
    }

    pub fn fingerprints_path(&self, slot: &str) -> PathBuf {
        self.state_dir
            .join(format!("notified_fingerprints_{slot}.json"))
    }

    pub fn deploy_keys_path(&self, slot: &str) -> PathBuf {
        self.state_dir
            .join(format!("notified_deploy_keys_{slot}.json"))
    }

    pub fn diagnostics(&self) -> String {
        let show = |value: &Option<String>| value.clone().unwrap_or_else(|| "<unset>".to_string());
        let redact = |value: &Option<String>| {
            if value.is_some() {
                "<redacted>".to_string()
            } else {
                "<unset>".to_string()
            }
        };
        [
            format!("atlassian_url: {}", show(&self.atlassian_url)),
            format!("username: {}", show(&self.username)),
            format!("api_token: {}", redact(&self.api_token)),
            format!("project_key: {}", show(&self.project_key)),
            format!("space_key: {}", show(&self.space_key)),
            format!("parent_page_id: {}", self.parent_page_id),
            format!("date_field_id: {}", self.date_field_id),
            format!("slack_webhook_url: {}", redact(&self.slack_webhook_url)),
            format!("slack_bot_token: {}", redact(&self.slack_bot_token)),
            format!(
                "notify_hours: {}..{}",
                self.notify_hours.0, self.notify_hours.1
            ),
            format!("state_dir: {}", normalize_path(&self.state_dir)),
            format!("log_dir: {}", normalize_path(&self.log_dir)),
            format!("approvers: {}", self.approvers.len()),
        ]
        .join("\n")
    }
}

/// Load and parse a config file. Returns default if the file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<ConfigFile> {
    if !config_path.exists() {
        return Ok(ConfigFile::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: ConfigFile = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

pub fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, default: T) -> T {
    value
        .and_then(|value| value.trim().parse::<T>().ok())
        .unwrap_or(default)
}
