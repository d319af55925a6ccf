use std::collections::BTreeMap;

use anyhow::{Result, bail};
use chrono::{Local, Timelike};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::changes::{ChangedTicket, SnapshotDiff};
use crate::config::HttpSettings;
use crate::http::ApiClient;

const SLACK_API_URL: &str = "https://slack.com/api";

/// Chat delivery seam. `Ok(true)` means delivered, `Ok(false)` means the
/// notifier declined on its own (unconfigured or outside allowed hours).
pub trait Notifier {
    fn send(&mut self, text: &str) -> Result<bool>;
}

/// `[start, end)` in local hours; a window with `start > end` wraps midnight.
pub fn within_hours(hour: u32, (start, end): (u32, u32)) -> bool {
    if start <= end {
        (start..end).contains(&hour)
    } else {
        hour >= start || hour < end
    }
}

pub struct SlackNotifier {
    api: ApiClient,
    webhook_url: Option<String>,
    hours: (u32, u32),
}

impl SlackNotifier {
    pub fn new(webhook_url: Option<String>, hours: (u32, u32), http: &HttpSettings) -> Result<Self> {
        Ok(Self {
            api: ApiClient::new(http.clone())?,
            webhook_url,
            hours,
        })
    }
}

impl Notifier for SlackNotifier {
    fn send(&mut self, text: &str) -> Result<bool> {
        let Some(url) = self.webhook_url.clone() else {
            info!("slack webhook not configured; skipping notification");
            return Ok(false);
        };
        let hour = Local::now().hour();
        if !within_hours(hour, self.hours) {
            info!(
                hour,
                start = self.hours.0,
                end = self.hours.1,
                "outside notification hours; skipping notification"
            );
            return Ok(false);
        }
        let payload = json!({ "text": text });
        let response = self.api.request_text("Slack webhook", |client| {
            client.post(&url).json(&payload)
        })?;
        debug!(response = %response, "slack webhook accepted message");
        Ok(true)
    }
}

/// Turns a person into a chat mention, falling back to their display name.
pub trait MentionResolver {
    fn mention(&mut self, email: Option<&str>, fallback_name: &str) -> String;
}

/// Resolves mentions through `users.lookupByEmail`; results are cached per
/// email, misses included.
pub struct SlackDirectory {
    api: ApiClient,
    bot_token: Option<String>,
    cache: BTreeMap<String, Option<String>>,
}

impl SlackDirectory {
    pub fn new(bot_token: Option<String>, http: &HttpSettings) -> Result<Self> {
        Ok(Self {
            api: ApiClient::new(http.clone())?,
            bot_token,
            cache: BTreeMap::new(),
        })
    }

    fn lookup_user_id(&mut self, email: &str) -> Result<Option<String>> {
        let Some(token) = self.bot_token.clone() else {
            return Ok(None);
        };
        let url = format!("{SLACK_API_URL}/users.lookupByEmail");
        let payload = self.api.request_json("Slack user lookup", |client| {
            client
                .get(&url)
                .bearer_auth(&token)
                .query(&[("email", email)])
        })?;
        user_id_from_lookup(&payload)
    }
}

impl MentionResolver for SlackDirectory {
    fn mention(&mut self, email: Option<&str>, fallback_name: &str) -> String {
        let Some(email) = email.map(str::trim).filter(|email| !email.is_empty()) else {
            return fallback_name.to_string();
        };
        if !self.cache.contains_key(email) {
            let resolved = match self.lookup_user_id(email) {
                Ok(found) => found,
                Err(error) => {
                    warn!(email, error = %format!("{error:#}"), "slack user lookup failed");
                    None
                }
            };
            self.cache.insert(email.to_string(), resolved);
        }
        mention_or_name(
            self.cache.get(email).and_then(Option::as_deref),
            fallback_name,
        )
    }
}

pub fn mention_or_name(user_id: Option<&str>, fallback_name: &str) -> String {
    match user_id {
        Some(id) => format!("<@{id}>"),
        None => fallback_name.to_string(),
    }
}

fn user_id_from_lookup(payload: &Value) -> Result<Option<String>> {
    if payload.get("ok").and_then(Value::as_bool) == Some(true) {
        return Ok(payload
            .pointer("/user/id")
            .and_then(Value::as_str)
            .map(ToString::to_string));
    }
    match payload.get("error").and_then(Value::as_str) {
        Some("users_not_found") => Ok(None),
        Some(error) => bail!("Slack user lookup failed: {error}"),
        None => bail!("Slack user lookup failed without an error code"),
    }
}

/// Slack control characters in message text.
pub fn escape_slack(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

pub fn ticket_link(url: &str, key: &str, summary: &str) -> String {
    format!(
        "<{url}|{}: {}>",
        escape_slack(key),
        escape_slack(summary).replace('|', "¦")
    )
}

pub fn change_message(title: &str, url: &str, diff: &SnapshotDiff) -> String {
    let sections: [(&str, &str, &str, &[ChangedTicket]); 3] = [
        ("➕", "추가", "추가된 티켓", &diff.added),
        ("➖", "제거", "제거된 티켓", &diff.removed),
        ("🔄", "갱신", "갱신된 티켓", &diff.updated),
    ];

    let mut counts = Vec::new();
    let mut blocks = Vec::new();
    for (emoji, verb, heading, items) in sections {
        if items.is_empty() {
            continue;
        }
        counts.push(format!("{emoji} {verb}: {}개", items.len()));
        let lines = items
            .iter()
            .map(|item| format!("{emoji} {}", ticket_link(&item.url, &item.key, &item.summary)))
            .collect::<Vec<_>>();
        blocks.push(format!("[{heading}]\n{}", lines.join("\n")));
    }

    format!(
        "📊 배포 일정 리포트가 업데이트되었습니다:\n{}\n{url}\n\n{}\n\n{}",
        escape_slack(title),
        counts.join(" | "),
        blocks.join("\n\n")
    )
}

pub fn created_message(title: &str, url: &str) -> String {
    format!(
        "✅ 배포 일정 리포트가 생성되었습니다.\n\n{}\n{url}",
        escape_slack(title)
    )
}
