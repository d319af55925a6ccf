use std::collections::BTreeSet;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::config::{ConnectionSettings, HttpSettings};
use crate::http::ApiClient;

const SEARCH_PAGE_SIZE: usize = 100;
const SINGLE_PAGE_LIMIT: usize = 1000;
const DEPLOYED_BY_INWARD: &str = "is deployed by";
const DEPLOYS_OUTWARD: &str = "deploys";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Assignee {
    pub display_name: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkDirection {
    /// This ticket is deployed by the linked ticket.
    DeployedBy,
    /// This ticket deploys the linked ticket.
    Deploys,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TicketLink {
    pub direction: LinkDirection,
    pub key: String,
    pub status: String,
    pub summary: String,
}

/// Canonical ticket shape; every tracker payload is normalized into this
/// once, at the fetcher boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TicketRecord {
    pub key: String,
    pub summary: String,
    pub status: String,
    pub assignee: Option<Assignee>,
    pub scheduled_date: Option<String>,
    pub links: Vec<TicketLink>,
}

impl TicketRecord {
    pub fn deployed_by(&self) -> impl Iterator<Item = &TicketLink> {
        self.links
            .iter()
            .filter(|link| link.direction == LinkDirection::DeployedBy)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketQuery {
    pub project_key: String,
    pub date_field_id: String,
    pub start: String,
    pub end: String,
    pub paginate: bool,
}

pub trait TicketFetcher {
    fn fetch(&mut self, query: &TicketQuery) -> Result<Vec<TicketRecord>>;
    /// Summary of a single ticket, for links whose payload omits it.
    fn lookup_summary(&mut self, key: &str) -> Result<Option<String>>;
    fn request_count(&self) -> usize;
}

/// Fetch failures are not fatal: the run continues with an empty list and
/// publishes an empty-state page.
pub fn fetch_or_empty<F: TicketFetcher + ?Sized>(
    fetcher: &mut F,
    query: &TicketQuery,
) -> Vec<TicketRecord> {
    match fetcher.fetch(query) {
        Ok(tickets) => tickets,
        Err(error) => {
            warn!(error = %format!("{error:#}"), "ticket fetch failed; continuing with no tickets");
            Vec::new()
        }
    }
}

pub fn build_jql(query: &TicketQuery) -> String {
    let field = jql_field(&query.date_field_id);
    format!(
        "project = '{}' AND {field} >= '{}' AND {field} <= '{}' ORDER BY {field} ASC",
        query.project_key, query.start, query.end
    )
}

/// `customfield_10817` → `cf[10817]`; anything else is quoted verbatim.
fn jql_field(date_field_id: &str) -> String {
    match date_field_id.strip_prefix("customfield_") {
        Some(id) if !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()) => {
            format!("cf[{id}]")
        }
        _ => format!("'{date_field_id}'"),
    }
}

pub fn browse_url(tracker_url: &str, key: &str) -> String {
    format!("{}/browse/{key}", tracker_url.trim_end_matches('/'))
}

/// Accepts both the REST shape (`{key, fields: {...}}`) and a flattened
/// shape (`{key, summary, status, ...}`). Returns `None` for records without
/// a usable key.
pub fn normalize_issue(value: &Value, date_field_id: &str) -> Option<TicketRecord> {
    let key = value.get("key")?.as_str()?.trim();
    if key.is_empty() {
        return None;
    }
    let fields = value
        .get("fields")
        .filter(|fields| fields.is_object())
        .unwrap_or(value);

    Some(TicketRecord {
        key: key.to_string(),
        summary: text_of(fields.get("summary")),
        status: name_of(fields.get("status")),
        assignee: assignee_of(fields.get("assignee")),
        scheduled_date: date_of(fields.get(date_field_id)),
        links: links_of(fields.get("issuelinks")),
    })
}

/// Offset paging can repeat an issue across pages when sort values tie, so
/// only the first record per key is kept.
pub fn normalize_issues(values: &[Value], date_field_id: &str) -> Vec<TicketRecord> {
    let mut seen = BTreeSet::new();
    let mut tickets = Vec::with_capacity(values.len());
    for value in values {
        let Some(ticket) = normalize_issue(value, date_field_id) else {
            warn!("skipping tracker record without a key");
            continue;
        };
        if !seen.insert(ticket.key.clone()) {
            warn!(key = %ticket.key, "skipping repeated tracker record");
            continue;
        }
        tickets.push(ticket);
    }
    tickets
}

fn text_of(value: Option<&Value>) -> String {
    value
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn name_of(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(name)) => name.clone(),
        Some(object) => text_of(object.get("name")),
        None => String::new(),
    }
}

fn assignee_of(value: Option<&Value>) -> Option<Assignee> {
    let value = value?;
    if let Some(name) = value.as_str() {
        let name = name.trim();
        return (!name.is_empty()).then(|| Assignee {
            display_name: name.to_string(),
            email: None,
        });
    }
    let display_name = value
        .get("displayName")
        .or_else(|| value.get("name"))
        .and_then(Value::as_str)?
        .to_string();
    let email = value
        .get("emailAddress")
        .and_then(Value::as_str)
        .map(ToString::to_string);
    Some(Assignee {
        display_name,
        email,
    })
}

fn date_of(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(date) => Some(date.clone()),
        Value::Object(object) => object
            .get("value")
            .and_then(Value::as_str)
            .map(ToString::to_string),
        _ => None,
    }
}

fn links_of(value: Option<&Value>) -> Vec<TicketLink> {
    let Some(links) = value.and_then(Value::as_array) else {
        return Vec::new();
    };
    let mut output = Vec::new();
    for link in links {
        let link_type = link.get("type");
        let inward = link_type.and_then(|kind| kind.get("inward")).and_then(Value::as_str);
        let outward = link_type
            .and_then(|kind| kind.get("outward"))
            .and_then(Value::as_str);
        let name = link_type.and_then(|kind| kind.get("name")).and_then(Value::as_str);

        if inward == Some(DEPLOYED_BY_INWARD)
            && let Some(issue) = link.get("inwardIssue")
            && let Some(linked) = linked_ticket(issue, LinkDirection::DeployedBy)
        {
            output.push(linked);
        }
        if (outward == Some(DEPLOYS_OUTWARD) || name == Some(DEPLOYS_OUTWARD))
            && let Some(issue) = link.get("outwardIssue")
            && let Some(linked) = linked_ticket(issue, LinkDirection::Deploys)
        {
            output.push(linked);
        }
    }
    output
}

fn linked_ticket(issue: &Value, direction: LinkDirection) -> Option<TicketLink> {
    let key = issue.get("key")?.as_str()?.to_string();
    let fields = issue.get("fields");
    Some(TicketLink {
        direction,
        key,
        status: name_of(fields.and_then(|fields| fields.get("status"))),
        summary: text_of(fields.and_then(|fields| fields.get("summary"))),
    })
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SearchPage {
    #[serde(default)]
    pub total: Option<usize>,
    #[serde(default)]
    pub issues: Vec<Value>,
}

/// Drain a `startAt`-paged search until `total` is reached or a page comes
/// back empty.
pub fn collect_pages<F>(mut fetch_page: F) -> Result<Vec<Value>>
where
    F: FnMut(usize) -> Result<SearchPage>,
{
    let mut issues = Vec::new();
    let mut start_at = 0usize;
    loop {
        let page = fetch_page(start_at)?;
        let received = page.issues.len();
        issues.extend(page.issues);
        start_at += received;
        let exhausted = page.total.is_none_or(|total| start_at >= total);
        if received == 0 || exhausted {
            break;
        }
    }
    Ok(issues)
}

pub struct JiraClient {
    api: ApiClient,
    base_url: String,
    username: String,
    api_token: String,
}

impl JiraClient {
    pub fn new(connection: &ConnectionSettings, http: &HttpSettings) -> Result<Self> {
        Ok(Self {
            api: ApiClient::new(http.clone())?,
            base_url: connection.atlassian_url.trim_end_matches('/').to_string(),
            username: connection.username.clone(),
            api_token: connection.api_token.clone(),
        })
    }

    fn search_page(
        &mut self,
        jql: &str,
        fields: &str,
        start_at: usize,
        max_results: usize,
    ) -> Result<SearchPage> {
        let url = format!("{}/rest/api/2/search", self.base_url);
        let params = [
            ("jql", jql.to_string()),
            ("fields", fields.to_string()),
            ("startAt", start_at.to_string()),
            ("maxResults", max_results.to_string()),
        ];
        let (username, token) = (self.username.clone(), self.api_token.clone());
        let payload = self.api.request_json("Jira search", |client| {
            client
                .get(&url)
                .basic_auth(&username, Some(&token))
                .header("Accept", "application/json")
                .query(&params)
        })?;
        serde_json::from_value(payload).context("failed to decode Jira search response")
    }
}

impl TicketFetcher for JiraClient {
    fn fetch(&mut self, query: &TicketQuery) -> Result<Vec<TicketRecord>> {
        let jql = build_jql(query);
        let fields = format!(
            "summary,status,assignee,issuelinks,{}",
            query.date_field_id
        );
        info!(%jql, paginate = query.paginate, "querying tracker");

        let raw = if query.paginate {
            collect_pages(|start_at| self.search_page(&jql, &fields, start_at, SEARCH_PAGE_SIZE))?
        } else {
            self.search_page(&jql, &fields, 0, SINGLE_PAGE_LIMIT)?.issues
        };
        Ok(normalize_issues(&raw, &query.date_field_id))
    }

    fn lookup_summary(&mut self, key: &str) -> Result<Option<String>> {
        let url = format!("{}/rest/api/2/issue/{key}", self.base_url);
        let (username, token) = (self.username.clone(), self.api_token.clone());
        let payload = self.api.request_optional_json("Jira issue lookup", |client| {
            client
                .get(&url)
                .basic_auth(&username, Some(&token))
                .header("Accept", "application/json")
                .query(&[("fields", "summary")])
        })?;
        Ok(payload.and_then(|payload| {
            payload
                .get("fields")
                .and_then(|fields| fields.get("summary"))
                .and_then(Value::as_str)
                .map(ToString::to_string)
        }))
    }

    fn request_count(&self) -> usize {
        self.api.request_count()
    }
}
