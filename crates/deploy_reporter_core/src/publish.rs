use anyhow::{Context, Result, bail};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::info;

use crate::config::{ConnectionSettings, HttpSettings};
use crate::http::ApiClient;
use crate::render::normalize_html;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageInfo {
    pub id: String,
    pub body: String,
}

pub trait PagePublisher {
    fn exists(&mut self, space: &str, title: &str) -> Result<bool> {
        Ok(self.find_page(space, title)?.is_some())
    }
    fn find_page(&mut self, space: &str, title: &str) -> Result<Option<PageInfo>>;
    /// Returns the id of the new page.
    fn create(&mut self, space: &str, title: &str, body: &str, parent_id: &str) -> Result<String>;
    fn update(&mut self, id: &str, title: &str, body: &str, parent_id: &str) -> Result<()>;
    fn request_count(&self) -> usize;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRequest {
    pub space_key: String,
    pub title: String,
    pub body: String,
    pub parent_page_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "page_id", rename_all = "snake_case")]
pub enum PublishOutcome {
    Created(String),
    Updated(String),
    Unchanged(String),
}

impl PublishOutcome {
    pub fn page_id(&self) -> &str {
        match self {
            Self::Created(id) | Self::Updated(id) | Self::Unchanged(id) => id,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created(_) => "created",
            Self::Updated(_) => "updated",
            Self::Unchanged(_) => "unchanged",
        }
    }
}

/// Create the page when absent; otherwise update it only when the
/// normalized bodies differ.
pub fn publish_page<P: PagePublisher + ?Sized>(
    publisher: &mut P,
    request: &PublishRequest,
) -> Result<PublishOutcome> {
    let exists = publisher
        .exists(&request.space_key, &request.title)
        .with_context(|| format!("failed to look up page '{}'", request.title))?;

    if !exists {
        let id = publisher
            .create(
                &request.space_key,
                &request.title,
                &request.body,
                &request.parent_page_id,
            )
            .with_context(|| format!("failed to create page '{}'", request.title))?;
        info!(title = %request.title, page_id = %id, "page created");
        return Ok(PublishOutcome::Created(id));
    }

    let Some(existing) = publisher
        .find_page(&request.space_key, &request.title)
        .with_context(|| format!("failed to read page '{}'", request.title))?
    else {
        bail!("page '{}' disappeared while publishing", request.title);
    };

    if normalize_html(&existing.body) == normalize_html(&request.body) {
        info!(title = %request.title, page_id = %existing.id, "page content unchanged");
        return Ok(PublishOutcome::Unchanged(existing.id));
    }

    publisher
        .update(
            &existing.id,
            &request.title,
            &request.body,
            &request.parent_page_id,
        )
        .with_context(|| format!("failed to update page '{}'", request.title))?;
    info!(title = %request.title, page_id = %existing.id, "page updated");
    Ok(PublishOutcome::Updated(existing.id))
}

pub fn page_url(base_url: &str, space_key: &str, page_id: &str) -> String {
    format!(
        "{}/wiki/spaces/{space_key}/pages/{page_id}",
        base_url.trim_end_matches('/')
    )
}

/// Confluence Cloud content API over basic auth.
pub struct ConfluenceClient {
    api: ApiClient,
    base_url: String,
    username: String,
    api_token: String,
}

impl ConfluenceClient {
    pub fn new(connection: &ConnectionSettings, http: &HttpSettings) -> Result<Self> {
        Ok(Self {
            api: ApiClient::new(http.clone())?,
            base_url: connection.atlassian_url.trim_end_matches('/').to_string(),
            username: connection.username.clone(),
            api_token: connection.api_token.clone(),
        })
    }

    fn content_url(&self) -> String {
        format!("{}/wiki/rest/api/content", self.base_url)
    }

    fn current_version(&mut self, id: &str) -> Result<u64> {
        let url = format!("{}/{id}", self.content_url());
        let (username, token) = (self.username.clone(), self.api_token.clone());
        let payload = self.api.request_json("Confluence version lookup", |client| {
            client
                .get(&url)
                .basic_auth(&username, Some(&token))
                .header("Accept", "application/json")
                .query(&[("expand", "version")])
        })?;
        version_number(&payload)
            .ok_or_else(|| anyhow::anyhow!("Confluence page {id} has no version number"))
    }
}

impl PagePublisher for ConfluenceClient {
    fn exists(&mut self, space: &str, title: &str) -> Result<bool> {
        let url = self.content_url();
        let params = [("spaceKey", space), ("title", title)];
        let (username, token) = (self.username.clone(), self.api_token.clone());
        let payload = self.api.request_json("Confluence page check", |client| {
            client
                .get(&url)
                .basic_auth(&username, Some(&token))
                .header("Accept", "application/json")
                .query(&params)
        })?;
        Ok(payload
            .get("results")
            .and_then(Value::as_array)
            .is_some_and(|results| !results.is_empty()))
    }

    fn find_page(&mut self, space: &str, title: &str) -> Result<Option<PageInfo>> {
        let url = self.content_url();
        let params = [
            ("spaceKey", space.to_string()),
            ("title", title.to_string()),
            ("expand", "body.storage,version".to_string()),
        ];
        let (username, token) = (self.username.clone(), self.api_token.clone());
        let payload = self.api.request_json("Confluence page lookup", |client| {
            client
                .get(&url)
                .basic_auth(&username, Some(&token))
                .header("Accept", "application/json")
                .query(&params)
        })?;
        Ok(first_page(&payload))
    }

    fn create(&mut self, space: &str, title: &str, body: &str, parent_id: &str) -> Result<String> {
        let url = self.content_url();
        let payload = json!({
            "type": "page",
            "title": title,
            "space": { "key": space },
            "ancestors": [{ "id": parent_id }],
            "body": { "storage": { "value": body, "representation": "storage" } },
        });
        let (username, token) = (self.username.clone(), self.api_token.clone());
        let response = self.api.request_json("Confluence page create", |client| {
            client
                .post(&url)
                .basic_auth(&username, Some(&token))
                .header("Accept", "application/json")
                .json(&payload)
        })?;
        match id_of(&response) {
            Some(id) => Ok(id),
            None => bail!("Confluence create response carried no page id"),
        }
    }

    fn update(&mut self, id: &str, title: &str, body: &str, parent_id: &str) -> Result<()> {
        let next_version = self.current_version(id)? + 1;
        let url = format!("{}/{id}", self.content_url());
        let payload = json!({
            "id": id,
            "type": "page",
            "title": title,
            "ancestors": [{ "id": parent_id }],
            "body": { "storage": { "value": body, "representation": "storage" } },
            "version": { "number": next_version },
        });
        let (username, token) = (self.username.clone(), self.api_token.clone());
        self.api.request_json("Confluence page update", |client| {
            client
                .put(&url)
                .basic_auth(&username, Some(&token))
                .header("Accept", "application/json")
                .json(&payload)
        })?;
        Ok(())
    }

    fn request_count(&self) -> usize {
        self.api.request_count()
    }
}

fn id_of(value: &Value) -> Option<String> {
    match value.get("id")? {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

fn version_number(value: &Value) -> Option<u64> {
    value
        .get("version")
        .and_then(|version| version.get("number"))
        .and_then(Value::as_u64)
}

fn first_page(payload: &Value) -> Option<PageInfo> {
    let page = payload.get("results")?.as_array()?.first()?;
    Some(PageInfo {
        id: id_of(page)?,
        body: page
            .pointer("/body/storage/value")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    })
}
