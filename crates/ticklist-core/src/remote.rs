//! Row-based remote storage for todos.
//!
//! `RestTable` speaks the PostgREST dialect exposed by hosted Postgres
//! services: one table, rows scoped by an owner column, filters passed as
//! `column=op.value` query pairs.

use std::time::Duration;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::{Method, RequestBuilder, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::todo::{Todo, TodoPatch};

pub const DEFAULT_TABLE: &str = "todos";
pub const DEFAULT_OWNER: &str = "demo-user-001";

#[async_trait]
pub trait TodoTable: Send + Sync {
    /// All rows for the session owner, newest first.
    async fn fetch_all(&self) -> anyhow::Result<Vec<Todo>>;

    /// Inserts `todo` and returns the row as stored by the server.
    async fn insert(&self, todo: &Todo) -> anyhow::Result<Todo>;

    async fn update(&self, id: &str, patch: &TodoPatch) -> anyhow::Result<()>;

    async fn delete(&self, id: &str) -> anyhow::Result<()>;

    async fn delete_many(&self, ids: &[String]) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TodoRow {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub emoji: Option<String>,
    pub created_at: String,
    pub user_id: String,
}

impl TodoRow {
    pub fn into_todo(self) -> Todo {
        let created_at = match DateTime::parse_from_rfc3339(&self.created_at) {
            Ok(ts) => ts.timestamp_millis(),
            Err(err) => {
                warn!(
                    id = %self.id,
                    created_at = %self.created_at,
                    error = %err,
                    "unparsable created_at on remote row; using now"
                );
                Todo::now_millis()
            }
        };

        Todo {
            id: self.id,
            text: self.text,
            completed: self.completed,
            emoji: self.emoji,
            created_at,
        }
    }
}

#[derive(Debug, Serialize)]
struct InsertRow<'a> {
    id: &'a str,
    text: &'a str,
    completed: bool,
    emoji: Option<&'a str>,
    created_at: String,
    user_id: &'a str,
}

#[derive(Debug, Clone)]
pub struct RemoteSettings {
    pub url: String,
    pub key: String,
    pub table: String,
    pub owner: String,
    pub timeout: Duration,
}

/// REST client for the `todos` table.
pub struct RestTable {
    endpoint: Url,
    key: String,
    owner: String,
    client: reqwest::Client,
}

impl RestTable {
    pub fn new(settings: &RemoteSettings) -> anyhow::Result<Self> {
        let base = settings.url.trim().trim_end_matches('/');
        let endpoint = Url::parse(&format!("{base}/rest/v1/{}", settings.table))
            .with_context(|| format!("invalid remote url: {}", settings.url))?;

        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .context("failed building HTTP client for remote store")?;

        Ok(Self {
            endpoint,
            key: settings.key.clone(),
            owner: settings.owner.clone(),
            client,
        })
    }

    fn request(&self, method: Method, filters: &[(&str, String)]) -> RequestBuilder {
        let mut url = self.endpoint.clone();
        {
            let mut pairs = url.query_pairs_mut();
            for (column, expr) in filters {
                pairs.append_pair(column, expr);
            }
            pairs.append_pair("user_id", &format!("eq.{}", self.owner));
        }

        self.client
            .request(method, url)
            .header("apikey", &self.key)
            .header(reqwest::header::AUTHORIZATION, format!("Bearer {}", self.key))
    }

    async fn send(&self, op: &str, request: RequestBuilder) -> anyhow::Result<String> {
        let response = request
            .send()
            .await
            .with_context(|| format!("remote {op} request failed"))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .with_context(|| format!("failed reading remote {op} response"))?;

        if !status.is_success() {
            return Err(anyhow!("remote {op} returned {status}: {body}"));
        }

        debug!(op, %status, bytes = body.len(), "remote call succeeded");
        Ok(body)
    }
}

#[async_trait]
impl TodoTable for RestTable {
    #[tracing::instrument(skip(self))]
    async fn fetch_all(&self) -> anyhow::Result<Vec<Todo>> {
        let request = self.request(
            Method::GET,
            &[
                ("select", "*".to_string()),
                ("order", "created_at.desc".to_string()),
            ],
        );
        let body = self.send("select", request).await?;
        let rows: Vec<TodoRow> =
            serde_json::from_str(&body).context("failed decoding remote rows")?;
        Ok(rows.into_iter().map(TodoRow::into_todo).collect())
    }

    #[tracing::instrument(skip(self, todo), fields(id = %todo.id))]
    async fn insert(&self, todo: &Todo) -> anyhow::Result<Todo> {
        let created_at = Utc
            .timestamp_millis_opt(todo.created_at)
            .single()
            .unwrap_or_else(Utc::now)
            .to_rfc3339();
        let row = InsertRow {
            id: &todo.id,
            text: &todo.text,
            completed: todo.completed,
            emoji: todo.emoji.as_deref(),
            created_at,
            user_id: &self.owner,
        };

        let mut url = self.endpoint.clone();
        url.query_pairs_mut().append_pair("select", "*");
        let request = self
            .client
            .post(url)
            .header("apikey", &self.key)
            .header(reqwest::header::AUTHORIZATION, format!("Bearer {}", self.key))
            .header("Prefer", "return=representation")
            .json(&row);

        let body = self.send("insert", request).await?;
        let mut rows: Vec<TodoRow> =
            serde_json::from_str(&body).context("failed decoding inserted row")?;
        if rows.is_empty() {
            return Err(anyhow!("remote insert returned no rows"));
        }
        Ok(rows.swap_remove(0).into_todo())
    }

    #[tracing::instrument(skip(self, patch))]
    async fn update(&self, id: &str, patch: &TodoPatch) -> anyhow::Result<()> {
        if patch.is_empty() {
            return Ok(());
        }
        let request = self
            .request(Method::PATCH, &[("id", format!("eq.{id}"))])
            .json(patch);
        self.send("update", request).await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn delete(&self, id: &str) -> anyhow::Result<()> {
        let request = self.request(Method::DELETE, &[("id", format!("eq.{id}"))]);
        self.send("delete", request).await?;
        Ok(())
    }

    #[tracing::instrument(skip(self, ids), fields(count = ids.len()))]
    async fn delete_many(&self, ids: &[String]) -> anyhow::Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let request = self.request(Method::DELETE, &[("id", in_list(ids))]);
        self.send("delete_many", request).await?;
        Ok(())
    }
}

/// `in.("a","b")` with embedded quotes and backslashes escaped.
fn in_list(ids: &[String]) -> String {
    let quoted: Vec<String> = ids
        .iter()
        .map(|id| format!("\"{}\"", id.replace('\\', "\\\\").replace('"', "\\\"")))
        .collect();
    format!("in.({})", quoted.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_maps_created_at_to_millis() {
        let row = TodoRow {
            id: "r1".to_string(),
            text: "Walk the dog".to_string(),
            completed: true,
            emoji: Some("🐕".to_string()),
            created_at: "2024-03-01T10:00:00.500+00:00".to_string(),
            user_id: DEFAULT_OWNER.to_string(),
        };

        let todo = row.into_todo();
        assert_eq!(todo.created_at, 1_709_287_200_500);
        assert!(todo.completed);
        assert_eq!(todo.emoji.as_deref(), Some("🐕"));
    }

    #[test]
    fn in_list_quotes_ids() {
        let ids = vec!["a".to_string(), "b\"c".to_string()];
        assert_eq!(in_list(&ids), r#"in.("a","b\"c")"#);
    }
}
