use crate::config::AppConfig;
use crate::domain::ports::{Backend, Filter, Query};
use crate::utils::error::{MealError, Result};
use crate::utils::retry::{retry_with_backoff, RetryPolicy};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

/// 後端錯誤回應格式 `{code, message, details, hint}`
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    code: Option<String>,
    #[serde(alias = "msg", alias = "error_description", alias = "error")]
    message: Option<String>,
    details: Option<String>,
    hint: Option<String>,
}

fn api_error(status: StatusCode, body: &str) -> MealError {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    let message = parsed.message.unwrap_or_else(|| {
        if body.trim().is_empty() {
            status
                .canonical_reason()
                .unwrap_or("unknown error")
                .to_string()
        } else {
            body.trim().to_string()
        }
    });

    MealError::ApiError {
        status: status.as_u16(),
        code: parsed.code,
        message,
        details: parsed.details,
        hint: parsed.hint,
    }
}

async fn into_rows(response: Response) -> Result<Vec<Value>> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        return Err(api_error(status, &body));
    }

    if body.trim().is_empty() {
        return Ok(Vec::new());
    }

    match serde_json::from_str::<Value>(&body)? {
        Value::Array(rows) => Ok(rows),
        Value::Null => Ok(Vec::new()),
        other => Ok(vec![other]),
    }
}

fn require_filters(operation: &str, table: &str, filters: &[Filter]) -> Result<()> {
    if filters.is_empty() {
        return Err(MealError::validation(
            "filters",
            format!("refusing unfiltered {} on '{}'", operation, table),
        ));
    }
    Ok(())
}

/// 透過 PostgREST 介面存取託管後端
#[derive(Debug, Clone)]
pub struct RestClient {
    client: Client,
    base_url: String,
    anon_key: String,
    bearer_token: String,
    retry: RetryPolicy,
}

impl RestClient {
    pub fn new(
        base_url: &str,
        anon_key: &str,
        bearer_token: &str,
        retry: RetryPolicy,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            bearer_token: bearer_token.to_string(),
            retry,
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Self::new(
            config.base_url(),
            &config.backend.anon_key,
            config.bearer_token(),
            config.retry_policy(),
            config.timeout(),
        )
    }

    /// 換上新的 access token（例如登入後）
    pub fn with_access_token(mut self, token: &str) -> Self {
        self.bearer_token = token.to_string();
        self
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn request(&self, method: Method, table: &str) -> RequestBuilder {
        self.client
            .request(method, self.table_url(table))
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", self.bearer_token))
    }

    async fn execute<F>(&self, operation: &str, build: F) -> Result<Vec<Value>>
    where
        F: Fn() -> RequestBuilder,
    {
        let build = &build;
        retry_with_backoff(&self.retry, operation, || async move {
            let response = build().send().await?;
            tracing::debug!("{} -> {}", operation, response.status());
            into_rows(response).await
        })
        .await
    }
}

#[async_trait]
impl Backend for RestClient {
    async fn select(&self, table: &str, query: &Query) -> Result<Vec<Value>> {
        let params = query.to_params();
        tracing::debug!("Selecting from {} with {:?}", table, params);
        self.execute(&format!("GET {}", table), || {
            self.request(Method::GET, table).query(&params)
        })
        .await
    }

    async fn insert(&self, table: &str, rows: Vec<Value>) -> Result<Vec<Value>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        tracing::debug!("Inserting {} rows into {}", rows.len(), table);
        let body = Value::Array(rows);
        self.execute(&format!("POST {}", table), || {
            self.request(Method::POST, table)
                .header("Prefer", "return=representation")
                .json(&body)
        })
        .await
    }

    async fn update(&self, table: &str, filters: &[Filter], patch: Value) -> Result<Vec<Value>> {
        require_filters("update", table, filters)?;
        let params: Vec<(String, String)> = filters.iter().map(Filter::to_param).collect();
        self.execute(&format!("PATCH {}", table), || {
            self.request(Method::PATCH, table)
                .query(&params)
                .header("Prefer", "return=representation")
                .json(&patch)
        })
        .await
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<()> {
        require_filters("delete", table, filters)?;
        let params: Vec<(String, String)> = filters.iter().map(Filter::to_param).collect();
        self.execute(&format!("DELETE {}", table), || {
            self.request(Method::DELETE, table)
                .query(&params)
                .header("Prefer", "return=minimal")
        })
        .await?;
        Ok(())
    }
}
