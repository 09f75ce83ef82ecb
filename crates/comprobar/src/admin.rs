//! Admin verification.
//!
//! Cross-checks what an application shows against an admin source of truth.
//! API mode fetches the `actual` document from a JSON endpoint; UI mode
//! scrapes it from the page, one selector per field. Both hand the result to
//! [`compare_objects`] and persist an [`AdminCheck`].

use crate::driver::BrowserSession;
use crate::result::{ComprobarError, ComprobarResult};
use crate::store::RunStore;
use crate::structural::compare_objects;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Where the `actual` document came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CheckMode {
    /// JSON endpoint
    Api,
    /// Scraped from the page
    Ui,
}

/// Outcome of a check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CheckStatus {
    /// No differences
    Passed,
    /// At least one difference
    Failed,
    /// The actual document could not be obtained
    Error,
}

/// A persisted admin verification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminCheck {
    /// Check id
    pub id: String,
    /// Run the check belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    /// Source of `actual`
    pub mode: CheckMode,
    /// Expected document
    pub expected: Value,
    /// Observed document
    pub actual: Value,
    /// Verdict
    pub status: CheckStatus,
    /// Comparison result, or `{"error": ...}`
    pub details: Value,
    /// When the check ran
    pub created_at: DateTime<Utc>,
}

impl AdminCheck {
    fn new(run_id: Option<&str>, mode: CheckMode, expected: &Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            run_id: run_id.map(str::to_string),
            mode,
            expected: expected.clone(),
            actual: Value::Null,
            status: CheckStatus::Error,
            details: Value::Null,
            created_at: Utc::now(),
        }
    }

    fn compared(mut self, actual: Value) -> Self {
        let result = compare_objects(&self.expected, &actual, "");
        self.status = if result.passed {
            CheckStatus::Passed
        } else {
            CheckStatus::Failed
        };
        self.details = serde_json::to_value(&result).unwrap_or_else(|_| json!({}));
        self.actual = actual;
        self
    }

    fn errored(mut self, error: &ComprobarError) -> Self {
        self.status = CheckStatus::Error;
        self.details = json!({ "error": error.to_string() });
        self
    }
}

/// A JSON document source
#[async_trait]
pub trait JsonSource: Send + Sync {
    /// Fetch the document at `endpoint`
    async fn fetch(&self, endpoint: &str) -> ComprobarResult<Value>;
}

/// JSON over HTTP GET
#[cfg(feature = "http")]
#[derive(Debug, Clone)]
pub struct HttpJsonSource {
    base_url: String,
    client: reqwest::Client,
    bearer_token: Option<String>,
}

#[cfg(feature = "http")]
impl HttpJsonSource {
    /// Source rooted at `base_url`
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self::with_client(base_url, client)
    }

    /// Source using a preconfigured client
    pub fn with_client(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            bearer_token: None,
        }
    }

    /// Send `Authorization: Bearer <token>`
    #[must_use]
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    fn url(&self, endpoint: &str) -> String {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.to_string()
        } else {
            format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
        }
    }
}

#[cfg(feature = "http")]
#[async_trait]
impl JsonSource for HttpJsonSource {
    async fn fetch(&self, endpoint: &str) -> ComprobarResult<Value> {
        let url = self.url(endpoint);
        let http_error = |message: String| ComprobarError::Http {
            url: url.clone(),
            message,
        };

        let mut request = self.client.get(&url);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }
        let resp = request.send().await.map_err(|e| http_error(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(http_error(format!("status {}: {body}", status.as_u16())));
        }
        resp.json::<Value>()
            .await
            .map_err(|e| http_error(e.to_string()))
    }
}

/// Runs admin checks and persists them
pub struct AdminVerifier {
    store: Arc<dyn RunStore>,
}

impl std::fmt::Debug for AdminVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminVerifier").finish_non_exhaustive()
    }
}

impl AdminVerifier {
    /// Verifier persisting into `store`
    #[must_use]
    pub fn new(store: Arc<dyn RunStore>) -> Self {
        Self { store }
    }

    /// Compare the document at `endpoint` with `expected`
    pub async fn verify_api(
        &self,
        run_id: Option<&str>,
        source: &dyn JsonSource,
        endpoint: &str,
        expected: &Value,
    ) -> AdminCheck {
        let check = AdminCheck::new(run_id, CheckMode::Api, expected);
        let check = match source.fetch(endpoint).await {
            Ok(actual) => check.compared(actual),
            Err(e) => {
                warn!(endpoint, error = %e, "admin source unavailable");
                check.errored(&e)
            }
        };
        self.persist(check).await
    }

    /// Scrape one trimmed text value per field and compare with `expected`.
    /// Fields whose selector matches nothing are left out of `actual`.
    pub async fn verify_ui(
        &self,
        run_id: Option<&str>,
        session: &mut dyn BrowserSession,
        fields: &BTreeMap<String, String>,
        expected: &Value,
    ) -> AdminCheck {
        let check = AdminCheck::new(run_id, CheckMode::Ui, expected);
        let check = match scrape(session, fields).await {
            Ok(actual) => check.compared(actual),
            Err(e) => {
                warn!(error = %e, "page scrape failed");
                check.errored(&e)
            }
        };
        self.persist(check).await
    }

    async fn persist(&self, check: AdminCheck) -> AdminCheck {
        match self.store.save_admin_check(&check).await {
            Ok(()) => info!(check_id = %check.id, status = ?check.status, "admin check recorded"),
            Err(e) => warn!(check_id = %check.id, error = %e, "admin check not persisted"),
        }
        check
    }
}

async fn scrape(
    session: &mut dyn BrowserSession,
    fields: &BTreeMap<String, String>,
) -> ComprobarResult<Value> {
    let mut actual = Map::new();
    for (field, selector) in fields {
        match session.text_content(selector).await {
            Ok(text) => {
                let _ = actual.insert(field.clone(), Value::String(text.trim().to_string()));
            }
            Err(ComprobarError::ElementNotFound { .. }) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(Value::Object(actual))
}
