use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;
use thiserror::Error;

use crate::domain::EntityId;
use crate::error::KiraError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

pub trait LabelQuery: Send + Sync {
    /// Entities whose label in `language` is exactly `label`. Zero matches is
    /// an empty vector, not an error.
    fn find_by_label(&self, label: &str, language: &str) -> Result<Vec<EntityId>, QueryError>;
}

impl<T: LabelQuery + ?Sized> LabelQuery for &T {
    fn find_by_label(&self, label: &str, language: &str) -> Result<Vec<EntityId>, QueryError> {
        (**self).find_by_label(label, language)
    }
}

#[derive(Clone)]
pub struct SparqlHttpClient {
    client: Client,
    endpoint: String,
}

impl SparqlHttpClient {
    pub fn new(endpoint: &str) -> Result<Self, KiraError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("kira-kbe/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| KiraError::QueryHttp(err.to_string()))?,
        );
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/sparql-results+json"),
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| KiraError::QueryHttp(err.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
        })
    }
}

impl LabelQuery for SparqlHttpClient {
    fn find_by_label(&self, label: &str, language: &str) -> Result<Vec<EntityId>, QueryError> {
        let query = label_query(label, language);
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("query", query.as_str()), ("format", "json")])
            .send()
            .map_err(|err| {
                if is_transient_error(&err) {
                    QueryError::Transport(err.to_string())
                } else {
                    QueryError::Malformed(err.to_string())
                }
            })?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let message = response
                .text()
                .unwrap_or_else(|_| "query service request failed".to_string());
            let message = format!("status {status}: {message}");
            return Err(if is_retryable_status(status) {
                QueryError::Transport(message)
            } else {
                QueryError::Malformed(message)
            });
        }

        let body: Value = response
            .json()
            .map_err(|err| QueryError::Malformed(err.to_string()))?;
        parse_label_bindings(&body)
    }
}

pub fn label_query(label: &str, language: &str) -> String {
    format!(
        "SELECT ?item WHERE {{ ?item rdfs:label \"{}\"@{} }}",
        escape_literal(label),
        language
    )
}

fn escape_literal(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            other => escaped.push(other),
        }
    }
    escaped
}

pub fn parse_label_bindings(body: &Value) -> Result<Vec<EntityId>, QueryError> {
    let bindings = body
        .get("results")
        .and_then(|value| value.get("bindings"))
        .and_then(|value| value.as_array())
        .ok_or_else(|| QueryError::Malformed("missing results.bindings".to_string()))?;

    let mut ids = Vec::with_capacity(bindings.len());
    for binding in bindings {
        let uri = binding
            .get("item")
            .and_then(|value| value.get("value"))
            .and_then(|value| value.as_str())
            .ok_or_else(|| QueryError::Malformed("binding without ?item".to_string()))?;
        let id = EntityId::from_uri(uri).map_err(|err| QueryError::Malformed(err.to_string()))?;
        ids.push(id);
    }
    ids.sort();
    ids.dedup();
    Ok(ids)
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_transient_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request() || err.is_body()
}
