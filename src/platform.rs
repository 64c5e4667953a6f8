//! Remote platform client
//!
//! [`Platform`] is the narrow seam between the dispatch layer and the
//! wire: batch creation plus single deletes. [`HttpPlatform`] implements it
//! against the IoT Agent and Context Broker REST APIs, authenticated with a
//! Keystone token obtained once before any dispatch starts.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tracing::debug;

use crate::config::{Credentials, Endpoints, HttpOptions};
use crate::error::DispatchError;

const SUBJECT_TOKEN_HEADER: &str = "X-Subject-Token";
const ERROR_BODY_LIMIT: usize = 200;

/// Kind of object created by a batch call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BatchKind {
    /// IoT Agent device groups
    Services,
    /// IoT Agent devices
    Devices,
    /// Context Broker entities without measures
    ContextEntities,
}

impl BatchKind {
    pub fn label(self) -> &'static str {
        match self {
            BatchKind::Services => "services",
            BatchKind::Devices => "devices",
            BatchKind::ContextEntities => "context entities",
        }
    }
}

/// One DELETE call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteRequest {
    pub url: String,
    pub params: Vec<(String, String)>,
    /// Resolution key of the object being removed
    pub key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// The object did not exist; counts as success
    AlreadyGone,
}

#[async_trait]
pub trait Platform: Send + Sync {
    fn endpoints(&self) -> &Endpoints;

    /// Create every object in `payload` with one request. `keys` lists the
    /// resolution keys of the batch for error reporting.
    async fn create_batch(
        &self,
        kind: BatchKind,
        payload: Vec<Value>,
        keys: &str,
    ) -> std::result::Result<(), DispatchError>;

    async fn delete_one(
        &self,
        request: &DeleteRequest,
    ) -> std::result::Result<DeleteOutcome, DispatchError>;
}

/// Authenticated HTTP client for the platform
pub struct HttpPlatform {
    client: Client,
    endpoints: Endpoints,
    headers: HeaderMap,
}

impl HttpPlatform {
    /// Build the HTTP client and exchange credentials for a token.
    pub async fn connect(
        endpoints: Endpoints,
        credentials: &Credentials,
        options: &HttpOptions,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(options.timeout)
            .danger_accept_invalid_certs(options.insecure)
            .build()
            .context("Failed to create HTTP client")?;

        let token = authenticate(&client, &endpoints, credentials).await?;

        let mut headers = HeaderMap::new();
        headers.insert(
            "Fiware-Service",
            HeaderValue::from_str(&credentials.service).context("Invalid service name")?,
        );
        headers.insert(
            "Fiware-ServicePath",
            HeaderValue::from_str(&credentials.subservice).context("Invalid subservice path")?,
        );
        let mut token =
            HeaderValue::from_str(&token).context("Invalid token returned by keystone")?;
        token.set_sensitive(true);
        headers.insert("X-Auth-Token", token);

        Ok(Self {
            client,
            endpoints,
            headers,
        })
    }
}

async fn authenticate(
    client: &Client,
    endpoints: &Endpoints,
    credentials: &Credentials,
) -> Result<String> {
    let url = endpoints.auth_tokens();
    debug!(url = %url, user = %credentials.username, "Requesting authentication token");
    let request = json!({
        "auth": {
            "scope": {
                "project": {
                    "domain": {"name": credentials.service},
                    "name": credentials.subservice
                }
            },
            "identity": {
                "password": {
                    "user": {
                        "domain": {"name": credentials.service},
                        "password": credentials.password,
                        "name": credentials.username
                    }
                },
                "methods": ["password"]
            }
        }
    });

    let response = client
        .post(&url)
        .json(&request)
        .send()
        .await
        .with_context(|| format!("Failed to reach keystone at {}", url))?;

    let status = response.status();
    if !is_ok_status(status) {
        let body = error_body(response).await;
        return Err(anyhow!(
            "Authentication against {} failed with status {}: {}",
            url,
            status,
            body
        ));
    }

    let token = response
        .headers()
        .get(SUBJECT_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("Keystone response has no {} header", SUBJECT_TOKEN_HEADER))?;
    debug!("Authentication ok");
    Ok(token)
}

/// 200..=204, the range keystone and delete calls report success with
fn is_ok_status(status: StatusCode) -> bool {
    (200..=204).contains(&status.as_u16())
}

async fn error_body(response: reqwest::Response) -> String {
    response
        .text()
        .await
        .unwrap_or_default()
        .chars()
        .take(ERROR_BODY_LIMIT)
        .collect()
}

#[async_trait]
impl Platform for HttpPlatform {
    fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    async fn create_batch(
        &self,
        kind: BatchKind,
        payload: Vec<Value>,
        keys: &str,
    ) -> std::result::Result<(), DispatchError> {
        let (url, body, expected) = match kind {
            BatchKind::Services => (
                self.endpoints.iot_services(),
                json!({ "services": payload }),
                StatusCode::CREATED,
            ),
            BatchKind::Devices => (
                self.endpoints.iot_devices(),
                json!({ "devices": payload }),
                StatusCode::CREATED,
            ),
            BatchKind::ContextEntities => (
                self.endpoints.batch_update(),
                json!({ "actionType": "APPEND", "entities": payload }),
                StatusCode::NO_CONTENT,
            ),
        };

        debug!(kind = kind.label(), keys, "Creating");
        let response = self
            .client
            .post(&url)
            .headers(self.headers.clone())
            .json(&body)
            .send()
            .await
            .map_err(|source| DispatchError::Transport {
                method: "POST",
                url: url.clone(),
                keys: keys.to_string(),
                source,
            })?;

        let status = response.status();
        if status != expected {
            return Err(DispatchError::Status {
                method: "POST",
                url,
                keys: keys.to_string(),
                status: status.as_u16(),
                body: error_body(response).await,
            });
        }
        debug!(
            kind = kind.label(),
            keys,
            status = status.as_u16(),
            "Created"
        );
        Ok(())
    }

    async fn delete_one(
        &self,
        request: &DeleteRequest,
    ) -> std::result::Result<DeleteOutcome, DispatchError> {
        debug!(url = %request.url, params = ?request.params, "Deleting");
        let response = self
            .client
            .delete(&request.url)
            .headers(self.headers.clone())
            .query(&request.params)
            .send()
            .await
            .map_err(|source| DispatchError::Transport {
                method: "DELETE",
                url: request.url.clone(),
                keys: request.key.clone(),
                source,
            })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!(url = %request.url, "Already gone");
            return Ok(DeleteOutcome::AlreadyGone);
        }
        if !is_ok_status(status) {
            return Err(DispatchError::Status {
                method: "DELETE",
                url: request.url.clone(),
                keys: request.key.clone(),
                status: status.as_u16(),
                body: error_body(response).await,
            });
        }
        debug!(url = %request.url, status = status.as_u16(), "Deleted");
        Ok(DeleteOutcome::Deleted)
    }
}
