//! CredHub data API client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Certificate, Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, OnceCell};
use tokio::time::Instant;
use tracing::{debug, instrument};

use crate::config::CredhubConfig;
use crate::error::{Redacted, StoreError};
use crate::tls::CaBundle;

/// Tokens are refreshed this long before UAA says they expire.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(30);

/// Whether a write may replace an existing credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum WriteMode {
    NoOverwrite,
    Overwrite,
}

/// The subset of the CredHub API the store needs.
///
/// Missing credentials are reported as `None`/`false`, never as errors.
#[async_trait]
pub trait CredhubApi: Send + Sync {
    async fn set_json(&self, name: &str, value: &Value, mode: WriteMode)
        -> Result<(), StoreError>;

    async fn set_value(&self, name: &str, value: &str, mode: WriteMode)
        -> Result<(), StoreError>;

    /// Returns the current version of a JSON credential.
    async fn get_latest_json(&self, name: &str) -> Result<Option<Value>, StoreError>;

    /// Returns false if nothing was stored under `name`.
    async fn delete(&self, name: &str) -> Result<bool, StoreError>;

    /// Returns the names of all credentials under `path`.
    async fn find_by_path(&self, path: &str) -> Result<Vec<String>, StoreError>;
}

#[derive(Serialize)]
struct SetRequest<'a, T: Serialize> {
    name: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    value: T,
    mode: WriteMode,
}

#[derive(Deserialize)]
struct DataResponse {
    data: Vec<CredentialVersion>,
}

#[derive(Deserialize)]
struct CredentialVersion {
    value: Value,
}

#[derive(Deserialize)]
struct FindResponse {
    credentials: Vec<FoundCredential>,
}

#[derive(Deserialize)]
struct FoundCredential {
    name: String,
}

#[derive(Deserialize)]
struct InfoResponse {
    #[serde(rename = "auth-server")]
    auth_server: AuthServer,
}

#[derive(Deserialize)]
struct AuthServer {
    url: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

struct CachedToken {
    value: Redacted<String>,
    refresh_at: Instant,
}

/// [`CredhubApi`] over HTTP, authenticating with UAA client credentials.
pub struct HttpCredhubClient {
    client: Client,
    base_url: String,
    client_id: String,
    client_secret: Redacted<String>,
    uaa_url: OnceCell<String>,
    token: Mutex<Option<CachedToken>>,
}

impl HttpCredhubClient {
    pub fn new(config: &CredhubConfig) -> Result<Self, StoreError> {
        let mut builder = Client::builder().timeout(Duration::from_secs(config.timeout_secs));

        if let Some(pem) = config.ca_cert.as_deref().filter(|p| !p.trim().is_empty()) {
            let bundle = CaBundle::parse(pem, "credhub")?;
            for der in bundle.certificates() {
                let cert = Certificate::from_der(der)
                    .map_err(|e| StoreError::Configuration(format!("credhub CA: {e}")))?;
                builder = builder.add_root_certificate(cert);
            }
        }

        let client = builder
            .build()
            .map_err(|e| StoreError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_owned(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            uaa_url: OnceCell::new(),
            token: Mutex::new(None),
        })
    }

    async fn uaa_url(&self) -> Result<&str, StoreError> {
        let url = self
            .uaa_url
            .get_or_try_init(|| async {
                let response = self
                    .client
                    .get(format!("{}/info", self.base_url))
                    .send()
                    .await
                    .map_err(|e| StoreError::Connection(e.to_string()))?;

                if !response.status().is_success() {
                    return Err(StoreError::Connection(format!(
                        "credhub info request failed: {}",
                        response.status()
                    )));
                }

                let info: InfoResponse = response
                    .json()
                    .await
                    .map_err(|e| StoreError::Serialisation(e.to_string()))?;
                debug!(uaa = %info.auth_server.url, "discovered auth server");
                Ok(info.auth_server.url.trim_end_matches('/').to_owned())
            })
            .await?;

        Ok(url.as_str())
    }

    async fn access_token(&self) -> Result<String, StoreError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.value.expose().clone());
            }
        }

        let uaa = self.uaa_url().await?;
        let response = self
            .client
            .post(format!("{uaa}/oauth/token"))
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.expose().as_str()),
            ])
            .send()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        if !response.status().is_success() {
            return Err(StoreError::Connection(format!(
                "UAA token request failed: {}",
                response.status()
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| StoreError::Serialisation(e.to_string()))?;

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);
        *cached = Some(CachedToken {
            value: Redacted::new(token.access_token.clone()),
            refresh_at: Instant::now() + lifetime,
        });
        debug!(expires_in = token.expires_in, "obtained UAA token");

        Ok(token.access_token)
    }

    fn data_url(&self) -> String {
        format!("{}/api/v1/data", self.base_url)
    }

    async fn put<T: Serialize + Sync>(&self, request: &SetRequest<'_, T>) -> Result<(), StoreError> {
        let token = self.access_token().await?;
        let response = self
            .client
            .put(self.data_url())
            .bearer_auth(token)
            .json(request)
            .send()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(StoreError::Backend(format!(
                "failed to set credential {}: {status}",
                request.name
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for HttpCredhubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpCredhubClient")
            .field("base_url", &self.base_url)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CredhubApi for HttpCredhubClient {
    #[instrument(skip(self, value))]
    async fn set_json(
        &self,
        name: &str,
        value: &Value,
        mode: WriteMode,
    ) -> Result<(), StoreError> {
        self.put(&SetRequest {
            name,
            kind: "json",
            value,
            mode,
        })
        .await
    }

    #[instrument(skip(self, value))]
    async fn set_value(&self, name: &str, value: &str, mode: WriteMode) -> Result<(), StoreError> {
        self.put(&SetRequest {
            name,
            kind: "value",
            value,
            mode,
        })
        .await
    }

    #[instrument(skip(self))]
    async fn get_latest_json(&self, name: &str) -> Result<Option<Value>, StoreError> {
        let token = self.access_token().await?;
        let response = self
            .client
            .get(self.data_url())
            .bearer_auth(token)
            .query(&[("name", name), ("current", "true")])
            .send()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let body: DataResponse = response
                    .json()
                    .await
                    .map_err(|e| StoreError::Serialisation(e.to_string()))?;
                Ok(body.data.into_iter().next().map(|version| version.value))
            }
            status => Err(StoreError::Backend(format!(
                "failed to get credential {name}: {status}"
            ))),
        }
    }

    #[instrument(skip(self))]
    async fn delete(&self, name: &str) -> Result<bool, StoreError> {
        let token = self.access_token().await?;
        let response = self
            .client
            .delete(self.data_url())
            .bearer_auth(token)
            .query(&[("name", name)])
            .send()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(StoreError::Backend(format!(
                "failed to delete credential {name}: {status}"
            ))),
        }
    }

    #[instrument(skip(self))]
    async fn find_by_path(&self, path: &str) -> Result<Vec<String>, StoreError> {
        let token = self.access_token().await?;
        let response = self
            .client
            .get(self.data_url())
            .bearer_auth(token)
            .query(&[("path", path)])
            .send()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(Vec::new()),
            status if status.is_success() => {
                let body: FindResponse = response
                    .json()
                    .await
                    .map_err(|e| StoreError::Serialisation(e.to_string()))?;
                Ok(body.credentials.into_iter().map(|c| c.name).collect())
            }
            status => Err(StoreError::Backend(format!(
                "failed to search {path}: {status}"
            ))),
        }
    }
}
