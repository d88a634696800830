//! REST API and blob storage clients.
//!
//! Both clients authenticate with a bearer token and share the same error
//! mapping: transport failures become [`Error::Request`], non-success
//! statuses become [`Error::Api`] or [`Error::Storage`].

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use tripup_core::{
    AssetApi, CloudStorage, CreateAssetRequest, Error, OriginalUpdate, Result, ServerAsset,
    StorageBackend, TransferPriority,
};

/// Header carrying the transfer priority hint.
pub const PRIORITY_HEADER: &str = "X-Transfer-Priority";

/// Path prefix of uploaded blobs.
const BLOB_PREFIX: &str = "blobs";

fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))
}

fn join(base_url: &str, endpoint: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), endpoint.trim_start_matches('/'))
}

fn authorize(request: RequestBuilder, token: Option<&str>) -> RequestBuilder {
    match token {
        Some(token) => request.header("Authorization", format!("Bearer {}", token)),
        None => request,
    }
}

async fn error_body(response: Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    format!("{} - {}", status, body)
}

// =============================================================================
// REST API
// =============================================================================

#[derive(Serialize)]
struct CreateAssetsBody {
    assets: Vec<CreateAssetRequest>,
}

#[derive(Serialize)]
struct OriginalsBody {
    originals: Vec<OriginalUpdate>,
}

#[derive(Serialize)]
struct DeleteBody<'a> {
    ids: &'a [Uuid],
}

#[derive(Deserialize)]
struct FilesizesResponse {
    filesizes: HashMap<Uuid, u64>,
}

#[derive(Deserialize)]
struct ChangesResponse {
    assets: Vec<ServerAsset>,
}

/// [`AssetApi`] over the TripUp REST API.
pub struct HttpAssetApi {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpAssetApi {
    pub fn new(base_url: impl Into<String>, token: Option<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: base_url.into(),
            token,
        })
    }

    fn request(&self, method: reqwest::Method, endpoint: &str) -> RequestBuilder {
        authorize(
            self.client.request(method, join(&self.base_url, endpoint)),
            self.token.as_deref(),
        )
    }

    async fn send_json<T: for<'de> Deserialize<'de>>(&self, request: RequestBuilder) -> Result<T> {
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(Error::Api(error_body(response).await));
        }
        response
            .json()
            .await
            .map_err(|e| Error::Serialization(format!("Failed to parse API response: {}", e)))
    }

    /// Whether the API answers its health endpoint.
    pub async fn health_check(&self) -> bool {
        let response = self
            .request(reqwest::Method::GET, "/health")
            .timeout(Duration::from_secs(5))
            .send()
            .await;
        match response {
            Ok(r) if r.status().is_success() => true,
            Ok(r) => {
                warn!(status = %r.status(), "API health check failed");
                false
            }
            Err(e) => {
                warn!(error = %e, "API health check failed");
                false
            }
        }
    }
}

#[async_trait]
impl AssetApi for HttpAssetApi {
    async fn create_assets(&self, assets: Vec<CreateAssetRequest>) -> Result<HashMap<Uuid, u64>> {
        let count = assets.len();
        let body = CreateAssetsBody { assets };
        let response: FilesizesResponse = self
            .send_json(self.request(reqwest::Method::POST, "/assets").json(&body))
            .await?;
        info!(
            requested = count,
            created = response.filesizes.len(),
            "Created assets on server"
        );
        Ok(response.filesizes)
    }

    async fn update_originals(&self, updates: Vec<OriginalUpdate>) -> Result<HashMap<Uuid, u64>> {
        let body = OriginalsBody { originals: updates };
        let response: FilesizesResponse = self
            .send_json(
                self.request(reqwest::Method::PATCH, "/assets/originals")
                    .json(&body),
            )
            .await?;
        Ok(response.filesizes)
    }

    async fn delete_assets(&self, ids: &[Uuid]) -> Result<bool> {
        let response = self
            .request(reqwest::Method::POST, "/assets/delete")
            .json(&DeleteBody { ids })
            .send()
            .await?;
        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::CONFLICT => {
                debug!(count = ids.len(), "Server refused asset deletion");
                Ok(false)
            }
            _ => Err(Error::Api(error_body(response).await)),
        }
    }

    async fn fetch_changes(&self, since: Option<DateTime<Utc>>) -> Result<Vec<ServerAsset>> {
        let mut request = self.request(reqwest::Method::GET, "/assets/changes");
        if let Some(since) = since {
            request = request.query(&[("since", since.to_rfc3339_opts(SecondsFormat::Micros, true))]);
        }
        let response: ChangesResponse = self.send_json(request).await?;
        Ok(response.assets)
    }
}

// =============================================================================
// BLOB STORAGE
// =============================================================================

/// [`CloudStorage`] over an HTTP blob store.
///
/// Blobs are addressed as `blobs/{uuid}` relative to the storage URL.
pub struct HttpCloudStorage {
    client: Client,
    base_url: String,
    token: Option<String>,
    disk: Arc<dyn StorageBackend>,
}

impl HttpCloudStorage {
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
        disk: Arc<dyn StorageBackend>,
    ) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: base_url.into(),
            token,
            disk,
        })
    }

    fn request(&self, method: reqwest::Method, remote_path: &str) -> RequestBuilder {
        authorize(
            self.client.request(method, join(&self.base_url, remote_path)),
            self.token.as_deref(),
        )
    }
}

fn priority_value(priority: TransferPriority) -> &'static str {
    match priority {
        TransferPriority::Low => "low",
        TransferPriority::High => "high",
    }
}

#[async_trait]
impl CloudStorage for HttpCloudStorage {
    async fn upload(&self, file: &Path, priority: TransferPriority) -> Result<String> {
        let data = self.disk.read(file).await?;
        let remote_path = format!("{}/{}", BLOB_PREFIX, Uuid::new_v4());
        let size = data.len();

        let response = self
            .request(reqwest::Method::PUT, &remote_path)
            .header(PRIORITY_HEADER, priority_value(priority))
            .header("Content-Type", "application/octet-stream")
            .body(data)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Error::Storage(error_body(response).await));
        }

        debug!(remote_path = %remote_path, bytes = size, "Uploaded blob");
        Ok(remote_path)
    }

    async fn download(
        &self,
        remote_path: &str,
        to: &Path,
        priority: TransferPriority,
    ) -> Result<()> {
        let response = self
            .request(reqwest::Method::GET, remote_path)
            .header(PRIORITY_HEADER, priority_value(priority))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Error::Storage(error_body(response).await));
        }

        let data = response.bytes().await?;
        self.disk.write(to, &data).await?;
        debug!(remote_path = %remote_path, bytes = data.len(), "Downloaded blob");
        Ok(())
    }

    async fn delete(&self, remote_path: &str) -> Result<()> {
        let response = self
            .request(reqwest::Method::DELETE, remote_path)
            .send()
            .await?;
        // Already gone is success.
        if response.status().is_success() || response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(Error::Storage(error_body(response).await))
    }
}
