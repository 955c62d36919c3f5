use std::{path::Path, pin::Pin, sync::Arc};

use chrono::{Local, Utc};
use dashmap::DashSet;
use reqwest::{
    StatusCode,
    multipart::{Form, Part},
};
use serde::{Deserialize, de::DeserializeOwned};
use thiserror::Error;

use crate::{
    config::{ClientConfig, ConfigError},
    definition::{
        RunInlineRequest, RunResponse, RunSavedRequest, SaveWorkflowRequest,
        SaveWorkflowResponse, UploadMetadata, UploadResponse, WorkflowDefinition, WorkflowRecord,
    },
    node::UploadedFile,
    validation::ValidationError,
};

pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ApiError>> + Send + 'a>>;

/// Failures reported by (or on the way to) the backend.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Non-2xx reply carrying a `detail` field, shown verbatim.
    #[error("{detail}")]
    Backend { status: u16, detail: String },
    /// Non-2xx reply without a usable `detail`.
    #[error("Request failed with status code {status}")]
    Status { status: u16 },
    #[error("{0}")]
    Transport(#[from] reqwest::Error),
    #[error("Invalid response body: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Backend { status, .. } | ApiError::Status { status } => Some(*status),
            ApiError::Transport(e) => e.status().map(|status| status.as_u16()),
            ApiError::Decode(_) => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Please enter a workflow name")]
    EmptyWorkflowName,
    #[error("Query must not be empty")]
    EmptyQuery,
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Workflow {0} not found")]
    NotFound(i64),
    #[error("Node not found: {0}")]
    UnknownNode(String),
    #[error("Upload already in progress for node '{0}'")]
    UploadInProgress(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Config error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error(transparent)]
    Api(#[from] ApiError),
}

impl ClientError {
    /// Whether the failure was detected before any request left the process.
    pub fn is_local(&self) -> bool {
        !matches!(self, ClientError::Api(_) | ClientError::NotFound(_))
    }
}

/// A file picked for upload into a knowledge base.
#[derive(Debug, Clone)]
pub struct Document {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl Document {
    pub fn new(filename: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            bytes: bytes.into(),
        }
    }

    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, std::io::Error> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_owned());
        Ok(Self { filename, bytes })
    }
}

/// The backend REST contract. [`HttpBackend`] is the production implementation.
pub trait WorkflowBackend: Send + Sync {
    fn list_workflows(&self) -> BackendFuture<'_, Vec<WorkflowRecord>>;

    fn save_workflow(&self, request: SaveWorkflowRequest) -> BackendFuture<'_, WorkflowRecord>;

    fn delete_workflow(&self, id: i64) -> BackendFuture<'_, ()>;

    fn run_inline(&self, request: RunInlineRequest) -> BackendFuture<'_, RunResponse>;

    fn run_saved(&self, id: i64, request: RunSavedRequest) -> BackendFuture<'_, RunResponse>;

    fn upload_document(
        &self,
        document: Document,
        metadata: UploadMetadata,
    ) -> BackendFuture<'_, UploadResponse>;
}

impl<B: WorkflowBackend + ?Sized> WorkflowBackend for Arc<B> {
    fn list_workflows(&self) -> BackendFuture<'_, Vec<WorkflowRecord>> {
        (**self).list_workflows()
    }

    fn save_workflow(&self, request: SaveWorkflowRequest) -> BackendFuture<'_, WorkflowRecord> {
        (**self).save_workflow(request)
    }

    fn delete_workflow(&self, id: i64) -> BackendFuture<'_, ()> {
        (**self).delete_workflow(id)
    }

    fn run_inline(&self, request: RunInlineRequest) -> BackendFuture<'_, RunResponse> {
        (**self).run_inline(request)
    }

    fn run_saved(&self, id: i64, request: RunSavedRequest) -> BackendFuture<'_, RunResponse> {
        (**self).run_saved(id, request)
    }

    fn upload_document(
        &self,
        document: Document,
        metadata: UploadMetadata,
    ) -> BackendFuture<'_, UploadResponse> {
        (**self).upload_document(document, metadata)
    }
}

/// `reqwest` implementation of the backend contract.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    config: ClientConfig,
}

impl HttpBackend {
    pub fn new(config: ClientConfig) -> Result<Self, ApiError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
            config,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ApiError> {
        let response = check_status(request.send().await?).await?;
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    detail: Option<serde_json::Value>,
}

impl ErrorBody {
    fn into_detail(self) -> Option<String> {
        match self.detail? {
            serde_json::Value::Null => None,
            serde_json::Value::String(detail) if detail.trim().is_empty() => None,
            serde_json::Value::String(detail) => Some(detail),
            other => Some(other.to_string()),
        }
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.bytes().await.unwrap_or_default();
    Err(error_from_body(status, &body))
}

fn error_from_body(status: StatusCode, body: &[u8]) -> ApiError {
    let status = status.as_u16();
    match serde_json::from_slice::<ErrorBody>(body)
        .ok()
        .and_then(ErrorBody::into_detail)
    {
        Some(detail) => ApiError::Backend { status, detail },
        None => ApiError::Status { status },
    }
}

impl WorkflowBackend for HttpBackend {
    fn list_workflows(&self) -> BackendFuture<'_, Vec<WorkflowRecord>> {
        Box::pin(async move {
            let url = self.config.endpoint("/workflows");
            tracing::debug!("| http | GET {url}");
            self.send(self.client.get(url)).await
        })
    }

    fn save_workflow(&self, request: SaveWorkflowRequest) -> BackendFuture<'_, WorkflowRecord> {
        Box::pin(async move {
            let url = self.config.endpoint("/save-workflow");
            tracing::debug!("| http | POST {url} name={}", request.name);
            let response: SaveWorkflowResponse =
                self.send(self.client.post(url).json(&request)).await?;
            Ok(response.into_record(request))
        })
    }

    fn delete_workflow(&self, id: i64) -> BackendFuture<'_, ()> {
        Box::pin(async move {
            let url = self.config.endpoint(&format!("/workflows/{id}"));
            tracing::debug!("| http | DELETE {url}");
            check_status(self.client.delete(url).send().await?).await?;
            Ok(())
        })
    }

    fn run_inline(&self, request: RunInlineRequest) -> BackendFuture<'_, RunResponse> {
        Box::pin(async move {
            let url = self.config.endpoint("/run-workflow-inline");
            tracing::debug!("| http | POST {url}");
            self.send(self.client.post(url).json(&request)).await
        })
    }

    fn run_saved(&self, id: i64, request: RunSavedRequest) -> BackendFuture<'_, RunResponse> {
        Box::pin(async move {
            let url = self.config.endpoint(&format!("/workflows/{id}/run"));
            tracing::debug!("| http | POST {url}");
            self.send(self.client.post(url).json(&request)).await
        })
    }

    fn upload_document(
        &self,
        document: Document,
        metadata: UploadMetadata,
    ) -> BackendFuture<'_, UploadResponse> {
        Box::pin(async move {
            let url = self.config.endpoint("/upload-doc");
            tracing::debug!(
                "| http | POST {url} file={} ({} bytes)",
                document.filename,
                document.bytes.len()
            );
            let form = Form::new()
                .part(
                    "file",
                    Part::bytes(document.bytes).file_name(document.filename),
                )
                .text("metadata", serde_json::to_string(&metadata)?);
            self.send(self.client.post(url).multipart(form)).await
        })
    }
}

/// Local checks and bookkeeping in front of a [`WorkflowBackend`].
pub struct ExecutionClient<B> {
    backend: B,
    config: ClientConfig,
    uploading: DashSet<String>,
}

impl ExecutionClient<HttpBackend> {
    pub fn http(config: ClientConfig) -> Result<Self, ClientError> {
        let backend = HttpBackend::new(config.clone())?;
        Ok(Self::new(backend, config))
    }

    pub fn from_env() -> Result<Self, ClientError> {
        Self::http(ClientConfig::from_env()?)
    }
}

impl<B: WorkflowBackend> ExecutionClient<B> {
    pub fn new(backend: B, config: ClientConfig) -> Self {
        Self {
            backend,
            config,
            uploading: DashSet::new(),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub async fn list_workflows(&self) -> Result<Vec<WorkflowRecord>, ClientError> {
        Ok(self.backend.list_workflows().await?)
    }

    /// Fetch one saved workflow by listing and picking it out.
    pub async fn fetch_workflow(&self, id: i64) -> Result<WorkflowRecord, ClientError> {
        self.backend
            .list_workflows()
            .await?
            .into_iter()
            .find(|record| record.id == id)
            .ok_or(ClientError::NotFound(id))
    }

    /// Save under `name`, owned by the configured owner. Blank names never reach the backend.
    pub async fn save_workflow(
        &self,
        name: &str,
        definition: WorkflowDefinition,
    ) -> Result<WorkflowRecord, ClientError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ClientError::EmptyWorkflowName);
        }
        let request = SaveWorkflowRequest {
            name: name.to_owned(),
            definition,
            owner: self.config.owner.clone(),
        };
        let record = self.backend.save_workflow(request).await.map_err(|e| {
            tracing::error!("| client | failed to save workflow {name}: {e}");
            e
        })?;
        tracing::info!("| client | saved workflow {name} as #{}", record.id);
        Ok(record)
    }

    /// Delete a saved workflow once `confirm` agrees. Returns whether anything was deleted.
    pub async fn delete_workflow(
        &self,
        id: i64,
        confirm: impl FnOnce(i64) -> bool,
    ) -> Result<bool, ClientError> {
        if !confirm(id) {
            tracing::debug!("| client | deletion of workflow #{id} declined");
            return Ok(false);
        }
        self.backend.delete_workflow(id).await?;
        tracing::info!("| client | deleted workflow #{id}");
        Ok(true)
    }

    /// One synchronous pipeline run: the whole answer arrives in a single reply.
    ///
    /// Definitions failing the configured validation never reach the backend.
    pub async fn run_inline(
        &self,
        definition: WorkflowDefinition,
        query: &str,
    ) -> Result<RunResponse, ClientError> {
        if query.trim().is_empty() {
            return Err(ClientError::EmptyQuery);
        }
        self.config.validation.validate(&definition)?;
        let request = RunInlineRequest {
            workflow: definition,
            query: query.to_owned(),
        };
        Ok(self.backend.run_inline(request).await?)
    }

    /// Run a workflow the backend already has stored.
    pub async fn run_saved(&self, id: i64, query: &str) -> Result<RunResponse, ClientError> {
        if query.trim().is_empty() {
            return Err(ClientError::EmptyQuery);
        }
        let request = RunSavedRequest {
            query: query.to_owned(),
        };
        self.backend
            .run_saved(id, request)
            .await
            .map_err(|e| match e.status() {
                Some(404) => ClientError::NotFound(id),
                _ => e.into(),
            })
    }

    /// Upload a document on behalf of `node_id`.
    ///
    /// At most one upload per node is outstanding; a second attempt is rejected, not queued.
    pub async fn upload_document(
        &self,
        node_id: &str,
        document: Document,
    ) -> Result<UploadedFile, ClientError> {
        let Some(_guard) = UploadGuard::acquire(&self.uploading, node_id) else {
            tracing::warn!("| client | upload for node {node_id} already in progress");
            return Err(ClientError::UploadInProgress(node_id.to_owned()));
        };

        let filename = document.filename.clone();
        let metadata = UploadMetadata {
            uploaded_at: Local::now().with_timezone(&Utc),
        };
        let uploaded: UploadedFile = self
            .backend
            .upload_document(document, metadata)
            .await
            .map_err(|e| {
                tracing::error!("| client | upload of {filename} for node {node_id} failed: {e}");
                e
            })?
            .into();
        tracing::info!(
            "| client | uploaded {} for node {node_id}: {} chunks",
            uploaded.filename,
            uploaded.chunks
        );
        Ok(uploaded)
    }

    pub fn is_uploading(&self, node_id: &str) -> bool {
        self.uploading.contains(node_id)
    }
}

/// Marks a node as uploading until dropped, including when the upload future is dropped early.
struct UploadGuard<'a> {
    uploading: &'a DashSet<String>,
    node_id: String,
}

impl<'a> UploadGuard<'a> {
    fn acquire(uploading: &'a DashSet<String>, node_id: &str) -> Option<Self> {
        uploading.insert(node_id.to_owned()).then(|| Self {
            uploading,
            node_id: node_id.to_owned(),
        })
    }
}

impl Drop for UploadGuard<'_> {
    fn drop(&mut self) {
        self.uploading.remove(&self.node_id);
    }
}
