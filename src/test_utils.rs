use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use serde_json::json;
use tokio::sync::watch;

use crate::{
    client::{ApiError, BackendFuture, Document, WorkflowBackend},
    definition::{
        RunInlineRequest, RunResponse, RunSavedRequest, SaveWorkflowRequest, UploadMetadata,
        UploadResponse, WorkflowDefinition, WorkflowRecord,
    },
};

/// UserQuery -> KnowledgeBase -> LLMEngine -> Output.
pub fn pipeline_definition() -> WorkflowDefinition {
    serde_json::from_value(json!({
        "nodes": [
            {"id": "userQuery-1", "type": "UserQuery", "config": {}},
            {"id": "knowledgeBase-2", "type": "KnowledgeBase", "config": {"collectionName": "manuals"}},
            {"id": "llmEngine-3", "type": "LLMEngine", "config": {"model": "gpt-4"}},
            {"id": "output-4", "type": "Output", "config": {"format": "markdown"}}
        ],
        "edges": [
            {"source": "userQuery-1", "target": "knowledgeBase-2"},
            {"source": "knowledgeBase-2", "target": "llmEngine-3"},
            {"source": "llmEngine-3", "target": "output-4"}
        ]
    }))
    .unwrap()
}

/// In-process backend that replays queued replies and records what it was sent.
///
/// While held, run and upload calls wait until [`ScriptedBackend::release`].
#[derive(Clone)]
pub struct ScriptedBackend {
    inner: Arc<Inner>,
}

struct Inner {
    runs: Mutex<VecDeque<Result<RunResponse, ApiError>>>,
    uploads: Mutex<VecDeque<Result<UploadResponse, ApiError>>>,
    records: Mutex<Vec<WorkflowRecord>>,
    last_run: Mutex<Option<RunInlineRequest>>,
    calls: AtomicUsize,
    open: watch::Sender<bool>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        let (open, _) = watch::channel(true);
        Self {
            inner: Arc::new(Inner {
                runs: Mutex::new(VecDeque::new()),
                uploads: Mutex::new(VecDeque::new()),
                records: Mutex::new(Vec::new()),
                last_run: Mutex::new(None),
                calls: AtomicUsize::new(0),
                open,
            }),
        }
    }

    pub fn push_answer(&self, answer: &str) {
        self.inner.runs.lock().unwrap().push_back(Ok(RunResponse {
            answer: answer.to_owned(),
            sources: None,
        }));
    }

    pub fn push_run_error(&self, error: ApiError) {
        self.inner.runs.lock().unwrap().push_back(Err(error));
    }

    pub fn push_upload(&self, file_id: &str, filename: &str, chunks: u32) {
        self.inner
            .uploads
            .lock()
            .unwrap()
            .push_back(Ok(UploadResponse {
                file_id: file_id.to_owned(),
                filename: filename.to_owned(),
                chunks,
            }));
    }

    pub fn push_upload_error(&self, error: ApiError) {
        self.inner.uploads.lock().unwrap().push_back(Err(error));
    }

    pub fn records(&self) -> Vec<WorkflowRecord> {
        self.inner.records.lock().unwrap().clone()
    }

    pub fn last_run(&self) -> Option<RunInlineRequest> {
        self.inner.last_run.lock().unwrap().clone()
    }

    /// Number of backend calls made so far.
    pub fn calls(&self) -> usize {
        self.inner.calls.load(Ordering::SeqCst)
    }

    pub fn hold(&self) {
        self.inner.open.send_replace(false);
    }

    pub fn release(&self) {
        self.inner.open.send_replace(true);
    }

    fn record_call(&self) {
        self.inner.calls.fetch_add(1, Ordering::SeqCst);
    }

    async fn wait_until_open(&self) {
        let mut open = self.inner.open.subscribe();
        let _ = open.wait_for(|open| *open).await;
    }
}

impl WorkflowBackend for ScriptedBackend {
    fn list_workflows(&self) -> BackendFuture<'_, Vec<WorkflowRecord>> {
        self.record_call();
        Box::pin(async move { Ok(self.records()) })
    }

    fn save_workflow(&self, request: SaveWorkflowRequest) -> BackendFuture<'_, WorkflowRecord> {
        self.record_call();
        Box::pin(async move {
            let mut records = self.inner.records.lock().unwrap();
            let record = WorkflowRecord {
                id: records.len() as i64 + 1,
                name: request.name,
                owner: request.owner,
                definition: request.definition,
                created_at: chrono::Utc::now(),
            };
            records.push(record.clone());
            Ok(record)
        })
    }

    fn delete_workflow(&self, id: i64) -> BackendFuture<'_, ()> {
        self.record_call();
        Box::pin(async move {
            let mut records = self.inner.records.lock().unwrap();
            let before = records.len();
            records.retain(|record| record.id != id);
            if records.len() == before {
                return Err(ApiError::Backend {
                    status: 404,
                    detail: "Workflow not found".to_owned(),
                });
            }
            Ok(())
        })
    }

    fn run_inline(&self, request: RunInlineRequest) -> BackendFuture<'_, RunResponse> {
        self.record_call();
        Box::pin(async move {
            *self.inner.last_run.lock().unwrap() = Some(request);
            self.wait_until_open().await;
            let next = self.inner.runs.lock().unwrap().pop_front();
            next.unwrap_or(Err(ApiError::Status { status: 500 }))
        })
    }

    fn run_saved(&self, id: i64, request: RunSavedRequest) -> BackendFuture<'_, RunResponse> {
        self.record_call();
        Box::pin(async move {
            let definition = self
                .records()
                .into_iter()
                .find(|record| record.id == id)
                .map(|record| record.definition)
                .ok_or(ApiError::Backend {
                    status: 404,
                    detail: "Workflow not found".to_owned(),
                })?;
            *self.inner.last_run.lock().unwrap() = Some(RunInlineRequest {
                workflow: definition,
                query: request.query,
            });
            let next = self.inner.runs.lock().unwrap().pop_front();
            next.unwrap_or(Err(ApiError::Status { status: 500 }))
        })
    }

    fn upload_document(
        &self,
        document: Document,
        _metadata: UploadMetadata,
    ) -> BackendFuture<'_, UploadResponse> {
        self.record_call();
        Box::pin(async move {
            self.wait_until_open().await;
            let next = self.inner.uploads.lock().unwrap().pop_front();
            next.unwrap_or_else(|| {
                Ok(UploadResponse {
                    file_id: "generated".to_owned(),
                    filename: document.filename,
                    chunks: 1,
                })
            })
        })
    }
}
