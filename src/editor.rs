use std::sync::Arc;

use thiserror::Error;

use crate::{
    client::{ClientError, Document, ExecutionClient, WorkflowBackend},
    conversation::ChatSession,
    definition::{WorkflowDefinition, WorkflowRecord},
    graph::{GraphError, WorkflowGraph},
    node::{KnowledgeBasePatch, NodeKind, UploadedFile},
    validation::ValidationError,
};

#[derive(Debug, Error)]
pub enum EditorError {
    #[error("Graph error: {0}")]
    GraphError(#[from] GraphError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Node '{id}' is a {kind} node, documents can only be attached to KnowledgeBase nodes")]
    NotKnowledgeBase { id: String, kind: NodeKind },
    #[error(transparent)]
    Client(#[from] ClientError),
}

/// One workflow being built: a name, its editor graph and the client it is saved and run through.
pub struct StackEditor<B> {
    name: String,
    graph: WorkflowGraph,
    client: Arc<ExecutionClient<B>>,
    record_id: Option<i64>,
}

impl<B: WorkflowBackend> StackEditor<B> {
    pub fn new(name: impl Into<String>, client: Arc<ExecutionClient<B>>) -> Self {
        Self {
            name: name.into(),
            graph: WorkflowGraph::new(),
            client,
            record_id: None,
        }
    }

    /// Reopen a saved workflow. Layout is not stored, so every node starts at the origin.
    pub fn load(record: &WorkflowRecord, client: Arc<ExecutionClient<B>>) -> Result<Self, EditorError> {
        let graph = WorkflowGraph::from_definition(&record.definition)?;
        tracing::debug!(
            "| editor | loaded workflow #{} ({} nodes)",
            record.id,
            graph.nodes().len()
        );
        Ok(Self {
            name: record.name.clone(),
            graph,
            client,
            record_id: Some(record.id),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn graph(&self) -> &WorkflowGraph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut WorkflowGraph {
        &mut self.graph
    }

    /// Id of the record this editor was last saved as or loaded from.
    pub fn record_id(&self) -> Option<i64> {
        self.record_id
    }

    pub fn definition(&self) -> WorkflowDefinition {
        self.graph.serialize()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.client.config().validation.validate(&self.definition())
    }

    /// Save the current graph. Every save creates a new record on the backend.
    pub async fn save(&mut self) -> Result<WorkflowRecord, EditorError> {
        let record = self
            .client
            .save_workflow(&self.name, self.definition())
            .await?;
        self.record_id = Some(record.id);
        Ok(record)
    }

    /// Upload `document` and record the result on knowledge base node `node_id`.
    ///
    /// Only the `uploadedFile` key of the node's config changes.
    pub async fn attach_document(
        &mut self,
        node_id: &str,
        document: Document,
    ) -> Result<UploadedFile, EditorError> {
        let node = self
            .graph
            .node(node_id)
            .ok_or_else(|| ClientError::UnknownNode(node_id.to_owned()))?;
        if node.kind() != NodeKind::KnowledgeBase {
            return Err(EditorError::NotKnowledgeBase {
                id: node_id.to_owned(),
                kind: node.kind(),
            });
        }

        let uploaded = self.client.upload_document(node_id, document).await?;
        self.graph.update_node_config(
            node_id,
            KnowledgeBasePatch {
                uploaded_file: Some(uploaded.clone()),
                ..Default::default()
            },
        );
        Ok(uploaded)
    }

    /// Start a chat over the current graph once it passes validation.
    ///
    /// The session runs a snapshot; later edits do not reach it.
    pub fn open_chat(&self) -> Result<ChatSession<B>, EditorError> {
        let definition = self.definition();
        self.client.config().validation.validate(&definition)?;
        Ok(ChatSession::new(Arc::clone(&self.client), definition))
    }
}
