use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    client::{ClientError, ExecutionClient, WorkflowBackend},
    conversation::{ChatMessage, ChatSession, SendOutcome},
    definition::WorkflowDefinition,
};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Unknown chat session: {0}")]
    UnknownSession(Uuid),
    #[error(transparent)]
    Client(#[from] ClientError),
}

/// Chat sessions addressed by id, for callers that serve many users at once.
///
/// Each session keeps its own single-flight guard, so runs on different ids
/// proceed concurrently while a second run on the same id is refused.
pub struct SessionRegistry<B> {
    client: Arc<ExecutionClient<B>>,
    sessions: DashMap<Uuid, Arc<ChatSession<B>>>,
}

impl<B: WorkflowBackend> SessionRegistry<B> {
    pub fn new(client: Arc<ExecutionClient<B>>) -> Self {
        Self {
            client,
            sessions: DashMap::new(),
        }
    }

    pub fn client(&self) -> &Arc<ExecutionClient<B>> {
        &self.client
    }

    /// Open a session over `definition` once it passes the configured validation.
    pub fn open(&self, definition: WorkflowDefinition) -> Result<Uuid, SessionError> {
        self.client
            .config()
            .validation
            .validate(&definition)
            .map_err(ClientError::from)?;

        let id = Uuid::new_v4();
        let session = ChatSession::new(Arc::clone(&self.client), definition);
        self.sessions.insert(id, Arc::new(session));
        tracing::info!("| session | opened {id}");
        Ok(id)
    }

    /// Open a session over the definition of saved workflow `workflow_id`.
    pub async fn open_saved(&self, workflow_id: i64) -> Result<Uuid, SessionError> {
        let record = self.client.fetch_workflow(workflow_id).await?;
        self.open(record.definition)
    }

    pub fn get(&self, id: Uuid) -> Option<Arc<ChatSession<B>>> {
        self.sessions.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    pub async fn send(
        &self,
        id: Uuid,
        query: impl Into<String>,
    ) -> Result<SendOutcome, SessionError> {
        let session = self.get(id).ok_or(SessionError::UnknownSession(id))?;
        Ok(session.send(query).await)
    }

    pub async fn transcript(&self, id: Uuid) -> Result<Vec<ChatMessage>, SessionError> {
        let session = self.get(id).ok_or(SessionError::UnknownSession(id))?;
        Ok(session.transcript().await)
    }

    /// Forget session `id` and abort its in-flight run, if any.
    pub fn close(&self, id: Uuid) -> bool {
        match self.sessions.remove(&id) {
            Some((_, session)) => {
                session.close();
                tracing::info!("| session | closed {id}");
                true
            }
            None => false,
        }
    }

    pub fn ids(&self) -> Vec<Uuid> {
        self.sessions.iter().map(|entry| *entry.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
