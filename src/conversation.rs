use std::{
    collections::HashMap,
    fmt::Display,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::{
    client::{ExecutionClient, WorkflowBackend},
    definition::{WorkflowDefinition, WorkflowRecord},
};

#[derive(Debug, Error)]
pub enum ConversationError {
    #[error("Json error: {0}")]
    JsonError(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Ai,
    Error,
}

impl Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => f.pad("user"),
            Role::Ai => f.pad("ai"),
            Role::Error => f.pad("error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: u64,
    pub role: Role,
    pub content: String,
    /// Creation time, not the time the message reached the transcript.
    pub timestamp: DateTime<Local>,
}

/// What a call to [`ChatSession::send`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// The run finished; holds the `ai` or `error` message that was appended.
    Completed(ChatMessage),
    /// Nothing was appended.
    Skipped(SkipReason),
    /// The session was closed while the run was in flight. Only the user message was appended.
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    EmptyQuery,
    Busy,
    Closed,
}

/// Conversational run history for one workflow, with at most one run in flight.
///
/// The transcript is append-only. Message ids come from a per-session counter,
/// so they stay unique however quickly messages are sent.
pub struct ChatSession<B> {
    client: Arc<ExecutionClient<B>>,
    definition: WorkflowDefinition,
    transcript: Mutex<Vec<ChatMessage>>,
    in_flight: Mutex<()>,
    cancel: CancellationToken,
    next_id: AtomicU64,
}

impl<B: WorkflowBackend> ChatSession<B> {
    pub fn new(client: Arc<ExecutionClient<B>>, definition: WorkflowDefinition) -> Self {
        Self {
            client,
            definition,
            transcript: Mutex::new(Vec::new()),
            in_flight: Mutex::new(()),
            cancel: CancellationToken::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// A session over a saved workflow's definition.
    pub fn for_record(client: Arc<ExecutionClient<B>>, record: &WorkflowRecord) -> Self {
        Self::new(client, record.definition.clone())
    }

    pub fn definition(&self) -> &WorkflowDefinition {
        &self.definition
    }

    /// Run `query` through the workflow and record the exchange.
    ///
    /// Blank queries, calls made while another run is pending and calls on a
    /// closed session are skipped without touching the transcript.
    pub async fn send(&self, query: impl Into<String>) -> SendOutcome {
        let query = query.into();
        if self.cancel.is_cancelled() {
            return SendOutcome::Skipped(SkipReason::Closed);
        }
        if query.trim().is_empty() {
            return SendOutcome::Skipped(SkipReason::EmptyQuery);
        }
        let Ok(_in_flight) = self.in_flight.try_lock() else {
            tracing::warn!("| chat | run already pending, ignoring query: {query}");
            return SendOutcome::Skipped(SkipReason::Busy);
        };

        self.append(Role::User, query.clone()).await;

        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                tracing::info!("| chat | session closed while running query: {query}");
                return SendOutcome::Cancelled;
            }
            result = self.client.run_inline(self.definition.clone(), &query) => result,
        };

        let message = match result {
            Ok(response) => {
                tracing::debug!("| chat | Query: {query} | Answer: {}", response.answer);
                self.append(Role::Ai, response.answer).await
            }
            Err(e) => {
                tracing::error!("| chat | Query: {query} | Error: {e}");
                self.append(Role::Error, format!("Error: {e}")).await
            }
        };
        SendOutcome::Completed(message)
    }

    async fn append(&self, role: Role, content: String) -> ChatMessage {
        let message = ChatMessage {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            role,
            content,
            timestamp: Local::now(),
        };
        self.transcript.lock().await.push(message.clone());
        message
    }

    pub fn is_pending(&self) -> bool {
        self.in_flight.try_lock().is_err()
    }

    /// Abort any in-flight run and refuse further sends.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn transcript(&self) -> Vec<ChatMessage> {
        self.transcript.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.transcript.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.transcript.lock().await.is_empty()
    }

    /// Search for messages containing `keyword`.
    pub async fn search(&self, keyword: &str) -> Vec<ChatMessage> {
        self.transcript
            .lock()
            .await
            .iter()
            .filter(|message| message.content.contains(keyword))
            .cloned()
            .collect()
    }

    pub async fn count_messages_by_role(&self) -> HashMap<Role, usize> {
        let mut count = HashMap::new();
        for message in self.transcript.lock().await.iter() {
            *count.entry(message.role).or_insert(0) += 1;
        }
        count
    }

    pub async fn to_json(&self) -> Result<String, ConversationError> {
        Ok(serde_json::to_string(&*self.transcript.lock().await)?)
    }

    /// Plain-text rendering, one `role: content` line per message.
    pub async fn render(&self) -> String {
        self.transcript
            .lock()
            .await
            .iter()
            .map(|message| format!("{}: {}\n", message.role, message.content))
            .collect()
    }
}

impl<B> Drop for ChatSession<B> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
