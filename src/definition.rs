use chrono::{DateTime, Local, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, de::Error as _};
use thiserror::Error;

use crate::node::{NodeConfig, NodeConfigError, NodeKind, UploadedFile};

#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("Json error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Node config error: {0}")]
    NodeConfigError(#[from] NodeConfigError),
}

/// The wire form of a workflow graph: no layout, no edge handles.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    #[serde(default)]
    pub nodes: Vec<NodeDefinition>,
    #[serde(default)]
    pub edges: Vec<EdgeDefinition>,
}

impl WorkflowDefinition {
    pub fn from_json(json: &str) -> Result<Self, DefinitionError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, DefinitionError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn contains_kind(&self, kind: NodeKind) -> bool {
        self.nodes.iter().any(|node| node.kind == kind)
    }

    pub fn node(&self, id: &str) -> Option<&NodeDefinition> {
        self.nodes.iter().find(|node| node.id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeDefinition {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    pub config: NodeConfig,
}

impl<'de> Deserialize<'de> for NodeDefinition {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct RawNode {
            id: String,
            #[serde(rename = "type")]
            kind: String,
            #[serde(default)]
            config: serde_json::Value,
        }

        let raw = RawNode::deserialize(deserializer)?;
        let kind = NodeKind::from_label(&raw.kind)
            .ok_or_else(|| D::Error::custom(NodeConfigError::UnknownKind(raw.kind.clone())))?;
        let config = NodeConfig::from_value(kind, raw.config).map_err(D::Error::custom)?;
        Ok(Self {
            id: raw.id,
            kind,
            config,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EdgeDefinition {
    pub source: String,
    pub target: String,
}

/// A saved workflow as the backend returns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRecord {
    pub id: i64,
    pub name: String,
    #[serde(default, deserialize_with = "nullable_string")]
    pub owner: String,
    #[serde(deserialize_with = "definition_object_or_string")]
    pub definition: WorkflowDefinition,
    #[serde(deserialize_with = "flexible_timestamp")]
    pub created_at: DateTime<Utc>,
}

/// The backend stores definitions as JSON text and may hand them back either way.
/// A `null` definition reads as an empty workflow.
fn definition_object_or_string<'de, D>(deserializer: D) -> Result<WorkflowDefinition, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Encoded {
        Text(String),
        Object(serde_json::Value),
    }

    let value = match Encoded::deserialize(deserializer)? {
        Encoded::Text(text) => serde_json::from_str(&text).map_err(D::Error::custom)?,
        Encoded::Object(value) => value,
    };
    if value.is_null() {
        return Ok(WorkflowDefinition::default());
    }
    serde_json::from_value(value).map_err(D::Error::custom)
}

fn nullable_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Accepts RFC 3339 and naive ISO-8601 timestamps; naive ones are taken as UTC.
fn flexible_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(&text) {
        return Ok(timestamp.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&text, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(&text, "%Y-%m-%d %H:%M:%S%.f"))
        .map(|naive| naive.and_utc())
        .map_err(|e| D::Error::custom(format!("invalid timestamp '{text}': {e}")))
}

#[derive(Debug, Clone, Serialize)]
pub struct SaveWorkflowRequest {
    pub name: String,
    pub definition: WorkflowDefinition,
    pub owner: String,
}

/// Some backend versions answer a save with the full record, others with a short acknowledgement.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SaveWorkflowResponse {
    Record(WorkflowRecord),
    Acknowledged {
        workflow_id: i64,
        #[serde(default)]
        message: Option<String>,
    },
}

impl SaveWorkflowResponse {
    pub fn into_record(self, request: SaveWorkflowRequest) -> WorkflowRecord {
        match self {
            SaveWorkflowResponse::Record(record) => record,
            SaveWorkflowResponse::Acknowledged { workflow_id, .. } => WorkflowRecord {
                id: workflow_id,
                name: request.name,
                owner: request.owner,
                definition: request.definition,
                created_at: Local::now().with_timezone(&Utc),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunInlineRequest {
    pub workflow: WorkflowDefinition,
    pub query: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSavedRequest {
    pub query: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RunResponse {
    pub answer: String,
    #[serde(default)]
    pub sources: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadMetadata {
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadResponse {
    pub file_id: String,
    pub filename: String,
    pub chunks: u32,
}

impl From<UploadResponse> for UploadedFile {
    fn from(response: UploadResponse) -> Self {
        Self {
            file_id: response.file_id,
            filename: response.filename,
            chunks: response.chunks,
        }
    }
}
