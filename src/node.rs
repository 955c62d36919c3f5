use std::fmt::Display;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_COLLECTION_NAME: &str = "knowledge_base";
pub const DEFAULT_CHUNK_SIZE: u32 = 500;
pub const DEFAULT_TEMPERATURE: f64 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 256;
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

pub const CHUNK_SIZE_RANGE: (u32, u32) = (100, 2000);
pub const TEMPERATURE_RANGE: (f64, f64) = (0.0, 1.0);
pub const MAX_TOKENS_RANGE: (u32, u32) = (50, 4000);

#[derive(Debug, Error)]
pub enum NodeConfigError {
    #[error("Unknown node type: {0}")]
    UnknownKind(String),
    #[error("Invalid {kind} config: {source}")]
    InvalidConfig {
        kind: NodeKind,
        source: serde_json::Error,
    },
}

/// The four node types a stack can be assembled from.
///
/// Each kind has two names: the editor key used by the canvas (`userQuery`) and
/// the label transmitted to the backend (`UserQuery`). Only the label ever
/// crosses the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    #[serde(rename = "UserQuery")]
    UserQuery,
    #[serde(rename = "KnowledgeBase")]
    KnowledgeBase,
    #[serde(rename = "LLMEngine")]
    LlmEngine,
    #[serde(rename = "Output")]
    Output,
}

impl NodeKind {
    pub const ALL: [NodeKind; 4] = [
        NodeKind::UserQuery,
        NodeKind::KnowledgeBase,
        NodeKind::LlmEngine,
        NodeKind::Output,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            NodeKind::UserQuery => "UserQuery",
            NodeKind::KnowledgeBase => "KnowledgeBase",
            NodeKind::LlmEngine => "LLMEngine",
            NodeKind::Output => "Output",
        }
    }

    pub fn editor_key(&self) -> &'static str {
        match self {
            NodeKind::UserQuery => "userQuery",
            NodeKind::KnowledgeBase => "knowledgeBase",
            NodeKind::LlmEngine => "llmEngine",
            NodeKind::Output => "output",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.label() == label)
    }

    pub fn from_editor_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.editor_key() == key)
    }

    /// The config a freshly dropped node of this kind starts with.
    pub fn default_config(&self) -> NodeConfig {
        match self {
            NodeKind::UserQuery => NodeConfig::UserQuery(UserQueryConfig::default()),
            NodeKind::KnowledgeBase => NodeConfig::KnowledgeBase(KnowledgeBaseConfig::default()),
            NodeKind::LlmEngine => NodeConfig::LlmEngine(LlmEngineConfig::default()),
            NodeKind::Output => NodeConfig::Output(OutputConfig::default()),
        }
    }
}

impl Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.label())
    }
}

/// Type-specific node configuration, one variant per [`NodeKind`].
///
/// Serialized as the bare config object; the kind travels separately as the
/// node's `type` field, so deserialization goes through [`NodeConfig::from_value`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum NodeConfig {
    UserQuery(UserQueryConfig),
    KnowledgeBase(KnowledgeBaseConfig),
    LlmEngine(LlmEngineConfig),
    Output(OutputConfig),
}

impl NodeConfig {
    pub fn kind(&self) -> NodeKind {
        match self {
            NodeConfig::UserQuery(_) => NodeKind::UserQuery,
            NodeConfig::KnowledgeBase(_) => NodeKind::KnowledgeBase,
            NodeConfig::LlmEngine(_) => NodeKind::LlmEngine,
            NodeConfig::Output(_) => NodeKind::Output,
        }
    }

    /// Read a config object for `kind`. `null` yields the kind's defaults.
    ///
    /// Keys holding `null` count as absent and take their defaults too.
    pub fn from_value(kind: NodeKind, value: serde_json::Value) -> Result<Self, NodeConfigError> {
        if value.is_null() {
            return Ok(kind.default_config());
        }
        let value = without_null_keys(value);
        let invalid = |source| NodeConfigError::InvalidConfig { kind, source };
        let mut config = match kind {
            NodeKind::UserQuery => {
                NodeConfig::UserQuery(serde_json::from_value(value).map_err(invalid)?)
            }
            NodeKind::KnowledgeBase => {
                NodeConfig::KnowledgeBase(serde_json::from_value(value).map_err(invalid)?)
            }
            NodeKind::LlmEngine => {
                NodeConfig::LlmEngine(serde_json::from_value(value).map_err(invalid)?)
            }
            NodeKind::Output => NodeConfig::Output(serde_json::from_value(value).map_err(invalid)?),
        };
        config.clamp();
        Ok(config)
    }

    /// Merge `patch` into this config field by field.
    ///
    /// Returns `false` without touching anything when the patch is for another kind.
    pub fn apply(&mut self, patch: ConfigPatch) -> bool {
        match (self, patch) {
            (NodeConfig::UserQuery(config), ConfigPatch::UserQuery(patch)) => {
                if let Some(query_text) = patch.query_text {
                    config.query_text = Some(query_text);
                }
            }
            (NodeConfig::KnowledgeBase(config), ConfigPatch::KnowledgeBase(patch)) => {
                if let Some(collection_name) = patch.collection_name {
                    config.collection_name = collection_name;
                }
                if let Some(chunk_size) = patch.chunk_size {
                    config.chunk_size = chunk_size;
                }
                if let Some(uploaded_file) = patch.uploaded_file {
                    config.uploaded_file = Some(uploaded_file);
                }
                config.clamp();
            }
            (NodeConfig::LlmEngine(config), ConfigPatch::LlmEngine(patch)) => {
                if let Some(model) = patch.model {
                    config.model = model;
                }
                if let Some(temperature) = patch.temperature {
                    config.temperature = temperature;
                }
                if let Some(max_tokens) = patch.max_tokens {
                    config.max_tokens = max_tokens;
                }
                if let Some(system_prompt) = patch.system_prompt {
                    config.system_prompt = system_prompt;
                }
                if let Some(use_web_search) = patch.use_web_search {
                    config.use_web_search = use_web_search;
                }
                config.clamp();
            }
            (NodeConfig::Output(config), ConfigPatch::Output(patch)) => {
                if let Some(format) = patch.format {
                    config.format = format;
                }
                if let Some(show_sources) = patch.show_sources {
                    config.show_sources = show_sources;
                }
            }
            _ => return false,
        }
        true
    }

    fn clamp(&mut self) {
        match self {
            NodeConfig::KnowledgeBase(config) => config.clamp(),
            NodeConfig::LlmEngine(config) => config.clamp(),
            NodeConfig::UserQuery(_) | NodeConfig::Output(_) => {}
        }
    }
}

fn without_null_keys(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(mut map) => {
            map.retain(|_, field| !field.is_null());
            serde_json::Value::Object(map)
        }
        other => other,
    }
}

/// The legacy `placeholder` key is read as `queryText` and always written back as `queryText`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserQueryConfig {
    /// Authoring-time default text, not the query sent at run time.
    #[serde(default, alias = "placeholder", skip_serializing_if = "Option::is_none")]
    pub query_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeBaseConfig {
    #[serde(default = "default_collection_name")]
    pub collection_name: String,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploaded_file: Option<UploadedFile>,
}

impl KnowledgeBaseConfig {
    fn clamp(&mut self) {
        self.chunk_size = self.chunk_size.clamp(CHUNK_SIZE_RANGE.0, CHUNK_SIZE_RANGE.1);
    }
}

impl Default for KnowledgeBaseConfig {
    fn default() -> Self {
        Self {
            collection_name: default_collection_name(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            uploaded_file: None,
        }
    }
}

/// A document the backend has already chunked and indexed for a knowledge base node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFile {
    pub file_id: String,
    pub filename: String,
    pub chunks: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LlmModel {
    #[default]
    #[serde(rename = "gpt-3.5-turbo")]
    Gpt35Turbo,
    #[serde(rename = "gpt-4")]
    Gpt4,
    #[serde(rename = "gemini-pro")]
    GeminiPro,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmEngineConfig {
    #[serde(default)]
    pub model: LlmModel,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default)]
    pub use_web_search: bool,
}

impl LlmEngineConfig {
    fn clamp(&mut self) {
        if self.temperature.is_nan() {
            self.temperature = DEFAULT_TEMPERATURE;
        }
        self.temperature = self
            .temperature
            .clamp(TEMPERATURE_RANGE.0, TEMPERATURE_RANGE.1);
        self.max_tokens = self.max_tokens.clamp(MAX_TOKENS_RANGE.0, MAX_TOKENS_RANGE.1);
    }
}

impl Default for LlmEngineConfig {
    fn default() -> Self {
        Self {
            model: LlmModel::default(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            system_prompt: default_system_prompt(),
            use_web_search: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Markdown,
    Json,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputConfig {
    #[serde(default)]
    pub format: OutputFormat,
    #[serde(default)]
    pub show_sources: bool,
}

fn default_collection_name() -> String {
    DEFAULT_COLLECTION_NAME.to_owned()
}

fn default_chunk_size() -> u32 {
    DEFAULT_CHUNK_SIZE
}

fn default_temperature() -> f64 {
    DEFAULT_TEMPERATURE
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_owned()
}

/// A partial config update. Only `Some` fields overwrite.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigPatch {
    UserQuery(UserQueryPatch),
    KnowledgeBase(KnowledgeBasePatch),
    LlmEngine(LlmEnginePatch),
    Output(OutputPatch),
}

impl ConfigPatch {
    pub fn kind(&self) -> NodeKind {
        match self {
            ConfigPatch::UserQuery(_) => NodeKind::UserQuery,
            ConfigPatch::KnowledgeBase(_) => NodeKind::KnowledgeBase,
            ConfigPatch::LlmEngine(_) => NodeKind::LlmEngine,
            ConfigPatch::Output(_) => NodeKind::Output,
        }
    }

    /// Read a patch object sent by the editor for a node of `kind`.
    pub fn from_value(kind: NodeKind, value: serde_json::Value) -> Result<Self, NodeConfigError> {
        let invalid = |source| NodeConfigError::InvalidConfig { kind, source };
        Ok(match kind {
            NodeKind::UserQuery => {
                ConfigPatch::UserQuery(serde_json::from_value(value).map_err(invalid)?)
            }
            NodeKind::KnowledgeBase => {
                ConfigPatch::KnowledgeBase(serde_json::from_value(value).map_err(invalid)?)
            }
            NodeKind::LlmEngine => {
                ConfigPatch::LlmEngine(serde_json::from_value(value).map_err(invalid)?)
            }
            NodeKind::Output => ConfigPatch::Output(serde_json::from_value(value).map_err(invalid)?),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserQueryPatch {
    #[serde(default, alias = "placeholder")]
    pub query_text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeBasePatch {
    #[serde(default)]
    pub collection_name: Option<String>,
    #[serde(default)]
    pub chunk_size: Option<u32>,
    #[serde(default)]
    pub uploaded_file: Option<UploadedFile>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmEnginePatch {
    #[serde(default)]
    pub model: Option<LlmModel>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub use_web_search: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputPatch {
    #[serde(default)]
    pub format: Option<OutputFormat>,
    #[serde(default)]
    pub show_sources: Option<bool>,
}

impl From<UserQueryPatch> for ConfigPatch {
    fn from(patch: UserQueryPatch) -> Self {
        ConfigPatch::UserQuery(patch)
    }
}

impl From<KnowledgeBasePatch> for ConfigPatch {
    fn from(patch: KnowledgeBasePatch) -> Self {
        ConfigPatch::KnowledgeBase(patch)
    }
}

impl From<LlmEnginePatch> for ConfigPatch {
    fn from(patch: LlmEnginePatch) -> Self {
        ConfigPatch::LlmEngine(patch)
    }
}

impl From<OutputPatch> for ConfigPatch {
    fn from(patch: OutputPatch) -> Self {
        ConfigPatch::Output(patch)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_label_and_editor_key_mapping() {
        for kind in NodeKind::ALL {
            assert_eq!(NodeKind::from_label(kind.label()), Some(kind));
            assert_eq!(NodeKind::from_editor_key(kind.editor_key()), Some(kind));
        }
        assert_eq!(NodeKind::LlmEngine.label(), "LLMEngine");
        assert_eq!(NodeKind::LlmEngine.editor_key(), "llmEngine");
        assert_eq!(NodeKind::from_label("llmEngine"), None);
        assert_eq!(
            serde_json::to_value(NodeKind::LlmEngine).unwrap(),
            json!("LLMEngine")
        );
    }

    #[test]
    fn test_default_configs() {
        let kb = serde_json::to_value(NodeKind::KnowledgeBase.default_config()).unwrap();
        assert_eq!(kb, json!({"collectionName": "knowledge_base", "chunkSize": 500}));

        let llm = serde_json::to_value(NodeKind::LlmEngine.default_config()).unwrap();
        assert_eq!(
            llm,
            json!({
                "model": "gpt-3.5-turbo",
                "temperature": 0.7,
                "maxTokens": 256,
                "systemPrompt": "You are a helpful assistant.",
                "useWebSearch": false
            })
        );

        let output = serde_json::to_value(NodeKind::Output.default_config()).unwrap();
        assert_eq!(output, json!({"format": "text", "showSources": false}));

        let query = serde_json::to_value(NodeKind::UserQuery.default_config()).unwrap();
        assert_eq!(query, json!({}));
    }

    #[test]
    fn test_patch_merges_field_by_field() {
        let mut config = NodeKind::LlmEngine.default_config();
        assert!(config.apply(
            LlmEnginePatch {
                temperature: Some(0.2),
                ..Default::default()
            }
            .into()
        ));
        assert!(config.apply(
            LlmEnginePatch {
                model: Some(LlmModel::Gpt4),
                ..Default::default()
            }
            .into()
        ));

        let NodeConfig::LlmEngine(llm) = config else {
            panic!("expected an LLM engine config");
        };
        assert_eq!(llm.model, LlmModel::Gpt4);
        assert_eq!(llm.temperature, 0.2);
        assert_eq!(llm.max_tokens, DEFAULT_MAX_TOKENS);
        assert_eq!(llm.system_prompt, DEFAULT_SYSTEM_PROMPT);
    }

    #[test]
    fn test_patch_for_other_kind_is_rejected() {
        let mut config = NodeKind::Output.default_config();
        let before = config.clone();
        assert!(!config.apply(
            KnowledgeBasePatch {
                chunk_size: Some(800),
                ..Default::default()
            }
            .into()
        ));
        assert_eq!(config, before);
    }

    #[test]
    fn test_out_of_range_values_are_clamped() {
        let mut config = NodeKind::KnowledgeBase.default_config();
        config.apply(
            KnowledgeBasePatch {
                chunk_size: Some(50_000),
                ..Default::default()
            }
            .into(),
        );
        let NodeConfig::KnowledgeBase(kb) = &config else {
            panic!("expected a knowledge base config");
        };
        assert_eq!(kb.chunk_size, 2000);

        let llm = NodeConfig::from_value(
            NodeKind::LlmEngine,
            json!({"temperature": 3.5, "maxTokens": 1}),
        )
        .unwrap();
        let NodeConfig::LlmEngine(llm) = llm else {
            panic!("expected an LLM engine config");
        };
        assert_eq!(llm.temperature, 1.0);
        assert_eq!(llm.max_tokens, 50);
    }

    #[test]
    fn test_from_value_fills_defaults_and_accepts_legacy_keys() {
        let config = NodeConfig::from_value(NodeKind::KnowledgeBase, json!({"chunkSize": 900})).unwrap();
        assert_eq!(
            config,
            NodeConfig::KnowledgeBase(KnowledgeBaseConfig {
                collection_name: DEFAULT_COLLECTION_NAME.to_owned(),
                chunk_size: 900,
                uploaded_file: None,
            })
        );

        let config = NodeConfig::from_value(
            NodeKind::UserQuery,
            json!({"placeholder": "Enter your question..."}),
        )
        .unwrap();
        assert_eq!(
            config,
            NodeConfig::UserQuery(UserQueryConfig {
                query_text: Some("Enter your question...".to_owned()),
            })
        );

        let config = NodeConfig::from_value(NodeKind::Output, serde_json::Value::Null).unwrap();
        assert_eq!(config, NodeKind::Output.default_config());
    }

    #[test]
    fn test_null_fields_take_defaults() {
        let config = NodeConfig::from_value(
            NodeKind::KnowledgeBase,
            json!({"collectionName": "manuals", "chunkSize": null, "uploadedFile": null}),
        )
        .unwrap();
        assert_eq!(
            config,
            NodeConfig::KnowledgeBase(KnowledgeBaseConfig {
                collection_name: "manuals".to_owned(),
                chunk_size: DEFAULT_CHUNK_SIZE,
                uploaded_file: None,
            })
        );

        let config = NodeConfig::from_value(
            NodeKind::LlmEngine,
            json!({"model": null, "temperature": null, "maxTokens": null, "systemPrompt": "Be brief."}),
        )
        .unwrap();
        assert_eq!(
            config,
            NodeConfig::LlmEngine(LlmEngineConfig {
                system_prompt: "Be brief.".to_owned(),
                ..Default::default()
            })
        );

        let config =
            NodeConfig::from_value(NodeKind::Output, json!({"format": null, "showSources": true}))
                .unwrap();
        assert_eq!(
            config,
            NodeConfig::Output(OutputConfig {
                format: OutputFormat::Text,
                show_sources: true,
            })
        );
    }

    #[test]
    fn test_invalid_config_is_reported() {
        let err = NodeConfig::from_value(NodeKind::LlmEngine, json!({"model": "llama"})).unwrap_err();
        assert!(matches!(
            err,
            NodeConfigError::InvalidConfig {
                kind: NodeKind::LlmEngine,
                ..
            }
        ));
    }

    #[test]
    fn test_patch_from_json() {
        let patch = ConfigPatch::from_value(
            NodeKind::Output,
            json!({"format": "markdown"}),
        )
        .unwrap();
        assert_eq!(
            patch,
            ConfigPatch::Output(OutputPatch {
                format: Some(OutputFormat::Markdown),
                show_sources: None,
            })
        );
    }
}
