//! Genai-stack is a Rust client core for building and running "GenAI stack" workflows.
//! This crate provides the editor graph, its wire format, run validation and a chat
//! session that executes a workflow against the stack backend.
pub mod client;
pub mod config;
pub mod conversation;
pub mod definition;
pub mod editor;
pub mod graph;
pub mod node;
pub mod session;
pub mod validation;

#[cfg(test)]
mod test_utils;

pub use client::{ApiError, ClientError, Document, ExecutionClient, HttpBackend, WorkflowBackend};
pub use config::ClientConfig;
pub use conversation::{ChatMessage, ChatSession, Role, SendOutcome, SkipReason};
pub use definition::{WorkflowDefinition, WorkflowRecord};
pub use editor::StackEditor;
pub use graph::{Position, WorkflowGraph};
pub use node::{ConfigPatch, NodeConfig, NodeKind};
pub use session::SessionRegistry;
pub use validation::{ValidationError, ValidationMode, validate};
