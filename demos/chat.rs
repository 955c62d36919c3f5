use std::sync::Arc;

use anyhow::Result;
use genai_stack::{
    ClientConfig, ExecutionClient, NodeKind, Position, SendOutcome, StackEditor,
    node::{KnowledgeBasePatch, LlmEnginePatch, OutputPatch},
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // GENAI_STACK_API_URL=http://localhost:8000/api
    // GENAI_STACK_OWNER=default_user
    let config = ClientConfig::from_env()?;
    let client = Arc::new(ExecutionClient::http(config)?);

    let mut editor = StackEditor::new("Manual assistant", Arc::clone(&client));
    let graph = editor.graph_mut();
    let query = graph
        .add_node(NodeKind::UserQuery, Position::new(0.0, 0.0))
        .id()
        .to_owned();
    let kb = graph
        .add_node(NodeKind::KnowledgeBase, Position::new(250.0, 0.0))
        .id()
        .to_owned();
    let llm = graph
        .add_node(NodeKind::LlmEngine, Position::new(500.0, 0.0))
        .id()
        .to_owned();
    let output = graph
        .add_node(NodeKind::Output, Position::new(750.0, 0.0))
        .id()
        .to_owned();
    graph.connect(&query, &kb, None, None)?;
    graph.connect(&kb, &llm, None, None)?;
    graph.connect(&llm, &output, None, None)?;

    graph.update_node_config(
        &kb,
        KnowledgeBasePatch {
            collection_name: Some("manuals".to_owned()),
            ..Default::default()
        },
    );
    graph.update_node_config(
        &llm,
        LlmEnginePatch {
            temperature: Some(0.2),
            system_prompt: Some("Answer using the attached manuals only.".to_owned()),
            ..Default::default()
        },
    );
    graph.update_node_config(
        &output,
        OutputPatch {
            show_sources: Some(true),
            ..Default::default()
        },
    );

    if let Some(path) = std::env::args().nth(1) {
        let document = genai_stack::Document::from_path(&path).await?;
        let uploaded = editor.attach_document(&kb, document).await?;
        println!("indexed {} into {} chunks", uploaded.filename, uploaded.chunks);
    }

    let record = editor.save().await?;
    println!("saved workflow #{} ({})", record.id, record.name);

    let chat = editor.open_chat()?;
    match chat.send("What does the warranty cover?").await {
        SendOutcome::Completed(message) => println!("{}: {}", message.role, message.content),
        other => println!("{other:?}"),
    }
    Ok(())
}
