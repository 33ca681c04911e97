//! Whole-graph import and export.
//!
//! Import feeds a JSON `{entities, relations}` document through the create
//! operations, so existing keys are left untouched and the summary counts
//! only what was actually added.

use std::path::Path;

use anyhow::{Context, Result};
use tokio::fs;

use crate::graph::KnowledgeGraph;
use crate::manager::KnowledgeGraphManager;

pub struct ImportSummary {
    pub entities: usize,
    pub relations: usize,
}

pub async fn import_graph(
    manager: &KnowledgeGraphManager,
    path: &Path,
) -> Result<ImportSummary> {
    let data = fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let graph: KnowledgeGraph = serde_json::from_str(&data)
        .with_context(|| format!("invalid graph document: {}", path.display()))?;

    let entities = manager.create_entities(graph.entities).await?;
    let relations = manager.create_relations(graph.relations).await?;

    Ok(ImportSummary {
        entities: entities.len(),
        relations: relations.len(),
    })
}

pub async fn export_graph(manager: &KnowledgeGraphManager, path: &Path) -> Result<()> {
    let graph = manager.read_graph().await?;
    let data = serde_json::to_string_pretty(&graph)?;
    fs::write(path, data)
        .await
        .with_context(|| format!("failed to write {}", path.display()))
}
