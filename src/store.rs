//! JSONL persistence for the knowledge graph.
//!
//! The backing file holds one self-describing JSON object per line, tagged
//! with `type: "entity"` or `type: "relation"`. The store keeps no state
//! between calls: every operation re-reads and re-writes the whole file.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use tokio::fs;

use crate::graph::{Entity, KnowledgeGraph, Relation};

pub const DEFAULT_MEMORY_FILE: &str = "memory.jsonl";

/// Resolve the backing-file path from an explicit argument, or fall back to
/// `memory.jsonl` in the working directory. Relative paths resolve against
/// the current working directory.
pub fn resolve_memory_path(custom: Option<&str>) -> PathBuf {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    match custom {
        Some(raw) => {
            let path = Path::new(raw);
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                cwd.join(path)
            }
        }
        None => cwd.join(DEFAULT_MEMORY_FILE),
    }
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Record<'a> {
    Entity(&'a Entity),
    Relation(&'a Relation),
}

/// Line-oriented store over a single memory file.
#[derive(Debug, Clone)]
pub struct JsonlStore {
    path: PathBuf,
}

impl JsonlStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the whole graph. A missing file yields an empty graph; a line
    /// that is not valid JSON aborts the load. Lines with an unrecognized
    /// `type` tag are skipped.
    pub async fn load(&self) -> Result<KnowledgeGraph> {
        let data = match fs::read_to_string(&self.path).await {
            Ok(data) => data,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Ok(KnowledgeGraph::default());
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read {}", self.path.display()));
            }
        };

        let mut graph = KnowledgeGraph::default();
        for (idx, line) in data.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let value: Value = serde_json::from_str(line).with_context(|| {
                format!("malformed record on line {} of {}", idx + 1, self.path.display())
            })?;
            match value.get("type").and_then(Value::as_str) {
                Some("entity") => {
                    let entity: Entity = serde_json::from_value(value).with_context(|| {
                        format!("invalid entity record on line {}", idx + 1)
                    })?;
                    graph.entities.push(entity);
                }
                Some("relation") => {
                    let relation: Relation =
                        serde_json::from_value(value).with_context(|| {
                            format!("invalid relation record on line {}", idx + 1)
                        })?;
                    graph.relations.push(relation);
                }
                // Unknown record kinds are skipped, not errors.
                _ => {}
            }
        }
        Ok(graph)
    }

    /// Overwrite the file with the full graph, entities first. The write is
    /// in place (no temp-file rename), and concurrent writers from other
    /// processes are last-writer-wins over the whole file.
    pub async fn save(&self, graph: &KnowledgeGraph) -> Result<()> {
        let mut lines = Vec::with_capacity(graph.entities.len() + graph.relations.len());
        for entity in &graph.entities {
            lines.push(serde_json::to_string(&Record::Entity(entity))?);
        }
        for relation in &graph.relations {
            lines.push(serde_json::to_string(&Record::Relation(relation))?);
        }
        fs::write(&self.path, lines.join("\n"))
            .await
            .with_context(|| format!("failed to write {}", self.path.display()))
    }
}
