//! Graph operations over the JSONL store.
//!
//! Every operation is a full `load -> transform -> save` round trip; the
//! store keeps nothing in memory between calls. A single mutex serializes
//! all operations (reads included) so an overlapping caller cannot
//! interleave with an in-flight write and lose its update. Writers in
//! other processes are not covered by the lock; there, the last save wins.

use std::collections::HashSet;

use anyhow::{Result, bail};
use chrono::{SecondsFormat, Utc};
use tokio::sync::Mutex;

use crate::graph::{
    Entity, EntityUpdate, KnowledgeGraph, ObservationDeletion, ObservationInput,
    ObservationResult, Relation, RelationRef,
};
use crate::search;
use crate::store::JsonlStore;

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub struct KnowledgeGraphManager {
    store: JsonlStore,
    lock: Mutex<()>,
}

impl KnowledgeGraphManager {
    pub fn new(store: JsonlStore) -> Self {
        Self {
            store,
            lock: Mutex::new(()),
        }
    }

    /// Append entities whose names are not yet taken. Duplicates (against
    /// the graph or earlier in the batch) are dropped, not errors. Returns
    /// only what was added, stamped with `created_at` and version 1 unless
    /// the input carried a version already.
    pub async fn create_entities(&self, entities: Vec<Entity>) -> Result<Vec<Entity>> {
        let _guard = self.lock.lock().await;
        let mut graph = self.store.load().await?;
        let now = timestamp();

        let mut added = Vec::new();
        for mut entity in entities {
            if graph.entities.iter().any(|e| e.name == entity.name) {
                continue;
            }
            entity.created_at = now.clone();
            if entity.version == 0 {
                entity.version = 1;
            }
            graph.entities.push(entity.clone());
            added.push(entity);
        }

        self.store.save(&graph).await?;
        Ok(added)
    }

    /// Append relations whose `(from, to, relationType)` triple is not yet
    /// taken. Endpoints are not required to exist. Same duplicate and
    /// stamping rules as `create_entities`.
    pub async fn create_relations(&self, relations: Vec<Relation>) -> Result<Vec<Relation>> {
        let _guard = self.lock.lock().await;
        let mut graph = self.store.load().await?;
        let now = timestamp();

        let mut added = Vec::new();
        for mut relation in relations {
            let key = RelationRef {
                from: relation.from.clone(),
                to: relation.to.clone(),
                relation_type: relation.relation_type.clone(),
            };
            if graph.relations.iter().any(|r| r.same_key(&key)) {
                continue;
            }
            relation.created_at = now.clone();
            if relation.version == 0 {
                relation.version = 1;
            }
            graph.relations.push(relation.clone());
            added.push(relation);
        }

        self.store.save(&graph).await?;
        Ok(added)
    }

    /// Append observation strings to existing entities, skipping strings an
    /// entity already holds. Any unknown entity name fails the whole call
    /// before the file is touched.
    pub async fn add_observations(
        &self,
        inputs: Vec<ObservationInput>,
    ) -> Result<Vec<ObservationResult>> {
        let _guard = self.lock.lock().await;
        let mut graph = self.store.load().await?;

        let mut results = Vec::new();
        for input in inputs {
            let Some(entity) = graph
                .entities
                .iter_mut()
                .find(|e| e.name == input.entity_name)
            else {
                bail!("Entity with name {} not found", input.entity_name);
            };
            let mut added = Vec::new();
            for content in input.contents {
                if !entity.observations.contains(&content) {
                    entity.observations.push(content.clone());
                    added.push(content);
                }
            }
            results.push(ObservationResult {
                entity_name: input.entity_name,
                added_observations: added,
            });
        }

        self.store.save(&graph).await?;
        Ok(results)
    }

    /// Remove the named entities and cascade to every relation touching a
    /// removed name. Unknown names are no-ops; the file is rewritten either
    /// way.
    pub async fn delete_entities(&self, names: Vec<String>) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut graph = self.store.load().await?;

        let doomed: HashSet<&str> = names.iter().map(String::as_str).collect();
        graph.entities.retain(|e| !doomed.contains(e.name.as_str()));
        graph
            .relations
            .retain(|r| !doomed.contains(r.from.as_str()) && !doomed.contains(r.to.as_str()));

        self.store.save(&graph).await
    }

    /// Remove the listed observation strings (exact match) from each named
    /// entity. Entities that do not exist are skipped silently.
    pub async fn delete_observations(&self, deletions: Vec<ObservationDeletion>) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut graph = self.store.load().await?;

        for deletion in deletions {
            if let Some(entity) = graph
                .entities
                .iter_mut()
                .find(|e| e.name == deletion.entity_name)
            {
                entity
                    .observations
                    .retain(|o| !deletion.observations.contains(o));
            }
        }

        self.store.save(&graph).await
    }

    /// Remove relations matching any of the given triples. Non-matches are
    /// no-ops.
    pub async fn delete_relations(&self, relations: Vec<RelationRef>) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut graph = self.store.load().await?;

        graph
            .relations
            .retain(|r| !relations.iter().any(|key| r.same_key(key)));

        self.store.save(&graph).await
    }

    pub async fn read_graph(&self) -> Result<KnowledgeGraph> {
        let _guard = self.lock.lock().await;
        self.store.load().await
    }

    /// Ranked keyword search; see the `search` module for the tiers.
    pub async fn search_nodes(&self, query: &str) -> Result<KnowledgeGraph> {
        let _guard = self.lock.lock().await;
        let graph = self.store.load().await?;
        Ok(search::search(&graph, query))
    }

    /// The requested entities plus relations whose endpoints are BOTH in
    /// the requested set. Narrower than search's either-endpoint closure.
    pub async fn open_nodes(&self, names: Vec<String>) -> Result<KnowledgeGraph> {
        let _guard = self.lock.lock().await;
        let graph = self.store.load().await?;

        let entities: Vec<Entity> = graph
            .entities
            .iter()
            .filter(|e| names.contains(&e.name))
            .cloned()
            .collect();
        let selected: HashSet<&str> = entities.iter().map(|e| e.name.as_str()).collect();
        let relations: Vec<Relation> = graph
            .relations
            .iter()
            .filter(|r| selected.contains(r.from.as_str()) && selected.contains(r.to.as_str()))
            .cloned()
            .collect();

        Ok(KnowledgeGraph { entities, relations })
    }

    /// Merge partial updates over existing entities: omitted fields keep
    /// their prior values, `version` is bumped by one, `created_at` reset.
    /// All names are validated before anything is applied, so one unknown
    /// name aborts the whole batch.
    pub async fn update_entities(&self, updates: Vec<EntityUpdate>) -> Result<Vec<Entity>> {
        let _guard = self.lock.lock().await;
        let mut graph = self.store.load().await?;
        let now = timestamp();

        let mut updated = Vec::new();
        for patch in &updates {
            let Some(existing) = graph.entities.iter().find(|e| e.name == patch.name) else {
                bail!("Entity with name {} not found", patch.name);
            };
            let mut entity = existing.clone();
            if let Some(entity_type) = &patch.entity_type {
                entity.entity_type = entity_type.clone();
            }
            if let Some(observations) = &patch.observations {
                entity.observations = observations.clone();
            }
            entity.version = existing.version + 1;
            entity.created_at = now.clone();
            updated.push(entity);
        }

        for entity in &updated {
            if let Some(slot) = graph.entities.iter_mut().find(|e| e.name == entity.name) {
                *slot = entity.clone();
            }
        }

        self.store.save(&graph).await?;
        Ok(updated)
    }

    /// Bump `version` and reset `created_at` on existing relations,
    /// validated the same two-pass way as `update_entities`.
    pub async fn update_relations(&self, updates: Vec<RelationRef>) -> Result<Vec<Relation>> {
        let _guard = self.lock.lock().await;
        let mut graph = self.store.load().await?;
        let now = timestamp();

        let mut updated = Vec::new();
        for key in &updates {
            let Some(existing) = graph.relations.iter().find(|r| r.same_key(key)) else {
                bail!(
                    "Relation {} -> {} ({}) not found",
                    key.from,
                    key.to,
                    key.relation_type
                );
            };
            let mut relation = existing.clone();
            relation.version = existing.version + 1;
            relation.created_at = now.clone();
            updated.push(relation);
        }

        for relation in &updated {
            let key = RelationRef {
                from: relation.from.clone(),
                to: relation.to.clone(),
                relation_type: relation.relation_type.clone(),
            };
            if let Some(slot) = graph.relations.iter_mut().find(|r| r.same_key(&key)) {
                *slot = relation.clone();
            }
        }

        self.store.save(&graph).await?;
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{TempDir, tempdir};

    fn manager() -> (TempDir, KnowledgeGraphManager) {
        let dir = tempdir().unwrap();
        let store = JsonlStore::new(dir.path().join("memory.jsonl"));
        (dir, KnowledgeGraphManager::new(store))
    }

    fn entity(name: &str, entity_type: &str) -> Entity {
        Entity {
            name: name.into(),
            entity_type: entity_type.into(),
            observations: vec![],
            created_at: String::new(),
            version: 0,
        }
    }

    fn relation(from: &str, to: &str, relation_type: &str) -> Relation {
        Relation {
            from: from.into(),
            to: to.into(),
            relation_type: relation_type.into(),
            created_at: String::new(),
            version: 0,
        }
    }

    fn relation_ref(from: &str, to: &str, relation_type: &str) -> RelationRef {
        RelationRef {
            from: from.into(),
            to: to.into(),
            relation_type: relation_type.into(),
        }
    }

    #[tokio::test]
    async fn create_entities_stamps_timestamp_and_version() {
        let (_dir, manager) = manager();

        let added = manager
            .create_entities(vec![entity("A", "Thing")])
            .await
            .unwrap();
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].version, 1);
        assert!(!added[0].created_at.is_empty());
    }

    #[tokio::test]
    async fn create_entities_is_idempotent_on_names() {
        let (_dir, manager) = manager();

        let first = manager
            .create_entities(vec![entity("A", "Thing")])
            .await
            .unwrap();
        assert_eq!(first.len(), 1);

        let second = manager
            .create_entities(vec![entity("A", "Other")])
            .await
            .unwrap();
        assert!(second.is_empty());

        let graph = manager.read_graph().await.unwrap();
        assert_eq!(graph.entities.len(), 1);
        assert_eq!(graph.entities[0].entity_type, "Thing");
    }

    #[tokio::test]
    async fn create_entities_drops_duplicates_within_a_batch() {
        let (_dir, manager) = manager();

        let added = manager
            .create_entities(vec![entity("A", "Thing"), entity("A", "Other")])
            .await
            .unwrap();
        assert_eq!(added.len(), 1);
        assert_eq!(manager.read_graph().await.unwrap().entities.len(), 1);
    }

    #[tokio::test]
    async fn create_relations_keys_on_the_full_triple() {
        let (_dir, manager) = manager();

        let added = manager
            .create_relations(vec![
                relation("A", "B", "uses"),
                relation("A", "B", "uses"),
                relation("A", "B", "owns"),
            ])
            .await
            .unwrap();
        assert_eq!(added.len(), 2);
    }

    #[tokio::test]
    async fn create_relations_allows_dangling_endpoints() {
        let (_dir, manager) = manager();

        let added = manager
            .create_relations(vec![relation("ghost", "phantom", "haunts")])
            .await
            .unwrap();
        assert_eq!(added.len(), 1);
    }

    #[tokio::test]
    async fn add_observations_appends_only_new_content() {
        let (_dir, manager) = manager();
        manager
            .create_entities(vec![Entity {
                observations: vec!["existing".into()],
                ..entity("A", "Thing")
            }])
            .await
            .unwrap();

        let results = manager
            .add_observations(vec![ObservationInput {
                entity_name: "A".into(),
                contents: vec!["existing".into(), "fresh".into()],
            }])
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].added_observations, vec!["fresh".to_string()]);

        let graph = manager.read_graph().await.unwrap();
        assert_eq!(graph.entities[0].observations, vec!["existing", "fresh"]);
    }

    #[tokio::test]
    async fn add_observations_on_missing_entity_persists_nothing() {
        let (_dir, manager) = manager();
        manager
            .create_entities(vec![entity("A", "Thing")])
            .await
            .unwrap();

        let err = manager
            .add_observations(vec![
                ObservationInput {
                    entity_name: "A".into(),
                    contents: vec!["noted".into()],
                },
                ObservationInput {
                    entity_name: "missing".into(),
                    contents: vec!["lost".into()],
                },
            ])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("missing"));

        // The batch failed, so not even A's observation may be persisted.
        let graph = manager.read_graph().await.unwrap();
        assert!(graph.entities[0].observations.is_empty());
    }

    #[tokio::test]
    async fn delete_entities_cascades_to_relations() {
        let (_dir, manager) = manager();
        manager
            .create_entities(vec![entity("A", "Thing"), entity("B", "Thing")])
            .await
            .unwrap();
        manager
            .create_relations(vec![relation("A", "B", "uses")])
            .await
            .unwrap();

        manager.delete_entities(vec!["A".into()]).await.unwrap();

        let graph = manager.read_graph().await.unwrap();
        assert_eq!(graph.entities.len(), 1);
        assert_eq!(graph.entities[0].name, "B");
        assert!(graph.relations.is_empty());
    }

    #[tokio::test]
    async fn delete_entities_of_unknown_names_is_a_noop() {
        let (_dir, manager) = manager();
        manager
            .create_entities(vec![entity("A", "Thing")])
            .await
            .unwrap();

        manager
            .delete_entities(vec!["nobody".into()])
            .await
            .unwrap();
        assert_eq!(manager.read_graph().await.unwrap().entities.len(), 1);
    }

    #[tokio::test]
    async fn delete_observations_skips_missing_entities() {
        let (_dir, manager) = manager();
        manager
            .create_entities(vec![Entity {
                observations: vec!["keep".into(), "drop".into()],
                ..entity("A", "Thing")
            }])
            .await
            .unwrap();

        manager
            .delete_observations(vec![
                ObservationDeletion {
                    entity_name: "A".into(),
                    observations: vec!["drop".into()],
                },
                ObservationDeletion {
                    entity_name: "missing".into(),
                    observations: vec!["whatever".into()],
                },
            ])
            .await
            .unwrap();

        let graph = manager.read_graph().await.unwrap();
        assert_eq!(graph.entities[0].observations, vec!["keep"]);
    }

    #[tokio::test]
    async fn delete_relations_matches_exact_triples() {
        let (_dir, manager) = manager();
        manager
            .create_relations(vec![relation("A", "B", "uses"), relation("A", "B", "owns")])
            .await
            .unwrap();

        manager
            .delete_relations(vec![relation_ref("A", "B", "uses")])
            .await
            .unwrap();

        let graph = manager.read_graph().await.unwrap();
        assert_eq!(graph.relations.len(), 1);
        assert_eq!(graph.relations[0].relation_type, "owns");
    }

    #[tokio::test]
    async fn update_entities_merges_and_bumps_version() {
        let (_dir, manager) = manager();
        manager
            .create_entities(vec![Entity {
                observations: vec!["original".into()],
                ..entity("A", "Thing")
            }])
            .await
            .unwrap();

        let updated = manager
            .update_entities(vec![EntityUpdate {
                name: "A".into(),
                entity_type: Some("Renamed".into()),
                observations: None,
            }])
            .await
            .unwrap();

        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0].entity_type, "Renamed");
        // Unspecified fields keep their prior values.
        assert_eq!(updated[0].observations, vec!["original"]);
        assert_eq!(updated[0].version, 2);

        let graph = manager.read_graph().await.unwrap();
        assert_eq!(graph.entities[0].version, 2);
    }

    #[tokio::test]
    async fn update_entities_fails_whole_batch_on_missing_name() {
        let (_dir, manager) = manager();
        manager
            .create_entities(vec![entity("A", "Thing")])
            .await
            .unwrap();

        let err = manager
            .update_entities(vec![
                EntityUpdate {
                    name: "A".into(),
                    entity_type: Some("Changed".into()),
                    observations: None,
                },
                EntityUpdate {
                    name: "missing".into(),
                    entity_type: None,
                    observations: None,
                },
            ])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("missing"));

        let graph = manager.read_graph().await.unwrap();
        assert_eq!(graph.entities[0].entity_type, "Thing");
        assert_eq!(graph.entities[0].version, 1);
    }

    #[tokio::test]
    async fn update_relations_bumps_version_and_timestamp() {
        let (_dir, manager) = manager();
        manager
            .create_relations(vec![relation("A", "B", "uses")])
            .await
            .unwrap();
        let before = manager.read_graph().await.unwrap().relations[0].clone();

        let updated = manager
            .update_relations(vec![relation_ref("A", "B", "uses")])
            .await
            .unwrap();
        assert_eq!(updated[0].version, before.version + 1);
    }

    #[tokio::test]
    async fn update_relations_fails_on_unknown_triple() {
        let (_dir, manager) = manager();
        manager
            .create_relations(vec![relation("A", "B", "uses")])
            .await
            .unwrap();

        let err = manager
            .update_relations(vec![relation_ref("A", "B", "owns")])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
        assert_eq!(
            manager.read_graph().await.unwrap().relations[0].version,
            1
        );
    }

    #[tokio::test]
    async fn open_nodes_requires_both_endpoints_in_the_set() {
        let (_dir, manager) = manager();
        manager
            .create_entities(vec![
                entity("A", "Thing"),
                entity("B", "Thing"),
                entity("C", "Thing"),
            ])
            .await
            .unwrap();
        manager
            .create_relations(vec![relation("A", "B", "uses")])
            .await
            .unwrap();

        // B is outside the requested set: the A->B relation is excluded.
        let narrow = manager
            .open_nodes(vec!["A".into(), "C".into()])
            .await
            .unwrap();
        assert_eq!(narrow.entities.len(), 2);
        assert!(narrow.relations.is_empty());

        // Search for A alone still surfaces A->B (either-endpoint).
        let searched = manager.search_nodes("A").await.unwrap();
        assert!(searched.relations.iter().any(|r| r.from == "A" && r.to == "B"));

        let both = manager
            .open_nodes(vec!["A".into(), "B".into()])
            .await
            .unwrap();
        assert_eq!(both.relations.len(), 1);
    }

    #[tokio::test]
    async fn read_graph_returns_everything_unfiltered() {
        let (_dir, manager) = manager();
        manager
            .create_entities(vec![entity("A", "Thing"), entity("B", "Thing")])
            .await
            .unwrap();
        manager
            .create_relations(vec![relation("A", "B", "uses")])
            .await
            .unwrap();

        let graph = manager.read_graph().await.unwrap();
        assert_eq!(graph.entities.len(), 2);
        assert_eq!(graph.relations.len(), 1);
    }
}
