//! Ranked keyword search over the knowledge graph.
//!
//! Pure functions over a loaded graph: tokenize the query, score every
//! entity against a set of additive match tiers, then pull in every
//! relation touching a matched entity (either endpoint).
//!
//! Ranking tiers, highest to lowest:
//! 1. Exact token match on the entity name
//! 2. Entity name appears as a whole word in the query
//! 3. Token inside the name (more when the name starts with it)
//! 4. Any-token substring match on the name
//! 5. Match on the entity type
//! 6. Match on an observation
//! 7. Whole-query substring fallback
//!
//! Tiers stack: an entity collects every tier it matches, and tier 3
//! scores once per qualifying token.

use std::collections::HashSet;

use crate::graph::{Entity, KnowledgeGraph, Relation};

/// High-confidence score floor. Two or more entities at or above it switch
/// the selection to the short-circuit path.
const HIGH_CONFIDENCE: u32 = 90;
/// Result cap on the short-circuit path.
const HIGH_CONFIDENCE_LIMIT: usize = 5;
/// Minimum score when the query carries a token shorter than three
/// characters; filters the noise such fragments produce in the low tiers.
const SHORT_TOKEN_THRESHOLD: u32 = 20;

/// Search the graph. Empty or blank queries and queries with no matches
/// both return an empty graph, never an error.
pub fn search(graph: &KnowledgeGraph, query: &str) -> KnowledgeGraph {
    if query.trim().is_empty() {
        return KnowledgeGraph::default();
    }

    let query_lower = query.to_lowercase();
    let tokens = tokenize(query_lower.trim());

    let scored: Vec<(u32, &Entity)> = graph
        .entities
        .iter()
        .map(|entity| (score_entity(entity, &tokens, &query_lower), entity))
        .collect();

    let matched = select(scored, &tokens);
    if matched.is_empty() {
        return KnowledgeGraph::default();
    }

    let names: HashSet<&str> = matched.iter().map(|e| e.name.as_str()).collect();
    let relations = connected_relations(&names, &graph.relations);

    KnowledgeGraph {
        entities: matched.into_iter().cloned().collect(),
        relations,
    }
}

/// Split on whitespace and strip every character that is not alphanumeric,
/// underscore, period, or hyphen. Tokens that strip to nothing are dropped.
fn tokenize(normalized: &str) -> Vec<String> {
    normalized
        .split_whitespace()
        .map(|word| {
            word.chars()
                .filter(|c| c.is_alphanumeric() || matches!(c, '_' | '.' | '-'))
                .collect::<String>()
        })
        .filter(|token| !token.is_empty())
        .collect()
}

/// Score one entity against the token set and the raw lowercased query.
/// Tiers are additive, not exclusive.
fn score_entity(entity: &Entity, tokens: &[String], query_lower: &str) -> u32 {
    let name = entity.name.to_lowercase();
    let entity_type = entity.entity_type.to_lowercase();
    let observations: Vec<String> =
        entity.observations.iter().map(|o| o.to_lowercase()).collect();

    let mut score = 0;

    // 1. Exact token match on the name.
    if tokens.iter().any(|t| *t == name) {
        score += 100;
    }

    // 2. The name appears whole-word inside the query. Catches queries
    //    like "Plan modern_widget.dart" where tokenization alone would
    //    not single the name out.
    if query_lower.split_whitespace().any(|word| word == name) {
        score += 90;
    }

    // 3. Tokens of three or more characters found inside the name, with
    //    extra weight when the name starts with the token. Every
    //    qualifying token scores.
    for token in tokens {
        if token.chars().count() >= 3 && name.contains(token.as_str()) {
            score += if name.starts_with(token.as_str()) { 70 } else { 50 };
        }
    }

    // 4. Any-length token substring on the name.
    if tokens.iter().any(|t| name.contains(t.as_str())) {
        score += 40;
    }

    // 5. Token substring on the type.
    if tokens.iter().any(|t| entity_type.contains(t.as_str())) {
        score += 20;
    }

    // 6. Token substring on any observation.
    if tokens
        .iter()
        .any(|t| observations.iter().any(|o| o.contains(t.as_str())))
    {
        score += 10;
    }

    // 7. Whole-query substring fallback, kept for clients that relied on
    //    the pre-tokenizer behavior.
    if name.contains(query_lower)
        || entity_type.contains(query_lower)
        || observations.iter().any(|o| o.contains(query_lower))
    {
        score += 1;
    }

    score
}

/// Pick and order the result entities.
///
/// Two or more entities at `HIGH_CONFIDENCE` short-circuit to the top five
/// of those alone. Otherwise every positive score qualifies, raised to
/// `SHORT_TOKEN_THRESHOLD` when the query carries a token under three
/// characters. Ties keep their original graph order.
fn select<'a>(scored: Vec<(u32, &'a Entity)>, tokens: &[String]) -> Vec<&'a Entity> {
    let mut high: Vec<(u32, &Entity)> = scored
        .iter()
        .filter(|(score, _)| *score >= HIGH_CONFIDENCE)
        .copied()
        .collect();

    if high.len() >= 2 {
        high.sort_by(|a, b| b.0.cmp(&a.0));
        high.truncate(HIGH_CONFIDENCE_LIMIT);
        return high.into_iter().map(|(_, entity)| entity).collect();
    }

    let has_short_tokens = tokens.iter().any(|t| t.chars().count() < 3);
    let threshold = if has_short_tokens { SHORT_TOKEN_THRESHOLD } else { 1 };

    let mut qualifying: Vec<(u32, &Entity)> = scored
        .into_iter()
        .filter(|(score, _)| *score >= threshold)
        .collect();
    qualifying.sort_by(|a, b| b.0.cmp(&a.0));
    qualifying.into_iter().map(|(_, entity)| entity).collect()
}

/// Every relation where either endpoint is in `names`. Broader than the
/// both-endpoint filter `open_nodes` uses.
pub fn connected_relations(names: &HashSet<&str>, relations: &[Relation]) -> Vec<Relation> {
    relations
        .iter()
        .filter(|r| names.contains(r.from.as_str()) || names.contains(r.to.as_str()))
        .cloned()
        .collect()
}
