//! Deterministic round-robin merge across per-model result lists.

use crate::search::types::MultiSearchResult;
use std::collections::HashSet;

/// Interleave per-model result lists by rank depth, preserving model submission order,
/// deduplicating on document id. The first model to surface a document keeps it.
///
/// With a single list the merge degenerates to a prefix of that list. The walk is part of
/// the endpoint contract: given the same per-model lists the output is reproducible.
pub fn round_robin_merge(
    per_model: &[(i64, Vec<MultiSearchResult>)],
    per_model_limit: usize,
    overall_limit: usize,
) -> Vec<MultiSearchResult> {
    if per_model.is_empty() {
        return Vec::new();
    }
    if per_model.len() == 1 {
        return per_model[0]
            .1
            .iter()
            .take(per_model_limit)
            .cloned()
            .collect();
    }

    let max_depth = per_model
        .iter()
        .map(|(_, results)| results.len())
        .max()
        .unwrap_or(0);

    let mut seen: HashSet<&str> = HashSet::new();
    let mut merged = Vec::new();
    'outer: for depth in 0..max_depth {
        for (_, results) in per_model {
            if merged.len() >= overall_limit {
                break 'outer;
            }
            let Some(item) = results.get(depth) else {
                continue;
            };
            if seen.insert(item.id.as_str()) {
                merged.push(item.clone());
            }
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn hit(model_id: i64, id: &str, score: f64) -> MultiSearchResult {
        MultiSearchResult {
            id: id.into(),
            distance: Some(1.0 - score),
            score: Some(score),
            document: Some(format!("سند {id}")),
            metadata: Map::new(),
            model_id,
            provider: "openai".into(),
            model: format!("model-{model_id}"),
            color: "#3B82F6".into(),
        }
    }

    #[test]
    fn duplicates_keep_the_earliest_models_slot() {
        let per_model = vec![
            (
                1,
                vec![hit(1, "doc1", 0.95), hit(1, "doc2", 0.90), hit(1, "doc3", 0.85)],
            ),
            (
                2,
                vec![hit(2, "doc2", 0.92), hit(2, "doc4", 0.88), hit(2, "doc5", 0.82)],
            ),
        ];

        let merged = round_robin_merge(&per_model, 10, 10);
        let ids: Vec<&str> = merged.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["doc1", "doc2", "doc3", "doc4", "doc5"]);
        // doc2 came from model 1, the earlier submission.
        assert_eq!(merged[1].model_id, 1);
        assert_eq!(ids.iter().filter(|id| **id == "doc2").count(), 1);
    }

    #[test]
    fn shared_document_lands_in_earliest_submitted_models_slot() {
        let per_model = vec![
            (3, vec![hit(3, "doc-42", 0.9)]),
            (1, vec![hit(1, "doc-42", 0.95)]),
            (2, vec![hit(2, "doc-42", 0.99)]),
        ];
        let merged = round_robin_merge(&per_model, 7, 20);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].model_id, 3);
    }

    #[test]
    fn single_model_takes_a_prefix() {
        let per_model = vec![(1, vec![hit(1, "a", 0.9), hit(1, "b", 0.8), hit(1, "c", 0.7)])];
        let merged = round_robin_merge(&per_model, 2, 20);
        assert_eq!(merged.len(), 2);
        assert!(merged.iter().all(|r| r.model_id == 1));
    }

    #[test]
    fn overall_limit_stops_the_walk() {
        let per_model = vec![
            (1, (0..10).map(|i| hit(1, &format!("a{i}"), 0.9)).collect()),
            (2, (0..10).map(|i| hit(2, &format!("b{i}"), 0.9)).collect()),
        ];
        let merged = round_robin_merge(&per_model, 10, 5);
        assert_eq!(merged.len(), 5);
        assert_eq!(merged[0].id, "a0");
        assert_eq!(merged[1].id, "b0");
        assert_eq!(merged[4].id, "a2");
    }

    #[test]
    fn output_never_repeats_a_document_id() {
        let per_model = vec![
            (1, vec![hit(1, "x", 0.9), hit(1, "y", 0.8)]),
            (2, vec![hit(2, "y", 0.9), hit(2, "x", 0.8)]),
            (3, vec![hit(3, "x", 0.9), hit(3, "z", 0.8)]),
        ];
        let merged = round_robin_merge(&per_model, 10, 20);
        let mut ids: Vec<&str> = merged.iter().map(|r| r.id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), merged.len());
    }
}
