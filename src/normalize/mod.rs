//! Normalization of the backend's drifting response shapes
//!
//! The history and generation endpoints have renamed fields across
//! deployments (`generation_id` vs `id` vs `meta.generation_id`, and so
//! on). Every canonical field is resolved through one ordered table of
//! candidate paths instead of scattered inline fallbacks.

use crate::analysis::AnalysisPayload;
use crate::client::GenerationRequest;
use chrono::{DateTime, Local};
use serde_json::Value;
use std::fmt;
use tracing::warn;

/// Candidates are tried in order; the first present, non-null value wins.
/// Dots descend into nested objects.
const GENERATION_ID_PATHS: &[&str] = &["generation_id", "id", "meta.generation_id"];
const PROPERTY_PATHS: &[&str] = &["property", "property_to_optimize", "meta.property"];
const TIMESTAMP_PATHS: &[&str] = &["timestamp", "created_at", "time"];
const SMILES_PATHS: &[&str] = &["smiles", "smi_string", "meta.ori_smiles"];
const ALGORITHM_PATHS: &[&str] = &["algorithm", "meta.algorithm"];
const NUM_MOLECULES_PATHS: &[&str] = &["num_molecules"];
const SIMILARITY_PATHS: &[&str] = &["similarity", "min_similarity"];
const PARTICLES_PATHS: &[&str] = &["particles"];
const ITERATIONS_PATHS: &[&str] = &["iterations"];
const PUBCHEM_NAME_PATHS: &[&str] = &["pubchem_name"];

// Generation responses carry their own aliases: the deployed backend emits
// `meta.ori_smiles` / `meta.optimized_prop`, the reference service emits
// `meta.original_smiles` / `meta.optimized_property`.
const RESULT_SMILES_PATHS: &[&str] =
    &["meta.ori_smiles", "meta.original_smiles", "smi_string", "smiles"];
const RESULT_PROPERTY_PATHS: &[&str] = &[
    "meta.optimized_prop",
    "meta.optimized_property",
    "property_to_optimize",
    "property",
];
const RESULT_ALGORITHM_PATHS: &[&str] = &["meta.algorithm", "algorithm"];
const CANDIDATES_PATHS: &[&str] =
    &["generated_molecules", "result.generated_molecules", "molecules"];
const ANALYSIS_PATHS: &[&str] = &["analysis_result", "result.analysis_result", "analysis"];

/// At most this many candidates are kept for display.
pub const CANDIDATE_DISPLAY_CAP: usize = 10;

/// Resolves the first defined, non-null value among the candidate paths.
pub fn resolve<'a>(value: &'a Value, paths: &[&str]) -> Option<&'a Value> {
    for path in paths {
        let mut cursor = value;
        let mut found = true;
        for key in path.split('.') {
            match cursor.get(key) {
                Some(next) => cursor = next,
                None => {
                    found = false;
                    break;
                }
            }
        }
        if found && !cursor.is_null() {
            return Some(cursor);
        }
    }
    None
}

fn resolve_string(value: &Value, paths: &[&str]) -> Option<String> {
    resolve(value, paths).map(value_to_string)
}

fn resolve_u32(value: &Value, paths: &[&str]) -> Option<u32> {
    resolve(value, paths).and_then(numeric_u32)
}

fn resolve_f64(value: &Value, paths: &[&str]) -> Option<f64> {
    resolve(value, paths).and_then(numeric_f64)
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// The source form keeps numeric parameters as strings; accept both.
fn numeric_u32(value: &Value) -> Option<u32> {
    value
        .as_u64()
        .map(|n| n as u32)
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

fn numeric_f64(value: &Value) -> Option<f64> {
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

/// A past generation, reshaped from whatever the list endpoint returned.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    /// Required for detail lookup; entries without one are inert.
    pub generation_id: Option<String>,
    pub smiles: Option<String>,
    pub pubchem_name: Option<String>,
    pub algorithm: Option<String>,
    pub property: Option<String>,
    pub num_molecules: Option<u32>,
    pub similarity: Option<f64>,
    pub particles: Option<u32>,
    pub iterations: Option<u32>,
    pub timestamp: Option<String>,
}

impl HistoryEntry {
    pub fn from_value(value: &Value) -> Self {
        Self {
            generation_id: resolve_string(value, GENERATION_ID_PATHS),
            smiles: resolve_string(value, SMILES_PATHS),
            pubchem_name: resolve_string(value, PUBCHEM_NAME_PATHS),
            algorithm: resolve_string(value, ALGORITHM_PATHS),
            property: resolve_string(value, PROPERTY_PATHS),
            num_molecules: resolve_u32(value, NUM_MOLECULES_PATHS),
            similarity: resolve_f64(value, SIMILARITY_PATHS),
            particles: resolve_u32(value, PARTICLES_PATHS),
            iterations: resolve_u32(value, ITERATIONS_PATHS),
            timestamp: resolve_string(value, TIMESTAMP_PATHS),
        }
    }

    /// The entry the caller appends locally right after a successful
    /// generation, ahead of the next full history refetch.
    pub fn from_submission(
        request: &GenerationRequest,
        result: &GenerationResult,
        timestamp: String,
    ) -> Self {
        Self {
            generation_id: result.generation_id.clone(),
            smiles: Some(request.smiles.clone()),
            pubchem_name: None,
            algorithm: Some(request.algorithm.to_string()),
            property: Some(request.property.to_string()),
            num_molecules: Some(request.num_molecules),
            similarity: Some(request.similarity),
            particles: Some(request.particles),
            iterations: Some(request.iterations),
            timestamp: Some(timestamp),
        }
    }

    /// Entries without a resolvable id cannot be opened for detail.
    pub fn selectable(&self) -> bool {
        self.generation_id.is_some()
    }
}

/// Reshapes a raw history listing. Order is preserved as received and no
/// deduplication happens here; the display layer keys by generation id.
pub fn normalize_history(raw: &Value) -> Vec<HistoryEntry> {
    raw.as_array()
        .map(|items| items.iter().map(HistoryEntry::from_value).collect())
        .unwrap_or_default()
}

/// Resolves a chosen listing position to an entry that can actually be
/// opened. Choosing an entry with no generation id is logged and dropped.
pub fn select_entry(entries: &[HistoryEntry], index: usize) -> Option<&HistoryEntry> {
    let entry = entries.get(index)?;
    if entry.selectable() {
        Some(entry)
    } else {
        warn!(index, "history entry has no generation id; selection dropped");
        None
    }
}

/// A candidate score: the backend sends numbers, older deployments sent
/// preformatted strings.
#[derive(Debug, Clone, PartialEq)]
pub enum Score {
    Number(f64),
    Text(String),
}

impl Score {
    fn from_value(value: &Value) -> Self {
        match value.as_f64() {
            Some(n) => Score::Number(n),
            None => Score::Text(value_to_string(value)),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Score::Number(n) => Some(*n),
            Score::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Score::Number(n) => write!(f, "{n:.4}"),
            Score::Text(s) => f.write_str(s),
        }
    }
}

/// One proposed molecule.
#[derive(Debug, Clone, PartialEq)]
pub struct MoleculeCandidate {
    pub smiles: String,
    pub score: Option<Score>,
}

/// The normalized view of a generation response.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationResult {
    pub status: String,
    pub generation_id: Option<String>,
    pub original_smiles: Option<String>,
    pub optimized_property: Option<String>,
    pub algorithm: Option<String>,
    /// Capped to [`CANDIDATE_DISPLAY_CAP`], in response order.
    pub candidates: Vec<MoleculeCandidate>,
    pub analysis: Option<AnalysisPayload>,
    /// Client-assigned capture time; server timestamps are not trusted
    /// for this field.
    pub captured_at: DateTime<Local>,
}

impl GenerationResult {
    pub fn from_response(value: &Value, captured_at: DateTime<Local>) -> Self {
        let candidates = resolve(value, CANDIDATES_PATHS)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .take(CANDIDATE_DISPLAY_CAP)
                    .map(|m| MoleculeCandidate {
                        smiles: resolve_string(m, &["sample", "smiles"]).unwrap_or_default(),
                        score: m.get("score").filter(|s| !s.is_null()).map(Score::from_value),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            status: value
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            generation_id: resolve_string(value, GENERATION_ID_PATHS),
            original_smiles: resolve_string(value, RESULT_SMILES_PATHS),
            optimized_property: resolve_string(value, RESULT_PROPERTY_PATHS),
            algorithm: resolve_string(value, RESULT_ALGORITHM_PATHS),
            candidates,
            analysis: resolve(value, ANALYSIS_PATHS).and_then(AnalysisPayload::from_value),
            captured_at,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == "success"
    }
}

/// Request parameters echoed back by the detail endpoint, used to restore
/// the input form when a history entry is reopened. Every field is
/// optional; absent ones leave the form untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EchoedParameters {
    pub smiles: Option<String>,
    pub num_molecules: Option<u32>,
    pub algorithm: Option<String>,
    pub property: Option<String>,
    pub minimize: Option<bool>,
    pub similarity: Option<f64>,
    pub particles: Option<u32>,
    pub iterations: Option<u32>,
}

impl EchoedParameters {
    pub fn from_value(value: &Value) -> Self {
        Self {
            smiles: resolve_string(value, &["smi_string", "meta.ori_smiles"]),
            num_molecules: resolve_u32(value, NUM_MOLECULES_PATHS),
            algorithm: resolve_string(value, ALGORITHM_PATHS),
            property: resolve_string(value, &["property_to_optimize"]),
            minimize: resolve(value, &["minimize"]).and_then(Value::as_bool),
            similarity: resolve_f64(value, &["min_similarity"]),
            particles: resolve_u32(value, PARTICLES_PATHS),
            iterations: resolve_u32(value, ITERATIONS_PATHS),
        }
    }
}

/// A history detail response: the generation output plus the echoed
/// request parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationDetail {
    pub result: GenerationResult,
    pub echoed: EchoedParameters,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::AnalysisPayload;
    use serde_json::json;

    #[test]
    fn test_field_fallback_resolution() {
        let entry = HistoryEntry::from_value(&json!({
            "id": 7,
            "meta": { "property": "QED" }
        }));
        assert_eq!(entry.generation_id.as_deref(), Some("7"));
        assert_eq!(entry.property.as_deref(), Some("QED"));
        assert!(entry.selectable());
    }

    #[test]
    fn test_first_candidate_path_wins() {
        let entry = HistoryEntry::from_value(&json!({
            "generation_id": 1,
            "id": 2,
            "meta": { "generation_id": 3 }
        }));
        assert_eq!(entry.generation_id.as_deref(), Some("1"));
    }

    #[test]
    fn test_null_candidates_are_skipped() {
        let entry = HistoryEntry::from_value(&json!({
            "timestamp": null,
            "created_at": "2025-01-01T00:00:00Z"
        }));
        assert_eq!(entry.timestamp.as_deref(), Some("2025-01-01T00:00:00Z"));
    }

    #[test]
    fn test_entry_without_id_is_inert() {
        let entry = HistoryEntry::from_value(&json!({ "smiles": "CCO" }));
        assert!(!entry.selectable());
    }

    #[test]
    fn test_select_entry_drops_inert_choices() {
        let entries = normalize_history(&json!([
            { "id": 7 },
            { "smiles": "CCO" }
        ]));
        assert_eq!(
            select_entry(&entries, 0).and_then(|e| e.generation_id.as_deref()),
            Some("7")
        );
        assert_eq!(select_entry(&entries, 1), None);
        assert_eq!(select_entry(&entries, 5), None);
    }

    #[test]
    fn test_numeric_parameters_accept_strings() {
        let entry = HistoryEntry::from_value(&json!({
            "id": 1,
            "num_molecules": "25",
            "min_similarity": "0.3",
            "particles": 30
        }));
        assert_eq!(entry.num_molecules, Some(25));
        assert_eq!(entry.similarity, Some(0.3));
        assert_eq!(entry.particles, Some(30));
    }

    #[test]
    fn test_history_order_preserved_without_dedup() {
        let entries = normalize_history(&json!([
            { "id": 2 },
            { "id": 1 },
            { "id": 2 }
        ]));
        let ids: Vec<_> = entries.iter().filter_map(|e| e.generation_id.clone()).collect();
        assert_eq!(ids, vec!["2", "1", "2"]);
    }

    #[test]
    fn test_result_candidates_capped_to_ten() {
        let molecules: Vec<_> = (0..14)
            .map(|i| json!({ "sample": format!("C{i}"), "score": 0.5 }))
            .collect();
        let result =
            GenerationResult::from_response(&json!({ "generated_molecules": molecules }), Local::now());
        assert_eq!(result.candidates.len(), CANDIDATE_DISPLAY_CAP);
        assert_eq!(result.candidates[0].smiles, "C0");
    }

    #[test]
    fn test_result_reads_nested_and_aliased_fields() {
        let result = GenerationResult::from_response(
            &json!({
                "status": "success",
                "result": { "generated_molecules": [{ "smiles": "CCO", "score": "0.8" }] },
                "meta": { "original_smiles": "CC", "optimized_property": "plogP" }
            }),
            Local::now(),
        );
        assert!(result.succeeded());
        assert_eq!(result.original_smiles.as_deref(), Some("CC"));
        assert_eq!(result.optimized_property.as_deref(), Some("plogP"));
        assert_eq!(result.candidates[0].smiles, "CCO");
        assert_eq!(result.candidates[0].score.as_ref().and_then(Score::as_f64), Some(0.8));
    }

    #[test]
    fn test_result_analysis_payload_resolution() {
        let result = GenerationResult::from_response(
            &json!({ "analysis_result": "1. Scientific\nName: Ethanol" }),
            Local::now(),
        );
        assert_eq!(
            result.analysis,
            Some(AnalysisPayload::Text("1. Scientific\nName: Ethanol".to_string()))
        );
    }

    #[test]
    fn test_score_display() {
        assert_eq!(Score::Number(0.905).to_string(), "0.9050");
        assert_eq!(Score::Text("n/a".to_string()).to_string(), "n/a");
    }

    #[test]
    fn test_echoed_parameters_restore_form() {
        let echoed = EchoedParameters::from_value(&json!({
            "smi_string": "CCO",
            "num_molecules": 25,
            "minimize": false,
            "min_similarity": 0.3,
            "meta": { "algorithm": "CMA-ES" }
        }));
        assert_eq!(echoed.smiles.as_deref(), Some("CCO"));
        assert_eq!(echoed.algorithm.as_deref(), Some("CMA-ES"));
        assert_eq!(echoed.minimize, Some(false));
        assert_eq!(echoed.iterations, None);
    }
}
