//! Chemic - typed client for the ChemicAI molecule-generation backend
//!
//! This crate provides:
//! - A request client for the generation, auth, and history REST endpoints
//! - Normalization of the backend's drifting response field names
//! - A total parser for the semi-structured feasibility-analysis text
//! - Session/token lifecycle and best-effort PubChem enrichment

pub mod analysis;
pub mod client;
pub mod lookup;
pub mod normalize;
pub mod session;

pub use analysis::{AnalysisPayload, ParsedAnalysis};
pub use client::{Algorithm, ChemClient, ChemError, GenerationRequest, Property};
pub use normalize::{GenerationResult, HistoryEntry};

/// Configuration for the chemic client
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ChemConfig {
    /// Base URL of the backend API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Directory holding the persisted session token
    #[serde(default = "default_token_dir")]
    pub token_dir: String,

    /// Whether the caller runs in a secure context (enables the
    /// mixed-content diagnostic on plain-HTTP targets)
    #[serde(default)]
    pub secure_context: bool,
}

fn default_base_url() -> String { "https://backend-chem.vercel.app".to_string() }
fn default_timeout_secs() -> u64 { 60 }
fn default_token_dir() -> String { ".".to_string() }

impl Default for ChemConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            token_dir: default_token_dir(),
            secure_context: false,
        }
    }
}
