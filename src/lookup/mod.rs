//! Best-effort PubChem enrichment: structure image URLs and display names.
//!
//! These calls are cosmetic. Failures never propagate; the cache is simply
//! left alone and the raw SMILES string stays the display name.

use dashmap::DashMap;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tracing::debug;

const PUG_BASE: &str = "https://pubchem.ncbi.nlm.nih.gov/rest/pug";

fn identifier_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)inchi|inchikey|smiles|cas").expect("valid identifier regex"))
}

/// Options for the structure-image endpoint.
#[derive(Debug, Clone, Default)]
pub struct ImageOptions {
    pub image_size: Option<String>,
    pub bgcolor: Option<String>,
}

/// Builds the PubChem PNG URL for a SMILES string, or `None` when the
/// SMILES is empty.
pub fn image_url(smiles: &str, opts: &ImageOptions) -> Option<String> {
    if smiles.is_empty() {
        return None;
    }
    let encoded = urlencoding::encode(smiles);
    let mut url = format!("{PUG_BASE}/compound/smiles/{encoded}/PNG");

    let mut params = Vec::new();
    if let Some(size) = &opts.image_size {
        params.push(format!("image_size={}", urlencoding::encode(size)));
    }
    if let Some(bg) = &opts.bgcolor {
        params.push(format!("bgcolor={}", urlencoding::encode(bg)));
    }
    if !params.is_empty() {
        url.push('?');
        url.push_str(&params.join("&"));
    }
    Some(url)
}

#[derive(Deserialize)]
struct SynonymResponse {
    #[serde(rename = "InformationList")]
    information_list: Option<InformationList>,
}

#[derive(Deserialize)]
struct InformationList {
    #[serde(rename = "Information", default)]
    information: Vec<Information>,
}

#[derive(Deserialize)]
struct Information {
    #[serde(rename = "Synonym", default)]
    synonym: Vec<String>,
}

/// Picks a human-friendly synonym: the first one that is not itself an
/// identifier string, else the first entry.
pub fn pick_synonym(synonyms: &[String]) -> Option<String> {
    synonyms
        .iter()
        .find(|s| !identifier_re().is_match(s))
        .or_else(|| synonyms.first())
        .cloned()
}

/// Cache of display names keyed by SMILES, filled by fire-and-forget
/// lookups and read opportunistically at render time.
pub struct SynonymCache {
    client: Client,
    names: DashMap<String, String>,
}

impl SynonymCache {
    pub fn new() -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("Failed to create HTTP client"),
            names: DashMap::new(),
        }
    }

    /// The cached name, or the SMILES itself when no lookup has landed.
    pub fn display_name(&self, smiles: &str) -> String {
        self.names
            .get(smiles)
            .map(|name| name.clone())
            .unwrap_or_else(|| smiles.to_string())
    }

    pub fn insert(&self, smiles: impl Into<String>, name: impl Into<String>) {
        self.names.insert(smiles.into(), name.into());
    }

    /// Spawns a background lookup and hands back its task handle, or
    /// `None` when the name is already cached (or the SMILES is empty).
    /// The only observable effect is a cache update; errors are logged
    /// and dropped.
    pub fn prefetch(self: &Arc<Self>, smiles: &str) -> Option<JoinHandle<()>> {
        if smiles.is_empty() || self.names.contains_key(smiles) {
            return None;
        }
        let cache = Arc::clone(self);
        let smiles = smiles.to_string();
        Some(tokio::spawn(async move {
            match cache.fetch_name(&smiles).await {
                Some(name) => {
                    cache.names.insert(smiles, name);
                }
                None => debug!(%smiles, "no PubChem synonym found"),
            }
        }))
    }

    /// Prefetches a batch and waits at most `budget` for the lookups to
    /// land. Names that miss the budget keep resolving in the background
    /// and simply fall back to the raw SMILES at read time; the primary
    /// output is never gated on PubChem.
    pub async fn resolve_within(self: &Arc<Self>, smiles: &[String], budget: Duration) {
        let handles: Vec<_> = smiles.iter().filter_map(|s| self.prefetch(s)).collect();
        let deadline = Instant::now() + budget;
        for handle in handles {
            if timeout_at(deadline, handle).await.is_err() {
                debug!("synonym lookups exceeded their budget");
                break;
            }
        }
    }

    async fn fetch_name(&self, smiles: &str) -> Option<String> {
        let url = format!(
            "{PUG_BASE}/compound/smiles/{}/synonyms/JSON",
            urlencoding::encode(smiles)
        );
        let response = self.client.get(&url).send().await.ok()?;
        if !response.status().is_success() {
            return None;
        }
        let parsed: SynonymResponse = response.json().await.ok()?;
        let info = parsed.information_list?.information.into_iter().next()?;
        pick_synonym(&info.synonym)
    }
}

impl Default for SynonymCache {
    fn default() -> Self {
        Self::new()
    }
}
