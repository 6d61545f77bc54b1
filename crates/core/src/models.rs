use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_TOP_K: usize = 5;
pub const MAX_TOP_K: usize = 10;
pub const DEFAULT_RELATED_LIMIT: usize = 4;
pub const MAX_RELATED_LIMIT: usize = 4;

/// Display metadata for one corpus entry. `id` is the dedup key everywhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub url: String,
    pub excerpt: String,
}

impl Document {
    /// Stand-in for an id that the mapping table does not know about.
    pub fn placeholder(id: &str) -> Self {
        Self {
            id: id.to_string(),
            title: id.to_string(),
            url: format!("/blog/{id}"),
            excerpt: String::new(),
        }
    }
}

/// One document's vector with its precomputed Euclidean norm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub norm: f32,
}

impl EmbeddingRecord {
    pub fn new(id: impl Into<String>, vector: Vec<f32>) -> Self {
        let norm = crate::similarity::l2_norm(&vector);
        Self {
            id: id.into(),
            vector,
            norm,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub id: String,
    pub title: String,
    pub url: String,
    pub excerpt: String,
    pub score: f64,
}

impl QueryResult {
    pub fn from_document(document: &Document, score: f64) -> Self {
        Self {
            id: document.id.clone(),
            title: document.title.clone(),
            url: document.url.clone(),
            excerpt: document.excerpt.clone(),
            score,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Tier {
    Managed,
    LocalBruteForce,
    Lexical,
}

impl Tier {
    pub fn label(self) -> &'static str {
        match self {
            Tier::Managed => "managed",
            Tier::LocalBruteForce => "local",
            Tier::Lexical => "lexical",
        }
    }
}

/// Which tier(s) actually contributed to a response.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ProviderTag {
    #[serde(rename = "managed")]
    Managed,
    #[serde(rename = "local")]
    Local,
    #[serde(rename = "lexical")]
    Lexical,
    #[serde(rename = "managed+lexical")]
    ManagedLexical,
    #[serde(rename = "local+lexical")]
    LocalLexical,
}

impl ProviderTag {
    pub fn for_primary(primary: Tier, backfilled: bool) -> Self {
        match (primary, backfilled) {
            (Tier::Managed, false) => ProviderTag::Managed,
            (Tier::Managed, true) => ProviderTag::ManagedLexical,
            (Tier::LocalBruteForce, false) => ProviderTag::Local,
            (Tier::LocalBruteForce, true) => ProviderTag::LocalLexical,
            (Tier::Lexical, _) => ProviderTag::Lexical,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderTag::Managed => "managed",
            ProviderTag::Local => "local",
            ProviderTag::Lexical => "lexical",
            ProviderTag::ManagedLexical => "managed+lexical",
            ProviderTag::LocalLexical => "local+lexical",
        }
    }
}

impl fmt::Display for ProviderTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct SearchQuery {
    pub text: String,
    #[serde(default)]
    pub top_k: Option<usize>,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>, top_k: Option<usize>) -> Self {
        Self {
            text: text.into(),
            top_k,
        }
    }

    /// `top_k` clamped to `1..=MAX_TOP_K`, defaulting when absent.
    pub fn clamped_top_k(&self) -> usize {
        self.top_k.unwrap_or(DEFAULT_TOP_K).clamp(1, MAX_TOP_K)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub results: Vec<QueryResult>,
    pub provider_tag: ProviderTag,
    pub took_ms: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RelatedStatus {
    Indexed,
    NotIndexed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelatedResponse {
    pub status: RelatedStatus,
    pub results: Vec<QueryResult>,
}

impl RelatedResponse {
    pub fn not_indexed() -> Self {
        Self {
            status: RelatedStatus::NotIndexed,
            results: Vec::new(),
        }
    }
}

/// A single hit from the managed nearest-neighbor service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    pub datapoint_id: String,
    pub distance: f64,
}

#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub embedding_dim: usize,
    pub lexical_only: bool,
    pub max_text_chars: usize,
    pub max_excerpt_chars: usize,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            embedding_dim: 768,
            lexical_only: false,
            max_text_chars: 16_000,
            max_excerpt_chars: 240,
        }
    }
}
