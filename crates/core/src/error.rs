use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("embedding provider {provider} returned {status}: {body}")]
    Status {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("malformed embedding response: {0}")]
    Malformed(String),

    #[error("embedding dimension mismatch: got {got}, expected {expected}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("invalid embedding request: {0}")]
    InvalidInput(String),
}

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed artifact {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("duplicate document id in artifact: {0}")]
    DuplicateId(String),

    #[error("record {id} has {got} dimensions, table declares {expected}")]
    DimensionMismatch {
        id: String,
        expected: usize,
        got: usize,
    },

    #[error("record {0} contains a non-finite component")]
    NonFinite(String),
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corpus walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("embedding dimension mismatch for {id}: got {got}, expected {expected}")]
    DimensionMismatch {
        id: String,
        expected: usize,
        got: usize,
    },

    #[error("corpus produced no indexable documents: {0}")]
    EmptyCorpus(String),

    #[error("artifact error: {0}")]
    Artifact(#[from] ArtifactError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("query is empty")]
    EmptyQuery,

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbedError),

    #[error("query embedding unavailable: {0}")]
    QueryEmbeddingFailed(String),

    #[error("tier not configured: {0}")]
    NotConfigured(String),

    #[error("search was cancelled")]
    Cancelled,
}
