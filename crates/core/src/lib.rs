pub mod artifacts;
pub mod builder;
pub mod corpus;
pub mod embeddings;
pub mod error;
pub mod lexical;
pub mod models;
pub mod normalizer;
pub mod router;
pub mod similarity;
pub mod stores;
pub mod traits;

pub use artifacts::{
    load_embeddings, load_mapping, save_embeddings, save_mapping, ArtifactPaths, EmbeddingTable,
    MappingTable, EMBEDDINGS_FILE, MAPPING_FILE,
};
pub use builder::{BuildOutput, BuildReport, IndexBuilder, SkippedDocument, UpsertStatus};
pub use corpus::{corpus_digest, discover_post_files, read_corpus, CorpusItem, CorpusReport, SkippedFile};
pub use embeddings::{
    embed_checked, Embedder, GeminiConfig, GeminiEmbedder, HashingEmbedder, OpenAiConfig,
    OpenAiEmbedder, DEFAULT_EMBEDDING_DIMENSIONS, DEFAULT_TIMEOUT,
};
pub use error::{ArtifactError, EmbedError, IndexError, SearchError};
pub use lexical::{lexical_results, tokenize};
pub use models::{
    BuildOptions, Document, EmbeddingRecord, Neighbor, ProviderTag, QueryResult, RelatedResponse,
    RelatedStatus, SearchQuery, SearchResponse, Tier,
};
pub use normalizer::{SourceFormat, TextNormalizer};
pub use router::{merge_with_backfill, normalize_key, QueryRouter, RetrievalSnapshot};
pub use similarity::{cosine, pairwise_rank, rank_by_query};
pub use stores::{VertexConfig, VertexIndex};
pub use traits::NeighborIndex;
