use crate::{EmbeddingRecord, Neighbor, SearchError};
use async_trait::async_trait;

/// A managed nearest-neighbor service. Its ranking algorithm is opaque to this crate.
#[async_trait]
pub trait NeighborIndex: Send + Sync {
    async fn find_neighbors(&self, vector: &[f32], k: usize) -> Result<Vec<Neighbor>, SearchError>;

    async fn upsert_datapoints(&self, records: &[EmbeddingRecord]) -> Result<(), SearchError>;
}
