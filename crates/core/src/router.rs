//! Tiered query routing: managed vector index, then local brute force, then lexical.
//!
//! Each vector tier is a fallback for the one before it and runs at most once per request.
//! The lexical tier never fails. It answers on its own when no vector tier produced results,
//! and otherwise backfills the vector results up to `top_k`.

use crate::artifacts::{self, ArtifactPaths, EmbeddingTable, MappingTable};
use crate::embeddings::{embed_checked, Embedder};
use crate::lexical::lexical_results;
use crate::models::{
    Document, ProviderTag, QueryResult, RelatedResponse, RelatedStatus, SearchQuery,
    SearchResponse, Tier, DEFAULT_RELATED_LIMIT, MAX_RELATED_LIMIT,
};
use crate::similarity::{pairwise_rank, rank_by_query};
use crate::traits::NeighborIndex;
use crate::SearchError;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Read-only view of the artifacts that every request shares.
#[derive(Debug, Default)]
pub struct RetrievalSnapshot {
    documents: Vec<Document>,
    positions: HashMap<String, usize>,
    lookup: HashMap<String, String>,
    embeddings: Option<EmbeddingTable>,
}

impl RetrievalSnapshot {
    pub fn new(mapping: Option<MappingTable>, embeddings: Option<EmbeddingTable>) -> Self {
        let documents = mapping.map(|table| table.documents).unwrap_or_default();
        let positions = documents
            .iter()
            .enumerate()
            .map(|(position, document)| (document.id.clone(), position))
            .collect();

        let mut lookup = HashMap::new();
        for document in &documents {
            lookup
                .entry(normalize_key(&document.id))
                .or_insert_with(|| document.id.clone());
            lookup
                .entry(normalize_key(&document.url))
                .or_insert_with(|| document.id.clone());
        }
        for document in &documents {
            lookup
                .entry(document.title.to_lowercase())
                .or_insert_with(|| document.id.clone());
        }
        if let Some(table) = &embeddings {
            for record in &table.records {
                lookup
                    .entry(normalize_key(&record.id))
                    .or_insert_with(|| record.id.clone());
            }
        }

        Self {
            documents,
            positions,
            lookup,
            embeddings,
        }
    }

    /// Loads whatever artifacts exist under `dir`.
    ///
    /// Missing or malformed artifacts are treated as absent; the affected tiers are simply
    /// skipped at query time.
    pub fn load(dir: &Path) -> Self {
        let paths = ArtifactPaths::in_dir(dir);
        let mapping = artifacts::load_mapping(&paths.mapping).unwrap_or_else(|error| {
            warn!(%error, "ignoring unreadable mapping artifact");
            None
        });
        let embeddings = artifacts::load_embeddings(&paths.embeddings).unwrap_or_else(|error| {
            warn!(%error, "ignoring unreadable embedding artifact");
            None
        });

        info!(
            documents = mapping.as_ref().map_or(0, MappingTable::len),
            embeddings = embeddings.as_ref().map_or(0, EmbeddingTable::len),
            "loaded retrieval snapshot"
        );
        Self::new(mapping, embeddings)
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn embeddings(&self) -> Option<&EmbeddingTable> {
        self.embeddings.as_ref()
    }

    pub fn document(&self, id: &str) -> Option<&Document> {
        self.positions
            .get(id)
            .and_then(|position| self.documents.get(*position))
    }

    /// Metadata for `id`, or a placeholder when the mapping has no entry.
    pub fn hydrate(&self, id: &str, score: f64) -> QueryResult {
        match self.document(id) {
            Some(document) => QueryResult::from_document(document, score),
            None => QueryResult::from_document(&Document::placeholder(id), score),
        }
    }

    /// Resolves an id, path, URL, or title to a document id.
    pub fn resolve(&self, key: &str) -> Option<&str> {
        let normalized = normalize_key(key);
        if normalized.is_empty() {
            return None;
        }
        self.lookup
            .get(&normalized)
            .or_else(|| self.lookup.get(&key.trim().to_lowercase()))
            .map(String::as_str)
    }
}

/// Lowercased slug form of an id, path, or absolute URL.
pub fn normalize_key(value: &str) -> String {
    let mut key = value.trim();
    for scheme in ["https://", "http://"] {
        if let Some(rest) = key.strip_prefix(scheme) {
            key = rest.find('/').map_or("", |slash| &rest[slash..]);
            break;
        }
    }
    let key = key.trim_start_matches('/');
    let key = key.strip_prefix("blog/").unwrap_or(key);
    key.trim_end_matches('/').to_lowercase()
}

/// Keeps the deduplicated `primary` list as the prefix, then tops it up from `lexical`.
///
/// The returned flag is true only when at least one lexical result was added.
pub fn merge_with_backfill(
    primary: Vec<QueryResult>,
    lexical: Vec<QueryResult>,
    top_k: usize,
) -> (Vec<QueryResult>, bool) {
    let mut seen = HashSet::new();
    let mut merged = Vec::with_capacity(top_k);

    for result in primary {
        if merged.len() >= top_k {
            break;
        }
        if seen.insert(result.id.clone()) {
            merged.push(result);
        }
    }

    let mut backfilled = false;
    for result in lexical {
        if merged.len() >= top_k {
            break;
        }
        if seen.insert(result.id.clone()) {
            merged.push(result);
            backfilled = true;
        }
    }

    (merged, backfilled)
}

enum QueryVector {
    Pending,
    Ready(Vec<f32>),
    Unavailable,
    Failed(String),
}

/// The single query embedding shared by both vector tiers of one request.
struct QueryEmbedding<'a> {
    embedder: Option<&'a dyn Embedder>,
    text: &'a str,
    state: QueryVector,
}

impl<'a> QueryEmbedding<'a> {
    fn new(embedder: Option<&'a dyn Embedder>, text: &'a str) -> Self {
        Self {
            embedder,
            text,
            state: QueryVector::Pending,
        }
    }

    async fn vector(&mut self) -> Result<&[f32], SearchError> {
        if let QueryVector::Pending = self.state {
            match self.embedder {
                None => self.state = QueryVector::Unavailable,
                Some(embedder) => match embed_checked(embedder, self.text).await {
                    Ok(vector) => self.state = QueryVector::Ready(vector),
                    Err(error) => {
                        self.state = QueryVector::Failed(error.to_string());
                        return Err(error.into());
                    }
                },
            }
        }

        match &self.state {
            QueryVector::Ready(vector) => Ok(vector.as_slice()),
            QueryVector::Unavailable => Err(SearchError::NotConfigured("embedding provider".to_string())),
            QueryVector::Failed(reason) => Err(SearchError::QueryEmbeddingFailed(reason.clone())),
            QueryVector::Pending => Err(SearchError::QueryEmbeddingFailed(
                "embedding was never requested".to_string(),
            )),
        }
    }
}

/// Stateless per request. Clients are injected once at startup and the artifact snapshot
/// can be swapped while requests are in flight.
pub struct QueryRouter {
    embedder: Option<Arc<dyn Embedder>>,
    managed: Option<Arc<dyn NeighborIndex>>,
    snapshot: RwLock<Arc<RetrievalSnapshot>>,
}

impl QueryRouter {
    pub fn new(snapshot: RetrievalSnapshot) -> Self {
        Self {
            embedder: None,
            managed: None,
            snapshot: RwLock::new(Arc::new(snapshot)),
        }
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_managed_index(mut self, managed: Arc<dyn NeighborIndex>) -> Self {
        self.managed = Some(managed);
        self
    }

    pub fn snapshot(&self) -> Arc<RetrievalSnapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Swaps in a new snapshot. Requests already running keep the one they started with.
    pub fn replace_snapshot(&self, snapshot: RetrievalSnapshot) {
        let fresh = Arc::new(snapshot);
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = fresh;
    }

    pub async fn search(&self, query: &SearchQuery) -> Result<SearchResponse, SearchError> {
        let started = Instant::now();
        let text = query.text.trim();
        if text.is_empty() {
            return Err(SearchError::EmptyQuery);
        }
        let top_k = query.clamped_top_k();
        let snapshot = self.snapshot();

        let primary = self.vector_tiers(text, top_k, &snapshot).await;
        let lexical = lexical_results(snapshot.documents(), text, top_k);

        let (results, provider_tag) = match primary {
            Some((tier, hits)) => {
                let (merged, backfilled) = merge_with_backfill(hits, lexical, top_k);
                (merged, ProviderTag::for_primary(tier, backfilled))
            }
            None => (lexical, ProviderTag::Lexical),
        };

        let took_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(
            provider = %provider_tag,
            results = results.len(),
            top_k,
            took_ms,
            "search served"
        );

        Ok(SearchResponse {
            results,
            provider_tag,
            took_ms,
        })
    }

    /// Runs [`search`](Self::search) until `cancelled` resolves.
    ///
    /// On cancellation the in-flight search future is dropped, which aborts its outbound
    /// request, and no later tier is attempted.
    pub async fn search_until<F>(
        &self,
        query: &SearchQuery,
        cancelled: F,
    ) -> Result<SearchResponse, SearchError>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            biased;
            _ = cancelled => {
                debug!("search cancelled by caller");
                Err(SearchError::Cancelled)
            }
            response = self.search(query) => response,
        }
    }

    /// Documents most similar to the one identified by `key`, excluding itself.
    pub fn related(&self, key: &str, limit: Option<usize>) -> RelatedResponse {
        let snapshot = self.snapshot();
        let limit = limit
            .unwrap_or(DEFAULT_RELATED_LIMIT)
            .clamp(1, MAX_RELATED_LIMIT);

        let Some(table) = snapshot.embeddings() else {
            return RelatedResponse::not_indexed();
        };
        let Some(record) = snapshot.resolve(key).and_then(|id| table.get(id)) else {
            debug!(key, "related lookup for unindexed document");
            return RelatedResponse::not_indexed();
        };

        let results = pairwise_rank(&record.vector, record.norm, &table.records, &record.id, limit)
            .into_iter()
            .map(|(id, score)| snapshot.hydrate(&id, score))
            .collect();

        RelatedResponse {
            status: RelatedStatus::Indexed,
            results,
        }
    }

    async fn vector_tiers(
        &self,
        text: &str,
        top_k: usize,
        snapshot: &RetrievalSnapshot,
    ) -> Option<(Tier, Vec<QueryResult>)> {
        let mut embedding = QueryEmbedding::new(self.embedder.as_deref(), text);

        let managed = self.managed_tier(&mut embedding, top_k, snapshot).await;
        if let Some(results) = settle(Tier::Managed, managed) {
            return Some((Tier::Managed, results));
        }

        let local = Self::local_tier(&mut embedding, top_k, snapshot).await;
        settle(Tier::LocalBruteForce, local).map(|results| (Tier::LocalBruteForce, results))
    }

    async fn managed_tier(
        &self,
        embedding: &mut QueryEmbedding<'_>,
        top_k: usize,
        snapshot: &RetrievalSnapshot,
    ) -> Result<Vec<QueryResult>, SearchError> {
        let managed = self
            .managed
            .as_ref()
            .ok_or_else(|| SearchError::NotConfigured("managed vector index".to_string()))?;
        let vector = embedding.vector().await?;
        let neighbors = managed.find_neighbors(vector, top_k).await?;

        Ok(neighbors
            .into_iter()
            .map(|neighbor| snapshot.hydrate(&neighbor.datapoint_id, neighbor.distance))
            .collect())
    }

    async fn local_tier(
        embedding: &mut QueryEmbedding<'_>,
        top_k: usize,
        snapshot: &RetrievalSnapshot,
    ) -> Result<Vec<QueryResult>, SearchError> {
        let table = snapshot
            .embeddings()
            .ok_or_else(|| SearchError::NotConfigured("local embedding table".to_string()))?;
        let vector = embedding.vector().await?;
        if vector.len() != table.embedding_dim {
            return Err(SearchError::BackendResponse {
                backend: "local".to_string(),
                details: format!(
                    "query has {} dimensions, table has {}",
                    vector.len(),
                    table.embedding_dim
                ),
            });
        }

        Ok(rank_by_query(vector, &table.records, top_k)
            .into_iter()
            .map(|(id, score)| snapshot.hydrate(&id, score))
            .collect())
    }
}

fn settle(tier: Tier, outcome: Result<Vec<QueryResult>, SearchError>) -> Option<Vec<QueryResult>> {
    match outcome {
        Ok(results) if !results.is_empty() => Some(results),
        Ok(_) => {
            debug!(tier = tier.label(), "tier returned no results");
            None
        }
        Err(SearchError::NotConfigured(what)) => {
            debug!(tier = tier.label(), %what, "tier skipped");
            None
        }
        Err(SearchError::QueryEmbeddingFailed(reason)) => {
            debug!(tier = tier.label(), %reason, "tier skipped after query embedding failure");
            None
        }
        Err(error) => {
            warn!(tier = tier.label(), %error, "tier failed, falling back");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EmbedError;
    use crate::models::{EmbeddingRecord, Neighbor};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const DIM: usize = 4;

    fn doc(id: &str, title: &str, excerpt: &str) -> Document {
        Document {
            id: id.to_string(),
            title: title.to_string(),
            url: format!("/blog/{id}"),
            excerpt: excerpt.to_string(),
        }
    }

    fn snapshot() -> RetrievalSnapshot {
        let mapping = MappingTable::new(vec![
            doc("markets", "Markets and morals", "trade policy and ethics"),
            doc("garden", "Summer garden", "tomatoes and basil"),
            doc("rust", "Learning Rust", "systems programming notes"),
            doc("tariffs", "Tariff season", "trade wars and prices"),
        ])
        .unwrap();
        let embeddings = EmbeddingTable::new(
            "test",
            DIM,
            "digest",
            vec![
                EmbeddingRecord::new("markets", vec![1.0, 0.0, 0.0, 0.0]),
                EmbeddingRecord::new("garden", vec![0.0, 1.0, 0.0, 0.0]),
                EmbeddingRecord::new("rust", vec![0.0, 0.0, 1.0, 0.0]),
                EmbeddingRecord::new("tariffs", vec![0.9, 0.0, 0.0, 0.1]),
            ],
        )
        .unwrap();
        RetrievalSnapshot::new(Some(mapping), Some(embeddings))
    }

    struct FixedEmbedder {
        dimensions: usize,
        output: Vec<f32>,
        calls: AtomicUsize,
    }

    impl FixedEmbedder {
        fn new(output: Vec<f32>) -> Self {
            Self {
                dimensions: DIM,
                output,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Embedder for FixedEmbedder {
        fn dimensions(&self) -> usize {
            self.dimensions
        }

        fn provider_name(&self) -> &str {
            "fixed"
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbedError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.output.clone())
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        fn dimensions(&self) -> usize {
            DIM
        }

        fn provider_name(&self) -> &str {
            "failing"
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbedError> {
            Err(EmbedError::Status {
                provider: "failing".to_string(),
                status: 500,
                body: "boom".to_string(),
            })
        }
    }

    struct FakeNeighbors {
        result: Result<Vec<Neighbor>, ()>,
        delay: Option<Duration>,
        calls: AtomicUsize,
    }

    impl FakeNeighbors {
        fn returning(ids: &[(&str, f64)]) -> Self {
            Self {
                result: Ok(ids
                    .iter()
                    .map(|(id, distance)| Neighbor {
                        datapoint_id: id.to_string(),
                        distance: *distance,
                    })
                    .collect()),
                delay: None,
                calls: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                result: Err(()),
                delay: None,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl NeighborIndex for FakeNeighbors {
        async fn find_neighbors(&self, _vector: &[f32], _k: usize) -> Result<Vec<Neighbor>, SearchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.result.clone().map_err(|_| SearchError::BackendResponse {
                backend: "fake".to_string(),
                details: "503 Service Unavailable".to_string(),
            })
        }

        async fn upsert_datapoints(&self, _records: &[EmbeddingRecord]) -> Result<(), SearchError> {
            Ok(())
        }
    }

    fn ids(results: &[QueryResult]) -> Vec<&str> {
        results.iter().map(|result| result.id.as_str()).collect()
    }

    fn result(id: &str) -> QueryResult {
        QueryResult::from_document(&Document::placeholder(id), 0.0)
    }

    #[test]
    fn merge_keeps_primary_order_and_dedups() {
        let primary = vec![result("b"), result("a"), result("b")];
        let lexical = vec![result("a"), result("c"), result("d")];

        let (merged, backfilled) = merge_with_backfill(primary, lexical, 3);
        assert_eq!(ids(&merged), vec!["b", "a", "c"]);
        assert!(backfilled);
    }

    #[test]
    fn merge_reports_no_backfill_when_primary_fills_top_k() {
        let primary = vec![result("a"), result("b"), result("c")];
        let lexical = vec![result("x"), result("y")];

        let (merged, backfilled) = merge_with_backfill(primary, lexical, 3);
        assert_eq!(ids(&merged), vec!["a", "b", "c"]);
        assert!(!backfilled);
    }

    #[test]
    fn merge_length_is_bounded_by_unique_ids() {
        let cases: Vec<(Vec<&str>, Vec<&str>, usize)> = vec![
            (vec![], vec![], 5),
            (vec!["a"], vec!["a"], 5),
            (vec!["a", "b"], vec!["b", "c", "d"], 3),
            (vec!["a", "a", "a"], vec![], 2),
            (vec![], vec!["x", "y", "z"], 2),
            (vec!["p", "q", "r", "s"], vec!["q", "t"], 10),
        ];

        for (primary, lexical, k) in cases {
            let unique: HashSet<&str> = primary.iter().chain(lexical.iter()).copied().collect();
            let (merged, _) = merge_with_backfill(
                primary.iter().map(|id| result(id)).collect(),
                lexical.iter().map(|id| result(id)).collect(),
                k,
            );

            let merged_ids = ids(&merged);
            let distinct: HashSet<&str> = merged_ids.iter().copied().collect();
            assert_eq!(distinct.len(), merged_ids.len());
            assert_eq!(merged.len(), k.min(unique.len()));

            let mut seen = HashSet::new();
            let primary_order: Vec<&str> =
                primary.iter().copied().filter(|id| seen.insert(*id)).collect();
            let kept_primary: Vec<&str> = merged_ids
                .iter()
                .copied()
                .filter(|id| primary_order.contains(id))
                .collect();
            assert_eq!(kept_primary, primary_order[..kept_primary.len()].to_vec());
        }
    }

    #[test]
    fn keys_normalize_across_urls_and_paths() {
        assert_eq!(normalize_key("https://example.com/blog/Markets/"), "markets");
        assert_eq!(normalize_key("/blog/garden"), "garden");
        assert_eq!(normalize_key("  Rust "), "rust");
        assert_eq!(normalize_key("https://example.com"), "");
    }

    #[tokio::test]
    async fn empty_query_is_rejected_before_any_tier() {
        let embedder = Arc::new(FixedEmbedder::new(vec![1.0, 0.0, 0.0, 0.0]));
        let router = QueryRouter::new(snapshot()).with_embedder(embedder.clone());

        let result = router.search(&SearchQuery::new("   ", Some(5))).await;
        assert!(matches!(result, Err(SearchError::EmptyQuery)));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn managed_tier_hydrates_unknown_ids_with_placeholders() -> Result<(), SearchError> {
        let managed = Arc::new(FakeNeighbors::returning(&[("ghost-post", 0.12), ("rust", 0.3)]));
        let router = QueryRouter::new(snapshot())
            .with_embedder(Arc::new(FixedEmbedder::new(vec![0.0, 0.0, 1.0, 0.0])))
            .with_managed_index(managed);

        let response = router.search(&SearchQuery::new("ghosts", Some(2))).await?;
        assert_eq!(response.provider_tag, ProviderTag::Managed);
        let ghost = &response.results[0];
        assert_eq!(ghost.id, "ghost-post");
        assert_eq!(ghost.title, "ghost-post");
        assert_eq!(ghost.url, "/blog/ghost-post");
        assert_eq!(ghost.excerpt, "");
        assert_eq!(response.results[1].title, "Learning Rust");
        Ok(())
    }

    #[tokio::test]
    async fn managed_results_are_backfilled_from_lexical() -> Result<(), SearchError> {
        let managed = Arc::new(FakeNeighbors::returning(&[("garden", 0.2)]));
        let router = QueryRouter::new(snapshot())
            .with_embedder(Arc::new(FixedEmbedder::new(vec![0.0, 1.0, 0.0, 0.0])))
            .with_managed_index(managed);

        let response = router.search(&SearchQuery::new("trade", Some(3))).await?;
        assert_eq!(response.provider_tag, ProviderTag::ManagedLexical);
        assert_eq!(ids(&response.results), vec!["garden", "markets", "tariffs"]);
        Ok(())
    }

    #[tokio::test]
    async fn failed_managed_tier_falls_back_to_local_with_one_embedding() -> Result<(), SearchError> {
        let embedder = Arc::new(FixedEmbedder::new(vec![1.0, 0.0, 0.0, 0.0]));
        let managed = Arc::new(FakeNeighbors::failing());
        let router = QueryRouter::new(snapshot())
            .with_embedder(embedder.clone())
            .with_managed_index(managed.clone());

        let response = router.search(&SearchQuery::new("markets", Some(2))).await?;
        assert_eq!(response.provider_tag, ProviderTag::Local);
        assert_eq!(ids(&response.results), vec!["markets", "tariffs"]);
        assert!((response.results[0].score - 1.0).abs() < 1e-6);
        assert_eq!(managed.calls.load(Ordering::SeqCst), 1);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test]
    async fn local_tier_hydrates_unmapped_ids_with_placeholders() -> Result<(), SearchError> {
        let mapping = MappingTable::new(vec![doc("a", "Alpha", "x")]).unwrap();
        let embeddings = EmbeddingTable::new(
            "test",
            DIM,
            "digest",
            vec![
                EmbeddingRecord::new("orphan-post", vec![0.0, 1.0, 0.0, 0.0]),
                EmbeddingRecord::new("a", vec![0.0, 0.0, 1.0, 0.0]),
            ],
        )
        .unwrap();
        let router = QueryRouter::new(RetrievalSnapshot::new(Some(mapping), Some(embeddings)))
            .with_embedder(Arc::new(FixedEmbedder::new(vec![0.0, 1.0, 0.0, 0.0])));

        let response = router.search(&SearchQuery::new("orphan", Some(2))).await?;
        assert_eq!(response.provider_tag, ProviderTag::Local);
        let orphan = &response.results[0];
        assert_eq!(orphan.id, "orphan-post");
        assert_eq!(orphan.title, "orphan-post");
        assert_eq!(orphan.url, "/blog/orphan-post");
        assert_eq!(orphan.excerpt, "");
        assert_eq!(response.results[1].title, "Alpha");
        Ok(())
    }

    #[tokio::test]
    async fn failed_query_embedding_is_reported_with_its_cause() {
        let mut embedding = QueryEmbedding::new(Some(&FailingEmbedder), "garden");
        assert!(matches!(
            embedding.vector().await,
            Err(SearchError::Embedding(EmbedError::Status { status: 500, .. }))
        ));
        match embedding.vector().await {
            Err(SearchError::QueryEmbeddingFailed(reason)) => assert!(reason.contains("500")),
            other => panic!("unexpected second attempt: {other:?}"),
        }

        let mut missing = QueryEmbedding::new(None, "garden");
        assert!(matches!(missing.vector().await, Err(SearchError::NotConfigured(_))));
    }

    #[tokio::test]
    async fn local_tier_is_backfilled_when_corpus_is_small() -> Result<(), SearchError> {
        let mapping = MappingTable::new(vec![
            doc("a", "Alpha trade", "x"),
            doc("b", "Beta trade", "y"),
        ])
        .unwrap();
        let embeddings = EmbeddingTable::new(
            "test",
            DIM,
            "digest",
            vec![EmbeddingRecord::new("a", vec![1.0, 0.0, 0.0, 0.0])],
        )
        .unwrap();
        let router = QueryRouter::new(RetrievalSnapshot::new(Some(mapping), Some(embeddings)))
            .with_embedder(Arc::new(FixedEmbedder::new(vec![1.0, 0.0, 0.0, 0.0])));

        let response = router.search(&SearchQuery::new("trade", Some(5))).await?;
        assert_eq!(response.provider_tag, ProviderTag::LocalLexical);
        assert_eq!(ids(&response.results), vec!["a", "b"]);
        Ok(())
    }

    #[tokio::test]
    async fn no_embedding_capability_serves_lexical_only() -> Result<(), SearchError> {
        let router = QueryRouter::new(snapshot());

        let response = router.search(&SearchQuery::new("trade", None)).await?;
        assert_eq!(response.provider_tag, ProviderTag::Lexical);
        assert_eq!(response.results.len(), 4);
        assert_eq!(ids(&response.results)[..2], ["markets", "tariffs"]);
        Ok(())
    }

    #[tokio::test]
    async fn query_dimension_mismatch_degrades_to_lexical() -> Result<(), SearchError> {
        let embedder = FixedEmbedder {
            dimensions: 768,
            output: vec![0.1; 512],
            calls: AtomicUsize::new(0),
        };
        let managed = Arc::new(FakeNeighbors::returning(&[("rust", 0.1)]));
        let router = QueryRouter::new(snapshot())
            .with_embedder(Arc::new(embedder))
            .with_managed_index(managed.clone());

        let response = router.search(&SearchQuery::new("trade", Some(2))).await?;
        assert_eq!(response.provider_tag, ProviderTag::Lexical);
        assert_eq!(managed.calls.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test]
    async fn embedding_provider_failure_degrades_to_lexical() -> Result<(), SearchError> {
        let router = QueryRouter::new(snapshot()).with_embedder(Arc::new(FailingEmbedder));

        let response = router.search(&SearchQuery::new("garden", Some(1))).await?;
        assert_eq!(response.provider_tag, ProviderTag::Lexical);
        assert_eq!(ids(&response.results), vec!["garden"]);
        Ok(())
    }

    #[tokio::test]
    async fn top_k_is_clamped_before_tiers_run() -> Result<(), SearchError> {
        let router = QueryRouter::new(snapshot());
        let response = router.search(&SearchQuery::new("trade", Some(0))).await?;
        assert_eq!(response.results.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn cancellation_stops_in_flight_tier_and_skips_the_rest() {
        let embedder = Arc::new(FixedEmbedder::new(vec![1.0, 0.0, 0.0, 0.0]));
        let managed = Arc::new(FakeNeighbors {
            delay: Some(Duration::from_secs(30)),
            ..FakeNeighbors::returning(&[("rust", 0.1)])
        });
        let router = QueryRouter::new(snapshot())
            .with_embedder(embedder.clone())
            .with_managed_index(managed.clone());

        let result = router
            .search_until(
                &SearchQuery::new("markets", Some(3)),
                tokio::time::sleep(Duration::from_millis(20)),
            )
            .await;

        assert!(matches!(result, Err(SearchError::Cancelled)));
        assert_eq!(managed.calls.load(Ordering::SeqCst), 1);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn related_excludes_self_and_ranks_by_similarity() {
        let router = QueryRouter::new(snapshot());

        let response = router.related("/blog/markets", Some(2));
        assert_eq!(response.status, RelatedStatus::Indexed);
        assert_eq!(ids(&response.results), vec!["tariffs", "garden"]);

        let by_title = router.related("markets and morals", None);
        assert_eq!(by_title.status, RelatedStatus::Indexed);
        assert_eq!(by_title.results.len(), 3);
    }

    #[test]
    fn related_reports_unknown_documents_as_not_indexed() {
        let router = QueryRouter::new(snapshot());
        let response = router.related("brand-new-post", None);
        assert_eq!(response.status, RelatedStatus::NotIndexed);
        assert!(response.results.is_empty());

        let lexical_only = QueryRouter::new(RetrievalSnapshot::default());
        assert_eq!(
            lexical_only.related("markets", None).status,
            RelatedStatus::NotIndexed
        );
    }

    #[tokio::test]
    async fn snapshot_swap_is_visible_to_new_requests_only() -> Result<(), SearchError> {
        let router = QueryRouter::new(snapshot());
        let held = router.snapshot();

        let mapping = MappingTable::new(vec![doc("fresh", "Fresh trade post", "new")]).unwrap();
        router.replace_snapshot(RetrievalSnapshot::new(Some(mapping), None));

        assert_eq!(held.documents().len(), 4);
        let response = router.search(&SearchQuery::new("trade", Some(5))).await?;
        assert_eq!(ids(&response.results), vec!["fresh"]);
        Ok(())
    }
}
