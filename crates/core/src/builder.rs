use crate::artifacts::{self, ArtifactPaths, EmbeddingTable, MappingTable};
use crate::corpus::{corpus_digest, CorpusItem};
use crate::embeddings::{embed_checked, Embedder};
use crate::error::{EmbedError, IndexError};
use crate::models::{BuildOptions, Document, EmbeddingRecord};
use crate::traits::NeighborIndex;
use crate::SearchError;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedDocument {
    pub id: String,
    pub reason: String,
}

/// What happened to the managed index after the local artifacts were written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UpsertStatus {
    /// No managed index, no embeddings, or the index has no upsert target configured.
    #[default]
    Skipped,
    Done,
    Failed,
}

#[derive(Debug, Clone, Default)]
pub struct BuildReport {
    pub documents: usize,
    pub embedded: usize,
    pub skipped: Vec<SkippedDocument>,
    pub upsert: UpsertStatus,
}

#[derive(Debug, Clone)]
pub struct BuildOutput {
    pub mapping: MappingTable,
    /// `None` in lexical-only builds.
    pub embeddings: Option<EmbeddingTable>,
    pub report: BuildReport,
}

impl BuildOutput {
    /// Writes both artifacts atomically. A lexical-only build removes any stale embedding
    /// table so queries never pair a new mapping with old vectors.
    pub fn write_artifacts(&self, dir: &Path) -> Result<ArtifactPaths, IndexError> {
        let paths = ArtifactPaths::in_dir(dir);
        artifacts::save_mapping(&paths.mapping, &self.mapping)?;
        match &self.embeddings {
            Some(table) => artifacts::save_embeddings(&paths.embeddings, table)?,
            None => artifacts::remove_artifact(&paths.embeddings)?,
        }
        info!(
            mapping = %paths.mapping.display(),
            documents = self.mapping.len(),
            embeddings = self.embeddings.as_ref().map_or(0, EmbeddingTable::len),
            "wrote semantic artifacts"
        );
        Ok(paths)
    }
}

/// Offline pipeline turning a corpus into the mapping and embedding tables.
pub struct IndexBuilder {
    embedder: Option<Arc<dyn Embedder>>,
    remote: Option<Arc<dyn NeighborIndex>>,
    options: BuildOptions,
}

impl IndexBuilder {
    pub fn new(options: BuildOptions) -> Self {
        Self {
            embedder: None,
            remote: None,
            options,
        }
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_remote_index(mut self, remote: Arc<dyn NeighborIndex>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub async fn build(&self, corpus: &[CorpusItem]) -> Result<BuildOutput, IndexError> {
        if corpus.is_empty() {
            return Err(IndexError::EmptyCorpus("corpus has no items".to_string()));
        }

        let embedder: Option<&dyn Embedder> = match (&self.embedder, self.options.lexical_only) {
            (_, true) => None,
            (Some(embedder), false) => {
                if embedder.dimensions() != self.options.embedding_dim {
                    return Err(IndexError::InvalidArgument(format!(
                        "embedder {} produces {} dimensions, index expects {}",
                        embedder.provider_name(),
                        embedder.dimensions(),
                        self.options.embedding_dim
                    )));
                }
                Some(embedder.as_ref())
            }
            (None, false) => {
                return Err(IndexError::InvalidArgument(
                    "no embedder configured; use lexical-only mode to build without one"
                        .to_string(),
                ))
            }
        };

        let mut report = BuildReport {
            documents: corpus.len(),
            ..BuildReport::default()
        };
        let mut documents = Vec::new();
        let mut records = Vec::new();
        let mut accepted = Vec::new();

        for (position, item) in corpus.iter().enumerate() {
            if item.text.trim().is_empty() {
                warn!(id = %item.id, "skipping post with empty text");
                report.skipped.push(SkippedDocument {
                    id: item.id.clone(),
                    reason: "empty text".to_string(),
                });
                continue;
            }

            if let Some(embedder) = embedder {
                match embed_checked(embedder, &item.text).await {
                    Ok(vector) => records.push(EmbeddingRecord::new(item.id.clone(), vector)),
                    Err(EmbedError::DimensionMismatch { expected, got }) => {
                        return Err(IndexError::DimensionMismatch {
                            id: item.id.clone(),
                            expected,
                            got,
                        });
                    }
                    Err(error) => {
                        warn!(id = %item.id, %error, "embedding failed, skipping post");
                        report.skipped.push(SkippedDocument {
                            id: item.id.clone(),
                            reason: error.to_string(),
                        });
                        continue;
                    }
                }
                debug!(id = %item.id, done = position + 1, total = corpus.len(), "embedded post");
            }

            documents.push(Document {
                id: item.id.clone(),
                title: item.title.clone(),
                url: item.url.clone(),
                excerpt: item.excerpt.clone(),
            });
            accepted.push(item.clone());
        }

        if documents.is_empty() {
            return Err(IndexError::EmptyCorpus(format!(
                "all {} posts were skipped",
                corpus.len()
            )));
        }

        report.embedded = records.len();
        let mapping = MappingTable::new(documents)?;
        let embeddings = match embedder {
            Some(embedder) => Some(EmbeddingTable::new(
                embedder.provider_name(),
                self.options.embedding_dim,
                corpus_digest(&accepted),
                records,
            )?),
            None => None,
        };

        info!(
            documents = report.documents,
            embedded = report.embedded,
            skipped = report.skipped.len(),
            "semantic index built"
        );

        Ok(BuildOutput {
            mapping,
            embeddings,
            report,
        })
    }

    /// Builds, writes the local artifacts, then pushes vectors to the managed index.
    ///
    /// The push is best-effort. Local artifacts are already on disk when it runs, so a
    /// failed upsert leaves the local fallback tier fully usable.
    pub async fn build_and_write(
        &self,
        corpus: &[CorpusItem],
        dir: &Path,
    ) -> Result<BuildOutput, IndexError> {
        let mut output = self.build(corpus).await?;
        output.write_artifacts(dir)?;
        output.report.upsert = self.publish(&output).await;
        Ok(output)
    }

    async fn publish(&self, output: &BuildOutput) -> UpsertStatus {
        let (Some(remote), Some(table)) = (&self.remote, &output.embeddings) else {
            debug!("managed index upsert skipped");
            return UpsertStatus::Skipped;
        };

        match remote.upsert_datapoints(&table.records).await {
            Ok(()) => {
                info!(datapoints = table.len(), "upserted datapoints into managed index");
                UpsertStatus::Done
            }
            Err(SearchError::NotConfigured(what)) => {
                debug!(%what, "managed index upsert skipped");
                UpsertStatus::Skipped
            }
            Err(error) => {
                warn!(%error, "managed index upsert failed; local artifacts remain valid");
                UpsertStatus::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashingEmbedder;
    use crate::models::Neighbor;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    fn item(id: &str, text: &str) -> CorpusItem {
        CorpusItem {
            id: id.to_string(),
            title: id.to_uppercase(),
            url: format!("/blog/{id}"),
            text: text.to_string(),
            excerpt: text.chars().take(20).collect(),
        }
    }

    fn corpus() -> Vec<CorpusItem> {
        vec![
            item("markets", "markets and morals in global trade"),
            item("garden", "tomatoes and basil in a small garden"),
            item("rust", "writing systems software in rust"),
        ]
    }

    fn options(dim: usize) -> BuildOptions {
        BuildOptions {
            embedding_dim: dim,
            ..BuildOptions::default()
        }
    }

    struct ScriptedEmbedder {
        dimensions: usize,
        output_len: usize,
        fail_on: Option<&'static str>,
    }

    #[async_trait]
    impl Embedder for ScriptedEmbedder {
        fn dimensions(&self) -> usize {
            self.dimensions
        }

        fn provider_name(&self) -> &str {
            "scripted"
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
            if self.fail_on.is_some_and(|needle| text.contains(needle)) {
                return Err(EmbedError::Status {
                    provider: "scripted".to_string(),
                    status: 503,
                    body: "unavailable".to_string(),
                });
            }
            Ok(vec![1.0; self.output_len])
        }
    }

    #[derive(Default)]
    struct RecordingIndex {
        fail: bool,
        no_target: bool,
        upserts: AtomicUsize,
    }

    #[async_trait]
    impl NeighborIndex for RecordingIndex {
        async fn find_neighbors(&self, _vector: &[f32], _k: usize) -> Result<Vec<Neighbor>, SearchError> {
            Ok(Vec::new())
        }

        async fn upsert_datapoints(&self, records: &[EmbeddingRecord]) -> Result<(), SearchError> {
            if self.no_target {
                return Err(SearchError::NotConfigured("index id".to_string()));
            }
            if self.fail {
                return Err(SearchError::BackendResponse {
                    backend: "fake".to_string(),
                    details: "500".to_string(),
                });
            }
            self.upserts.fetch_add(records.len(), Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn build_produces_matching_tables_with_norms() -> Result<(), IndexError> {
        let builder = IndexBuilder::new(options(64))
            .with_embedder(Arc::new(HashingEmbedder { dimensions: 64 }));

        let output = builder.build(&corpus()).await?;
        let table = output.embeddings.expect("embedding table");
        assert_eq!(output.mapping.len(), 3);
        assert_eq!(table.len(), 3);
        for record in &table.records {
            assert_eq!(record.vector.len(), 64);
            let expected = crate::similarity::l2_norm(&record.vector);
            assert!((record.norm - expected).abs() < 1e-6);
        }
        Ok(())
    }

    #[tokio::test]
    async fn rebuilding_an_unchanged_corpus_is_idempotent() -> Result<(), IndexError> {
        let builder = IndexBuilder::new(options(32))
            .with_embedder(Arc::new(HashingEmbedder { dimensions: 32 }));

        let first = builder.build(&corpus()).await?;
        let second = builder.build(&corpus()).await?;
        assert_eq!(first.mapping, second.mapping);
        assert_eq!(first.embeddings, second.embeddings);
        Ok(())
    }

    #[tokio::test]
    async fn dimension_mismatch_aborts_the_build() {
        let builder = IndexBuilder::new(options(768)).with_embedder(Arc::new(ScriptedEmbedder {
            dimensions: 768,
            output_len: 512,
            fail_on: None,
        }));

        let result = builder.build(&corpus()).await;
        assert!(matches!(
            result,
            Err(IndexError::DimensionMismatch {
                expected: 768,
                got: 512,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn provider_failures_and_empty_posts_are_skipped() -> Result<(), IndexError> {
        let builder = IndexBuilder::new(options(4)).with_embedder(Arc::new(ScriptedEmbedder {
            dimensions: 4,
            output_len: 4,
            fail_on: Some("tomatoes"),
        }));
        let mut items = corpus();
        items.push(item("blank", "   "));

        let output = builder.build(&items).await?;
        let ids: Vec<_> = output.mapping.documents.iter().map(|doc| doc.id.as_str()).collect();
        assert_eq!(ids, vec!["markets", "rust"]);
        assert_eq!(output.report.skipped.len(), 2);
        assert_eq!(output.report.embedded, 2);
        Ok(())
    }

    #[tokio::test]
    async fn empty_corpus_is_fatal() {
        let builder = IndexBuilder::new(BuildOptions::default())
            .with_embedder(Arc::new(HashingEmbedder::default()));
        assert!(matches!(builder.build(&[]).await, Err(IndexError::EmptyCorpus(_))));

        let all_blank = vec![item("a", ""), item("b", " ")];
        assert!(matches!(
            builder.build(&all_blank).await,
            Err(IndexError::EmptyCorpus(_))
        ));
    }

    #[tokio::test]
    async fn lexical_only_build_has_no_embedding_table() -> Result<(), IndexError> {
        let builder = IndexBuilder::new(BuildOptions {
            lexical_only: true,
            ..BuildOptions::default()
        });
        let output = builder.build(&corpus()).await?;
        assert!(output.embeddings.is_none());
        assert_eq!(output.mapping.len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn failed_upsert_still_writes_local_artifacts() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let remote = Arc::new(RecordingIndex {
            fail: true,
            ..RecordingIndex::default()
        });
        let builder = IndexBuilder::new(options(16))
            .with_embedder(Arc::new(HashingEmbedder { dimensions: 16 }))
            .with_remote_index(remote);

        let output = builder.build_and_write(&corpus(), dir.path()).await?;
        assert_eq!(output.report.upsert, UpsertStatus::Failed);

        let paths = ArtifactPaths::in_dir(dir.path());
        assert_eq!(artifacts::load_mapping(&paths.mapping)?.map(|m| m.len()), Some(3));
        assert_eq!(artifacts::load_embeddings(&paths.embeddings)?.map(|t| t.len()), Some(3));
        Ok(())
    }

    #[tokio::test]
    async fn successful_upsert_pushes_every_record() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let remote = Arc::new(RecordingIndex::default());
        let builder = IndexBuilder::new(options(16))
            .with_embedder(Arc::new(HashingEmbedder { dimensions: 16 }))
            .with_remote_index(remote.clone());

        let output = builder.build_and_write(&corpus(), dir.path()).await?;
        assert_eq!(output.report.upsert, UpsertStatus::Done);
        assert_eq!(remote.upserts.load(Ordering::SeqCst), 3);
        Ok(())
    }

    #[tokio::test]
    async fn missing_upsert_target_is_a_skip_not_a_failure() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let remote = Arc::new(RecordingIndex {
            no_target: true,
            ..RecordingIndex::default()
        });
        let builder = IndexBuilder::new(options(16))
            .with_embedder(Arc::new(HashingEmbedder { dimensions: 16 }))
            .with_remote_index(remote.clone());

        let output = builder.build_and_write(&corpus(), dir.path()).await?;
        assert_eq!(output.report.upsert, UpsertStatus::Skipped);
        assert_eq!(remote.upserts.load(Ordering::SeqCst), 0);
        assert!(ArtifactPaths::in_dir(dir.path()).embeddings.exists());
        Ok(())
    }
}
