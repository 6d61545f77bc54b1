use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use semantic_retrieval_core::{
    read_corpus, BuildOptions, Embedder, GeminiConfig, GeminiEmbedder, HashingEmbedder,
    IndexBuilder, NeighborIndex, OpenAiConfig, OpenAiEmbedder, QueryRouter, RetrievalSnapshot,
    SearchQuery, UpsertStatus, VertexConfig, VertexIndex, DEFAULT_EMBEDDING_DIMENSIONS,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "semantic-retrieval", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory holding semantic-mapping.json and semantic-embeddings.json.
    #[arg(long, env = "SEMANTIC_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// Embedding dimensionality shared by the builder, the artifacts, and the managed index.
    #[arg(long, env = "VERTEX_EMBED_DIM", default_value_t = DEFAULT_EMBEDDING_DIMENSIONS)]
    embed_dim: usize,

    /// Timeout for every outbound HTTP call.
    #[arg(long, default_value = "10")]
    timeout_secs: u64,

    #[arg(long, value_enum, default_value_t = EmbedProvider::Auto)]
    embed_provider: EmbedProvider,

    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    gemini_api_key: Option<String>,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: Option<String>,

    /// Domain serving findNeighbors. Defaults to the regional API host.
    #[arg(long, env = "VERTEX_PUBLIC_ENDPOINT")]
    vertex_endpoint: Option<String>,

    #[arg(long, env = "VERTEX_INDEX_ENDPOINT_ID")]
    vertex_index_endpoint: Option<String>,

    /// Index that receives upserts after a build.
    #[arg(long, env = "VERTEX_INDEX_ID")]
    vertex_index: Option<String>,

    #[arg(long, env = "VERTEX_DEPLOYED_INDEX_ID")]
    vertex_deployed_index: Option<String>,

    #[arg(long, env = "GCP_PROJECT_ID")]
    gcp_project: Option<String>,

    #[arg(long, env = "GCP_LOCATION", default_value = "us-central1")]
    gcp_location: String,

    /// OAuth bearer token for the Vertex AI APIs.
    #[arg(long, env = "GCP_ACCESS_TOKEN", hide_env_values = true)]
    gcp_access_token: Option<String>,

    /// Never talk to the managed vector index.
    #[arg(long, env = "SEMANTIC_SKIP_VERTEX", default_value_t = false)]
    skip_managed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum EmbedProvider {
    /// Gemini when its key is set, then OpenAI, otherwise none.
    Auto,
    Gemini,
    Openai,
    /// Offline trigram hashing; useful for air-gapped rebuilds.
    Hashing,
    None,
}

#[derive(Subcommand)]
enum Command {
    /// Rebuild the mapping and embedding artifacts from a folder of posts.
    Index {
        /// Folder containing .jsx and .md posts.
        #[arg(long, env = "SEMANTIC_BLOG_DIR")]
        blog_dir: PathBuf,
        /// Write only the mapping table; no embedding calls are made.
        #[arg(long, env = "SEMANTIC_LEXICAL_ONLY", default_value_t = false)]
        lexical_only: bool,
    },
    /// Answer a query through the tiered router and print the response as JSON.
    Search {
        #[arg(long)]
        query: String,
        #[arg(long)]
        top_k: Option<usize>,
    },
    /// List documents similar to a post, addressed by id, path, URL, or title.
    Related {
        #[arg(long)]
        id: String,
        #[arg(long)]
        limit: Option<usize>,
    },
}

impl Cli {
    fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn embedder(&self) -> anyhow::Result<Option<Arc<dyn Embedder>>> {
        let gemini_key = non_blank(&self.gemini_api_key);
        let openai_key = non_blank(&self.openai_api_key);

        let provider = match self.embed_provider {
            EmbedProvider::Auto if gemini_key.is_some() => EmbedProvider::Gemini,
            EmbedProvider::Auto if openai_key.is_some() => EmbedProvider::Openai,
            EmbedProvider::Auto => EmbedProvider::None,
            chosen => chosen,
        };

        let embedder: Arc<dyn Embedder> = match provider {
            EmbedProvider::Gemini => {
                let key = gemini_key.context("--embed-provider gemini needs GEMINI_API_KEY")?;
                let mut config = GeminiConfig::new(key);
                config.dimensions = self.embed_dim;
                config.timeout = self.timeout();
                Arc::new(GeminiEmbedder::new(config)?)
            }
            EmbedProvider::Openai => {
                let key = openai_key.context("--embed-provider openai needs OPENAI_API_KEY")?;
                let mut config = OpenAiConfig::new(key);
                config.dimensions = self.embed_dim;
                config.request_dimensions = true;
                config.timeout = self.timeout();
                Arc::new(OpenAiEmbedder::new(config)?)
            }
            EmbedProvider::Hashing => Arc::new(HashingEmbedder {
                dimensions: self.embed_dim,
            }),
            EmbedProvider::Auto | EmbedProvider::None => return Ok(None),
        };

        info!(provider = embedder.provider_name(), dimensions = embedder.dimensions(), "embedder ready");
        Ok(Some(embedder))
    }

    /// Shared Vertex settings; `None` when the project or the access token is missing.
    fn vertex_config(&self) -> Option<VertexConfig> {
        if self.skip_managed {
            info!("managed vector index disabled");
            return None;
        }
        let (Some(project_id), Some(access_token)) =
            (non_blank(&self.gcp_project), non_blank(&self.gcp_access_token))
        else {
            info!("managed vector index not configured");
            return None;
        };

        let query_endpoint = non_blank(&self.vertex_endpoint)
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}-aiplatform.googleapis.com", self.gcp_location));

        Some(VertexConfig {
            project_id: project_id.to_string(),
            location: self.gcp_location.clone(),
            query_endpoint,
            index_endpoint_id: non_blank(&self.vertex_index_endpoint)
                .unwrap_or_default()
                .to_string(),
            deployed_index_id: non_blank(&self.vertex_deployed_index).map(str::to_string),
            index_id: non_blank(&self.vertex_index).map(str::to_string),
            access_token: access_token.to_string(),
            dimensions: self.embed_dim,
            timeout: self.timeout(),
        })
    }

    /// Query-side client; needs an index endpoint to call findNeighbors on.
    fn managed_index(&self) -> anyhow::Result<Option<Arc<dyn NeighborIndex>>> {
        let Some(config) = self.vertex_config() else {
            return Ok(None);
        };
        if config.index_endpoint_id.is_empty() {
            info!("no index endpoint configured; managed tier disabled");
            return Ok(None);
        }
        Ok(Some(Arc::new(VertexIndex::new(config)?)))
    }

    /// Build-side client; needs only the index id that receives upserts.
    fn upsert_index(&self) -> anyhow::Result<Option<Arc<dyn NeighborIndex>>> {
        let Some(config) = self.vertex_config() else {
            return Ok(None);
        };
        let index = VertexIndex::new(config)?;
        if !index.can_upsert() {
            info!("no index id configured; managed upsert skipped");
            return Ok(None);
        }
        Ok(Some(Arc::new(index)))
    }

    fn router(&self) -> anyhow::Result<QueryRouter> {
        let mut router = QueryRouter::new(RetrievalSnapshot::load(&self.data_dir));
        if let Some(embedder) = self.embedder()? {
            router = router.with_embedder(embedder);
        }
        if let Some(managed) = self.managed_index()? {
            router = router.with_managed_index(managed);
        }
        Ok(router)
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|value| !value.is_empty())
}

async fn interrupted() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "semantic-retrieval boot"
    );

    match &cli.command {
        Command::Index {
            blog_dir,
            lexical_only,
        } => {
            let options = BuildOptions {
                embedding_dim: cli.embed_dim,
                lexical_only: *lexical_only,
                ..BuildOptions::default()
            };
            let corpus = read_corpus(blog_dir, options.max_text_chars, options.max_excerpt_chars)?;
            for skipped in &corpus.skipped_files {
                warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped post");
            }

            let mut builder = IndexBuilder::new(options);
            if !*lexical_only {
                let Some(embedder) = cli.embedder()? else {
                    bail!("no embedding provider configured; set GEMINI_API_KEY or OPENAI_API_KEY, or pass --lexical-only");
                };
                builder = builder.with_embedder(embedder);
                if let Some(remote) = cli.upsert_index()? {
                    builder = builder.with_remote_index(remote);
                }
            }

            let output = builder.build_and_write(&corpus.items, &cli.data_dir).await?;
            for skipped in &output.report.skipped {
                warn!(id = %skipped.id, reason = %skipped.reason, "document not embedded");
            }

            let upsert = match output.report.upsert {
                UpsertStatus::Done => "done",
                UpsertStatus::Skipped => "skipped",
                UpsertStatus::Failed => "failed",
            };
            println!(
                "{} documents mapped, {} embedded, {} skipped, managed upsert: {} ({})",
                output.report.documents,
                output.report.embedded,
                output.report.skipped.len(),
                upsert,
                cli.data_dir.display()
            );
        }
        Command::Search { query, top_k } => {
            let router = cli.router()?;
            let response = router
                .search_until(&SearchQuery::new(query.clone(), *top_k), interrupted())
                .await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Command::Related { id, limit } => {
            let router = cli.router()?;
            let response = router.related(id, *limit);
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
    }

    Ok(())
}
