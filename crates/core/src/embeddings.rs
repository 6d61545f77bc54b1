use crate::error::EmbedError;
use crate::normalizer::normalize_whitespace;
use crate::similarity::l2_norm;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 768;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    fn provider_name(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;
}

/// Embeds `text` and enforces the configured dimensionality.
///
/// Non-finite components are zeroed so one bad value cannot poison every cosine score.
pub async fn embed_checked<E>(embedder: &E, text: &str) -> Result<Vec<f32>, EmbedError>
where
    E: Embedder + ?Sized,
{
    let mut vector = embedder.embed(text).await?;
    if vector.len() != embedder.dimensions() {
        return Err(EmbedError::DimensionMismatch {
            expected: embedder.dimensions(),
            got: vector.len(),
        });
    }
    for value in &mut vector {
        if !value.is_finite() {
            *value = 0.0;
        }
    }
    Ok(vector)
}

fn http_client(timeout: Duration) -> Result<Client, EmbedError> {
    Ok(Client::builder().timeout(timeout).build()?)
}

fn parse_base_url(raw: &str) -> Result<String, EmbedError> {
    let parsed = Url::parse(raw)
        .map_err(|error| EmbedError::InvalidInput(format!("invalid base url {raw}: {error}")))?;
    Ok(parsed.as_str().trim_end_matches('/').to_string())
}

/// Offline embedder hashing character trigrams into fixed buckets. Deterministic, so it
/// suits tests and air-gapped rebuilds.
#[derive(Debug, Clone, Copy)]
pub struct HashingEmbedder {
    pub dimensions: usize,
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

impl HashingEmbedder {
    /// Unit-length bag of character trigrams.
    ///
    /// Text is lowercased and whitespace-collapsed with the same rule the corpus reader uses,
    /// so a post and a query with different spacing land in the same buckets.
    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let buckets = self.dimensions.max(1);
        let mut vector = vec![0f32; buckets];
        let chars: Vec<char> = normalize_whitespace(&text.to_lowercase()).chars().collect();

        for trigram in chars.windows(3) {
            let mut hash = FNV_OFFSET;
            let mut utf8 = [0u8; 4];
            for ch in trigram {
                for byte in ch.encode_utf8(&mut utf8).bytes() {
                    hash = (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME);
                }
            }
            vector[(hash % buckets as u64) as usize] += 1.0;
        }

        let norm = l2_norm(&vector);
        if norm > 0.0 {
            vector.iter_mut().for_each(|value| *value /= norm);
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn provider_name(&self) -> &str {
        "hashing-trigram"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        Ok(self.embed_sync(text))
    }
}

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub dimensions: usize,
    pub timeout: Duration,
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            model: "text-embedding-004".to_string(),
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

#[derive(Serialize)]
struct GeminiRequest<'a> {
    content: GeminiContent<'a>,
}

#[derive(Serialize)]
struct GeminiContent<'a> {
    parts: [GeminiPart<'a>; 1],
}

#[derive(Serialize)]
struct GeminiPart<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct GeminiResponse {
    embedding: Option<GeminiValues>,
}

#[derive(Deserialize)]
struct GeminiValues {
    values: Vec<f32>,
}

/// Gemini `embedContent` client.
pub struct GeminiEmbedder {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    dimensions: usize,
}

impl GeminiEmbedder {
    pub fn new(config: GeminiConfig) -> Result<Self, EmbedError> {
        if config.api_key.trim().is_empty() {
            return Err(EmbedError::InvalidInput("missing Gemini API key".to_string()));
        }
        let base = parse_base_url(&config.base_url)?;
        Ok(Self {
            client: http_client(config.timeout)?,
            endpoint: format!("{base}/v1beta/models/{}:embedContent", config.model),
            api_key: config.api_key.trim().to_string(),
            model: config.model,
            dimensions: config.dimensions,
        })
    }
}

#[async_trait]
impl Embedder for GeminiEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn provider_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let request = GeminiRequest {
            content: GeminiContent {
                parts: [GeminiPart { text }],
            },
        };
        let response = self
            .client
            .post(&self.endpoint)
            .query(&[("key", self.api_key.as_str())])
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbedError::Status {
                provider: "gemini".to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GeminiResponse = response
            .json()
            .await
            .map_err(|error| EmbedError::Malformed(error.to_string()))?;
        parsed
            .embedding
            .map(|embedding| embedding.values)
            .ok_or_else(|| EmbedError::Malformed("missing embedding.values".to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub dimensions: usize,
    /// Ask the API to shorten vectors to `dimensions`; only newer models support it.
    pub request_dimensions: bool,
    pub timeout: Duration,
}

impl OpenAiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "text-embedding-3-small".to_string(),
            dimensions: 1536,
            request_dimensions: false,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    input: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    data: Vec<OpenAiEmbedding>,
}

#[derive(Deserialize)]
struct OpenAiEmbedding {
    embedding: Vec<f32>,
}

/// Client for OpenAI-compatible `/embeddings` endpoints.
pub struct OpenAiEmbedder {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    dimensions: usize,
    request_dimensions: bool,
}

impl OpenAiEmbedder {
    pub fn new(config: OpenAiConfig) -> Result<Self, EmbedError> {
        if config.api_key.trim().is_empty() {
            return Err(EmbedError::InvalidInput("missing OpenAI API key".to_string()));
        }
        if config.model.trim().is_empty() {
            return Err(EmbedError::InvalidInput("missing OpenAI model name".to_string()));
        }
        let base = parse_base_url(&config.base_url)?;
        Ok(Self {
            client: http_client(config.timeout)?,
            endpoint: format!("{base}/embeddings"),
            api_key: config.api_key.trim().to_string(),
            model: config.model,
            dimensions: config.dimensions,
            request_dimensions: config.request_dimensions,
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn provider_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let request = OpenAiRequest {
            model: &self.model,
            input: text,
            dimensions: self.request_dimensions.then_some(self.dimensions),
        };
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbedError::Status {
                provider: "openai".to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let parsed: OpenAiResponse = response
            .json()
            .await
            .map_err(|error| EmbedError::Malformed(error.to_string()))?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|entry| entry.embedding)
            .ok_or_else(|| EmbedError::Malformed("response carried no embeddings".to_string()))
    }
}
