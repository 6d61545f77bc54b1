use crate::traits::NeighborIndex;
use crate::{EmbeddingRecord, Neighbor, SearchError};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone)]
pub struct VertexConfig {
    pub project_id: String,
    pub location: String,
    /// Public endpoint domain serving `findNeighbors` for the deployed index.
    pub query_endpoint: String,
    pub index_endpoint_id: String,
    pub deployed_index_id: Option<String>,
    /// Index id for `upsertDatapoints`; builds skip the upsert when absent.
    pub index_id: Option<String>,
    pub access_token: String,
    pub dimensions: usize,
    pub timeout: Duration,
}

impl VertexConfig {
    fn admin_base(&self) -> String {
        format!("https://{}-aiplatform.googleapis.com", self.location)
    }
}

/// REST adapter for a Vertex AI Vector Search deployment.
pub struct VertexIndex {
    client: Client,
    query_base: String,
    admin_base: String,
    config: VertexConfig,
}

impl VertexIndex {
    pub fn new(config: VertexConfig) -> Result<Self, SearchError> {
        if config.access_token.trim().is_empty() {
            return Err(SearchError::NotConfigured("vertex access token".to_string()));
        }
        let raw = if config.query_endpoint.contains("://") {
            config.query_endpoint.clone()
        } else {
            format!("https://{}", config.query_endpoint)
        };
        let query_base = Url::parse(&raw)?.as_str().trim_end_matches('/').to_string();
        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            query_base,
            admin_base: config.admin_base(),
            config,
        })
    }

    pub fn can_upsert(&self) -> bool {
        self.config.index_id.is_some()
    }

    fn find_neighbors_url(&self) -> String {
        format!(
            "{}/v1/projects/{}/locations/{}/indexEndpoints/{}:findNeighbors",
            self.query_base,
            self.config.project_id,
            self.config.location,
            self.config.index_endpoint_id
        )
    }

    fn upsert_url(&self, index_id: &str) -> String {
        format!(
            "{}/v1/projects/{}/locations/{}/indexes/{}:upsertDatapoints",
            self.admin_base, self.config.project_id, self.config.location, index_id
        )
    }

    async fn post(&self, url: String, body: Value) -> Result<Value, SearchError> {
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.config.access_token)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SearchError::BackendResponse {
                backend: "vertex".to_string(),
                details: response.status().to_string(),
            });
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl NeighborIndex for VertexIndex {
    async fn find_neighbors(&self, vector: &[f32], k: usize) -> Result<Vec<Neighbor>, SearchError> {
        if vector.len() != self.config.dimensions {
            return Err(SearchError::BackendResponse {
                backend: "vertex".to_string(),
                details: format!(
                    "query vector dim {} is not {}",
                    vector.len(),
                    self.config.dimensions
                ),
            });
        }

        let mut body = json!({
            "queries": [{
                "datapoint": { "featureVector": vector },
                "neighborCount": k,
            }],
        });
        if let Some(deployed) = &self.config.deployed_index_id {
            body["deployedIndexId"] = json!(deployed);
        }

        let parsed = self.post(self.find_neighbors_url(), body).await?;
        Ok(parse_neighbors(&parsed))
    }

    async fn upsert_datapoints(&self, records: &[EmbeddingRecord]) -> Result<(), SearchError> {
        let Some(index_id) = &self.config.index_id else {
            return Err(SearchError::NotConfigured("vertex index id".to_string()));
        };
        if records.is_empty() {
            return Ok(());
        }

        let datapoints = records
            .iter()
            .map(|record| {
                json!({
                    "datapointId": record.id,
                    "featureVector": record.vector,
                })
            })
            .collect::<Vec<_>>();

        self.post(self.upsert_url(index_id), json!({ "datapoints": datapoints }))
            .await?;
        Ok(())
    }
}

fn parse_neighbors(parsed: &Value) -> Vec<Neighbor> {
    let neighbors = parsed
        .pointer("/nearestNeighbors/0/neighbors")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    neighbors
        .iter()
        .filter_map(|neighbor| {
            let id = neighbor
                .pointer("/datapoint/datapointId")
                .and_then(Value::as_str)?;
            let distance = neighbor
                .pointer("/distance")
                .and_then(Value::as_f64)
                .unwrap_or(0.0);
            Some(Neighbor {
                datapoint_id: id.to_string(),
                distance,
            })
        })
        .collect()
}
