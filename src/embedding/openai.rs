//! Hosted OpenAI embeddings adapter.

use crate::embedding::EmbeddingError;
use serde::Deserialize;
use serde_json::json;

const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";

/// Blocking client for the OpenAI embeddings endpoint.
pub struct OpenAiEmbedder {
    client: reqwest::blocking::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    /// Construct a client for the public endpoint.
    pub fn new(api_key: String, model: &str) -> Result<Self, EmbeddingError> {
        Self::with_endpoint(api_key, model, OPENAI_EMBEDDINGS_URL)
    }

    /// Construct a client for an explicit endpoint (proxies, tests).
    pub fn with_endpoint(
        api_key: String,
        model: &str,
        endpoint: &str,
    ) -> Result<Self, EmbeddingError> {
        let client = reqwest::blocking::Client::builder()
            .user_agent("ketabsearch/0.3")
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            api_key,
            model: model.to_string(),
        })
    }

    /// Produce one vector per input text, ordered like the request.
    pub fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "input": texts,
            }))
            .send()?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(EmbeddingError::UnexpectedStatus { status, body });
        }

        let payload: EmbeddingsResponse = response
            .json()
            .map_err(|err| EmbeddingError::MalformedResponse(err.to_string()))?;

        // The API documents response order by `index`; sort defensively anyway.
        let mut items = payload.data;
        items.sort_by_key(|item| item.index);
        Ok(items.into_iter().map(|item| item.embedding).collect())
    }
}
