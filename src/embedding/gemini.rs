//! Hosted Gemini embeddings adapter.
//!
//! The batch endpoint has shipped several response shapes across API revisions, so
//! extraction is deliberately defensive: entries may be bare arrays, objects carrying
//! `values`, or objects nesting an `embedding` with `values`. A count mismatch between
//! inputs and extracted vectors is an error rather than a silent truncation.

use crate::embedding::EmbeddingError;
use serde_json::{Value, json};

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Blocking client for the Gemini `batchEmbedContents` endpoint.
pub struct GeminiEmbedder {
    client: reqwest::blocking::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl GeminiEmbedder {
    /// Construct a client for the public endpoint.
    pub fn new(api_key: String, model: &str) -> Result<Self, EmbeddingError> {
        Self::with_base_url(api_key, model, GEMINI_API_BASE)
    }

    /// Construct a client for an explicit API base (proxies, tests).
    pub fn with_base_url(
        api_key: String,
        model: &str,
        base_url: &str,
    ) -> Result<Self, EmbeddingError> {
        let client = reqwest::blocking::Client::builder()
            .user_agent("ketabsearch/0.3")
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: model.to_string(),
        })
    }

    /// Produce one vector per input text.
    pub fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let model_path = if self.model.starts_with("models/") {
            self.model.clone()
        } else {
            format!("models/{}", self.model)
        };
        let requests: Vec<Value> = texts
            .iter()
            .map(|text| {
                json!({
                    "model": model_path,
                    "content": { "parts": [{ "text": text }] },
                })
            })
            .collect();

        let url = format!("{}/{}:batchEmbedContents", self.base_url, model_path);
        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&json!({ "requests": requests }))
            .send()?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(EmbeddingError::UnexpectedStatus { status, body });
        }

        let payload: Value = response
            .json()
            .map_err(|err| EmbeddingError::MalformedResponse(err.to_string()))?;
        let vectors = extract_embeddings(&payload)?;
        if vectors.len() != texts.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: texts.len(),
                actual: vectors.len(),
            });
        }
        Ok(vectors)
    }
}

/// Pull the embedding vectors out of a response payload, tolerating shape drift.
fn extract_embeddings(payload: &Value) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let entries: Vec<&Value> = match payload {
        Value::Array(items) => items.iter().collect(),
        Value::Object(map) => match map.get("embeddings") {
            Some(Value::Array(items)) => items.iter().collect(),
            Some(other) => vec![other],
            None => vec![payload],
        },
        other => vec![other],
    };

    entries.into_iter().map(extract_single).collect()
}

fn extract_single(entry: &Value) -> Result<Vec<f32>, EmbeddingError> {
    if let Some(vector) = as_numeric_vector(entry) {
        return Ok(vector);
    }
    if let Value::Object(map) = entry {
        for key in ["values", "embedding"] {
            if let Some(inner) = map.get(key) {
                if let Some(vector) = as_numeric_vector(inner) {
                    return Ok(vector);
                }
                if let Some(vector) = inner.get("values").and_then(as_numeric_vector) {
                    return Ok(vector);
                }
            }
        }
        // Last resort: first array-of-numbers value anywhere in the object.
        if let Some(vector) = map.values().find_map(as_numeric_vector) {
            return Ok(vector);
        }
    }
    Err(EmbeddingError::MalformedResponse(format!(
        "entry does not contain a numeric vector: {entry}"
    )))
}

fn as_numeric_vector(value: &Value) -> Option<Vec<f32>> {
    let items = value.as_array()?;
    if items.is_empty() {
        return None;
    }
    items
        .iter()
        .map(|item| item.as_f64().map(|number| number as f32))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};

    #[test]
    fn extracts_values_field_entries() {
        let payload = json!({
            "embeddings": [
                {"values": [0.1, 0.2]},
                {"values": [0.3, 0.4]}
            ]
        });
        let vectors = extract_embeddings(&payload).expect("vectors");
        assert_eq!(vectors, vec![vec![0.1, 0.2], vec![0.3, 0.4]]);
    }

    #[test]
    fn extracts_bare_arrays_and_nested_embedding_objects() {
        let payload = json!({
            "embeddings": [
                [1.0, 2.0],
                {"embedding": {"values": [3.0, 4.0]}}
            ]
        });
        let vectors = extract_embeddings(&payload).expect("vectors");
        assert_eq!(vectors, vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
    }

    #[test]
    fn rejects_entries_without_numbers() {
        let payload = json!({ "embeddings": [{"note": "no vector here"}] });
        assert!(matches!(
            extract_embeddings(&payload),
            Err(EmbeddingError::MalformedResponse(_))
        ));
    }

    #[test]
    fn count_mismatch_is_an_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST)
                .path("/models/embedding-001:batchEmbedContents");
            then.status(200)
                .json_body(json!({ "embeddings": [ {"values": [0.1]} ] }));
        });

        let embedder =
            GeminiEmbedder::with_base_url("key".into(), "embedding-001", &server.base_url())
                .expect("embedder");
        let error = embedder
            .embed(&["اول".into(), "دوم".into()])
            .unwrap_err();
        assert!(matches!(
            error,
            EmbeddingError::CountMismatch {
                expected: 2,
                actual: 1
            }
        ));
    }

    #[test]
    fn embed_round_trips_against_mock_server() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/models/embedding-001:batchEmbedContents")
                .query_param("key", "secret");
            then.status(200).json_body(json!({
                "embeddings": [
                    {"values": [0.5, 0.25]},
                    {"values": [0.75, 1.0]}
                ]
            }));
        });

        let embedder =
            GeminiEmbedder::with_base_url("secret".into(), "embedding-001", &server.base_url())
                .expect("embedder");
        let vectors = embedder
            .embed(&["متن اول".into(), "متن دوم".into()])
            .expect("vectors");

        mock.assert();
        assert_eq!(vectors, vec![vec![0.5, 0.25], vec![0.75, 1.0]]);
    }
}
