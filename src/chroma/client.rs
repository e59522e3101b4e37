//! HTTP client wrapper for interacting with Chroma.

use crate::chroma::types::{
    AddBatch, ChromaError, CollectionHandle, GetResult, QueryInput, QueryResult, RawGetResponse,
    RawQueryResponse, stringify_id,
};
use crate::config::Settings;
use reqwest::{Client, Method, StatusCode};
use serde_json::{Map, Value, json};

/// Lightweight HTTP client for the Chroma REST API.
pub struct ChromaClient {
    pub(crate) client: Client,
    pub(crate) base_url: String,
    pub(crate) auth_header: Option<String>,
}

impl ChromaClient {
    /// Construct a new client from the loaded settings.
    ///
    /// The embedded persistent mode of the reference store has no HTTP surface, so a
    /// configured `CHROMA_PERSIST_DIR` is rejected here rather than silently ignored.
    pub fn from_settings(settings: &Settings) -> Result<Self, ChromaError> {
        if settings.chroma_persist_directory.is_some() {
            return Err(ChromaError::PersistentModeUnsupported);
        }
        if settings.chroma_anonymized_telemetry {
            tracing::debug!("Chroma anonymized telemetry enabled");
        }
        Self::new(&settings.chroma_base_url(), settings.chroma_api_key.clone())
    }

    /// Construct a client for an explicit base URL and optional `Authorization` value.
    pub fn new(base_url: &str, auth_header: Option<String>) -> Result<Self, ChromaError> {
        let client = Client::builder().user_agent("ketabsearch/0.3").build()?;
        let base_url = normalize_base_url(base_url).map_err(ChromaError::InvalidUrl)?;
        tracing::debug!(
            url = %base_url,
            has_auth = auth_header.as_deref().map(|value| !value.is_empty()).unwrap_or(false),
            "Initialized Chroma HTTP client"
        );

        Ok(Self {
            client,
            base_url,
            auth_header,
        })
    }

    /// Probe server liveness; returns the heartbeat counter.
    pub async fn heartbeat(&self) -> Result<u64, ChromaError> {
        let response = self
            .request(Method::GET, "api/v1/heartbeat")?
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(self.unexpected(response).await);
        }
        let body: Map<String, Value> = response.json().await?;
        let beat = body
            .values()
            .find_map(Value::as_u64)
            .unwrap_or_default();
        Ok(beat)
    }

    /// Retrieve every collection present on the server.
    pub async fn list_collections(&self) -> Result<Vec<CollectionHandle>, ChromaError> {
        let response = self
            .request(Method::GET, "api/v1/collections")?
            .send()
            .await?;
        if !response.status().is_success() {
            let error = self.unexpected(response).await;
            tracing::error!(error = %error, "Failed to list collections");
            return Err(error);
        }
        Ok(response.json().await?)
    }

    /// Resolve a collection by name, surfacing the available names when it is missing.
    pub async fn get_collection(&self, name: &str) -> Result<CollectionHandle, ChromaError> {
        let response = self
            .request(Method::GET, &format!("api/v1/collections/{name}"))?
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }
        if matches!(
            status,
            StatusCode::NOT_FOUND | StatusCode::BAD_REQUEST | StatusCode::INTERNAL_SERVER_ERROR
        ) {
            let body = response.text().await.unwrap_or_default();
            // Some server versions answer a missing name with 400/500 rather than 404;
            // the listing decides whether this is "missing" or a real failure.
            if let Ok(collections) = self.list_collections().await
                && !collections.iter().any(|collection| collection.name == name)
            {
                let available = collections
                    .into_iter()
                    .map(|collection| collection.name)
                    .collect::<Vec<_>>()
                    .join(", ");
                return Err(ChromaError::CollectionNotFound {
                    name: name.to_string(),
                    available,
                });
            }
            return Err(ChromaError::UnexpectedStatus { status, body });
        }
        Err(self.unexpected(response).await)
    }

    /// Create a collection tagged with source metadata.
    pub async fn create_collection(
        &self,
        name: &str,
        metadata: Map<String, Value>,
    ) -> Result<CollectionHandle, ChromaError> {
        let body = json!({
            "name": name,
            "metadata": metadata,
            "get_or_create": false,
        });
        let response = self
            .request(Method::POST, "api/v1/collections")?
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            let error = self.unexpected(response).await;
            tracing::error!(collection = name, error = %error, "Failed to create collection");
            return Err(error);
        }
        tracing::debug!(collection = name, "Collection created");
        Ok(response.json().await?)
    }

    /// Drop a collection, treating "not found" as success.
    pub async fn delete_collection(&self, name: &str) -> Result<(), ChromaError> {
        let response = self
            .request(Method::DELETE, &format!("api/v1/collections/{name}"))?
            .send()
            .await?;
        match response.status() {
            status if status.is_success() => {
                tracing::debug!(collection = name, "Collection deleted");
                Ok(())
            }
            StatusCode::NOT_FOUND => Ok(()),
            _ => Err(self.unexpected(response).await),
        }
    }

    /// Count the documents stored in a collection.
    pub async fn count(&self, collection: &CollectionHandle) -> Result<u64, ChromaError> {
        let response = self
            .request(
                Method::GET,
                &format!("api/v1/collections/{}/count", collection.id),
            )?
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(self.unexpected(response).await);
        }
        Ok(response.json().await?)
    }

    /// Upload a batch of documents with their metadata and optional vectors.
    pub async fn add(
        &self,
        collection: &CollectionHandle,
        batch: AddBatch,
    ) -> Result<usize, ChromaError> {
        if batch.ids.is_empty() {
            return Ok(0);
        }
        let count = batch.ids.len();
        let mut body = json!({
            "ids": batch.ids,
            "documents": batch.documents,
            "metadatas": batch.metadatas,
        });
        if let Some(embeddings) = batch.embeddings {
            body.as_object_mut()
                .expect("add body should remain an object")
                .insert("embeddings".into(), json!(embeddings));
        }

        let response = self
            .request(
                Method::POST,
                &format!("api/v1/collections/{}/add", collection.id),
            )?
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            let error = self.unexpected(response).await;
            tracing::error!(collection = %collection.name, error = %error, "Chroma add failed");
            return Err(error);
        }
        tracing::debug!(collection = %collection.name, documents = count, "Documents added");
        Ok(count)
    }

    /// Perform a nearest-neighbour query against a collection.
    ///
    /// `QueryInput::Texts` relies on a collection-side embedding function and is rejected by
    /// servers that do not hold one; callers inspect [`ChromaError::is_invalid_request`] to
    /// decide whether to retry with explicit vectors.
    pub async fn query(
        &self,
        collection: &CollectionHandle,
        input: QueryInput,
        n_results: usize,
    ) -> Result<QueryResult, ChromaError> {
        let mut body = json!({
            "n_results": n_results,
            "include": ["documents", "metadatas", "distances"],
        });
        let obj = body
            .as_object_mut()
            .expect("query body should remain an object");
        match input {
            QueryInput::Texts(texts) => {
                obj.insert("query_texts".into(), json!(texts));
            }
            QueryInput::Embeddings(vectors) => {
                obj.insert("query_embeddings".into(), json!(vectors));
            }
        }

        let response = self
            .request(
                Method::POST,
                &format!("api/v1/collections/{}/query", collection.id),
            )?
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            let error = self.unexpected(response).await;
            tracing::warn!(collection = %collection.name, error = %error, "Chroma query failed");
            return Err(error);
        }

        let raw: RawQueryResponse = response.json().await?;
        Ok(flatten_query_response(raw))
    }

    /// Fetch documents matching a metadata filter, used for context expansion.
    pub async fn get_where(
        &self,
        collection: &CollectionHandle,
        filter: Value,
    ) -> Result<GetResult, ChromaError> {
        self.get_documents(collection, json!({ "where": filter })).await
    }

    /// Fetch specific documents by identifier, used by the diagnostics endpoint.
    pub async fn get_by_ids(
        &self,
        collection: &CollectionHandle,
        ids: &[String],
    ) -> Result<GetResult, ChromaError> {
        self.get_documents(collection, json!({ "ids": ids })).await
    }

    async fn get_documents(
        &self,
        collection: &CollectionHandle,
        mut body: Value,
    ) -> Result<GetResult, ChromaError> {
        body.as_object_mut()
            .expect("get body should remain an object")
            .insert("include".into(), json!(["documents", "metadatas"]));

        let response = self
            .request(
                Method::POST,
                &format!("api/v1/collections/{}/get", collection.id),
            )?
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            let error = self.unexpected(response).await;
            tracing::warn!(collection = %collection.name, error = %error, "Chroma get failed");
            return Err(error);
        }

        let raw: RawGetResponse = response.json().await?;
        let count = raw.ids.len();
        Ok(GetResult {
            ids: raw.ids.into_iter().map(stringify_id).collect(),
            documents: raw
                .documents
                .unwrap_or_else(|| vec![None; count]),
            metadatas: raw
                .metadatas
                .unwrap_or_else(|| vec![None; count])
                .into_iter()
                .map(Option::unwrap_or_default)
                .collect(),
        })
    }

    fn request(&self, method: Method, path: &str) -> Result<reqwest::RequestBuilder, ChromaError> {
        let url = format_endpoint(&self.base_url, path);
        let mut req = self.client.request(method, url);
        if let Some(auth) = &self.auth_header
            && !auth.is_empty()
        {
            req = req.header("Authorization", auth);
        }
        Ok(req)
    }

    async fn unexpected(&self, response: reqwest::Response) -> ChromaError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        ChromaError::UnexpectedStatus { status, body }
    }
}

fn flatten_query_response(raw: RawQueryResponse) -> QueryResult {
    let ids: Vec<String> = raw
        .ids
        .into_iter()
        .next()
        .unwrap_or_default()
        .into_iter()
        .map(stringify_id)
        .collect();
    let count = ids.len();
    let distances = raw
        .distances
        .and_then(|groups| groups.into_iter().next())
        .unwrap_or_else(|| vec![0.0; count]);
    let documents = raw
        .documents
        .and_then(|groups| groups.into_iter().next())
        .unwrap_or_else(|| vec![None; count]);
    let metadatas = raw
        .metadatas
        .and_then(|groups| groups.into_iter().next())
        .map(|metas| metas.into_iter().map(Option::unwrap_or_default).collect())
        .unwrap_or_else(|| vec![Map::new(); count]);

    QueryResult {
        ids,
        distances,
        documents,
        metadatas,
    }
}

fn normalize_base_url(url: &str) -> Result<String, String> {
    let mut parsed = reqwest::Url::parse(url).map_err(|err| err.to_string())?;
    let path = parsed.path().trim_end_matches('/').to_string();
    parsed.set_path(&path);
    Ok(parsed.to_string())
}

fn format_endpoint(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::GET, Method::POST, MockServer};

    fn test_client(server: &MockServer) -> ChromaClient {
        ChromaClient::new(&server.base_url(), None).expect("client")
    }

    fn demo_collection() -> CollectionHandle {
        CollectionHandle {
            id: "c0ffee".into(),
            name: "demo".into(),
            metadata: None,
        }
    }

    #[tokio::test]
    async fn query_flattens_nested_result_arrays() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/api/v1/collections/c0ffee/query");
                then.status(200).json_body(json!({
                    "ids": [["doc-1", "doc-2"]],
                    "distances": [[0.1, 0.4]],
                    "documents": [["متن اول", "متن دوم"]],
                    "metadatas": [[{"book_id": 7}, {"book_id": 9}]]
                }));
            })
            .await;

        let result = test_client(&server)
            .query(
                &demo_collection(),
                QueryInput::Embeddings(vec![vec![0.1, 0.2]]),
                2,
            )
            .await
            .expect("query");

        mock.assert();
        assert_eq!(result.ids, vec!["doc-1", "doc-2"]);
        assert!((result.distances[1] - 0.4).abs() < f64::EPSILON);
        assert_eq!(result.documents[0].as_deref(), Some("متن اول"));
        assert_eq!(result.metadatas[1]["book_id"], json!(9));
    }

    #[tokio::test]
    async fn text_query_rejection_is_reported_as_invalid_request() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/v1/collections/c0ffee/query");
                then.status(422).body("query_texts requires an embedding function");
            })
            .await;

        let error = test_client(&server)
            .query(
                &demo_collection(),
                QueryInput::Texts(vec!["متن".into()]),
                3,
            )
            .await
            .expect_err("rejected query");

        assert!(error.is_invalid_request());
    }

    #[tokio::test]
    async fn missing_collection_lists_available_names() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/collections/ghost");
                then.status(404).body("not found");
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/collections");
                then.status(200).json_body(json!([
                    {"id": "1", "name": "book_pages"},
                    {"id": "2", "name": "book_pages_openai"}
                ]));
            })
            .await;

        let error = test_client(&server)
            .get_collection("ghost")
            .await
            .expect_err("missing collection");

        match error {
            ChromaError::CollectionNotFound { name, available } => {
                assert_eq!(name, "ghost");
                assert!(available.contains("book_pages_openai"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn add_skips_empty_batches() {
        let server = MockServer::start_async().await;
        let added = test_client(&server)
            .add(&demo_collection(), AddBatch::default())
            .await
            .expect("empty add");
        assert_eq!(added, 0);
    }
}
