//! HTTP client wrapper for interacting with Qdrant.

use crate::qdrant::types::{
    CollectionInfoResponse, CountResponse, PointRecord, QdrantError, RetrieveResponse,
};
use reqwest::{Client, Method, StatusCode};
use serde_json::{Value, json};

/// Lightweight HTTP client for the Qdrant operations the pipeline needs.
pub struct QdrantClient {
    pub(crate) client: Client,
    pub(crate) base_url: String,
    pub(crate) api_key: Option<String>,
}

impl QdrantClient {
    /// Construct a new client for the given base URL.
    pub fn new(url: &str, api_key: Option<String>) -> Result<Self, QdrantError> {
        let client = Client::builder().user_agent("bookdex/0.3").build()?;
        let base_url = normalize_base_url(url).map_err(QdrantError::InvalidUrl)?;
        tracing::debug!(
            url = %base_url,
            has_api_key = api_key.as_deref().map(|v| !v.is_empty()).unwrap_or(false),
            "Initialized Qdrant HTTP client"
        );

        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    /// Check whether a collection is present.
    pub async fn collection_exists(&self, collection: &str) -> Result<bool, QdrantError> {
        let response = self
            .request(Method::GET, &format!("collections/{collection}"))
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => {
                let body = response.text().await.unwrap_or_default();
                let error = QdrantError::UnexpectedStatus { status, body };
                tracing::error!(collection, error = %error, "Collection existence check failed");
                Err(error)
            }
        }
    }

    /// Create a collection with a named dense vector and a `bm25` sparse
    /// vector using the IDF modifier. No-op when the collection exists.
    pub async fn ensure_collection(
        &self,
        collection: &str,
        dense_size: usize,
    ) -> Result<(), QdrantError> {
        if self.collection_exists(collection).await? {
            return Ok(());
        }

        tracing::info!(collection, dense_size, "Creating collection");
        let body = json!({
            "vectors": {
                "dense": {
                    "size": dense_size,
                    "distance": "Cosine"
                }
            },
            "sparse_vectors": {
                "bm25": {
                    "modifier": "idf"
                }
            }
        });

        let response = self
            .request(Method::PUT, &format!("collections/{collection}"))
            .json(&body)
            .send()
            .await?;

        self.ensure_success(response, || {
            tracing::info!(collection, "Collection created");
        })
        .await
    }

    /// Upsert fully built points. `wait=true` blocks until the write is
    /// applied, which the overwrite and reconciliation paths rely on.
    pub async fn upsert_points(
        &self,
        collection: &str,
        points: &[PointRecord],
        wait: bool,
    ) -> Result<(), QdrantError> {
        if points.is_empty() {
            return Ok(());
        }

        let serialized: Vec<_> = points
            .iter()
            .map(|point| {
                json!({
                    "id": point.id,
                    "vector": {
                        "dense": point.dense,
                        "bm25": {
                            "indices": point.sparse.indices,
                            "values": point.sparse.values,
                        }
                    },
                    "payload": point.payload,
                })
            })
            .collect();

        let point_count = serialized.len();
        let response = self
            .request(Method::PUT, &format!("collections/{collection}/points"))
            .query(&[("wait", wait)])
            .json(&json!({ "points": serialized }))
            .send()
            .await?;

        self.ensure_success(response, || {
            tracing::debug!(collection, points = point_count, "Points upserted");
        })
        .await
    }

    /// Count points matching a payload filter (exact count).
    pub async fn count(&self, collection: &str, filter: &Value) -> Result<u64, QdrantError> {
        let response = self
            .request(Method::POST, &format!("collections/{collection}/points/count"))
            .json(&json!({ "filter": filter, "exact": true }))
            .send()
            .await?;

        if response.status().is_success() {
            let parsed: CountResponse = response.json().await?;
            Ok(parsed.result.count)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = QdrantError::UnexpectedStatus { status, body };
            tracing::error!(collection, error = %error, "Count request failed");
            Err(error)
        }
    }

    /// Delete every point matching a payload filter, waiting for completion
    /// so no stale points survive an overwrite.
    pub async fn delete_by_filter(
        &self,
        collection: &str,
        filter: &Value,
    ) -> Result<(), QdrantError> {
        let response = self
            .request(
                Method::POST,
                &format!("collections/{collection}/points/delete"),
            )
            .query(&[("wait", true)])
            .json(&json!({ "filter": filter }))
            .send()
            .await?;

        self.ensure_success(response, || {
            tracing::info!(collection, "Deleted points by filter");
        })
        .await
    }

    /// Retrieve points by id without payloads or vectors, returning the ids
    /// that are actually present.
    pub async fn retrieve_ids(
        &self,
        collection: &str,
        ids: &[String],
    ) -> Result<Vec<String>, QdrantError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .request(Method::POST, &format!("collections/{collection}/points"))
            .json(&json!({
                "ids": ids,
                "with_payload": false,
                "with_vector": false,
            }))
            .send()
            .await?;

        if response.status().is_success() {
            let parsed: RetrieveResponse = response.json().await?;
            Ok(parsed
                .result
                .into_iter()
                .map(|point| stringify_point_id(point.id))
                .collect())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = QdrantError::UnexpectedStatus { status, body };
            tracing::error!(collection, error = %error, "Retrieve request failed");
            Err(error)
        }
    }

    /// Total number of points currently held by the collection.
    pub async fn collection_point_count(&self, collection: &str) -> Result<u64, QdrantError> {
        let response = self
            .request(Method::GET, &format!("collections/{collection}"))
            .send()
            .await?;

        if response.status().is_success() {
            let parsed: CollectionInfoResponse = response.json().await?;
            Ok(parsed.result.points_count.unwrap_or(0))
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = QdrantError::UnexpectedStatus { status, body };
            tracing::error!(collection, error = %error, "Collection info request failed");
            Err(error)
        }
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format_endpoint(&self.base_url, path);
        let mut req = self.client.request(method, url);
        if let Some(api_key) = &self.api_key
            && !api_key.is_empty()
        {
            req = req.header("api-key", api_key);
        }
        req
    }

    async fn ensure_success<F>(
        &self,
        response: reqwest::Response,
        on_success: F,
    ) -> Result<(), QdrantError>
    where
        F: FnOnce(),
    {
        if response.status().is_success() {
            on_success();
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = QdrantError::UnexpectedStatus { status, body };
            tracing::error!(error = %error, "Qdrant request failed");
            Err(error)
        }
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

fn stringify_point_id(id: Value) -> String {
    match id {
        Value::String(text) => text,
        Value::Number(number) => number.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::sparse::SparseVector;
    use httpmock::{Method::POST, Method::PUT, MockServer};

    fn test_client(base_url: String) -> QdrantClient {
        QdrantClient {
            client: Client::builder()
                .user_agent("bookdex-test")
                .build()
                .expect("client"),
            base_url,
            api_key: None,
        }
    }

    #[tokio::test]
    async fn upsert_sends_named_dense_and_sparse_vectors() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/collections/books/points")
                    .query_param("wait", "true")
                    .json_body_partial(
                        r#"{
                            "points": [
                                {
                                    "id": "point-1",
                                    "vector": {
                                        "dense": [0.25, 0.5],
                                        "bm25": { "indices": [7], "values": [1.5] }
                                    }
                                }
                            ]
                        }"#,
                    );
                then.status(200).json_body(serde_json::json!({
                    "status": "ok",
                    "time": 0.0,
                    "result": { "operation_id": 1, "status": "completed" }
                }));
            })
            .await;

        let client = test_client(server.base_url());
        let points = vec![PointRecord {
            id: "point-1".into(),
            dense: vec![0.25, 0.5],
            sparse: SparseVector {
                indices: vec![7],
                values: vec![1.5],
            },
            payload: serde_json::json!({ "text": "x" }),
        }];

        client
            .upsert_points("books", &points, true)
            .await
            .expect("upsert");
        mock.assert();
    }

    #[tokio::test]
    async fn count_parses_result_and_sends_filter() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/collections/books/points/count")
                    .json_body_partial(r#"{ "exact": true }"#);
                then.status(200).json_body(serde_json::json!({
                    "status": "ok",
                    "time": 0.0,
                    "result": { "count": 42 }
                }));
            })
            .await;

        let client = test_client(server.base_url());
        let filter = crate::qdrant::doc_id_filter("abc");
        let count = client.count("books", &filter).await.expect("count");
        mock.assert();
        assert_eq!(count, 42);
    }

    #[tokio::test]
    async fn retrieve_ids_reports_only_found_points() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/collections/books/points");
                then.status(200).json_body(serde_json::json!({
                    "status": "ok",
                    "time": 0.0,
                    "result": [
                        { "id": "id-1" },
                        { "id": "id-3" }
                    ]
                }));
            })
            .await;

        let client = test_client(server.base_url());
        let found = client
            .retrieve_ids(
                "books",
                &["id-1".to_string(), "id-2".to_string(), "id-3".to_string()],
            )
            .await
            .expect("retrieve");
        mock.assert();
        assert_eq!(found, vec!["id-1".to_string(), "id-3".to_string()]);
    }

    #[tokio::test]
    async fn unexpected_status_surfaces_body() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/collections/books/points/count");
                then.status(500).body("backend exploded");
            })
            .await;

        let client = test_client(server.base_url());
        let filter = crate::qdrant::doc_id_filter("abc");
        let error = client.count("books", &filter).await.expect_err("error");
        match error {
            QdrantError::UnexpectedStatus { status, body } => {
                assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
                assert_eq!(body, "backend exploded");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
