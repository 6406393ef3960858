//! Embedding client abstraction and the hosted batch adapter.
//!
//! Dense vectors come from a hosted batch API; sparse vectors are produced
//! locally by [`sparse::Bm25SparseEncoder`]. Quota responses are retried with
//! exponential backoff before the batch is reported failed, and empty texts
//! are filtered positionally so output alignment never shifts.

/// Local BM25-style sparse term weighting.
pub mod sparse;

use crate::ratelimit::RateLimiter;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const MAX_ATTEMPTS: usize = 5;
const QUOTA_BASE_WAIT: Duration = Duration::from_secs(30);
const RETRY_BASE_WAIT: Duration = Duration::from_secs(1);

/// Errors raised by embedding providers.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// HTTP layer failed before receiving a response.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The provider kept returning 429 until the retry ceiling was reached.
    #[error("Embedding quota exhausted after {attempts} attempts")]
    QuotaExhausted {
        /// Number of attempts made before giving up.
        attempts: usize,
    },
    /// The provider responded with an unexpected status code.
    #[error("Unexpected embedding response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned by the provider.
        status: StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
    /// The provider returned a vector count that does not match the input.
    #[error("Embedding response misaligned: sent {sent} texts, received {received} vectors")]
    Misaligned {
        /// Number of texts submitted.
        sent: usize,
        /// Number of vectors received.
        received: usize,
    },
}

/// Interface implemented by dense embedding backends.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Produce one dense vector per supplied text, in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

/// Embed a batch while excluding empty texts without shifting positions.
///
/// The output is aligned 1:1 with `texts`: empty or whitespace-only inputs
/// map to `None` and are never sent to the provider.
pub async fn embed_aligned(
    client: &dyn EmbeddingClient,
    texts: &[String],
) -> Result<Vec<Option<Vec<f32>>>, EmbeddingError> {
    let valid: Vec<(usize, &String)> = texts
        .iter()
        .enumerate()
        .filter(|(_, text)| !text.trim().is_empty())
        .collect();

    let mut aligned: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
    if valid.is_empty() {
        return Ok(aligned);
    }

    let payload: Vec<String> = valid.iter().map(|(_, text)| (*text).clone()).collect();
    let vectors = client.embed_batch(&payload).await?;
    if vectors.len() != valid.len() {
        return Err(EmbeddingError::Misaligned {
            sent: valid.len(),
            received: vectors.len(),
        });
    }

    for ((position, _), vector) in valid.into_iter().zip(vectors) {
        aligned[position] = Some(vector);
    }
    Ok(aligned)
}

/// Dense embedding client for a hosted `batchEmbedContents`-style API.
pub struct RestEmbeddingClient {
    pub(crate) client: Client,
    pub(crate) endpoint: String,
    pub(crate) api_key: Option<String>,
    pub(crate) model: String,
    pub(crate) dimension: usize,
    pub(crate) limiter: Arc<RateLimiter>,
    pub(crate) quota_wait: Duration,
    pub(crate) retry_wait: Duration,
}

impl RestEmbeddingClient {
    /// Construct a client for the given endpoint and quota limiter.
    pub fn new(
        endpoint: String,
        api_key: Option<String>,
        model: String,
        dimension: usize,
        limiter: Arc<RateLimiter>,
    ) -> Result<Self, EmbeddingError> {
        let client = Client::builder()
            .user_agent("bookdex/0.3")
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            client,
            endpoint,
            api_key,
            model,
            dimension,
            limiter,
            quota_wait: QUOTA_BASE_WAIT,
            retry_wait: RETRY_BASE_WAIT,
        })
    }

    async fn send_batch(&self, texts: &[String]) -> Result<reqwest::Response, EmbeddingError> {
        let requests: Vec<_> = texts
            .iter()
            .map(|text| {
                json!({
                    "model": format!("models/{}", self.model),
                    "content": { "parts": [{ "text": text }] },
                    "taskType": "RETRIEVAL_DOCUMENT",
                    "outputDimensionality": self.dimension,
                })
            })
            .collect();

        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "requests": requests }));
        if let Some(key) = &self.api_key {
            request = request.query(&[("key", key)]);
        }
        Ok(request.send().await?)
    }
}

#[derive(Deserialize)]
struct BatchEmbedResponse {
    embeddings: Vec<EmbeddingValues>,
}

#[derive(Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

#[async_trait]
impl EmbeddingClient for RestEmbeddingClient {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        for attempt in 0..MAX_ATTEMPTS {
            self.limiter.acquire().await;

            let result = self.send_batch(texts).await;
            match result {
                Ok(response) if response.status().is_success() => {
                    let parsed: BatchEmbedResponse = response.json().await?;
                    return Ok(parsed.embeddings.into_iter().map(|e| e.values).collect());
                }
                Ok(response) if response.status() == StatusCode::TOO_MANY_REQUESTS => {
                    if attempt + 1 == MAX_ATTEMPTS {
                        break;
                    }
                    let wait = self
                        .quota_wait
                        .saturating_mul(1 << attempt.min(2))
                        .min(self.quota_wait.saturating_mul(4));
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_attempts = MAX_ATTEMPTS,
                        wait_secs = wait.as_secs(),
                        "Embedding quota hit (429); backing off"
                    );
                    tokio::time::sleep(wait).await;
                }
                Ok(response) => {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    let error = EmbeddingError::UnexpectedStatus { status, body };
                    if attempt + 1 == MAX_ATTEMPTS {
                        return Err(error);
                    }
                    tracing::warn!(attempt = attempt + 1, error = %error, "Embedding request failed; retrying");
                    tokio::time::sleep(self.retry_wait.saturating_mul(1 << attempt)).await;
                }
                Err(error) => {
                    if attempt + 1 == MAX_ATTEMPTS {
                        return Err(error);
                    }
                    tracing::warn!(attempt = attempt + 1, error = %error, "Embedding transport error; retrying");
                    tokio::time::sleep(self.retry_wait.saturating_mul(1 << attempt)).await;
                }
            }
        }

        Err(EmbeddingError::QuotaExhausted {
            attempts: MAX_ATTEMPTS,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingClient {
        dimension: usize,
        seen: std::sync::Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl EmbeddingClient for RecordingClient {
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            self.seen.lock().unwrap().push(texts.to_vec());
            Ok(texts.iter().map(|_| vec![0.5; self.dimension]).collect())
        }
    }

    #[tokio::test]
    async fn empty_texts_are_excluded_without_shifting_positions() {
        let client = RecordingClient {
            dimension: 4,
            seen: std::sync::Mutex::new(Vec::new()),
        };
        let texts = vec![
            "first".to_string(),
            "   ".to_string(),
            "third".to_string(),
            String::new(),
            "fifth".to_string(),
        ];

        let aligned = embed_aligned(&client, &texts).await.expect("aligned");
        assert_eq!(aligned.len(), 5);
        assert!(aligned[0].is_some());
        assert!(aligned[1].is_none());
        assert!(aligned[2].is_some());
        assert!(aligned[3].is_none());
        assert!(aligned[4].is_some());

        let sent = client.seen.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0], vec!["first", "third", "fifth"]);
    }

    #[tokio::test]
    async fn all_empty_batch_skips_the_provider() {
        let client = RecordingClient {
            dimension: 4,
            seen: std::sync::Mutex::new(Vec::new()),
        };
        let texts = vec!["  ".to_string(), String::new()];
        let aligned = embed_aligned(&client, &texts).await.expect("aligned");
        assert!(aligned.iter().all(Option::is_none));
        assert!(client.seen.lock().unwrap().is_empty());
    }

    struct MiscountingClient;

    #[async_trait]
    impl EmbeddingClient for MiscountingClient {
        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(vec![vec![0.1]])
        }
    }

    #[tokio::test]
    async fn misaligned_provider_output_is_an_error() {
        let texts = vec!["a".to_string(), "b".to_string()];
        let result = embed_aligned(&MiscountingClient, &texts).await;
        assert!(matches!(
            result,
            Err(EmbeddingError::Misaligned {
                sent: 2,
                received: 1
            })
        ));
    }

    use httpmock::{Method::POST, MockServer};

    fn fast_client(endpoint: String) -> RestEmbeddingClient {
        RestEmbeddingClient {
            client: Client::new(),
            endpoint,
            api_key: None,
            model: "gemini-embedding-001".to_string(),
            dimension: 4,
            limiter: Arc::new(RateLimiter::new(10_000)),
            quota_wait: Duration::from_millis(2),
            retry_wait: Duration::from_millis(2),
        }
    }

    #[tokio::test]
    async fn quota_responses_are_retried_until_the_budget_runs_out() {
        let server = MockServer::start_async().await;
        let quota = server
            .mock_async(|when, then| {
                when.method(POST).path("/embed");
                then.status(429).body("quota exceeded");
            })
            .await;

        let client = fast_client(format!("{}/embed", server.base_url()));
        let error = client
            .embed_batch(&["some chunk".to_string()])
            .await
            .expect_err("quota error");
        assert!(matches!(
            error,
            EmbeddingError::QuotaExhausted { attempts: 5 }
        ));
        assert_eq!(quota.hits_async().await, 5);
    }

    #[tokio::test]
    async fn exhausted_quota_fails_without_a_trailing_backoff() {
        let server = MockServer::start_async().await;
        let quota = server
            .mock_async(|when, then| {
                when.method(POST).path("/embed");
                then.status(429).body("quota exceeded");
            })
            .await;

        let mut client = fast_client(format!("{}/embed", server.base_url()));
        client.quota_wait = Duration::from_millis(100);

        let started = std::time::Instant::now();
        let error = client
            .embed_batch(&["some chunk".to_string()])
            .await
            .expect_err("quota error");
        assert!(matches!(
            error,
            EmbeddingError::QuotaExhausted { attempts: 5 }
        ));
        assert_eq!(quota.hits_async().await, 5);
        // Backoffs of 1x, 2x, 4x, 4x separate the five attempts; a sleep
        // after the last one would push past 15x.
        assert!(started.elapsed() < Duration::from_millis(1450));
    }

    #[tokio::test]
    async fn successful_batches_parse_vectors_in_order() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/embed");
                then.status(200).json_body(serde_json::json!({
                    "embeddings": [
                        { "values": [0.1, 0.2, 0.3, 0.4] },
                        { "values": [0.5, 0.6, 0.7, 0.8] }
                    ]
                }));
            })
            .await;

        let client = fast_client(format!("{}/embed", server.base_url()));
        let vectors = client
            .embed_batch(&["first".to_string(), "second".to_string()])
            .await
            .expect("vectors");
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0], vec![0.1, 0.2, 0.3, 0.4]);
        assert_eq!(vectors[1], vec![0.5, 0.6, 0.7, 0.8]);
    }
}
