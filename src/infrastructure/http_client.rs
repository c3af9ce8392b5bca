//! HTTP client for the remote text analysis service
//!
//! JSON over HTTPS with a governor rate limiter spacing outbound calls.
//! Results carry the index of the review they answer so that gaps and
//! misalignment can be detected and filled locally.

use anyhow::{Context, Result};
use async_trait::async_trait;
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, direct::NotKeyed},
};
use reqwest::{
    Client, StatusCode,
    header::{AUTHORIZATION, HeaderMap, HeaderValue, RETRY_AFTER, USER_AGENT},
};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::time::Duration;
use url::Url;

use crate::domain::analysis::{FakeReviewResult, Sentiment, SentimentResult};
use crate::domain::review::Review;
use crate::infrastructure::config::AnalysisConfig;
use crate::infrastructure::text_analyzer::{AnalyzerError, TextAnalyzer};

const CLIENT_USER_AGENT: &str = concat!("review-sentinel/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireReview<'a> {
    index: usize,
    id: &'a str,
    author: &'a str,
    rating: u8,
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    reviews: Vec<WireReview<'a>>,
}

#[derive(Debug, Deserialize)]
struct WireResponse<T> {
    results: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSentiment {
    index: usize,
    sentiment: Sentiment,
    confidence: f64,
    #[serde(default)]
    mismatch_detected: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireFake {
    index: usize,
    is_fake: bool,
    confidence: f64,
    #[serde(default)]
    reasons: Vec<String>,
}

/// Remote analyzer speaking the JSON batch protocol
pub struct HttpTextAnalyzer {
    client: Client,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    endpoint: Url,
}

impl std::fmt::Debug for HttpTextAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTextAnalyzer")
            .field("endpoint", &self.endpoint.as_str())
            .finish_non_exhaustive()
    }
}

impl HttpTextAnalyzer {
    pub fn new(config: &AnalysisConfig) -> Result<Self> {
        let raw = config
            .endpoint
            .as_deref()
            .context("analysis.endpoint is not configured")?;
        let endpoint = Url::parse(&format!("{}/", raw.trim_end_matches('/')))
            .with_context(|| format!("Invalid analysis endpoint: {raw}"))?;

        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(CLIENT_USER_AGENT));
        if let Some(key) = &config.api_key {
            let mut value = HeaderValue::from_str(&format!("Bearer {key}")).context("Invalid API key")?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = Client::builder()
            .timeout(config.request_timeout())
            .default_headers(headers)
            .build()
            .context("Failed to create HTTP client")?;

        let quota = Quota::per_second(
            NonZeroU32::new(config.requests_per_second).context("Rate limit must be greater than 0")?,
        );

        Ok(Self {
            client,
            rate_limiter: RateLimiter::direct(quota),
            endpoint,
        })
    }

    async fn post(&self, path: &str, batch: &[Review]) -> Result<String, AnalyzerError> {
        let url = self
            .endpoint
            .join(path)
            .map_err(|e| AnalyzerError::Unavailable(format!("bad endpoint path {path}: {e}")))?;
        let request = WireRequest {
            reviews: batch
                .iter()
                .enumerate()
                .map(|(index, review)| WireReview {
                    index,
                    id: review.id.as_str(),
                    author: &review.author,
                    rating: review.rating,
                    text: &review.text,
                })
                .collect(),
        };

        self.rate_limiter.until_ready().await;
        tracing::debug!("🌐 POST {} ({} reviews)", url, batch.len());

        let response = self
            .client
            .post(url.clone())
            .json(&request)
            .send()
            .await
            .map_err(|e| AnalyzerError::Network(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            tracing::warn!("⏳ Analysis service rate limited ({:?})", retry_after);
            return Err(AnalyzerError::RateLimited { retry_after });
        }

        let body = response
            .text()
            .await
            .map_err(|e| AnalyzerError::Network(e.to_string()))?;
        if !status.is_success() {
            return Err(AnalyzerError::Http {
                status: status.as_u16(),
                message: body.chars().take(200).collect(),
            });
        }
        Ok(body)
    }
}

/// Place results by their index; an index outside the batch means the response is misaligned
fn align<W, T>(
    results: Vec<W>,
    batch_len: usize,
    index_of: impl Fn(&W) -> usize,
    mut convert: impl FnMut(W) -> T,
) -> Result<Vec<Option<T>>, AnalyzerError> {
    let mut aligned: Vec<Option<T>> = std::iter::repeat_with(|| None).take(batch_len).collect();
    for result in results {
        let index = index_of(&result);
        let slot = aligned
            .get_mut(index)
            .ok_or_else(|| AnalyzerError::Malformed(format!("result index {index} outside batch of {batch_len}")))?;
        *slot = Some(convert(result));
    }
    Ok(aligned)
}

pub fn parse_sentiment_payload(body: &str, batch: &[Review]) -> Result<Vec<Option<SentimentResult>>, AnalyzerError> {
    let parsed: WireResponse<WireSentiment> =
        serde_json::from_str(body).map_err(|e| AnalyzerError::Malformed(e.to_string()))?;
    align(parsed.results, batch.len(), |r| r.index, |r| SentimentResult {
        review_id: batch[r.index].id.clone(),
        sentiment: r.sentiment,
        confidence: r.confidence.clamp(0.0, 1.0),
        mismatch_detected: r.mismatch_detected,
    })
}

pub fn parse_fake_payload(body: &str, batch: &[Review]) -> Result<Vec<Option<FakeReviewResult>>, AnalyzerError> {
    let parsed: WireResponse<WireFake> =
        serde_json::from_str(body).map_err(|e| AnalyzerError::Malformed(e.to_string()))?;
    align(parsed.results, batch.len(), |r| r.index, |r| FakeReviewResult {
        review_id: batch[r.index].id.clone(),
        is_fake: r.is_fake,
        confidence: r.confidence.clamp(0.0, 1.0),
        reasons: r.reasons,
    })
}

#[async_trait]
impl TextAnalyzer for HttpTextAnalyzer {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn analyze_sentiment(&self, batch: &[Review]) -> Result<Vec<Option<SentimentResult>>, AnalyzerError> {
        let body = self.post("sentiment", batch).await?;
        parse_sentiment_payload(&body, batch)
    }

    async fn detect_fake(&self, batch: &[Review]) -> Result<Vec<Option<FakeReviewResult>>, AnalyzerError> {
        let body = self.post("fake-detection", batch).await?;
        parse_fake_payload(&body, batch)
    }
}
