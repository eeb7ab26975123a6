//! Client for the external accrual scoring service.
//!
//! The service is consumed through one endpoint:
//!
//! ```text
//! GET {base}/api/orders/{number}
//!   200 {"order": "...", "status": "REGISTERED|PROCESSING|INVALID|PROCESSED", "accrual"?: 42.5}
//!   204 order unknown to the scoring service
//!   429 rate limited (optionally with Retry-After seconds)
//! ```
//!
//! The client performs exactly one bounded request per call and never retries;
//! interpreting the response and deciding what to do next is the reconciler's
//! job (see [`ScoringResponse::classify`]).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header::RETRY_AFTER, Client, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;

use loyalty_core::{OrderNumber, OrderOutcome};

/// Scoring client configuration.
#[derive(Debug, Clone)]
pub struct ScoringClientConfig {
    /// Base address of the scoring service, e.g. `http://localhost:8081`.
    pub base_url: String,
    /// Upper bound for a single request, connect included.
    pub request_timeout: Duration,
}

impl ScoringClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            request_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Transport-level failure talking to the scoring service.
#[derive(Debug, Error)]
pub enum ScoringError {
    #[error("scoring request timed out")]
    Timeout,

    #[error("scoring request failed: {0}")]
    Transport(String),

    #[error("invalid scoring client configuration: {0}")]
    Config(String),
}

impl From<reqwest::Error> for ScoringError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ScoringError::Timeout
        } else {
            ScoringError::Transport(err.to_string())
        }
    }
}

/// Raw response of one scoring request.
#[derive(Debug, Clone)]
pub struct ScoringResponse {
    pub status: StatusCode,
    pub body: Vec<u8>,
    /// Parsed `Retry-After` header (seconds form only), if any.
    pub retry_after: Option<Duration>,
}

/// Status reported by the scoring service for an order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccrualStatus {
    Registered,
    Processing,
    Invalid,
    Processed,
}

/// Decoded 200 payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AccrualReport {
    pub order: String,
    pub status: AccrualStatus,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub accrual: Option<Decimal>,
}

impl AccrualReport {
    /// Terminal outcome, if the report carries one.
    ///
    /// A `PROCESSED` report without an `accrual` field scored zero points.
    pub fn outcome(&self) -> Option<OrderOutcome> {
        match self.status {
            AccrualStatus::Processed => Some(OrderOutcome::Processed {
                accrual: self.accrual.unwrap_or(Decimal::ZERO),
            }),
            AccrualStatus::Invalid => Some(OrderOutcome::Invalid),
            AccrualStatus::Registered | AccrualStatus::Processing => None,
        }
    }
}

/// Classified scoring response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScoringReply {
    /// 200 with a decodable payload for the requested order.
    Report(AccrualReport),
    /// 429: back off before polling again.
    RateLimited { retry_after: Option<Duration> },
    /// 204: the scoring service does not know the order (yet).
    Unknown,
    /// 200 whose payload could not be decoded, names another order or
    /// carries a negative accrual.
    Malformed(String),
    /// Any other status code.
    Unexpected(StatusCode),
}

impl ScoringResponse {
    /// Interpret the response for `number`.
    pub fn classify(&self, number: &OrderNumber) -> ScoringReply {
        match self.status {
            StatusCode::OK => match serde_json::from_slice::<AccrualReport>(&self.body) {
                Ok(report) if report.order != number.as_str() => ScoringReply::Malformed(format!(
                    "report is for order {}, expected {}",
                    report.order, number
                )),
                Ok(AccrualReport {
                    accrual: Some(accrual),
                    ..
                }) if accrual < Decimal::ZERO => {
                    ScoringReply::Malformed(format!("negative accrual {accrual}"))
                }
                Ok(report) => ScoringReply::Report(report),
                Err(e) => ScoringReply::Malformed(e.to_string()),
            },
            StatusCode::TOO_MANY_REQUESTS => ScoringReply::RateLimited {
                retry_after: self.retry_after,
            },
            StatusCode::NO_CONTENT => ScoringReply::Unknown,
            other => ScoringReply::Unexpected(other),
        }
    }
}

/// One bounded request to the scoring service.
#[async_trait]
pub trait ScoringClient: Send + Sync {
    async fn fetch(&self, number: &OrderNumber) -> Result<ScoringResponse, ScoringError>;
}

/// `reqwest`-backed scoring client.
///
/// Cheap to clone; the underlying connection pool is shared.
#[derive(Debug, Clone)]
pub struct HttpScoringClient {
    client: Client,
    base_url: String,
    request_timeout: Duration,
}

impl HttpScoringClient {
    pub fn new(config: &ScoringClientConfig) -> Result<Self, ScoringError> {
        let base_url = normalize_base_url(&config.base_url)?;
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ScoringError::Config(e.to_string()))?;
        Ok(Self {
            client,
            base_url,
            request_timeout: config.request_timeout,
        })
    }

    fn order_url(&self, number: &OrderNumber) -> String {
        format!("{}/api/orders/{}", self.base_url, number)
    }
}

#[async_trait]
impl ScoringClient for HttpScoringClient {
    async fn fetch(&self, number: &OrderNumber) -> Result<ScoringResponse, ScoringError> {
        let response = self
            .client
            .get(self.order_url(number))
            .timeout(self.request_timeout)
            .send()
            .await?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = response.bytes().await?.to_vec();

        Ok(ScoringResponse {
            status,
            body,
            retry_after,
        })
    }
}

/// Accept `host:port` as well as full URLs; strip trailing slashes.
fn normalize_base_url(raw: &str) -> Result<String, ScoringError> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(ScoringError::Config("scoring service address is empty".into()));
    }
    if trimmed.contains("://") {
        Ok(trimmed.to_string())
    } else {
        Ok(format!("http://{trimmed}"))
    }
}
