//! 알림 싱크 -- 외부 채팅 플랫폼으로의 전송
//!
//! [`NotificationSink`]는 전송 한 건의 결과만 알려 줍니다. 재시도와 속도 조절은
//! [`DeliveryBatcher`](crate::batcher::DeliveryBatcher)가 담당합니다.
//!
//! | 응답 | 결과 | 배처 동작 |
//! |---|---|---|
//! | 2xx | `Delivered` | 완료 |
//! | 429 | `Throttled` | 이번 사이클 동안 목적지 중단, 작업 유지 |
//! | 그 밖의 4xx | `SinkError::Rejected` | 작업 폐기 |
//! | 5xx, 네트워크 | `SinkError::Transport` | 목적지 중단, 작업 유지 |

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::RETRY_AFTER;
use tailpost_core::config::SinkConfig;
use tailpost_core::pipeline::BoxFuture;
use tracing::{debug, info};

use crate::notify::NotificationPayload;

const MAX_ERROR_BODY: usize = 512;

/// 전송 한 건의 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// 전달됨
    Delivered,
    /// 싱크가 속도 제한을 알림
    Throttled {
        /// 싱크가 제시한 대기 시간
        retry_after: Option<Duration>,
    },
}

/// 싱크 에러
#[derive(Debug, Clone, thiserror::Error)]
pub enum SinkError {
    /// 네트워크/서버 측 실패 (재시도 가능)
    #[error("sink transport error: {0}")]
    Transport(String),

    /// 싱크가 요청을 거부함 (재시도하지 않음)
    #[error("sink rejected notification with status {status}: {body}")]
    Rejected {
        /// HTTP 상태 코드
        status: u16,
        /// 응답 본문 (잘림)
        body: String,
    },

    /// 전송 시간 초과
    #[error("sink call timed out")]
    Timeout,

    /// 설정되지 않은 목적지
    #[error("no endpoint configured for destination '{0}'")]
    UnknownDestination(String),

    /// 잘못된 웹훅 URL
    #[error("invalid webhook url for destination '{destination}': {reason}")]
    InvalidUrl {
        /// 목적지 ID
        destination: String,
        /// 사유
        reason: String,
    },
}

impl SinkError {
    /// 작업을 다시 시도할 가치가 있는지 확인합니다.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout)
    }
}

/// 알림 싱크 인터페이스
pub trait NotificationSink: Send + Sync {
    /// 목적지로 알림 한 건을 보냅니다.
    fn send<'a>(
        &'a self,
        destination: &'a str,
        payload: &'a NotificationPayload,
    ) -> BoxFuture<'a, Result<SendOutcome, SinkError>>;
}

/// HTTP 웹훅 싱크
///
/// 목적지 ID마다 설정된 URL로 JSON 본문을 POST합니다.
#[derive(Debug, Clone)]
pub struct WebhookSink {
    client: reqwest::Client,
    webhooks: BTreeMap<String, String>,
}

impl WebhookSink {
    /// 목적지 → URL 매핑과 요청 타임아웃으로 싱크를 생성합니다.
    ///
    /// URL은 생성 시점에 http/https인지 검증합니다.
    pub fn new(webhooks: BTreeMap<String, String>, timeout: Duration) -> Result<Self, SinkError> {
        for (destination, url) in &webhooks {
            let invalid = |reason: String| SinkError::InvalidUrl {
                destination: destination.clone(),
                reason,
            };
            let parsed = reqwest::Url::parse(url).map_err(|e| invalid(e.to_string()))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(invalid(format!("unsupported scheme '{}'", parsed.scheme())));
            }
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("tailpost/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SinkError::Transport(format!("failed to build http client: {e}")))?;
        Ok(Self { client, webhooks })
    }

    /// `[sink]` 설정으로 싱크를 생성합니다.
    pub fn from_config(config: &SinkConfig) -> Result<Self, SinkError> {
        Self::new(
            config.webhooks.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    /// 설정된 목적지 수
    pub fn destination_count(&self) -> usize {
        self.webhooks.len()
    }

    async fn post(
        &self,
        destination: &str,
        payload: &NotificationPayload,
    ) -> Result<SendOutcome, SinkError> {
        let url = self
            .webhooks
            .get(destination)
            .ok_or_else(|| SinkError::UnknownDestination(destination.to_owned()))?;

        let response = self
            .client
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SinkError::Timeout
                } else {
                    SinkError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(SendOutcome::Delivered);
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            debug!(destination, ?retry_after, "webhook throttled");
            return Ok(SendOutcome::Throttled { retry_after });
        }
        if status.is_server_error() {
            return Err(SinkError::Transport(format!("server responded {status}")));
        }

        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }
        Err(SinkError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

impl NotificationSink for WebhookSink {
    fn send<'a>(
        &'a self,
        destination: &'a str,
        payload: &'a NotificationPayload,
    ) -> BoxFuture<'a, Result<SendOutcome, SinkError>> {
        Box::pin(self.post(destination, payload))
    }
}

/// `Retry-After` 초 값을 해석합니다. 소수점 초도 허용합니다.
fn parse_retry_after(value: &str) -> Option<Duration> {
    let secs: f64 = value.trim().parse().ok()?;
    if secs.is_finite() && secs >= 0.0 {
        Some(Duration::from_secs_f64(secs))
    } else {
        None
    }
}

/// 로그로만 남기는 싱크
///
/// 웹훅이 하나도 설정되지 않았을 때 데몬이 사용합니다.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn send<'a>(
        &'a self,
        destination: &'a str,
        payload: &'a NotificationPayload,
    ) -> BoxFuture<'a, Result<SendOutcome, SinkError>> {
        info!(
            destination,
            tenant = %payload.tenant_id,
            source = %payload.source_id,
            kind = %payload.kind,
            title = %payload.title,
            "notification"
        );
        Box::pin(async { Ok(SendOutcome::Delivered) })
    }
}
