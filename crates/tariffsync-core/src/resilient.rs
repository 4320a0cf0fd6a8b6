//! Retrying executor on top of an [`HttpClient`] transport.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::error::{ClassifiedError, UpstreamErrorBody};
use crate::http_client::{HttpClient, HttpErrorKind, HttpRequest, HttpResponse};
use crate::retry::{parse_retry_after, RetryPolicy};

/// Issues one logical request with per-attempt timeouts, bounded retries and
/// failure classification.
///
/// | Outcome of an attempt | Not last attempt | Last attempt |
/// |---|---|---|
/// | 2xx | JSON body (`null` for 204, `{}` when unparsable) | same |
/// | 429 / 5xx | wait `Retry-After` or backoff, retry | `RateLimited` / `ServerTransient` |
/// | other status | `UpstreamRejected` | same |
/// | deadline passed | wait backoff, retry | `Timeout` |
/// | connection failure | `Network` | same |
#[derive(Clone)]
pub struct ResilientClient {
    transport: Arc<dyn HttpClient>,
}

impl ResilientClient {
    pub fn new(transport: Arc<dyn HttpClient>) -> Self {
        Self { transport }
    }

    /// Run `request` under `policy`.
    ///
    /// # Errors
    ///
    /// Returns a [`ClassifiedError`] once the request cannot succeed; transient failures
    /// are retried internally until `policy.attempts` is spent.
    pub async fn execute(
        &self,
        request: &HttpRequest,
        policy: &RetryPolicy,
    ) -> Result<Value, ClassifiedError> {
        let attempts = policy.attempts.max(1);

        for attempt in 1..=attempts {
            let last_attempt = attempt == attempts;
            let outgoing = request.clone().with_timeout_ms(policy.timeout_ms());
            let outcome = tokio::time::timeout(policy.timeout, self.transport.execute(outgoing)).await;

            let response = match outcome {
                Ok(Ok(response)) => response,
                Ok(Err(error)) if error.kind() != HttpErrorKind::Timeout => {
                    tracing::warn!(url = %request.url, attempt, error = %error, "request failed before a response");
                    return Err(ClassifiedError::network(error.message()));
                }
                Ok(Err(_)) | Err(_) => {
                    if last_attempt {
                        return Err(ClassifiedError::timeout(format!(
                            "no response within {}ms after {attempts} attempt(s)",
                            policy.timeout_ms()
                        )));
                    }
                    let wait = policy.backoff_delay(attempt);
                    tracing::warn!(url = %request.url, attempt, wait_ms = millis(wait), "attempt timed out, retrying");
                    tokio::time::sleep(wait).await;
                    continue;
                }
            };

            if response.is_success() {
                return Ok(success_body(&response));
            }

            let retry_after = response.header("retry-after").and_then(parse_retry_after);
            let transient = response.status == 429 || (500..=599).contains(&response.status);
            if transient && !last_attempt {
                let wait = retry_after.unwrap_or_else(|| policy.backoff_delay(attempt));
                tracing::warn!(
                    url = %request.url,
                    status = response.status,
                    attempt,
                    wait_ms = millis(wait),
                    honored_retry_after = retry_after.is_some(),
                    "transient upstream status, retrying"
                );
                tokio::time::sleep(wait).await;
                continue;
            }

            return Err(ClassifiedError::from_status(
                response.status,
                response.status_text.as_str(),
                UpstreamErrorBody::parse(&response.body),
                retry_after,
            ));
        }

        Err(ClassifiedError::internal(
            "retry loop ended without a terminal outcome",
        ))
    }
}

fn success_body(response: &HttpResponse) -> Value {
    if response.status == 204 {
        return Value::Null;
    }
    serde_json::from_str(&response.body).unwrap_or_else(|error| {
        tracing::debug!(status = response.status, error = %error, "success body is not JSON, using empty object");
        Value::Object(serde_json::Map::new())
    })
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
