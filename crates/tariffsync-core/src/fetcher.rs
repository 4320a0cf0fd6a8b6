//! Dated requests against the box-tariff endpoint.

use std::sync::Arc;

use serde_json::Value;
use time::Date;

use crate::domain::{parse_date, RawApiResponse};
use crate::error::ClassifiedError;
use crate::http_client::{HttpAuth, HttpRequest};
use crate::notify::{Notification, OperatorNotifier};
use crate::resilient::ResilientClient;
use crate::retry::RetryPolicy;

pub const DEFAULT_TARIFF_API_BASE: &str = "https://common-api.wildberries.ru";
const TARIFFS_BOX_PATH: &str = "/api/v1/tariffs/box";

/// Fetches raw box tariffs for one date and reports failures to the operator.
#[derive(Clone)]
pub struct TariffFetcher {
    client: ResilientClient,
    notifier: Arc<dyn OperatorNotifier>,
    base_url: String,
    token: Option<String>,
    policy: RetryPolicy,
}

impl TariffFetcher {
    pub fn new(
        client: ResilientClient,
        notifier: Arc<dyn OperatorNotifier>,
        token: Option<String>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            client,
            notifier,
            base_url: DEFAULT_TARIFF_API_BASE.to_string(),
            token: token.filter(|token| !token.trim().is_empty()),
            policy,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Tariffs for `date` (`YYYY-MM-DD`).
    ///
    /// # Errors
    ///
    /// - `Validation` for a malformed date (no request is made) or a missing token.
    /// - Whatever the HTTP layer classified, after reporting it to the operator.
    /// - `Internal` when the body does not have the expected shape.
    pub async fn fetch_tariffs(&self, date: &str) -> Result<RawApiResponse, ClassifiedError> {
        validate_date(date)?;

        let Some(token) = self.token.as_deref() else {
            let error = ClassifiedError::credential_missing();
            self.notifier
                .notify(
                    Notification::new("Tariff API credential missing")
                        .with_code(error.code())
                        .with_description("WB_API_TOKEN is not set; tariffs were not fetched"),
                )
                .await;
            return Err(error);
        };

        let request = HttpRequest::get(format!(
            "{}{TARIFFS_BOX_PATH}?date={}",
            self.base_url,
            urlencoding::encode(date)
        ))
        .with_header("accept", "application/json")
        .with_auth(&HttpAuth::BearerToken(token.to_string()));

        tracing::debug!(date, "fetching box tariffs");
        let body = match self.client.execute(&request, &self.policy).await {
            Ok(body) => body,
            Err(error) => {
                self.report(&error).await;
                return Err(error);
            }
        };

        match decode_payload(body) {
            Ok(payload) => {
                tracing::info!(
                    date,
                    warehouses = payload.response.data.warehouse_list.len(),
                    "fetched box tariffs"
                );
                Ok(payload)
            }
            Err(error) => {
                self.report(&error).await;
                Err(error)
            }
        }
    }

    async fn report(&self, error: &ClassifiedError) {
        tracing::error!(kind = %error.kind(), status = ?error.status(), error = %error, "tariff API call failed");
        let code = error
            .status()
            .map_or_else(|| error.code().to_string(), |status| status.to_string());
        self.notifier
            .notify(
                Notification::new("Tariff API request failed")
                    .with_code(code)
                    .with_description(error.summary()),
            )
            .await;
    }
}

fn decode_payload(body: Value) -> Result<RawApiResponse, ClassifiedError> {
    if body.is_null() {
        return Ok(RawApiResponse::default());
    }
    serde_json::from_value(body).map_err(|error| {
        ClassifiedError::internal(format!("unexpected tariff payload shape: {error}"))
    })
}

/// Accept only `YYYY-MM-DD` strings naming a real calendar date.
pub fn validate_date(date: &str) -> Result<Date, ClassifiedError> {
    let bytes = date.as_bytes();
    let shaped = bytes.len() == 10
        && bytes.iter().enumerate().all(|(index, byte)| match index {
            4 | 7 => *byte == b'-',
            _ => byte.is_ascii_digit(),
        });
    if !shaped {
        return Err(ClassifiedError::validation(format!(
            "date '{date}' must match YYYY-MM-DD"
        )));
    }

    parse_date(date).ok_or_else(|| {
        ClassifiedError::validation(format!("date '{date}' is not a calendar date"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::http_client::{HttpResponse, ScriptedHttpClient, ScriptedReply};
    use crate::notify::RecordingNotifier;
    use std::time::Duration;
    use time::macros::date;

    fn fetcher(
        transport: &ScriptedHttpClient,
        notifier: &RecordingNotifier,
        token: Option<&str>,
    ) -> TariffFetcher {
        TariffFetcher::new(
            ResilientClient::new(Arc::new(transport.clone())),
            Arc::new(notifier.clone()),
            token.map(str::to_string),
            RetryPolicy::new(
                2,
                Duration::from_millis(10),
                Duration::from_millis(20),
                Duration::from_millis(100),
            ),
        )
        .with_base_url("https://tariffs.test/")
    }

    #[test]
    fn dates_must_be_zero_padded_calendar_dates() {
        assert_eq!(validate_date("2026-10-18"), Ok(date!(2026 - 10 - 18)));
        for bad in ["2024-9-3", "2024/09/03", "20240903", "2024-13-01", "2023-02-29", " 2024-09-03"] {
            let error = validate_date(bad).expect_err(bad);
            assert_eq!(error.kind(), ErrorKind::Validation, "{bad}");
        }
    }

    #[tokio::test]
    async fn malformed_date_makes_no_request() {
        let transport = ScriptedHttpClient::new();
        let notifier = RecordingNotifier::new();

        let error = fetcher(&transport, &notifier, Some("token"))
            .fetch_tariffs("2024-9-3")
            .await
            .expect_err("invalid date");

        assert_eq!(error.kind(), ErrorKind::Validation);
        assert_eq!(transport.request_count(), 0);
        assert!(notifier.notifications().is_empty());
    }

    #[tokio::test]
    async fn missing_token_is_reported_before_failing() {
        let transport = ScriptedHttpClient::new();
        let notifier = RecordingNotifier::new();

        let error = fetcher(&transport, &notifier, Some("  "))
            .fetch_tariffs("2026-10-18")
            .await
            .expect_err("no token");

        assert_eq!(error.kind(), ErrorKind::Validation);
        assert_eq!(transport.request_count(), 0);
        assert_eq!(notifier.notifications().len(), 1);
        assert_eq!(notifier.notifications()[0].title, "Tariff API credential missing");
    }

    #[tokio::test]
    async fn request_carries_date_and_headers() {
        let transport = ScriptedHttpClient::new();
        transport.push_response(HttpResponse::ok_json(
            r#"{"response":{"data":{"dtNextBox":"","dtTillMax":"2026-10-31","warehouseList":[{"warehouseName":"Коледино"}]}}}"#,
        ));
        let notifier = RecordingNotifier::new();

        let payload = fetcher(&transport, &notifier, Some("secret"))
            .fetch_tariffs("2026-10-18")
            .await
            .expect("payload");

        assert_eq!(payload.response.data.warehouse_list.len(), 1);
        let request = &transport.requests()[0];
        assert_eq!(request.url, "https://tariffs.test/api/v1/tariffs/box?date=2026-10-18");
        assert_eq!(request.headers.get("authorization").map(String::as_str), Some("Bearer secret"));
        assert_eq!(request.headers.get("accept").map(String::as_str), Some("application/json"));
    }

    #[tokio::test]
    async fn upstream_rejection_is_reported_once_and_returned_unchanged() {
        let transport = ScriptedHttpClient::new();
        transport.push_response(HttpResponse::new(
            401,
            r#"{"title":"unauthorized","detail":"token expired","requestId":"a1b2","origin":"s2s-api-auth-tariffs"}"#,
        ));
        let notifier = RecordingNotifier::new();

        let error = fetcher(&transport, &notifier, Some("stale"))
            .fetch_tariffs("2026-10-18")
            .await
            .expect_err("rejected");

        assert_eq!(error.kind(), ErrorKind::UpstreamRejected);
        assert_eq!(error.body().and_then(|body| body.detail.as_deref()), Some("token expired"));

        let sent = notifier.notifications();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].code.as_deref(), Some("401"));
        let description = sent[0].description.as_deref().unwrap_or_default();
        assert!(description.contains("Title: unauthorized"));
        assert!(description.contains("Request ID: a1b2"));
    }

    #[tokio::test]
    async fn empty_body_maps_to_empty_response() {
        let transport = ScriptedHttpClient::always(ScriptedReply::Response(HttpResponse::new(204, "")));
        let notifier = RecordingNotifier::new();

        let payload = fetcher(&transport, &notifier, Some("token"))
            .fetch_tariffs("2026-10-18")
            .await
            .expect("204");

        assert_eq!(payload, RawApiResponse::default());
    }

    #[tokio::test]
    async fn incompatible_shape_is_internal() {
        let transport = ScriptedHttpClient::new();
        transport.push_response(HttpResponse::ok_json(r#"{"response":{"data":{"warehouseList":"oops"}}}"#));
        let notifier = RecordingNotifier::new();

        let error = fetcher(&transport, &notifier, Some("token"))
            .fetch_tariffs("2026-10-18")
            .await
            .expect_err("shape");

        assert_eq!(error.kind(), ErrorKind::Internal);
        assert_eq!(notifier.notifications().len(), 1);
    }
}
