//! Spreadsheet mirror of the latest snapshot set.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::{json, Value};
use thiserror::Error;

use crate::auth::AccessTokenProvider;
use crate::domain::{format_date, TariffSnapshot};
use crate::error::ClassifiedError;
use crate::http_client::{HttpAuth, HttpRequest};
use crate::resilient::ResilientClient;
use crate::retry::RetryPolicy;

pub const DEFAULT_SHEETS_API_BASE: &str = "https://sheets.googleapis.com";
pub const DEFAULT_SHEET_RANGE: &str = "stocks_coefs!A1";

/// Header row written above the snapshot rows.
pub const SHEET_HEADER: [&str; 14] = [
    "date",
    "warehouseName",
    "geoName",
    "boxDeliveryBase",
    "boxDeliveryCoefExpr",
    "boxDeliveryLiter",
    "boxDeliveryMarketplaceBase",
    "boxDeliveryMarketplaceCoefExpr",
    "boxDeliveryMarketplaceLiter",
    "boxStorageBase",
    "boxStorageCoefExpr",
    "boxStorageLiter",
    "dtNextBox",
    "dtTillMax",
];

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("sheets credentials are not configured")]
    MissingCredential,

    #[error("could not obtain a sheets access token: {0}")]
    Auth(#[source] ClassifiedError),

    #[error("failed to update spreadsheet '{spreadsheet_id}': {source}")]
    Sheet {
        spreadsheet_id: String,
        #[source]
        source: ClassifiedError,
    },
}

/// Destination for an already-sorted snapshot list.
pub trait SnapshotMirror: Send + Sync {
    /// Replace the mirrored view with `snapshots`, returning how many targets were updated.
    fn mirror<'a>(
        &'a self,
        snapshots: &'a [TariffSnapshot],
    ) -> Pin<Box<dyn Future<Output = Result<usize, MirrorError>> + Send + 'a>>;
}

/// Writes snapshots into one or more Google spreadsheets.
///
/// Each spreadsheet's target sheet is cleared with `values.clear` before `values.update`
/// writes the new table, so rows left over from a longer earlier run disappear.
#[derive(Clone)]
pub struct GoogleSheetsMirror {
    client: ResilientClient,
    tokens: Option<Arc<dyn AccessTokenProvider>>,
    spreadsheet_ids: Vec<String>,
    range: String,
    policy: RetryPolicy,
    api_base: String,
}

impl GoogleSheetsMirror {
    pub fn new(
        client: ResilientClient,
        tokens: Option<Arc<dyn AccessTokenProvider>>,
        spreadsheet_ids: Vec<String>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            client,
            tokens,
            spreadsheet_ids,
            range: DEFAULT_SHEET_RANGE.to_string(),
            policy,
            api_base: DEFAULT_SHEETS_API_BASE.to_string(),
        }
    }

    pub fn with_range(mut self, range: impl Into<String>) -> Self {
        self.range = range.into();
        self
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    /// The whole sheet named by the range, e.g. `stocks_coefs` for `stocks_coefs!A1`.
    fn clear_range(&self) -> &str {
        self.range
            .rsplit_once('!')
            .map_or(self.range.as_str(), |(sheet, _)| sheet)
    }

    fn clear_url(&self, spreadsheet_id: &str) -> String {
        format!(
            "{}/v4/spreadsheets/{}/values/{}:clear",
            self.api_base,
            urlencoding::encode(spreadsheet_id),
            urlencoding::encode(self.clear_range())
        )
    }

    fn update_url(&self, spreadsheet_id: &str) -> String {
        format!(
            "{}/v4/spreadsheets/{}/values/{}?valueInputOption=RAW",
            self.api_base,
            urlencoding::encode(spreadsheet_id),
            urlencoding::encode(&self.range)
        )
    }
}

impl SnapshotMirror for GoogleSheetsMirror {
    fn mirror<'a>(
        &'a self,
        snapshots: &'a [TariffSnapshot],
    ) -> Pin<Box<dyn Future<Output = Result<usize, MirrorError>> + Send + 'a>> {
        Box::pin(async move {
            if self.spreadsheet_ids.is_empty() {
                tracing::warn!("no spreadsheet ids configured, skipping sheet update");
                return Ok(0);
            }
            let tokens = self.tokens.as_ref().ok_or(MirrorError::MissingCredential)?;
            let token = tokens.access_token().await.map_err(MirrorError::Auth)?;
            let auth = HttpAuth::BearerToken(token);

            let body = json!({ "values": sheet_values(snapshots) });
            for spreadsheet_id in &self.spreadsheet_ids {
                let sheet_error = |source: ClassifiedError| MirrorError::Sheet {
                    spreadsheet_id: spreadsheet_id.clone(),
                    source,
                };

                let clear = HttpRequest::post(self.clear_url(spreadsheet_id))
                    .with_auth(&auth)
                    .with_json(&json!({}));
                self.client
                    .execute(&clear, &self.policy)
                    .await
                    .map_err(sheet_error)?;

                let update = HttpRequest::put(self.update_url(spreadsheet_id))
                    .with_auth(&auth)
                    .with_json(&body);
                self.client
                    .execute(&update, &self.policy)
                    .await
                    .map_err(sheet_error)?;
                tracing::info!(spreadsheet_id = %spreadsheet_id, rows = snapshots.len(), "spreadsheet updated");
            }

            Ok(self.spreadsheet_ids.len())
        })
    }
}

/// Header plus one row per snapshot, in the given order. `NaN` becomes an empty cell.
pub fn sheet_values(snapshots: &[TariffSnapshot]) -> Vec<Vec<Value>> {
    let mut values = Vec::with_capacity(snapshots.len() + 1);
    values.push(SHEET_HEADER.iter().map(|name| Value::from(*name)).collect());

    for snapshot in snapshots {
        let mut row = Vec::with_capacity(SHEET_HEADER.len());
        row.push(Value::from(format_date(snapshot.date)));
        row.push(Value::from(snapshot.warehouse_name.as_str()));
        row.push(Value::from(snapshot.geo_name.as_str()));
        row.extend(snapshot.rates().into_iter().map(rate_cell));
        row.push(Value::from(snapshot.dt_next_box.as_str()));
        row.push(Value::from(snapshot.dt_till_max.as_str()));
        values.push(row);
    }
    values
}

fn rate_cell(rate: f64) -> Value {
    serde_json::Number::from_f64(rate)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(String::new()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticToken;
    use crate::error::ErrorKind;
    use crate::http_client::{HttpMethod, HttpResponse, ScriptedHttpClient, ScriptedReply};
    use std::time::Duration;
    use time::macros::date;

    fn snapshot(name: &str, coef: f64) -> TariffSnapshot {
        TariffSnapshot {
            date: date!(2026 - 10 - 18),
            warehouse_name: name.to_string(),
            geo_name: "Сибирский федеральный округ".to_string(),
            dt_next_box: String::new(),
            dt_till_max: "2026-10-31".to_string(),
            box_delivery_base: 50.0,
            box_delivery_coef_expr: coef,
            box_delivery_liter: 12.0,
            box_delivery_marketplace_base: 50.0,
            box_delivery_marketplace_coef_expr: coef,
            box_delivery_marketplace_liter: 12.0,
            box_storage_base: f64::NAN,
            box_storage_coef_expr: 1.0,
            box_storage_liter: 0.05,
        }
    }

    fn mirror(transport: &ScriptedHttpClient, ids: &[&str], token: Option<&str>) -> GoogleSheetsMirror {
        let tokens = token.map(|token| Arc::new(StaticToken::new(token)) as Arc<dyn AccessTokenProvider>);
        GoogleSheetsMirror::new(
            ResilientClient::new(Arc::new(transport.clone())),
            tokens,
            ids.iter().map(|id| id.to_string()).collect(),
            RetryPolicy::no_retry(Duration::from_secs(1)),
        )
        .with_api_base("https://sheets.test")
    }

    struct FailingTokens;

    impl AccessTokenProvider for FailingTokens {
        fn access_token<'a>(
            &'a self,
        ) -> Pin<Box<dyn Future<Output = Result<String, ClassifiedError>> + Send + 'a>> {
            Box::pin(async { Err(ClassifiedError::network("token endpoint unreachable")) })
        }
    }

    #[test]
    fn values_start_with_header_and_blank_out_nan() {
        let values = sheet_values(&[snapshot("Новосибирск", 1.3)]);

        assert_eq!(values.len(), 2);
        assert_eq!(values[0].len(), 14);
        assert_eq!(values[0][4], "boxDeliveryCoefExpr");
        assert_eq!(values[1][0], "2026-10-18");
        assert_eq!(values[1][4], 1.3);
        assert_eq!(values[1][9], "");
        assert_eq!(values[1][13], "2026-10-31");
    }

    #[tokio::test]
    async fn each_spreadsheet_is_cleared_then_written() {
        let transport = ScriptedHttpClient::always(ScriptedReply::Response(HttpResponse::ok_json("{}")));

        let updated = mirror(&transport, &["sheet-a", "sheet-b"], Some("ya29.token"))
            .mirror(&[snapshot("Новосибирск", 1.3)])
            .await
            .expect("mirror");

        assert_eq!(updated, 2);
        let requests = transport.requests();
        assert_eq!(requests.len(), 4);
        assert_eq!(requests[0].method, HttpMethod::Post);
        assert_eq!(
            requests[0].url,
            "https://sheets.test/v4/spreadsheets/sheet-a/values/stocks_coefs:clear"
        );
        assert_eq!(requests[1].method, HttpMethod::Put);
        assert_eq!(
            requests[3].url,
            "https://sheets.test/v4/spreadsheets/sheet-b/values/stocks_coefs%21A1?valueInputOption=RAW"
        );
        assert!(requests.iter().all(|request| {
            request.headers.get("authorization").map(String::as_str) == Some("Bearer ya29.token")
        }));
        let body: Value = serde_json::from_str(requests[1].body.as_deref().expect("body")).expect("json");
        assert_eq!(body["values"].as_array().map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn a_shorter_table_leaves_no_stale_rows_behind() {
        let transport = ScriptedHttpClient::always(ScriptedReply::Response(HttpResponse::ok_json("{}")));
        let mirror = mirror(&transport, &["sheet-a"], Some("token"));

        mirror
            .mirror(&[snapshot("Новосибирск", 1.3), snapshot("Омск", 1.1)])
            .await
            .expect("first run");
        mirror.mirror(&[snapshot("Омск", 1.1)]).await.expect("second run");

        let requests = transport.requests();
        assert_eq!(requests.len(), 4);
        assert!(requests[2].url.ends_with("/values/stocks_coefs:clear"));
        let body: Value = serde_json::from_str(requests[3].body.as_deref().expect("body")).expect("json");
        assert_eq!(body["values"].as_array().map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn quoted_sheet_names_are_cleared_whole() {
        let transport = ScriptedHttpClient::always(ScriptedReply::Response(HttpResponse::ok_json("{}")));

        mirror(&transport, &["sheet-a"], Some("token"))
            .with_range("'Box tariffs'!B2")
            .mirror(&[])
            .await
            .expect("mirror");

        assert_eq!(
            transport.requests()[0].url,
            "https://sheets.test/v4/spreadsheets/sheet-a/values/%27Box%20tariffs%27:clear"
        );
    }

    #[tokio::test]
    async fn no_ids_is_a_quiet_no_op() {
        let transport = ScriptedHttpClient::new();

        let updated = mirror(&transport, &[], None).mirror(&[]).await.expect("skip");

        assert_eq!(updated, 0);
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn missing_credentials_fail_before_any_request() {
        let transport = ScriptedHttpClient::new();

        let error = mirror(&transport, &["sheet-a"], None)
            .mirror(&[])
            .await
            .expect_err("no token");

        assert!(matches!(error, MirrorError::MissingCredential));
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn token_failures_stop_before_touching_sheets() {
        let transport = ScriptedHttpClient::new();
        let mirror = GoogleSheetsMirror::new(
            ResilientClient::new(Arc::new(transport.clone())),
            Some(Arc::new(FailingTokens)),
            vec!["sheet-a".to_string()],
            RetryPolicy::no_retry(Duration::from_secs(1)),
        );

        let error = mirror.mirror(&[]).await.expect_err("no token");

        assert!(matches!(error, MirrorError::Auth(ref source) if source.kind() == ErrorKind::Network));
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn rejected_update_names_the_spreadsheet() {
        let transport = ScriptedHttpClient::new();
        transport
            .push_response(HttpResponse::ok_json("{}"))
            .push_response(HttpResponse::new(403, r#"{"error":{"code":403}}"#));

        let error = mirror(&transport, &["sheet-a", "sheet-b"], Some("token"))
            .mirror(&[snapshot("Новосибирск", 1.3)])
            .await
            .expect_err("forbidden");

        match error {
            MirrorError::Sheet { spreadsheet_id, source } => {
                assert_eq!(spreadsheet_id, "sheet-a");
                assert_eq!(source.kind(), ErrorKind::UpstreamRejected);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(transport.request_count(), 2);
    }
}
