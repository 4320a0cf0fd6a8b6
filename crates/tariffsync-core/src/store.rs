//! Snapshot persistence seam and its DuckDB-backed implementation.

use std::future::Future;
use std::pin::Pin;

use tariffsync_warehouse::{RateRecord, RunRecord, Warehouse, WarehouseError};
use thiserror::Error;
use time::{Date, UtcOffset};

use crate::domain::{format_date, parse_date, today_in, TariffSnapshot};
use crate::sync::SyncRun;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Warehouse(#[from] WarehouseError),

    #[error("stored row has an unreadable date '{0}'")]
    CorruptDate(String),

    #[error("storage task failed: {0}")]
    Background(String),
}

impl StoreError {
    /// Rows committed before a partially applied batch stopped.
    pub fn rows_written(&self) -> Option<usize> {
        match self {
            Self::Warehouse(WarehouseError::BatchInterrupted { written, .. }) => Some(*written),
            _ => None,
        }
    }
}

/// Persistence contract the orchestrator depends on.
pub trait TariffStore: Send + Sync {
    /// Upsert every snapshot keyed by `(date, warehouse_name)`; returns rows written.
    ///
    /// Each row is atomic, the batch is not.
    fn save<'a>(
        &'a self,
        snapshots: &'a [TariffSnapshot],
    ) -> Pin<Box<dyn Future<Output = Result<usize, StoreError>> + Send + 'a>>;

    /// Snapshots of `date` (today in the store's offset when `None`), ordered by
    /// `boxDeliveryCoefExpr` ascending.
    fn latest<'a>(
        &'a self,
        date: Option<Date>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<TariffSnapshot>, StoreError>> + Send + 'a>>;

    /// Append a run to the audit log.
    fn record_run<'a>(
        &'a self,
        run: &'a SyncRun,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>>;
}

/// [`TariffStore`] over the DuckDB warehouse. Blocking calls run on the blocking pool.
#[derive(Clone)]
pub struct SnapshotStore {
    warehouse: Warehouse,
    offset: UtcOffset,
}

impl SnapshotStore {
    pub fn new(warehouse: Warehouse, offset: UtcOffset) -> Self {
        Self { warehouse, offset }
    }

    pub fn warehouse(&self) -> &Warehouse {
        &self.warehouse
    }

    pub fn today(&self) -> Date {
        today_in(self.offset)
    }

    async fn blocking<T, F>(&self, task: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(Warehouse) -> Result<T, StoreError> + Send + 'static,
    {
        let warehouse = self.warehouse.clone();
        tokio::task::spawn_blocking(move || task(warehouse))
            .await
            .map_err(|error| StoreError::Background(error.to_string()))?
    }
}

impl TariffStore for SnapshotStore {
    fn save<'a>(
        &'a self,
        snapshots: &'a [TariffSnapshot],
    ) -> Pin<Box<dyn Future<Output = Result<usize, StoreError>> + Send + 'a>> {
        let records: Vec<RateRecord> = snapshots.iter().map(to_record).collect();
        Box::pin(async move {
            self.blocking(move |warehouse| Ok(warehouse.upsert_rates(&records)?))
                .await
        })
    }

    fn latest<'a>(
        &'a self,
        date: Option<Date>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<TariffSnapshot>, StoreError>> + Send + 'a>> {
        let date = format_date(date.unwrap_or_else(|| self.today()));
        Box::pin(async move {
            self.blocking(move |warehouse| {
                warehouse
                    .rates_for_date(&date)?
                    .into_iter()
                    .map(from_record)
                    .collect()
            })
            .await
        })
    }

    fn record_run<'a>(
        &'a self,
        run: &'a SyncRun,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>> {
        let record = RunRecord {
            run_id: run.run_id.to_string(),
            flow: run.flow.as_str().to_string(),
            target_date: run.target_date.map(format_date),
            status: run.status.as_str().to_string(),
            row_count: u64::try_from(run.row_count).unwrap_or(u64::MAX),
            latency_ms: run.latency_ms(),
            detail: run.detail.clone(),
        };
        Box::pin(async move {
            self.blocking(move |warehouse| Ok(warehouse.record_run(&record)?))
                .await
        })
    }
}

fn to_record(snapshot: &TariffSnapshot) -> RateRecord {
    RateRecord {
        date: format_date(snapshot.date),
        warehouse_name: snapshot.warehouse_name.clone(),
        geo_name: snapshot.geo_name.clone(),
        dt_next_box: snapshot.dt_next_box.clone(),
        dt_till_max: snapshot.dt_till_max.clone(),
        box_delivery_base: snapshot.box_delivery_base,
        box_delivery_coef_expr: snapshot.box_delivery_coef_expr,
        box_delivery_liter: snapshot.box_delivery_liter,
        box_delivery_marketplace_base: snapshot.box_delivery_marketplace_base,
        box_delivery_marketplace_coef_expr: snapshot.box_delivery_marketplace_coef_expr,
        box_delivery_marketplace_liter: snapshot.box_delivery_marketplace_liter,
        box_storage_base: snapshot.box_storage_base,
        box_storage_coef_expr: snapshot.box_storage_coef_expr,
        box_storage_liter: snapshot.box_storage_liter,
    }
}

fn from_record(record: RateRecord) -> Result<TariffSnapshot, StoreError> {
    let date = parse_date(&record.date).ok_or_else(|| StoreError::CorruptDate(record.date.clone()))?;
    Ok(TariffSnapshot {
        date,
        warehouse_name: record.warehouse_name,
        geo_name: record.geo_name,
        dt_next_box: record.dt_next_box,
        dt_till_max: record.dt_till_max,
        box_delivery_base: record.box_delivery_base,
        box_delivery_coef_expr: record.box_delivery_coef_expr,
        box_delivery_liter: record.box_delivery_liter,
        box_delivery_marketplace_base: record.box_delivery_marketplace_base,
        box_delivery_marketplace_coef_expr: record.box_delivery_marketplace_coef_expr,
        box_delivery_marketplace_liter: record.box_delivery_marketplace_liter,
        box_storage_base: record.box_storage_base,
        box_storage_coef_expr: record.box_storage_coef_expr,
        box_storage_liter: record.box_storage_liter,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::{Flow, RunStatus};
    use std::time::Duration;
    use tariffsync_warehouse::{QueryGuardrails, WarehouseConfig};
    use tempfile::TempDir;
    use time::macros::{date, offset};

    fn open_store() -> (TempDir, SnapshotStore) {
        let temp = tempfile::tempdir().expect("tempdir");
        let warehouse =
            Warehouse::open(WarehouseConfig::new(temp.path().join("warehouse.duckdb"))).expect("open");
        (temp, SnapshotStore::new(warehouse, offset!(+3)))
    }

    fn snapshot(date: Date, name: &str, coef: f64) -> TariffSnapshot {
        TariffSnapshot {
            date,
            warehouse_name: name.to_string(),
            geo_name: "Центральный федеральный округ".to_string(),
            dt_next_box: String::new(),
            dt_till_max: "2026-10-31".to_string(),
            box_delivery_base: 46.0,
            box_delivery_coef_expr: coef,
            box_delivery_liter: 14.0,
            box_delivery_marketplace_base: 46.0,
            box_delivery_marketplace_coef_expr: coef,
            box_delivery_marketplace_liter: 14.0,
            box_storage_base: 0.1,
            box_storage_coef_expr: 1.15,
            box_storage_liter: f64::NAN,
        }
    }

    #[tokio::test]
    async fn saving_twice_is_idempotent() {
        let (_temp, store) = open_store();
        let day = date!(2026 - 10 - 18);
        let batch = [snapshot(day, "Коледино", 1.05), snapshot(day, "Казань", 0.95)];

        assert_eq!(store.save(&batch).await.expect("first"), 2);
        assert_eq!(store.save(&batch).await.expect("second"), 2);

        let rows = store.latest(Some(day)).await.expect("latest");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].warehouse_name, "Казань");
        assert!(rows[0].box_storage_liter.is_nan());
    }

    #[tokio::test]
    async fn later_batch_wins_for_the_same_key() {
        let (_temp, store) = open_store();
        let day = date!(2026 - 10 - 18);

        store.save(&[snapshot(day, "Коледино", 1.05)]).await.expect("first");
        let mut newer = snapshot(day, "Коледино", 1.4);
        newer.dt_next_box = "2026-11-01".to_string();
        store.save(&[newer]).await.expect("second");

        let rows = store.latest(Some(day)).await.expect("latest");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].box_delivery_coef_expr, 1.4);
        assert_eq!(rows[0].dt_next_box, "2026-11-01");
    }

    #[tokio::test]
    async fn latest_defaults_to_today_in_offset() {
        let (_temp, store) = open_store();
        let today = store.today();

        store.save(&[snapshot(today, "Коледино", 1.0)]).await.expect("save");

        assert_eq!(store.latest(None).await.expect("latest").len(), 1);
    }

    #[tokio::test]
    async fn runs_are_recorded() {
        let (_temp, store) = open_store();
        let run = SyncRun {
            run_id: uuid::Uuid::new_v4(),
            flow: Flow::Database,
            target_date: Some(date!(2026 - 10 - 18)),
            status: RunStatus::Ok,
            row_count: 3,
            latency: Duration::from_millis(250),
            detail: None,
        };

        store.record_run(&run).await.expect("record");

        let result = store
            .warehouse()
            .execute_query("SELECT flow, latency_ms FROM ingest_log", QueryGuardrails::default())
            .expect("query");
        assert_eq!(result.rows, vec![vec![serde_json::json!("database"), serde_json::json!(250)]]);
    }
}
