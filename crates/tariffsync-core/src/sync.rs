//! Fetch → normalize → persist, and read-latest → sort → mirror.
//!
//! The two flows share nothing but the store. A failing flow is logged, audited and
//! reported once; it never takes the process or the other flow down.

use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use time::{Date, UtcOffset};
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use crate::domain::{format_date, sort_snapshots, today_in, SortKey};
use crate::error::ClassifiedError;
use crate::fetcher::TariffFetcher;
use crate::mirror::{MirrorError, SnapshotMirror};
use crate::normalize::normalize;
use crate::notify::{Notification, OperatorNotifier};
use crate::store::{StoreError, TariffStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flow {
    Database,
    Sheet,
}

impl Flow {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Database => "database",
            Self::Sheet => "sheet",
        }
    }
}

impl Display for Flow {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Ok,
    Failed,
}

impl RunStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Failed => "failed",
        }
    }
}

/// Audit record of one flow execution.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncRun {
    pub run_id: Uuid,
    pub flow: Flow,
    pub target_date: Option<Date>,
    pub status: RunStatus,
    pub row_count: usize,
    pub latency: Duration,
    pub detail: Option<String>,
}

impl SyncRun {
    /// Latency in whole milliseconds, saturating at `u64::MAX`.
    pub fn latency_ms(&self) -> u64 {
        u64::try_from(self.latency.as_millis()).unwrap_or(u64::MAX)
    }
}

/// Successful flow outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub flow: Flow,
    pub date: Date,
    /// Rows persisted (database flow) or mirrored (sheet flow).
    pub rows: usize,
    /// Spreadsheets updated; zero for the database flow.
    pub targets: usize,
}

#[derive(Debug, Error)]
pub enum SyncError {
    /// Already reported to the operator by the fetcher.
    #[error("fetch failed: {0}")]
    Fetch(#[from] ClassifiedError),

    #[error("store failed: {0}")]
    Store(#[from] StoreError),

    #[error("mirror failed: {0}")]
    Mirror(#[from] MirrorError),
}

impl SyncError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Fetch(error) => error.code(),
            Self::Store(_) => "sync.store",
            Self::Mirror(_) => "sync.mirror",
        }
    }

    const fn already_reported(&self) -> bool {
        matches!(self, Self::Fetch(_))
    }

    fn rows_written(&self) -> usize {
        match self {
            Self::Store(error) => error.rows_written().unwrap_or(0),
            Self::Fetch(_) | Self::Mirror(_) => 0,
        }
    }
}

/// Sequences the database and sheet flows over injected collaborators.
#[derive(Clone)]
pub struct TariffSync {
    fetcher: TariffFetcher,
    store: Arc<dyn TariffStore>,
    mirror: Arc<dyn SnapshotMirror>,
    notifier: Arc<dyn OperatorNotifier>,
    sort_key: SortKey,
    offset: UtcOffset,
}

impl TariffSync {
    pub fn new(
        fetcher: TariffFetcher,
        store: Arc<dyn TariffStore>,
        mirror: Arc<dyn SnapshotMirror>,
        notifier: Arc<dyn OperatorNotifier>,
    ) -> Self {
        Self {
            fetcher,
            store,
            mirror,
            notifier,
            sort_key: SortKey::default(),
            offset: UtcOffset::UTC,
        }
    }

    pub fn with_sort_key(mut self, sort_key: SortKey) -> Self {
        self.sort_key = sort_key;
        self
    }

    /// Offset used for "today" and for stamping processed rows.
    pub fn with_utc_offset(mut self, offset: UtcOffset) -> Self {
        self.offset = offset;
        self
    }

    pub fn today(&self) -> Date {
        today_in(self.offset)
    }

    /// Fetch tariffs for `date` (today when `None`), normalize them and upsert.
    ///
    /// Rows are stamped with today's date, whatever date was requested.
    pub async fn sync_database(&self, date: Option<Date>) -> Result<SyncReport, SyncError> {
        let requested = date.unwrap_or_else(|| self.today());
        let raw = self.fetcher.fetch_tariffs(&format_date(requested)).await?;

        let processed_on = self.today();
        let snapshots = normalize(&raw, processed_on);
        let rows = self.store.save(&snapshots).await?;
        tracing::info!(requested = %format_date(requested), rows, "tariffs persisted");

        Ok(SyncReport {
            flow: Flow::Database,
            date: processed_on,
            rows,
            targets: 0,
        })
    }

    /// Read the snapshots of `date` (today when `None`), sort them and mirror them.
    pub async fn sync_sheet(&self, date: Option<Date>) -> Result<SyncReport, SyncError> {
        let date = date.unwrap_or_else(|| self.today());
        let mut snapshots = self.store.latest(Some(date)).await?;
        if snapshots.is_empty() {
            tracing::warn!(date = %format_date(date), "no snapshots stored for date, mirroring header only");
        }
        sort_snapshots(&mut snapshots, self.sort_key);

        let targets = self.mirror.mirror(&snapshots).await?;
        Ok(SyncReport {
            flow: Flow::Sheet,
            date,
            rows: snapshots.len(),
            targets,
        })
    }

    pub async fn run_database_flow(&self, date: Option<Date>) -> SyncRun {
        self.run_flow(Flow::Database, date).await
    }

    pub async fn run_sheet_flow(&self, date: Option<Date>) -> SyncRun {
        self.run_flow(Flow::Sheet, date).await
    }

    /// Run `flow` to completion, absorbing its failure.
    ///
    /// The outcome is logged and appended to the audit log. Store and mirror failures
    /// are reported to the operator here; fetch failures were reported by the fetcher.
    pub async fn run_flow(&self, flow: Flow, date: Option<Date>) -> SyncRun {
        let run_id = Uuid::new_v4();
        let target_date = date.unwrap_or_else(|| self.today());
        let span = tracing::info_span!("sync_run", %run_id, flow = flow.as_str());

        async move {
            let started = Instant::now();
            let outcome = match flow {
                Flow::Database => self.sync_database(Some(target_date)).await,
                Flow::Sheet => self.sync_sheet(Some(target_date)).await,
            };
            let latency = started.elapsed();

            let run = match outcome {
                Ok(report) => {
                    let run = SyncRun {
                        run_id,
                        flow,
                        target_date: Some(target_date),
                        status: RunStatus::Ok,
                        row_count: report.rows,
                        latency,
                        detail: None,
                    };
                    tracing::info!(rows = report.rows, targets = report.targets, latency_ms = run.latency_ms(), "sync run finished");
                    run
                }
                Err(error) => {
                    tracing::error!(code = error.code(), error = %error, "sync run failed");
                    if !error.already_reported() {
                        self.notifier
                            .notify(
                                Notification::new(format!("Tariff {flow} sync failed"))
                                    .with_code(error.code())
                                    .with_description(error.to_string()),
                            )
                            .await;
                    }
                    SyncRun {
                        run_id,
                        flow,
                        target_date: Some(target_date),
                        status: RunStatus::Failed,
                        row_count: error.rows_written(),
                        latency,
                        detail: Some(error.to_string()),
                    }
                }
            };

            if let Err(error) = self.store.record_run(&run).await {
                tracing::warn!(error = %error, "could not append sync run to audit log");
            }
            run
        }
        .instrument(span)
        .await
    }
}
