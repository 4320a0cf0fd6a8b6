//! # Tariffsync Core
//!
//! Resilient synchronization of marketplace box tariffs into a local warehouse and a
//! spreadsheet mirror.
//!
//! ## Overview
//!
//! - **Resilient HTTP** with per-attempt timeouts, bounded retries, capped exponential
//!   backoff with jitter and `Retry-After` support
//! - **Failure taxonomy** that callers branch on instead of parsing messages
//! - **Lenient normalization** of locale-formatted tariff figures
//! - **Two independent flows**: fetch → persist, and read-latest → mirror
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`auth`] | Sheets access tokens, including the service-account grant |
//! | [`config`] | Environment configuration |
//! | [`domain`] | Raw payload shapes, [`TariffSnapshot`], [`SortKey`] |
//! | [`error`] | [`ClassifiedError`] and [`ErrorKind`] |
//! | [`fetcher`] | Dated requests against the tariff endpoint |
//! | [`http_client`] | Transport abstraction and the reqwest implementation |
//! | [`mirror`] | Google Sheets mirror |
//! | [`normalize`] | Raw rows to snapshots |
//! | [`notify`] | Operator notifications (Telegram) |
//! | [`number`] | Numeric-like string parsing |
//! | [`resilient`] | Retry loop over a transport |
//! | [`retry`] | Retry policy and backoff math |
//! | [`store`] | Persistence seam over the warehouse |
//! | [`sync`] | Flow orchestration |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tariffsync_core::*;
//!
//! let transport: Arc<dyn HttpClient> = Arc::new(ReqwestHttpClient::new());
//! let client = ResilientClient::new(transport);
//! let fetcher = TariffFetcher::new(
//!     client,
//!     Arc::new(NoopNotifier),
//!     Some(token),
//!     RetryPolicy::default(),
//! );
//! let raw = fetcher.fetch_tariffs("2026-10-18").await?;
//! let snapshots = normalize(&raw, today_in(offset));
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │ CLI / scheduler │
//! └────────┬────────┘
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │   TariffSync    │────▶│ OperatorNotifier │
//! └──┬──────────┬───┘     └──────────────────┘
//!    ▼          ▼
//! ┌────────┐ ┌────────────┐  ┌──────────────┐
//! │Fetcher │ │TariffStore │  │SnapshotMirror│
//! └───┬────┘ └────────────┘  └──────┬───────┘
//!     ▼                             ▼
//! ┌──────────────────────────────────────┐
//! │ ResilientClient ──▶ HttpClient       │
//! └──────────────────────────────────────┘
//! ```

pub mod auth;
pub mod config;
pub mod domain;
pub mod error;
pub mod fetcher;
pub mod http_client;
pub mod mirror;
pub mod normalize;
pub mod notify;
pub mod number;
pub mod resilient;
pub mod retry;
pub mod store;
pub mod sync;

pub use auth::{
    normalize_private_key, AccessTokenProvider, ServiceAccountKey, ServiceAccountTokenProvider,
    StaticToken,
};
pub use config::{
    AppConfig, ConfigError, Secret, ServiceAccountConfig, SheetsConfig, TelegramConfig,
};
pub use domain::{
    format_date, parse_date, sort_snapshots, today_in, RawApiResponse, RawResponseEnvelope,
    RawTariffData, RawWarehouseTariff, SortKey, TariffSnapshot, UnknownSortKey,
};
pub use error::{ClassifiedError, ErrorKind, UpstreamErrorBody};
pub use fetcher::{validate_date, TariffFetcher};
pub use http_client::{
    HttpAuth, HttpClient, HttpError, HttpErrorKind, HttpMethod, HttpRequest, HttpResponse,
    ReqwestHttpClient, ScriptedHttpClient, ScriptedReply,
};
pub use mirror::{sheet_values, GoogleSheetsMirror, MirrorError, SnapshotMirror};
pub use normalize::normalize;
pub use notify::{
    chunk_message, Notification, NoopNotifier, OperatorNotifier, RecordingNotifier,
    TelegramNotifier,
};
pub use number::{parse_decimal, to_number};
pub use resilient::ResilientClient;
pub use retry::RetryPolicy;
pub use store::{SnapshotStore, StoreError, TariffStore};
pub use sync::{Flow, RunStatus, SyncError, SyncReport, SyncRun, TariffSync};
