mod latest;
mod schedule;
mod sql;
mod sync;

use std::sync::Arc;

use tariffsync_core::{
    AccessTokenProvider, AppConfig, GoogleSheetsMirror, HttpClient, NoopNotifier,
    OperatorNotifier, ReqwestHttpClient, ResilientClient, ServiceAccountKey,
    ServiceAccountTokenProvider, SnapshotStore, StaticToken, TariffFetcher, TariffSync,
    TelegramNotifier,
};
use tariffsync_warehouse::{Warehouse, WarehouseConfig};

use crate::cli::{Cli, Command};
use crate::error::CliError;

/// Process-wide collaborators, built once per invocation.
pub struct Services {
    pub store: SnapshotStore,
    pub sync: TariffSync,
}

pub async fn run(cli: &Cli) -> Result<(), CliError> {
    let config = AppConfig::from_env()?;
    tracing::debug!(config = ?config, "configuration loaded");

    match &cli.command {
        Command::Sql(args) => sql::run(args, &open_warehouse(&config)?, cli.pretty),
        Command::Latest(args) => {
            let services = wire(&config)?;
            latest::run(args, &services.store, cli.pretty).await
        }
        Command::SyncDb(args) => sync::run_database(args, &wire(&config)?.sync, cli.pretty).await,
        Command::SyncSheet(args) => sync::run_sheet(args, &wire(&config)?.sync, cli.pretty).await,
        Command::Run(args) => schedule::run(args, wire(&config)?.sync).await,
    }
}

fn open_warehouse(config: &AppConfig) -> Result<Warehouse, CliError> {
    Ok(Warehouse::open(WarehouseConfig::new(config.db_path.clone()))?)
}

fn wire(config: &AppConfig) -> Result<Services, CliError> {
    let transport: Arc<dyn HttpClient> = Arc::new(ReqwestHttpClient::new());
    let client = ResilientClient::new(Arc::clone(&transport));

    let notifier: Arc<dyn OperatorNotifier> = match &config.telegram {
        Some(telegram) => Arc::new(TelegramNotifier::new(
            Arc::clone(&transport),
            telegram.bot_token.expose(),
            telegram.chat_id.as_str(),
        )),
        None => {
            tracing::info!("TELEGRAM_BOT_TOKEN/TELEGRAM_CHAT_ID not set, operator notifications disabled");
            Arc::new(NoopNotifier)
        }
    };

    let fetcher = TariffFetcher::new(
        client.clone(),
        Arc::clone(&notifier),
        config.api_token.as_ref().map(|token| token.expose().to_string()),
        config.retry,
    )
    .with_base_url(config.api_base_url.as_str());

    let mirror = GoogleSheetsMirror::new(
        client.clone(),
        sheet_tokens(config, client)?,
        config.sheets.spreadsheet_ids.clone(),
        config.retry,
    )
    .with_range(config.sheets.range.as_str());

    let store = SnapshotStore::new(open_warehouse(config)?, config.utc_offset);
    let sync = TariffSync::new(fetcher, Arc::new(store.clone()), Arc::new(mirror), notifier)
        .with_sort_key(config.sort_key)
        .with_utc_offset(config.utc_offset);

    Ok(Services { store, sync })
}

fn sheet_tokens(
    config: &AppConfig,
    client: ResilientClient,
) -> Result<Option<Arc<dyn AccessTokenProvider>>, CliError> {
    if let Some(account) = &config.sheets.service_account {
        let key = ServiceAccountKey::new(account.client_email.as_str(), account.private_key.expose())
            .map_err(CliError::Credential)?;
        tracing::debug!(client_email = %key.client_email(), "sheets auth via service account");
        return Ok(Some(Arc::new(ServiceAccountTokenProvider::new(client, key, config.retry))));
    }
    Ok(config.sheets.access_token.as_ref().map(|token| {
        Arc::new(StaticToken::new(token.expose())) as Arc<dyn AccessTokenProvider>
    }))
}
