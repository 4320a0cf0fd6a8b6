use tariffsync_core::{ClassifiedError, ConfigError, Flow, StoreError};
use tariffsync_warehouse::WarehouseError;
use thiserror::Error;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid sheets credentials: {0}")]
    Credential(#[source] ClassifiedError),

    #[error(transparent)]
    Warehouse(#[from] WarehouseError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{flow} sync failed: {detail}")]
    FlowFailed { flow: Flow, detail: String },

    #[error("{flow} schedule stopped: {reason}")]
    ScheduleStopped { flow: Flow, reason: String },

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) | Self::Credential(_) => 2,
            Self::Warehouse(WarehouseError::QueryRejected(_)) => 2,
            Self::FlowFailed { .. } => 3,
            Self::ScheduleStopped { .. } => 5,
            Self::Serialization(_) => 4,
            Self::Warehouse(_) | Self::Store(_) | Self::Io(_) => 10,
        }
    }
}
