use ::duckdb::Connection;

struct Migration {
    version: &'static str,
    sql: &'static str,
}

// Rate columns are DOUBLE rather than DECIMAL so that NaN survives a round-trip.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: "0001_warehouse_rates",
        sql: r#"
CREATE TABLE IF NOT EXISTS warehouse_rates (
    date DATE NOT NULL,
    warehouse_name TEXT NOT NULL,
    geo_name TEXT,
    dt_next_box TEXT,
    dt_till_max TEXT,
    box_delivery_base DOUBLE,
    box_delivery_coef_expr DOUBLE,
    box_delivery_liter DOUBLE,
    box_delivery_marketplace_base DOUBLE,
    box_delivery_marketplace_coef_expr DOUBLE,
    box_delivery_marketplace_liter DOUBLE,
    box_storage_base DOUBLE,
    box_storage_coef_expr DOUBLE,
    box_storage_liter DOUBLE,
    updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY(date, warehouse_name)
);
"#,
    },
    Migration {
        version: "0002_ingest_log",
        sql: r#"
CREATE TABLE IF NOT EXISTS ingest_log (
    run_id TEXT NOT NULL,
    flow TEXT NOT NULL,
    target_date DATE,
    status TEXT NOT NULL,
    row_count BIGINT NOT NULL DEFAULT 0,
    latency_ms BIGINT,
    detail TEXT,
    timestamp TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_ingest_log_flow_ts ON ingest_log(flow, timestamp);
"#,
    },
];

pub fn apply_migrations(connection: &Connection) -> Result<(), ::duckdb::Error> {
    connection.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version TEXT PRIMARY KEY,
    applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#,
    )?;

    for migration in MIGRATIONS {
        let applied_count: i64 = connection.query_row(
            "SELECT COUNT(*) FROM schema_migrations WHERE version = ?",
            [migration.version],
            |row| row.get(0),
        )?;

        if applied_count == 0 {
            tracing::debug!(version = migration.version, "applying warehouse migration");
            connection.execute_batch(migration.sql)?;
            connection.execute(
                "INSERT INTO schema_migrations (version) VALUES (?)",
                [migration.version],
            )?;
        }
    }

    Ok(())
}

/// Versions known to this build, in application order.
pub fn known_versions() -> impl Iterator<Item = &'static str> {
    MIGRATIONS.iter().map(|migration| migration.version)
}
