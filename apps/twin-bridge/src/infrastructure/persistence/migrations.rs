//! Embedded schema migrations.
//!
//! Every statement is idempotent and runs at startup in order. Hypertables
//! are created only when the `timescaledb` extension can be loaded; plain
//! tables work for everything except on-the-fly rollups.

use sqlx::PgPool;

/// Named migration steps, applied in order.
pub const MIGRATIONS: &[(&str, &str)] = &[
    ("catalog", CATALOG),
    ("seed_generic_type", SEED_GENERIC_TYPE),
    ("timeseries", TIMESERIES),
    ("hypertables", HYPERTABLES),
];

const CATALOG: &str = r"
CREATE TABLE IF NOT EXISTS projects (
    id          BIGSERIAL PRIMARY KEY,
    name        TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS project_members (
    project_id BIGINT NOT NULL REFERENCES projects (id) ON DELETE CASCADE,
    user_id    BIGINT NOT NULL,
    role       TEXT NOT NULL DEFAULT 'viewer',
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    PRIMARY KEY (project_id, user_id)
);

CREATE TABLE IF NOT EXISTS twin_types (
    id          BIGSERIAL PRIMARY KEY,
    name        TEXT NOT NULL UNIQUE,
    version     TEXT NOT NULL DEFAULT '1.0',
    json_schema JSONB NOT NULL DEFAULT '{}'::jsonb,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS twins (
    id          BIGSERIAL PRIMARY KEY,
    registry_id TEXT NOT NULL,
    name        TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    type_id     BIGINT NOT NULL REFERENCES twin_types (id),
    project_id  BIGINT NOT NULL REFERENCES projects (id),
    model_url   TEXT,
    metadata    JSONB NOT NULL DEFAULT '{}'::jsonb,
    created_by  BIGINT,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    deleted_at  TIMESTAMPTZ
);

CREATE UNIQUE INDEX IF NOT EXISTS twins_registry_id_live
    ON twins (registry_id) WHERE deleted_at IS NULL;
CREATE INDEX IF NOT EXISTS twins_project_live
    ON twins (project_id, created_at) WHERE deleted_at IS NULL;
";

const SEED_GENERIC_TYPE: &str = r"
INSERT INTO twin_types (name, version, json_schema)
VALUES ('generic', '1.0', '{}'::jsonb)
ON CONFLICT (name) DO NOTHING;
";

const TIMESERIES: &str = r"
CREATE TABLE IF NOT EXISTS timeseries_data (
    time         TIMESTAMPTZ NOT NULL,
    twin_id      TEXT NOT NULL,
    feature_path TEXT NOT NULL,
    value_type   TEXT NOT NULL,
    value_num    DOUBLE PRECISION,
    value_bool   BOOLEAN,
    value_str    TEXT,
    value_json   JSONB,
    source       TEXT NOT NULL DEFAULT '',
    PRIMARY KEY (time, twin_id, feature_path)
);
CREATE INDEX IF NOT EXISTS timeseries_data_lookup
    ON timeseries_data (twin_id, feature_path, time DESC);

CREATE TABLE IF NOT EXISTS aggregated_data (
    time_interval TIMESTAMPTZ NOT NULL,
    twin_id       TEXT NOT NULL,
    feature_path  TEXT NOT NULL,
    interval_type TEXT NOT NULL,
    min           DOUBLE PRECISION NOT NULL,
    max           DOUBLE PRECISION NOT NULL,
    avg           DOUBLE PRECISION NOT NULL,
    sum           DOUBLE PRECISION NOT NULL,
    count         BIGINT NOT NULL,
    first_time    TIMESTAMPTZ NOT NULL,
    last_time     TIMESTAMPTZ NOT NULL,
    PRIMARY KEY (time_interval, twin_id, feature_path, interval_type)
);

CREATE TABLE IF NOT EXISTS alert_data (
    time         TIMESTAMPTZ NOT NULL,
    alert_id     TEXT NOT NULL,
    twin_id      TEXT NOT NULL,
    feature_path TEXT,
    severity     TEXT NOT NULL,
    message      TEXT NOT NULL DEFAULT '',
    value_json   JSONB,
    source       TEXT NOT NULL DEFAULT '',
    acknowledged BOOLEAN NOT NULL DEFAULT FALSE,
    ack_by       TEXT,
    ack_time     TIMESTAMPTZ,
    PRIMARY KEY (time, alert_id)
);
CREATE INDEX IF NOT EXISTS alert_data_twin ON alert_data (twin_id, time DESC);
CREATE INDEX IF NOT EXISTS alert_data_id ON alert_data (alert_id);

CREATE TABLE IF NOT EXISTS ml_prediction_data (
    time            TIMESTAMPTZ NOT NULL,
    twin_id         TEXT NOT NULL,
    task_id         TEXT NOT NULL,
    prediction_type TEXT NOT NULL,
    score_num       DOUBLE PRECISION,
    label_str       TEXT,
    details_json    JSONB,
    model_version   TEXT NOT NULL DEFAULT '',
    PRIMARY KEY (time, twin_id, task_id)
);
";

const HYPERTABLES: &str = r"
DO $$
BEGIN
    BEGIN
        CREATE EXTENSION IF NOT EXISTS timescaledb;
    EXCEPTION WHEN OTHERS THEN
        RAISE NOTICE 'timescaledb unavailable, using plain tables';
    END;

    IF EXISTS (SELECT 1 FROM pg_extension WHERE extname = 'timescaledb') THEN
        PERFORM create_hypertable('timeseries_data', 'time', if_not_exists => TRUE);
        PERFORM create_hypertable('aggregated_data', 'time_interval', if_not_exists => TRUE);
        PERFORM create_hypertable('alert_data', 'time', if_not_exists => TRUE);
        PERFORM create_hypertable('ml_prediction_data', 'time', if_not_exists => TRUE);
    END IF;
END
$$;
";

/// Apply every migration.
///
/// # Errors
///
/// Returns the first statement failure.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    for (name, sql) in MIGRATIONS {
        sqlx::raw_sql(sql).execute(pool).await?;
        tracing::debug!(migration = name, "Migration applied");
    }
    tracing::info!(count = MIGRATIONS.len(), "Database migrations applied");
    Ok(())
}
