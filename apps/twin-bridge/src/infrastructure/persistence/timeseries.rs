//! Postgres time-series store.
//!
//! Samples, rollups and predictions are written in multi-row inserts of
//! [`BATCH_SIZE`] rows, all inside one transaction. Re-delivered samples and
//! predictions hit the primary key and are skipped, so at-least-once
//! consumption does not fail a batch.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};

use crate::application::ports::{RepositoryError, TimeRange, TimeSeriesStore};
use crate::domain::timeseries::{
    Aggregate, AggregateInterval, Alert, IntervalType, Prediction, PredictionKind, Sample,
    SampleValue, Severity, ValueKind,
};

/// Rows per insert statement.
pub const BATCH_SIZE: usize = 100;

/// Time-series store over one pool.
#[derive(Debug, Clone)]
pub struct PgTimeSeriesStore {
    pool: PgPool,
}

impl PgTimeSeriesStore {
    /// Create the store over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run `build` for each chunk of `rows` inside one transaction. A failed
    /// chunk rolls back every chunk before it.
    async fn insert_batched<T, F>(&self, rows: &[T], build: F) -> Result<(), RepositoryError>
    where
        T: Sync,
        F: Fn(&[T]) -> QueryBuilder<'static, Postgres> + Send + Sync,
    {
        if rows.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for chunk in rows.chunks(BATCH_SIZE) {
            build(chunk).build().execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

fn sample_from_row(row: &PgRow) -> Result<Sample, RepositoryError> {
    let kind: String = row.try_get("value_type")?;
    let kind: ValueKind = kind.parse().map_err(RepositoryError::Database)?;
    let value = SampleValue::from_columns(
        kind,
        row.try_get("value_num")?,
        row.try_get("value_bool")?,
        row.try_get("value_str")?,
        row.try_get("value_json")?,
    )
    .ok_or_else(|| RepositoryError::Database(format!("{} sample without value", kind.as_str())))?;

    Ok(Sample {
        time: row.try_get("time")?,
        twin_id: row.try_get("twin_id")?,
        feature_path: row.try_get("feature_path")?,
        value,
        source: row.try_get("source")?,
    })
}

fn aggregate_from_row(
    row: &PgRow,
    twin_id: &str,
    feature_path: &str,
    interval_type: IntervalType,
) -> Result<Aggregate, RepositoryError> {
    Ok(Aggregate {
        bucket: row.try_get("time_interval")?,
        twin_id: twin_id.to_string(),
        feature_path: feature_path.to_string(),
        interval_type,
        min: row.try_get("min")?,
        max: row.try_get("max")?,
        avg: row.try_get("avg")?,
        sum: row.try_get("sum")?,
        count: row.try_get("count")?,
        first_time: row.try_get("first_time")?,
        last_time: row.try_get("last_time")?,
    })
}

fn alert_from_row(row: &PgRow) -> Result<Alert, RepositoryError> {
    let severity: String = row.try_get("severity")?;
    Ok(Alert {
        time: row.try_get("time")?,
        alert_id: row.try_get("alert_id")?,
        twin_id: row.try_get("twin_id")?,
        feature_path: row.try_get("feature_path")?,
        severity: severity
            .parse::<Severity>()
            .map_err(|e| RepositoryError::Database(e.to_string()))?,
        message: row.try_get("message")?,
        value: row
            .try_get::<Option<serde_json::Value>, _>("value_json")?
            .unwrap_or(serde_json::Value::Null),
        source: row.try_get("source")?,
        acknowledged: row.try_get("acknowledged")?,
        ack_by: row.try_get("ack_by")?,
        ack_time: row.try_get("ack_time")?,
    })
}

fn prediction_from_row(row: &PgRow) -> Result<Prediction, RepositoryError> {
    let kind: String = row.try_get("prediction_type")?;
    Ok(Prediction {
        time: row.try_get("time")?,
        twin_id: row.try_get("twin_id")?,
        task_id: row.try_get("task_id")?,
        kind: PredictionKind::parse_or_default(Some(&kind)),
        score: row.try_get("score_num")?,
        label: row.try_get("label_str")?,
        details: row
            .try_get::<Option<serde_json::Value>, _>("details_json")?
            .unwrap_or(serde_json::Value::Null),
        model_version: row.try_get("model_version")?,
    })
}

const SAMPLE_COLUMNS: &str =
    "time, twin_id, feature_path, value_type, value_num, value_bool, value_str, value_json, source";

const ALERT_COLUMNS: &str = "time, alert_id, twin_id, feature_path, severity, message, value_json, \
     source, acknowledged, ack_by, ack_time";

const PREDICTION_COLUMNS: &str =
    "time, twin_id, task_id, prediction_type, score_num, label_str, details_json, model_version";

#[async_trait]
impl TimeSeriesStore for PgTimeSeriesStore {
    async fn insert_samples(&self, samples: &[Sample]) -> Result<(), RepositoryError> {
        self.insert_batched(samples, |chunk| {
            let mut qb = QueryBuilder::new(format!("INSERT INTO timeseries_data ({SAMPLE_COLUMNS}) "));
            qb.push_values(chunk, |mut b, s| {
                b.push_bind(s.time)
                    .push_bind(s.twin_id.clone())
                    .push_bind(s.feature_path.clone())
                    .push_bind(s.value.kind().as_str())
                    .push_bind(s.value.as_number())
                    .push_bind(s.value.as_bool())
                    .push_bind(s.value.as_str().map(str::to_string))
                    .push_bind(s.value.as_json().cloned())
                    .push_bind(s.source.clone());
            });
            qb.push(" ON CONFLICT DO NOTHING");
            qb
        })
        .await?;
        tracing::debug!(count = samples.len(), "Samples inserted");
        Ok(())
    }

    async fn insert_aggregates(&self, aggregates: &[Aggregate]) -> Result<(), RepositoryError> {
        self.insert_batched(aggregates, |chunk| {
            let mut qb = QueryBuilder::new(
                "INSERT INTO aggregated_data (time_interval, twin_id, feature_path, interval_type, \
                 min, max, avg, sum, count, first_time, last_time) ",
            );
            qb.push_values(chunk, |mut b, a| {
                b.push_bind(a.bucket)
                    .push_bind(a.twin_id.clone())
                    .push_bind(a.feature_path.clone())
                    .push_bind(a.interval_type.as_str())
                    .push_bind(a.min)
                    .push_bind(a.max)
                    .push_bind(a.avg)
                    .push_bind(a.sum)
                    .push_bind(a.count)
                    .push_bind(a.first_time)
                    .push_bind(a.last_time);
            });
            qb.push(
                " ON CONFLICT (time_interval, twin_id, feature_path, interval_type) DO UPDATE SET \
                 min = EXCLUDED.min, max = EXCLUDED.max, avg = EXCLUDED.avg, sum = EXCLUDED.sum, \
                 count = EXCLUDED.count, first_time = EXCLUDED.first_time, last_time = EXCLUDED.last_time",
            );
            qb
        })
        .await
    }

    async fn insert_predictions(&self, predictions: &[Prediction]) -> Result<(), RepositoryError> {
        self.insert_batched(predictions, |chunk| {
            let mut qb =
                QueryBuilder::new(format!("INSERT INTO ml_prediction_data ({PREDICTION_COLUMNS}) "));
            qb.push_values(chunk, |mut b, p| {
                b.push_bind(p.time)
                    .push_bind(p.twin_id.clone())
                    .push_bind(p.task_id.clone())
                    .push_bind(p.kind.as_str())
                    .push_bind(p.score)
                    .push_bind(p.label.clone())
                    .push_bind(p.details.clone())
                    .push_bind(p.model_version.clone());
            });
            qb.push(" ON CONFLICT DO NOTHING");
            qb
        })
        .await
    }

    async fn insert_alert(&self, alert: &Alert) -> Result<(), RepositoryError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM alert_data WHERE alert_id = $1)")
                .bind(&alert.alert_id)
                .fetch_one(&self.pool)
                .await?;
        if exists {
            return Err(RepositoryError::Conflict(format!(
                "alert '{}' already exists",
                alert.alert_id
            )));
        }

        sqlx::query(&format!(
            "INSERT INTO alert_data ({ALERT_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"
        ))
        .bind(alert.time)
        .bind(&alert.alert_id)
        .bind(&alert.twin_id)
        .bind(&alert.feature_path)
        .bind(alert.severity.as_str())
        .bind(&alert.message)
        .bind(&alert.value)
        .bind(&alert.source)
        .bind(alert.acknowledged)
        .bind(&alert.ack_by)
        .bind(alert.ack_time)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn samples_in_range(
        &self,
        twin_id: &str,
        feature_path: &str,
        range: TimeRange,
        limit: Option<i64>,
    ) -> Result<Vec<Sample>, RepositoryError> {
        let rows = sqlx::query(&format!(
            r"
            SELECT {SAMPLE_COLUMNS} FROM timeseries_data
            WHERE twin_id = $1 AND feature_path = $2 AND time >= $3 AND time <= $4
            ORDER BY time DESC
            LIMIT $5
            "
        ))
        .bind(twin_id)
        .bind(feature_path)
        .bind(range.start)
        .bind(range.end)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(sample_from_row).collect()
    }

    async fn latest_sample(
        &self,
        twin_id: &str,
        feature_path: &str,
    ) -> Result<Sample, RepositoryError> {
        let row = sqlx::query(&format!(
            r"
            SELECT {SAMPLE_COLUMNS} FROM timeseries_data
            WHERE twin_id = $1 AND feature_path = $2
            ORDER BY time DESC
            LIMIT 1
            "
        ))
        .bind(twin_id)
        .bind(feature_path)
        .fetch_one(&self.pool)
        .await?;
        sample_from_row(&row)
    }

    async fn aggregates(
        &self,
        twin_id: &str,
        feature_path: &str,
        range: TimeRange,
        interval: AggregateInterval,
    ) -> Result<Vec<Aggregate>, RepositoryError> {
        let interval_type = interval.interval_type();

        let stored = sqlx::query(
            r"
            SELECT time_interval, min, max, avg, sum, count, first_time, last_time
            FROM aggregated_data
            WHERE twin_id = $1 AND feature_path = $2 AND interval_type = $3
              AND time_interval >= $4 AND time_interval <= $5
            ORDER BY time_interval DESC
            ",
        )
        .bind(twin_id)
        .bind(feature_path)
        .bind(interval_type.as_str())
        .bind(range.start)
        .bind(range.end)
        .fetch_all(&self.pool)
        .await?;

        let rows = if stored.is_empty() {
            tracing::debug!(
                twin_id,
                feature_path,
                interval = %interval,
                "No stored rollups, bucketing samples"
            );
            sqlx::query(
                r"
                SELECT
                    time_bucket($1::interval, time) AS time_interval,
                    MIN(value_num) AS min,
                    MAX(value_num) AS max,
                    AVG(value_num) AS avg,
                    SUM(value_num) AS sum,
                    COUNT(*) AS count,
                    MIN(time) AS first_time,
                    MAX(time) AS last_time
                FROM timeseries_data
                WHERE twin_id = $2 AND feature_path = $3 AND time >= $4 AND time <= $5
                  AND value_type = 'number'
                GROUP BY 1
                ORDER BY 1 DESC
                ",
            )
            .bind(interval.bucket_width())
            .bind(twin_id)
            .bind(feature_path)
            .bind(range.start)
            .bind(range.end)
            .fetch_all(&self.pool)
            .await?
        } else {
            stored
        };

        rows.iter()
            .map(|row| aggregate_from_row(row, twin_id, feature_path, interval_type))
            .collect()
    }

    async fn alerts(
        &self,
        twin_id: &str,
        range: TimeRange,
        severity: Option<Severity>,
        limit: Option<i64>,
    ) -> Result<Vec<Alert>, RepositoryError> {
        let rows = sqlx::query(&format!(
            r"
            SELECT {ALERT_COLUMNS} FROM alert_data
            WHERE twin_id = $1 AND time >= $2 AND time <= $3
              AND ($4::text IS NULL OR severity = $4)
            ORDER BY time DESC
            LIMIT $5
            "
        ))
        .bind(twin_id)
        .bind(range.start)
        .bind(range.end)
        .bind(severity.map(Severity::as_str))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(alert_from_row).collect()
    }

    async fn acknowledge_alert(&self, alert_id: &str, ack_by: &str) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE alert_data
            SET acknowledged = TRUE, ack_by = $2, ack_time = NOW()
            WHERE alert_id = $1 AND acknowledged = FALSE
            ",
        )
        .bind(alert_id)
        .bind(ack_by)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        tracing::info!(alert_id, ack_by, "Alert acknowledged");
        Ok(())
    }

    async fn delete_alert(&self, alert_id: &str) -> Result<(), RepositoryError> {
        let result = sqlx::query("DELETE FROM alert_data WHERE alert_id = $1")
            .bind(alert_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn predictions(
        &self,
        twin_id: &str,
        task_id: &str,
        range: TimeRange,
        limit: Option<i64>,
    ) -> Result<Vec<Prediction>, RepositoryError> {
        let rows = sqlx::query(&format!(
            r"
            SELECT {PREDICTION_COLUMNS} FROM ml_prediction_data
            WHERE twin_id = $1 AND task_id = $2 AND time >= $3 AND time <= $4
            ORDER BY time DESC
            LIMIT $5
            "
        ))
        .bind(twin_id)
        .bind(task_id)
        .bind(range.start)
        .bind(range.end)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(prediction_from_row).collect()
    }

    async fn latest_prediction(
        &self,
        twin_id: &str,
        task_id: &str,
    ) -> Result<Prediction, RepositoryError> {
        let row = sqlx::query(&format!(
            r"
            SELECT {PREDICTION_COLUMNS} FROM ml_prediction_data
            WHERE twin_id = $1 AND task_id = $2
            ORDER BY time DESC
            LIMIT 1
            "
        ))
        .bind(twin_id)
        .bind(task_id)
        .fetch_one(&self.pool)
        .await?;
        prediction_from_row(&row)
    }

    async fn delete_samples_before(
        &self,
        twin_id: &str,
        before: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM timeseries_data WHERE twin_id = $1 AND time < $2")
            .bind(twin_id)
            .bind(before)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_predictions_before(
        &self,
        twin_id: &str,
        before: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM ml_prediction_data WHERE twin_id = $1 AND time < $2")
            .bind(twin_id)
            .bind(before)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::infrastructure::persistence::run_migrations;

    fn get_test_database_url() -> Option<String> {
        std::env::var("TEST_DATABASE_URL")
            .or_else(|_| std::env::var("DATABASE_URL"))
            .ok()
    }

    #[tokio::test]
    #[ignore = "Requires PostgreSQL TEST_DATABASE_URL"]
    #[allow(clippy::expect_used, clippy::unwrap_used)]
    async fn failed_chunk_rolls_back_whole_insert() {
        let database_url = get_test_database_url().expect("TEST_DATABASE_URL required");
        let pool = PgPool::connect(&database_url).await.unwrap();
        run_migrations(&pool).await.unwrap();
        let store = PgTimeSeriesStore::new(pool);

        let twin_id = format!("rollback-{}", uuid::Uuid::new_v4());
        let start = Utc::now();
        let mut samples: Vec<Sample> = (0..250)
            .map(|n| Sample {
                time: start + Duration::milliseconds(n),
                twin_id: twin_id.clone(),
                feature_path: "temp".to_string(),
                value: SampleValue::Number(n as f64),
                source: "test".to_string(),
            })
            .collect();
        // Postgres rejects NUL in text, failing the third statement.
        samples[220].value = SampleValue::String("bad\0value".to_string());

        assert!(store.insert_samples(&samples).await.is_err());

        let range = TimeRange::new(start - Duration::seconds(1), start + Duration::seconds(1));
        let stored = store
            .samples_in_range(&twin_id, "temp", range, None)
            .await
            .unwrap();
        assert!(stored.is_empty());
    }
}
