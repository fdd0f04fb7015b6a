//! Prediction Ingestion
//!
//! Consumes `ml-output`. Every record becomes one prediction row; records
//! carrying an `alert` block also raise an alert.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use crate::application::ports::{
    HandlerError, InboundRecord, MessageHandler, NotificationType, Notifier, TimeSeriesStore,
};
use crate::domain::events::{MlAlert, MlOutputRecord};
use crate::domain::timeseries::{
    Alert, DEFAULT_MODEL_VERSION, ML_SOURCE, Prediction, PredictionKind, Severity,
};

/// `ml-output` handler.
pub struct PredictionIngestor {
    store: Arc<dyn TimeSeriesStore>,
    notifier: Arc<dyn Notifier>,
}

impl PredictionIngestor {
    /// Create the handler.
    #[must_use]
    pub fn new(store: Arc<dyn TimeSeriesStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }
}

/// Build the prediction row for an ML output record.
#[must_use]
pub fn prediction_from(record: &MlOutputRecord) -> Prediction {
    let output = &record.output;
    Prediction {
        time: record.timestamp,
        twin_id: output.thing_id.clone(),
        task_id: record.model_id.clone(),
        kind: PredictionKind::parse_or_default(output.prediction_type.as_deref()),
        score: output.result.get("score").and_then(serde_json::Value::as_f64),
        label: output
            .result
            .get("label")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string),
        details: output.result.clone(),
        model_version: output
            .model_version
            .clone()
            .unwrap_or_else(|| DEFAULT_MODEL_VERSION.to_string()),
    }
}

/// Build the alert row for an ML output record's alert block.
#[must_use]
pub fn alert_from(record: &MlOutputRecord, alert: &MlAlert) -> Alert {
    let output = &record.output;
    let severity = alert.severity.parse().unwrap_or_else(|e| {
        tracing::warn!(twin_id = %output.thing_id, error = %e, "Unknown alert severity, using warning");
        Severity::Warning
    });

    Alert {
        time: record.timestamp,
        alert_id: Alert::make_id(&output.thing_id, Utc::now()),
        twin_id: output.thing_id.clone(),
        feature_path: Some(output.feature_id.clone()).filter(|f| !f.is_empty()),
        severity,
        message: alert.description.clone(),
        value: serde_json::to_value(output).unwrap_or(serde_json::Value::Null),
        source: ML_SOURCE.to_string(),
        acknowledged: false,
        ack_by: None,
        ack_time: None,
    }
}

#[async_trait]
impl MessageHandler for PredictionIngestor {
    async fn handle(&self, record: &InboundRecord) -> Result<(), HandlerError> {
        let output: MlOutputRecord = serde_json::from_slice(&record.payload)?;

        let prediction = prediction_from(&output);
        self.store
            .insert_predictions(std::slice::from_ref(&prediction))
            .await?;
        metrics::counter!("twin_bridge_predictions_written_total").increment(1);

        tracing::debug!(
            twin_id = %prediction.twin_id,
            task_id = %prediction.task_id,
            kind = prediction.kind.as_str(),
            "Prediction stored"
        );

        self.notifier.notify_topic(
            &format!("twin.{}", prediction.twin_id),
            NotificationType::MlPrediction,
            serde_json::to_value(&prediction).unwrap_or(serde_json::Value::Null),
        );

        let Some(block) = output.output.alert.as_ref() else {
            return Ok(());
        };

        let alert = alert_from(&output, block);
        self.store.insert_alert(&alert).await?;
        metrics::counter!("twin_bridge_alerts_written_total", "severity" => alert.severity.as_str())
            .increment(1);

        tracing::info!(
            twin_id = %alert.twin_id,
            alert_id = %alert.alert_id,
            severity = alert.severity.as_str(),
            alert_type = %block.alert_type,
            "Alert raised"
        );

        let payload = serde_json::to_value(&alert).unwrap_or(serde_json::Value::Null);
        if alert.severity == Severity::Critical {
            self.notifier
                .broadcast(NotificationType::Alert, "alerts", payload.clone());
        }
        self.notifier
            .notify_topic("alerts", NotificationType::Alert, payload);

        Ok(())
    }
}
