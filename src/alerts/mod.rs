//! Queue health monitoring: per-tenant thresholds and notification fan-out.
//!
//! The monitor is observation-only. It is triggered externally (a cron
//! tick, a scheduler task), reads aggregate queue metrics from the store,
//! compares them to configured thresholds, and emits notifications through
//! an [`AlertSink`]. It never retries or remediates.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::QueueError;
use crate::job::TenantId;
use crate::storage::Store;

/// Metric a threshold is evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    /// Share of terminal outcomes in the trailing window that failed, in
    /// percent.
    FailureRate,
    /// Dead-letter entries created during the trailing window.
    DlqGrowth,
    /// Jobs currently waiting to be claimed.
    QueueDepth,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::FailureRate => "failure_rate",
            AlertType::DlqGrowth => "dlq_growth",
            AlertType::QueueDepth => "queue_depth",
        }
    }

    pub fn parse(value: &str) -> Option<AlertType> {
        match value {
            "failure_rate" => Some(AlertType::FailureRate),
            "dlq_growth" => Some(AlertType::DlqGrowth),
            "queue_depth" => Some(AlertType::QueueDepth),
            _ => None,
        }
    }
}

impl std::fmt::Display for AlertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tunable threshold, per tenant or global (`tenant_id = None`).
///
/// One config exists per `(tenant_id, alert_type)` pair; configuring the
/// same pair again overwrites the previous values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertThresholdConfig {
    pub id: Uuid,
    pub tenant_id: Option<TenantId>,
    pub alert_type: AlertType,
    pub threshold: f64,
    /// Display unit for the threshold, e.g. "percent" or "jobs".
    pub unit: String,
    pub enabled: bool,
    /// Notification channel names handed to the sink.
    pub channels: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AlertThresholdConfig {
    pub fn new(
        tenant_id: Option<TenantId>,
        alert_type: AlertType,
        threshold: f64,
        unit: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            alert_type,
            threshold,
            unit: unit.into(),
            enabled: true,
            channels: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn channels(mut self, channels: Vec<String>) -> Self {
        self.channels = channels;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// A breached threshold, ready for notification fan-out.
#[derive(Debug, Clone, Serialize)]
pub struct AlertEvent {
    pub tenant_id: Option<TenantId>,
    pub alert_type: AlertType,
    pub observed: f64,
    pub threshold: f64,
    pub unit: String,
    pub channels: Vec<String>,
    pub raised_at: DateTime<Utc>,
}

/// Notification fan-out target.
///
/// Sinks own their delivery failures; a sink that cannot reach a channel
/// must not panic the monitor.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send(&self, event: &AlertEvent);
}

/// Default sink: emits each breach as a structured warning.
pub struct TracingAlertSink;

#[async_trait]
impl AlertSink for TracingAlertSink {
    async fn send(&self, event: &AlertEvent) {
        tracing::warn!(
            tenant_id = ?event.tenant_id,
            alert_type = %event.alert_type,
            observed = event.observed,
            threshold = event.threshold,
            unit = %event.unit,
            channels = ?event.channels,
            "queue health threshold exceeded"
        );
    }
}

/// Evaluates configured thresholds against live queue metrics.
pub struct AlertMonitor {
    store: Arc<dyn Store>,
    sink: Arc<dyn AlertSink>,
    window: Duration,
}

impl AlertMonitor {
    pub fn new(store: Arc<dyn Store>, sink: Arc<dyn AlertSink>) -> Self {
        Self {
            store,
            sink,
            window: Duration::from_secs(3600),
        }
    }

    /// Override the trailing window used for rate metrics.
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Create or update a threshold.
    pub async fn configure(&self, config: AlertThresholdConfig) -> Result<(), QueueError> {
        self.store.upsert_alert_threshold(&config).await?;
        tracing::info!(
            tenant_id = ?config.tenant_id,
            alert_type = %config.alert_type,
            threshold = config.threshold,
            enabled = config.enabled,
            "alert threshold configured"
        );
        Ok(())
    }

    pub async fn thresholds(&self) -> Result<Vec<AlertThresholdConfig>, QueueError> {
        Ok(self.store.list_alert_thresholds().await?)
    }

    /// Evaluate every enabled threshold once and notify on each breach.
    ///
    /// A failure while evaluating one config is logged and does not prevent
    /// the remaining configs from being evaluated. Returns the breaches
    /// that were emitted.
    pub async fn evaluate_all(&self) -> Result<Vec<AlertEvent>, QueueError> {
        let configs = self.store.list_alert_thresholds().await?;
        let since = Utc::now() - chrono::Duration::from_std(self.window).unwrap_or_default();

        let mut raised = Vec::new();
        for config in configs.into_iter().filter(|c| c.enabled) {
            match self.evaluate(&config, since).await {
                Ok(Some(event)) => {
                    self.sink.send(&event).await;
                    raised.push(event);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(
                        tenant_id = ?config.tenant_id,
                        alert_type = %config.alert_type,
                        error = %e,
                        "threshold evaluation failed"
                    );
                }
            }
        }

        Ok(raised)
    }

    async fn evaluate(
        &self,
        config: &AlertThresholdConfig,
        since: DateTime<Utc>,
    ) -> Result<Option<AlertEvent>, QueueError> {
        let observed = match config.alert_type {
            AlertType::FailureRate => self
                .store
                .failure_stats(config.tenant_id, since)
                .await?
                .failure_rate(),
            AlertType::DlqGrowth => self.store.dlq_growth(config.tenant_id, since).await? as f64,
            AlertType::QueueDepth => self.store.queue_depth(config.tenant_id).await? as f64,
        };

        if observed > config.threshold {
            Ok(Some(AlertEvent {
                tenant_id: config.tenant_id,
                alert_type: config.alert_type,
                observed,
                threshold: config.threshold,
                unit: config.unit.clone(),
                channels: config.channels.clone(),
                raised_at: Utc::now(),
            }))
        } else {
            Ok(None)
        }
    }
}
