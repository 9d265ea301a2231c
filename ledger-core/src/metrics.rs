//! Metrics collection for observability
//!
//! This module provides Prometheus metrics for monitoring the ledger.
//!
//! # Metrics
//!
//! - `ledger_operations_total{operation}` - Committed commands
//! - `ledger_rejections_total{operation,kind}` - Rejected commands
//! - `ledger_events_total` - Events appended to the log
//! - `ledger_execute_duration_seconds` - Histogram of command latencies
//! - `ledger_version` - Current world-state version
//! - `ledger_escrow_value_locked` - Value held across open escrows
//! - `ledger_reward_supply` - Outstanding reward credits

use crate::command::Receipt;
use crate::error::Error;
use crate::types::Amount;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Committed commands by operation
    pub operations_total: IntCounterVec,

    /// Rejected commands by operation and error kind
    pub rejections_total: IntCounterVec,

    /// Events appended
    pub events_total: IntCounter,

    /// Command latency histogram
    pub execute_duration: Histogram,

    /// World-state version
    pub version: IntGauge,

    /// Value held across open escrows
    pub escrow_value_locked: IntGauge,

    /// Outstanding reward credits
    pub reward_supply: IntGauge,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector on its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let operations_total = IntCounterVec::new(
            Opts::new("ledger_operations_total", "Committed commands"),
            &["operation"],
        )?;
        registry.register(Box::new(operations_total.clone()))?;

        let rejections_total = IntCounterVec::new(
            Opts::new("ledger_rejections_total", "Rejected commands"),
            &["operation", "kind"],
        )?;
        registry.register(Box::new(rejections_total.clone()))?;

        let events_total = IntCounter::new("ledger_events_total", "Events appended to the log")?;
        registry.register(Box::new(events_total.clone()))?;

        let execute_duration = Histogram::with_opts(
            HistogramOpts::new(
                "ledger_execute_duration_seconds",
                "Histogram of command latencies",
            )
            .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.010, 0.050, 0.100]),
        )?;
        registry.register(Box::new(execute_duration.clone()))?;

        let version = IntGauge::new("ledger_version", "Current world-state version")?;
        registry.register(Box::new(version.clone()))?;

        let escrow_value_locked = IntGauge::new(
            "ledger_escrow_value_locked",
            "Value held across open escrows",
        )?;
        registry.register(Box::new(escrow_value_locked.clone()))?;

        let reward_supply = IntGauge::new("ledger_reward_supply", "Outstanding reward credits")?;
        registry.register(Box::new(reward_supply.clone()))?;

        Ok(Self {
            operations_total,
            rejections_total,
            events_total,
            execute_duration,
            version,
            escrow_value_locked,
            reward_supply,
            registry,
        })
    }

    /// Record a committed command
    pub fn record_commit(&self, operation: &str, receipt: &Receipt) {
        self.operations_total.with_label_values(&[operation]).inc();
        self.events_total.inc_by(receipt.events.len() as u64);
        self.version.set(saturating_i64(u128::from(receipt.version)));
    }

    /// Record a rejected command
    pub fn record_rejection(&self, operation: &str, error: &Error) {
        self.rejections_total
            .with_label_values(&[operation, error.kind().as_str()])
            .inc();
    }

    /// Record command latency
    pub fn record_execute_duration(&self, duration_seconds: f64) {
        self.execute_duration.observe(duration_seconds);
    }

    /// Update the value gauges
    pub fn update_balances(&self, escrow_locked: Amount, reward_supply: Amount) {
        self.escrow_value_locked.set(saturating_i64(escrow_locked));
        self.reward_supply.set(saturating_i64(reward_supply));
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render the registry in the text exposition format
    pub fn encode(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

fn saturating_i64(value: Amount) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("version", &self.version.get())
            .field("events_total", &self.events_total.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Outcome;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        assert_eq!(metrics.events_total.get(), 0);

        // Separate instances do not collide.
        let other = Metrics::new().unwrap();
        assert_eq!(other.version.get(), 0);
    }

    #[test]
    fn test_record_commit_and_rejection() {
        let metrics = Metrics::new().unwrap();
        let receipt = Receipt {
            version: 7,
            outcome: Outcome::Done,
            events: Vec::new(),
        };
        metrics.record_commit("start_job", &receipt);
        metrics.record_rejection("release", &Error::Conservation("too much".to_string()));
        metrics.update_balances(u128::MAX, 42);

        assert_eq!(
            metrics
                .operations_total
                .with_label_values(&["start_job"])
                .get(),
            1
        );
        assert_eq!(
            metrics
                .rejections_total
                .with_label_values(&["release", "conservation"])
                .get(),
            1
        );
        assert_eq!(metrics.version.get(), 7);
        assert_eq!(metrics.escrow_value_locked.get(), i64::MAX);
        assert_eq!(metrics.reward_supply.get(), 42);

        let text = metrics.encode().unwrap();
        assert!(text.contains("ledger_rejections_total"));
    }
}
