//! Metrics collection for observability
//!
//! This module provides Prometheus metrics for monitoring the ledger.
//!
//! # Metrics
//!
//! - `ledger_entries_total` - Ledger entries appended
//! - `ledger_settlements_total` - Settlements committed
//! - `ledger_settlement_rejections_total` - Settlements rejected by the writer
//! - `ledger_transfer_transitions_total` - Transfer status changes
//! - `ledger_commit_duration_seconds` - Histogram of write-batch latencies

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, Registry, TextEncoder};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone, Debug)]
pub struct Metrics {
    /// Ledger entries appended
    pub entries_total: IntCounter,

    /// Settlements committed
    pub settlements_total: IntCounter,

    /// Settlements rejected (insufficient balance, deadline, ...)
    pub settlement_rejections: IntCounter,

    /// Transfer status changes
    pub transfer_transitions: IntCounter,

    /// Commit duration histogram
    pub commit_duration: Histogram,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector with its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let entries_total =
            IntCounter::new("ledger_entries_total", "Total number of ledger entries appended")?;
        registry.register(Box::new(entries_total.clone()))?;

        let settlements_total =
            IntCounter::new("ledger_settlements_total", "Total number of settlements committed")?;
        registry.register(Box::new(settlements_total.clone()))?;

        let settlement_rejections = IntCounter::new(
            "ledger_settlement_rejections_total",
            "Total number of settlements rejected by the writer",
        )?;
        registry.register(Box::new(settlement_rejections.clone()))?;

        let transfer_transitions = IntCounter::new(
            "ledger_transfer_transitions_total",
            "Total number of transfer status changes",
        )?;
        registry.register(Box::new(transfer_transitions.clone()))?;

        let commit_duration = Histogram::with_opts(
            HistogramOpts::new(
                "ledger_commit_duration_seconds",
                "Histogram of write-batch commit latencies",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 1.0]),
        )?;
        registry.register(Box::new(commit_duration.clone()))?;

        Ok(Self {
            entries_total,
            settlements_total,
            settlement_rejections,
            transfer_transitions,
            commit_duration,
            registry,
        })
    }

    /// Record appended entries
    pub fn record_entries(&self, count: usize) {
        self.entries_total.inc_by(count as u64);
    }

    /// Record committed settlement
    pub fn record_settlement(&self) {
        self.settlements_total.inc();
    }

    /// Record rejected settlement
    pub fn record_settlement_rejection(&self) {
        self.settlement_rejections.inc();
    }

    /// Record transfer status change
    pub fn record_transition(&self) {
        self.transfer_transitions.inc();
    }

    /// Record commit duration
    pub fn record_commit_duration(&self, duration_seconds: f64) {
        self.commit_duration.observe(duration_seconds);
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render all metrics in the Prometheus text format
    pub fn render(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("static metric descriptors are valid")
    }
}
