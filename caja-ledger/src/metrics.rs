//! Metrics collection for observability
//!
//! Prometheus metrics for the caja ledger, registered in a private registry
//! so several ledgers can live in one process (tests, multi-tenant hosts).
//!
//! # Metrics
//!
//! - `caja_charges_total` - Charges committed (with or without credit)
//! - `caja_deposits_total` - Deposits committed
//! - `caja_cuts_total` - Cash cuts requested
//! - `caja_rejected_total{reason}` - Operations refused (validation, blocked, ...)
//! - `caja_credit_consumed` - Credit balance consumed by charges
//! - `caja_operation_duration_seconds` - Latency of write operations

use prometheus::{
    Counter, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Charges committed
    pub charges_total: IntCounter,

    /// Deposits committed
    pub deposits_total: IntCounter,

    /// Cash cuts requested
    pub cuts_total: IntCounter,

    /// Refused operations by reason
    pub rejected_total: IntCounterVec,

    /// Credit consumed by charges (currency units)
    pub credit_consumed: Counter,

    /// Write operation latency
    pub operation_duration: Histogram,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let charges_total = IntCounter::new("caja_charges_total", "Charges committed")?;
        registry.register(Box::new(charges_total.clone()))?;

        let deposits_total = IntCounter::new("caja_deposits_total", "Deposits committed")?;
        registry.register(Box::new(deposits_total.clone()))?;

        let cuts_total = IntCounter::new("caja_cuts_total", "Cash cuts requested")?;
        registry.register(Box::new(cuts_total.clone()))?;

        let rejected_total = IntCounterVec::new(
            Opts::new("caja_rejected_total", "Operations refused by reason"),
            &["reason"],
        )?;
        registry.register(Box::new(rejected_total.clone()))?;

        let credit_consumed = Counter::new(
            "caja_credit_consumed",
            "Credit balance consumed by charges",
        )?;
        registry.register(Box::new(credit_consumed.clone()))?;

        let operation_duration = Histogram::with_opts(
            HistogramOpts::new(
                "caja_operation_duration_seconds",
                "Latency of write operations",
            )
            .buckets(vec![0.0005, 0.001, 0.0025, 0.005, 0.010, 0.025, 0.050, 0.100]),
        )?;
        registry.register(Box::new(operation_duration.clone()))?;

        Ok(Self {
            charges_total,
            deposits_total,
            cuts_total,
            rejected_total,
            credit_consumed,
            operation_duration,
            registry,
        })
    }

    /// Record a committed charge
    pub fn record_charge(&self, credit_used: Decimal) {
        self.charges_total.inc();
        if credit_used > Decimal::ZERO {
            self.credit_consumed.inc_by(credit_used.to_f64().unwrap_or(0.0));
        }
    }

    /// Record a committed deposit
    pub fn record_deposit(&self) {
        self.deposits_total.inc();
    }

    /// Record a requested cut
    pub fn record_cut(&self) {
        self.cuts_total.inc();
    }

    /// Record a refused operation
    pub fn record_rejection(&self, reason: &str) {
        self.rejected_total.with_label_values(&[reason]).inc();
    }

    /// Record write latency
    pub fn record_duration(&self, duration_seconds: f64) {
        self.operation_duration.observe(duration_seconds);
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("charges_total", &self.charges_total.get())
            .field("deposits_total", &self.deposits_total.get())
            .field("cuts_total", &self.cuts_total.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        assert_eq!(metrics.charges_total.get(), 0);
        assert_eq!(metrics.cuts_total.get(), 0);

        // Private registries do not collide
        let other = Metrics::new().unwrap();
        assert_eq!(other.deposits_total.get(), 0);
    }

    #[test]
    fn test_record_charge() {
        let metrics = Metrics::new().unwrap();
        metrics.record_charge(Decimal::ZERO);
        metrics.record_charge(Decimal::new(3000, 2));

        assert_eq!(metrics.charges_total.get(), 2);
        assert!((metrics.credit_consumed.get() - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_record_rejection() {
        let metrics = Metrics::new().unwrap();
        metrics.record_rejection("blocked");
        metrics.record_rejection("blocked");
        metrics.record_rejection("validation");

        assert_eq!(metrics.rejected_total.with_label_values(&["blocked"]).get(), 2);
        assert_eq!(metrics.rejected_total.with_label_values(&["validation"]).get(), 1);
    }
}
