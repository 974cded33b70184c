//! Prometheus metrics

use crate::epoch::EpochReport;
use prometheus::{Encoder, Gauge, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// Node metrics registry
pub struct NodeMetrics {
    registry: Registry,
    epochs_archived: IntCounter,
    phase_failures: IntCounterVec,
    slashes: IntCounterVec,
    rejected_submissions: IntCounter,
    stale_transactions: IntCounter,
    rejected_transactions: IntCounter,
    publication_failures: IntCounter,
    late_peers: IntCounter,
    eligible_validators: IntGauge,
    current_epoch: IntGauge,
    last_gini: Gauge,
    last_top10: Gauge,
}

impl NodeMetrics {
    pub fn new(namespace: &str) -> anyhow::Result<Self> {
        let registry = Registry::new();

        let epochs_archived = IntCounter::with_opts(
            Opts::new("epochs_archived_total", "Epochs closed and archived").namespace(namespace),
        )?;
        let phase_failures = IntCounterVec::new(
            Opts::new("phase_failures_total", "Epoch phases skipped").namespace(namespace),
            &["phase"],
        )?;
        let slashes = IntCounterVec::new(
            Opts::new("slashes_total", "Executed slashes").namespace(namespace),
            &["severity"],
        )?;
        let rejected_submissions = IntCounter::with_opts(
            Opts::new("rejected_submissions_total", "Weight submissions rejected").namespace(namespace),
        )?;
        let stale_transactions = IntCounter::with_opts(
            Opts::new("stale_transactions_total", "Transactions outside the freshness window")
                .namespace(namespace),
        )?;
        let rejected_transactions = IntCounter::with_opts(
            Opts::new("rejected_transactions_total", "Malformed feed events").namespace(namespace),
        )?;
        let publication_failures = IntCounter::with_opts(
            Opts::new("publication_failures_total", "Failed ledger publications").namespace(namespace),
        )?;
        let late_peers = IntCounter::with_opts(
            Opts::new("late_peers_total", "Peer lookups cut off by the quorum deadline").namespace(namespace),
        )?;
        let eligible_validators = IntGauge::with_opts(
            Opts::new("eligible_validators", "Validators eligible for consensus").namespace(namespace),
        )?;
        let current_epoch = IntGauge::with_opts(
            Opts::new("current_epoch", "Epoch currently collecting").namespace(namespace),
        )?;
        let last_gini = Gauge::with_opts(
            Opts::new("reward_gini", "Gini coefficient of the last distribution").namespace(namespace),
        )?;
        let last_top10 = Gauge::with_opts(
            Opts::new("reward_top10_concentration", "Top-10 share of the last distribution")
                .namespace(namespace),
        )?;

        registry.register(Box::new(epochs_archived.clone()))?;
        registry.register(Box::new(phase_failures.clone()))?;
        registry.register(Box::new(slashes.clone()))?;
        registry.register(Box::new(rejected_submissions.clone()))?;
        registry.register(Box::new(stale_transactions.clone()))?;
        registry.register(Box::new(rejected_transactions.clone()))?;
        registry.register(Box::new(publication_failures.clone()))?;
        registry.register(Box::new(late_peers.clone()))?;
        registry.register(Box::new(eligible_validators.clone()))?;
        registry.register(Box::new(current_epoch.clone()))?;
        registry.register(Box::new(last_gini.clone()))?;
        registry.register(Box::new(last_top10.clone()))?;

        Ok(Self {
            registry,
            epochs_archived,
            phase_failures,
            slashes,
            rejected_submissions,
            stale_transactions,
            rejected_transactions,
            publication_failures,
            late_peers,
            eligible_validators,
            current_epoch,
            last_gini,
            last_top10,
        })
    }

    /// Fold a closed epoch into the counters
    pub fn observe_epoch(&self, report: &EpochReport) {
        self.epochs_archived.inc();
        for (phase, _) in report.skipped_phases() {
            self.phase_failures.with_label_values(&[phase.name()]).inc();
        }
        for slash in &report.slashes {
            self.slashes.with_label_values(&[slash.severity.name()]).inc();
        }
        if let Some(distribution) = &report.distribution {
            self.last_gini.set(distribution.gini_coefficient);
            self.last_top10.set(distribution.top10_concentration);
        }
        self.current_epoch.set(report.epoch_id.0 as i64 + 1);
    }

    pub fn slash_executed(&self, severity: &str) {
        self.slashes.with_label_values(&[severity]).inc();
    }

    pub fn submission_rejected(&self) {
        self.rejected_submissions.inc();
    }

    pub fn transaction_stale(&self) {
        self.stale_transactions.inc();
    }

    pub fn transaction_rejected(&self) {
        self.rejected_transactions.inc();
    }

    pub fn publication_failed(&self) {
        self.publication_failures.inc();
    }

    pub fn peers_late(&self, count: usize) {
        self.late_peers.inc_by(count as u64);
    }

    pub fn late_peers(&self) -> u64 {
        self.late_peers.get()
    }

    pub fn set_eligible(&self, count: usize) {
        self.eligible_validators.set(count as i64);
    }

    pub fn epochs_archived(&self) -> u64 {
        self.epochs_archived.get()
    }

    pub fn phase_failures(&self, phase: &str) -> u64 {
        self.phase_failures.with_label_values(&[phase]).get()
    }

    /// Render the registry in the Prometheus text format
    pub fn encode(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
