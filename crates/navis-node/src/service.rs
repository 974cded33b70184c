//! # Validator Service
//!
//! Single task that owns the [`EpochManager`] and talks to the outside
//! world through the ports. Every timer and every command is an arm of one
//! `tokio::select!` loop, so no two mutations of the local tables overlap.
//!
//! ## Timers
//!
//! | Timer | Action |
//! |-------|--------|
//! | ledger sync | refresh stake and active set |
//! | feed poll | pull miner events into the volume ledger |
//! | epoch tick | fetch peer vectors concurrently, run the pipeline, archive |
//! | publish | publish the own vector, flush slash requests and payouts |
//!
//! Publication is fire-and-forget: a failed call is logged and counted,
//! never retried within the epoch.

use crate::archive::ArchiveStore;
use crate::config::NodeConfig;
use crate::epoch::{EpochManager, EpochPhase, EpochReport};
use crate::metrics::NodeMetrics;
use crate::ports::{LedgerClient, PeerDirectory, TransactionFeed};
use anyhow::Context;
use futures::stream::{FuturesUnordered, StreamExt};
use navis_core::{EpochId, MinerId, NavisError, Result, StakeAmount, Timestamp, ValidatorId};
use navis_economics::{MisbehaviorReport, RawMinerEvent, SlashEvent};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Commands accepted by the service task
#[derive(Debug)]
pub enum NodeCommand {
    SubmitWeights {
        validator_id: ValidatorId,
        epoch_id: EpochId,
        weights: Vec<f64>,
        reply: oneshot::Sender<Result<()>>,
    },
    RecordTransaction {
        event: RawMinerEvent,
        reply: oneshot::Sender<Result<()>>,
    },
    ReportMisbehavior {
        report: MisbehaviorReport,
        reply: oneshot::Sender<Result<SlashEvent>>,
    },
    Status {
        reply: oneshot::Sender<NodeStatus>,
    },
    CloseEpoch {
        reply: oneshot::Sender<Result<EpochReport>>,
    },
    Shutdown,
}

/// Point-in-time view of the service state
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub validator_id: ValidatorId,
    pub epoch_id: EpochId,
    pub phase: EpochPhase,
    pub validators: usize,
    pub eligible_validators: usize,
    pub miners: usize,
    pub deviation_records: usize,
    pub total_slashed: StakeAmount,
    pub pending_publications: usize,
}

/// Events broadcast to subscribers
#[derive(Clone, Debug)]
pub enum ServiceEvent {
    EpochClosed(Box<EpochReport>),
    SlashExecuted(Box<SlashEvent>),
}

/// Outbound call queued for the publish timer
#[derive(Clone, Debug)]
enum Publication {
    Weights { epoch_id: EpochId, weights: Vec<f64> },
    Slash(Box<SlashEvent>),
    Distribution { epoch_id: EpochId, shares: BTreeMap<MinerId, f64> },
}

/// Cloneable handle to a running service
#[derive(Clone)]
pub struct ServiceHandle {
    tx: mpsc::Sender<NodeCommand>,
}

fn stopped() -> NavisError {
    NavisError::External("validator service stopped".into())
}

impl ServiceHandle {
    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> NodeCommand) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(build(reply)).await.map_err(|_| stopped())?;
        rx.await.map_err(|_| stopped())
    }

    pub async fn submit_weights(&self, validator_id: ValidatorId, epoch_id: EpochId, weights: Vec<f64>) -> Result<()> {
        self.request(|reply| NodeCommand::SubmitWeights {
            validator_id,
            epoch_id,
            weights,
            reply,
        })
        .await?
    }

    pub async fn record_transaction(&self, event: RawMinerEvent) -> Result<()> {
        self.request(|reply| NodeCommand::RecordTransaction { event, reply }).await?
    }

    pub async fn report_misbehavior(&self, report: MisbehaviorReport) -> Result<SlashEvent> {
        self.request(|reply| NodeCommand::ReportMisbehavior { report, reply }).await?
    }

    pub async fn status(&self) -> Result<NodeStatus> {
        self.request(|reply| NodeCommand::Status { reply }).await
    }

    /// Close the current epoch now instead of waiting for the tick
    pub async fn close_epoch(&self) -> Result<EpochReport> {
        self.request(|reply| NodeCommand::CloseEpoch { reply }).await?
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.tx.send(NodeCommand::Shutdown).await.map_err(|_| stopped())
    }
}

/// The validator node service
pub struct ValidatorService {
    config: NodeConfig,
    manager: EpochManager,
    ledger: Arc<dyn LedgerClient>,
    peers: Arc<dyn PeerDirectory>,
    feed: Arc<dyn TransactionFeed>,
    archive: Arc<dyn ArchiveStore>,
    metrics: NodeMetrics,
    outbox: VecDeque<Publication>,
    event_tx: broadcast::Sender<ServiceEvent>,
}

impl ValidatorService {
    /// Build the service, resuming from the archive's snapshot if present
    pub fn new(
        config: NodeConfig,
        ledger: Arc<dyn LedgerClient>,
        peers: Arc<dyn PeerDirectory>,
        feed: Arc<dyn TransactionFeed>,
        archive: Arc<dyn ArchiveStore>,
    ) -> anyhow::Result<Self> {
        config.validate().context("invalid node configuration")?;

        let manager = match archive.load_snapshot().context("loading state snapshot")? {
            Some(snapshot) => EpochManager::restore(&config, snapshot),
            None => EpochManager::new(&config),
        };
        let metrics = NodeMetrics::new(&config.metrics.namespace)?;
        let (event_tx, _) = broadcast::channel(256);

        info!(
            validator = %config.node.validator_id,
            epoch = manager.current_epoch().0,
            entities = manager.entity_count(),
            "Validator service initialised"
        );

        Ok(Self {
            config,
            manager,
            ledger,
            peers,
            feed,
            archive,
            metrics,
            outbox: VecDeque::new(),
            event_tx,
        })
    }

    /// Subscribe to service events
    pub fn subscribe(&self) -> broadcast::Receiver<ServiceEvent> {
        self.event_tx.subscribe()
    }

    /// Run on a new task and return its handle
    pub fn spawn(self) -> (ServiceHandle, JoinHandle<Result<()>>) {
        let (tx, rx) = mpsc::channel(1024);
        let task = tokio::spawn(self.run(rx));
        (ServiceHandle { tx }, task)
    }

    /// Scheduler loop; returns on shutdown or a fatal error
    pub async fn run(mut self, mut commands: mpsc::Receiver<NodeCommand>) -> Result<()> {
        let epoch = &self.config.epoch;
        let mut epoch_tick = interval_at(Instant::now() + epoch.epoch_length(), epoch.epoch_length());
        let mut sync_tick = interval(epoch.ledger_sync());
        let mut poll_tick = interval(epoch.feed_poll());
        let mut publish_tick = interval(epoch.publish());
        for tick in [&mut epoch_tick, &mut sync_tick, &mut poll_tick, &mut publish_tick] {
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        }

        info!(epoch = self.manager.current_epoch().0, "Validator service running");

        loop {
            tokio::select! {
                command = commands.recv() => {
                    match command {
                        Some(NodeCommand::Shutdown) | None => {
                            info!("Validator service shutting down");
                            break;
                        }
                        Some(command) => self.handle_command(command).await?,
                    }
                }
                _ = sync_tick.tick() => {
                    self.sync_ledger(navis_core::now()).await;
                }
                _ = poll_tick.tick() => {
                    self.poll_feed(navis_core::now()).await;
                }
                _ = epoch_tick.tick() => {
                    self.tick_epoch().await?;
                }
                _ = publish_tick.tick() => {
                    self.publish_own_weights(navis_core::now()).await;
                    self.flush_outbox().await;
                }
            }
        }

        self.flush_outbox().await;
        self.archive
            .save_snapshot(&self.manager.snapshot(navis_core::now()))?;
        Ok(())
    }

    async fn handle_command(&mut self, command: NodeCommand) -> Result<()> {
        match command {
            NodeCommand::SubmitWeights {
                validator_id,
                epoch_id,
                weights,
                reply,
            } => {
                let result = self.manager.submit_weights(validator_id, epoch_id, weights);
                if result.is_err() {
                    self.metrics.submission_rejected();
                }
                let _ = reply.send(result);
            }
            NodeCommand::RecordTransaction { event, reply } => {
                let result = self.record_transaction(event, navis_core::now());
                let _ = reply.send(result);
            }
            NodeCommand::ReportMisbehavior { report, reply } => {
                let result = self.report_misbehavior(&report);
                let _ = reply.send(result);
            }
            NodeCommand::Status { reply } => {
                let _ = reply.send(self.status());
            }
            NodeCommand::CloseEpoch { reply } => match self.close_epoch(navis_core::now()).await {
                Err(e) if !e.is_recoverable() => {
                    let _ = reply.send(Err(e.clone()));
                    return Err(e);
                }
                result => {
                    let _ = reply.send(result);
                }
            },
            NodeCommand::Shutdown => {}
        }
        Ok(())
    }

    async fn tick_epoch(&mut self) -> Result<()> {
        match self.close_epoch(navis_core::now()).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_recoverable() => {
                warn!(error = %e, "Epoch close failed");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, code = e.code(), "Fatal error closing epoch");
                Err(e)
            }
        }
    }

    /// Refresh stake and active-set membership from the ledger
    pub async fn sync_ledger(&mut self, now: Timestamp) {
        let active = match self.ledger.active_validator_set().await {
            Ok(active) => active,
            Err(e) => {
                warn!(error = %e, "Ledger sync failed");
                return;
            }
        };

        for validator_id in &active {
            match self.ledger.validator_stake(validator_id).await {
                Ok(stake) => self.manager.sync_stake(validator_id, stake, now),
                Err(e) => warn!(validator = %validator_id.short(), error = %e, "Stake lookup failed"),
            }
        }

        let deactivated = self.manager.retain_active(&active, now);
        let eligible = self.manager.eligible_count();
        self.metrics.set_eligible(eligible);
        debug!(active = active.len(), deactivated, eligible, "Ledger synced");
    }

    /// Drain the transaction feed into the volume ledger
    pub async fn poll_feed(&mut self, now: Timestamp) {
        let events = match self.feed.poll().await {
            Ok(events) => events,
            Err(e) => {
                warn!(error = %e, "Transaction feed poll failed");
                return;
            }
        };

        let total = events.len();
        let accepted = events
            .into_iter()
            .filter(|event| self.record_transaction(event.clone(), now).is_ok())
            .count();
        if total > 0 {
            debug!(total, accepted, "Transaction feed polled");
        }
    }

    fn record_transaction(&mut self, event: RawMinerEvent, now: Timestamp) -> Result<()> {
        let miner_id = event.miner_id;
        let result = self.manager.record_transaction(event, now);
        match &result {
            Ok(()) => {}
            Err(e @ NavisError::StaleData { .. }) => {
                self.metrics.transaction_stale();
                debug!(miner = miner_id, error = %e, "Stale transaction excluded");
            }
            Err(e) => {
                self.metrics.transaction_rejected();
                warn!(miner = miner_id, error = %e, "Transaction rejected");
            }
        }
        result
    }

    /// Execute a critical slash and queue the ledger request
    pub fn report_misbehavior(&mut self, report: &MisbehaviorReport) -> Result<SlashEvent> {
        let event = self.manager.report_misbehavior(report)?;
        self.metrics.slash_executed(event.severity.name());
        self.outbox.push_back(Publication::Slash(Box::new(event.clone())));
        let _ = self.event_tx.send(ServiceEvent::SlashExecuted(Box::new(event.clone())));
        Ok(event)
    }

    /// Publish this validator's vector for the collecting epoch
    ///
    /// Runs on the publish timer so peers can read it before the epoch
    /// closes. The local submission is replaced only once the ledger holds
    /// the same vector.
    pub async fn publish_own_weights(&mut self, now: Timestamp) {
        let epoch_id = self.manager.current_epoch();
        let own = self.manager.validator_id().clone();
        let weights = self.manager.preview_weights(now);

        if let Err(e) = self.ledger.submit_weights(&own, epoch_id, &weights).await {
            self.metrics.publication_failed();
            warn!(epoch = epoch_id.0, error = %e, "Own weight vector not published");
            return;
        }
        match self.manager.submit_weights(own, epoch_id, weights) {
            Ok(()) => debug!(epoch = epoch_id.0, "Own weight vector published"),
            Err(e) => warn!(epoch = epoch_id.0, error = %e, "Own weight vector rejected"),
        }
    }

    /// Query every active peer concurrently until the quorum deadline
    ///
    /// Answers that arrive in time are kept even when other peers are late.
    /// Fails only when the deadline cuts collection short of quorum.
    async fn collect_peers(&mut self, epoch_id: EpochId) -> std::result::Result<usize, String> {
        let own = self.manager.validator_id().clone();
        let peers: Vec<ValidatorId> = self
            .manager
            .registry()
            .active_validators()
            .iter()
            .map(|s| s.validator_id.clone())
            .filter(|id| *id != own)
            .collect();

        let mut lookups: FuturesUnordered<_> = peers
            .into_iter()
            .map(|validator_id| {
                let directory = Arc::clone(&self.peers);
                async move {
                    let result = directory.peer_submission(&validator_id, epoch_id).await;
                    (validator_id, result)
                }
            })
            .collect();

        let timeout = self.config.epoch.quorum_timeout();
        let deadline = Instant::now() + timeout;
        let mut accepted = 0;
        let mut timed_out = false;
        loop {
            let (validator_id, result) = match tokio::time::timeout_at(deadline, lookups.next()).await {
                Ok(Some(answer)) => answer,
                Ok(None) => break,
                Err(_) => {
                    timed_out = true;
                    break;
                }
            };
            match result {
                Ok(Some(weights)) => match self.manager.submit_weights(validator_id.clone(), epoch_id, weights) {
                    Ok(()) => accepted += 1,
                    Err(e) => {
                        self.metrics.submission_rejected();
                        warn!(validator = %validator_id.short(), error = %e, "Peer submission rejected");
                    }
                },
                Ok(None) => debug!(validator = %validator_id.short(), "Peer has not submitted"),
                Err(e) => warn!(validator = %validator_id.short(), error = %e, "Peer lookup failed"),
            }
        }

        if timed_out {
            let late = lookups.len();
            self.metrics.peers_late(late);
            warn!(epoch = epoch_id.0, late, accepted, "Quorum deadline passed with peers outstanding");

            let have = self.manager.eligible_submissions();
            let need = self.config.consensus.min_participants;
            if have < need {
                return Err(format!(
                    "quorum timeout after {}s: {} of {} eligible submissions",
                    timeout.as_secs(),
                    have,
                    need
                ));
            }
        }
        Ok(accepted)
    }

    /// Gather peers and run the pipeline
    ///
    /// The vector published during Collecting is the one that counts; a
    /// node that never managed to publish submits its preview now and
    /// queues it for the ledger.
    pub async fn close_epoch(&mut self, now: Timestamp) -> Result<EpochReport> {
        let epoch_id = self.manager.current_epoch();
        let own = self.manager.validator_id().clone();

        if !self.manager.has_submitted(&own) {
            let weights = self.manager.preview_weights(now);
            match self.manager.submit_weights(own, epoch_id, weights.clone()) {
                Ok(()) => self.outbox.push_back(Publication::Weights { epoch_id, weights }),
                Err(e) => warn!(epoch = epoch_id.0, error = %e, "Own weight vector rejected"),
            }
        }

        let peer_fault = match self.collect_peers(epoch_id).await {
            Ok(accepted) => {
                debug!(epoch = epoch_id.0, accepted, "Peer submissions collected");
                None
            }
            Err(reason) => Some(reason),
        };

        let report = self.manager.close_epoch(now, peer_fault)?;

        for slash in &report.slashes {
            self.outbox.push_back(Publication::Slash(Box::new(slash.clone())));
        }
        if let Some(distribution) = &report.distribution {
            self.outbox.push_back(Publication::Distribution {
                epoch_id,
                shares: distribution.shares(),
            });
        }

        self.archive.append_epoch(&report)?;
        self.archive.save_snapshot(&self.manager.snapshot(now))?;

        self.metrics.observe_epoch(&report);
        self.metrics.set_eligible(self.manager.eligible_count());
        let _ = self.event_tx.send(ServiceEvent::EpochClosed(Box::new(report.clone())));

        info!(
            epoch = epoch_id.0,
            participants = report.participants,
            deviations = report.deviations.len(),
            slashes = report.slashes.len(),
            skipped = report.skipped_phases().len(),
            "Epoch archived"
        );
        Ok(report)
    }

    /// Attempt every queued publication once
    pub async fn flush_outbox(&mut self) {
        let own = self.manager.validator_id().clone();
        while let Some(publication) = self.outbox.pop_front() {
            let result = match &publication {
                Publication::Weights { epoch_id, weights } => {
                    self.ledger.submit_weights(&own, *epoch_id, weights).await
                }
                Publication::Slash(event) => match self.ledger.request_slash(event).await {
                    Ok(true) => Ok(()),
                    Ok(false) => {
                        warn!(slash = %event.id, validator = %event.validator_id.short(), "Ledger rejected slash request");
                        Ok(())
                    }
                    Err(e) => Err(e),
                },
                Publication::Distribution { epoch_id, shares } => {
                    self.ledger.publish_distribution(*epoch_id, shares).await
                }
            };

            if let Err(e) = result {
                self.metrics.publication_failed();
                warn!(error = %e, publication = ?publication, "Publication failed, dropped");
            }
        }
    }

    pub fn status(&self) -> NodeStatus {
        NodeStatus {
            validator_id: self.manager.validator_id().clone(),
            epoch_id: self.manager.current_epoch(),
            phase: self.manager.phase(),
            validators: self.manager.registry().len(),
            eligible_validators: self.manager.eligible_count(),
            miners: self.manager.volume().miner_count(),
            deviation_records: self.manager.deviation_window().len(),
            total_slashed: self.manager.slashing().total_slashed(),
            pending_publications: self.outbox.len(),
        }
    }

    pub fn manager(&self) -> &EpochManager {
        &self.manager
    }

    pub fn metrics(&self) -> &NodeMetrics {
        &self.metrics
    }

    pub fn pending_publications(&self) -> usize {
        self.outbox.len()
    }
}
