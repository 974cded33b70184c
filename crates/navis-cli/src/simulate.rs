//! Deterministic epoch simulation over the in-memory ports

use anyhow::bail;
use navis_core::{EpochId, Timestamp, ValidatorId, ONE_TOKEN};
use navis_economics::RawMinerEvent;
use navis_node::{
    ArchiveStore, FileArchive, InMemoryLedger, MemoryArchive, NodeConfig, QueuedTransactionFeed,
    ValidatorService,
};
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Events each miner produces per epoch, at most
const MAX_EVENTS_PER_MINER: u32 = 6;

pub struct Params {
    pub epochs: u64,
    pub validators: usize,
    pub outliers: usize,
    pub miners: u16,
    pub seed: u64,
    pub data_dir: Option<PathBuf>,
    pub print_metrics: bool,
}

fn peer_id(index: usize) -> ValidatorId {
    ValidatorId::new(format!("validator-{:02}", index))
}

fn normalize(mut weights: Vec<f64>) -> Vec<f64> {
    let total: f64 = weights.iter().sum();
    if total > 0.0 {
        weights.iter_mut().for_each(|w| *w /= total);
    }
    weights
}

/// Power-law miner activity: lower UIDs trade more
fn miner_events(rng: &mut ChaCha8Rng, miners: u16, now: Timestamp, span: i64) -> Vec<RawMinerEvent> {
    let mut events = Vec::new();
    for miner_id in 0..miners {
        let scale = 1_000.0 / f64::from(miner_id + 1).powf(1.2);
        let count = rng.gen_range(0..=MAX_EVENTS_PER_MINER);
        for _ in 0..count {
            events.push(RawMinerEvent {
                miner_id,
                amount: scale * rng.gen_range(0.5..1.5),
                is_creation: rng.gen_bool(0.6),
                timestamp: now - rng.gen_range(0..span.max(1)),
            });
        }
    }
    events
}

pub async fn run(config: NodeConfig, params: Params) -> anyhow::Result<()> {
    let entity_count = config.consensus.entity_count;
    if usize::from(params.miners) > entity_count {
        bail!("{} miners do not fit {} weight slots", params.miners, entity_count);
    }
    if params.validators == 0 || params.outliers >= params.validators {
        bail!("need at least one honest validator besides the outliers");
    }

    let mut rng = ChaCha8Rng::seed_from_u64(params.seed);
    let own = config.validator_id();
    let ledger = Arc::new(InMemoryLedger::new());
    ledger.set_stake(own.clone(), 10_000 * ONE_TOKEN);

    // Outliers take the highest indices
    let honest = params.validators - params.outliers;
    let peers: Vec<(ValidatorId, bool)> = (2..=params.validators)
        .map(|index| (peer_id(index), index > honest))
        .collect();
    for (validator_id, _) in &peers {
        let tokens: u128 = rng.gen_range(5_000..20_000);
        ledger.set_stake(validator_id.clone(), tokens * ONE_TOKEN);
    }

    let archive: Arc<dyn ArchiveStore> = match &params.data_dir {
        Some(dir) => Arc::new(FileArchive::open(dir)?),
        None => Arc::new(MemoryArchive::new()),
    };
    let feed = Arc::new(QueuedTransactionFeed::new());
    let span = config.epoch.length_secs as i64;
    let mut service = ValidatorService::new(config, ledger.clone(), ledger.clone(), feed.clone(), archive)?;

    info!(
        seed = params.seed,
        validators = params.validators,
        outliers = params.outliers,
        miners = params.miners,
        "Starting simulation"
    );

    println!(
        "{:>6} {:>5} {:>4} {:>7} {:>12} {:>6} {:>6} {:>8}",
        "epoch", "part", "dev", "slashes", "slashed", "gini", "top10", "eligible"
    );

    let mut now = navis_core::now();
    for _ in 0..params.epochs {
        feed.extend(miner_events(&mut rng, params.miners, now, span));
        service.poll_feed(now).await;
        service.sync_ledger(now).await;
        service.publish_own_weights(now).await;

        let epoch_id: EpochId = service.manager().current_epoch();
        let reference = service.manager().preview_weights(now);
        for (validator_id, outlier) in &peers {
            let weights = if *outlier {
                normalize((0..entity_count).map(|_| rng.gen::<f64>()).collect())
            } else {
                normalize(
                    reference
                        .iter()
                        .map(|w| w * rng.gen_range(0.99..1.01))
                        .collect(),
                )
            };
            ledger.publish_weights(validator_id.clone(), epoch_id, weights);
        }

        let report = service.close_epoch(now).await?;
        service.flush_outbox().await;

        let slashed: u128 = report.slashes.iter().map(|s| s.slash_amount).sum();
        let (gini, top10) = report
            .distribution
            .as_ref()
            .map(|d| (d.gini_coefficient, d.top10_concentration))
            .unwrap_or((0.0, 0.0));
        println!(
            "{:>6} {:>5} {:>4} {:>7} {:>12} {:>6.3} {:>6.3} {:>8}",
            report.epoch_id.0,
            report.participants,
            report.deviations.len(),
            report.slashes.len(),
            slashed / ONE_TOKEN,
            gini,
            top10,
            service.manager().eligible_count(),
        );

        now += span;
    }

    if params.print_metrics {
        println!();
        print!("{}", service.metrics().encode()?);
    }
    Ok(())
}
