//! `simulate` subcommand: concurrent validators against an in-memory service.

use std::collections::HashMap;
use std::sync::Arc;

use eyre::{Result, ensure};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use subnet_managing::{
    Hotkey, ManagingConfig, ManagingError, ManagingService, MemoryMinerStore, SampleMode,
    SystemClock,
};
use tracing::{debug, info};

use crate::cli::SimulateArgs;

type Service = ManagingService<Hotkey, MemoryMinerStore<Hotkey>, SystemClock>;

/// What one validator task observed.
#[derive(Debug, Default)]
struct ValidatorReport {
    picks: HashMap<Hotkey, usize>,
    denied: usize,
    no_eligible: usize,
}

impl ValidatorReport {
    fn merge(&mut self, other: Self) {
        for (id, count) in other.picks {
            *self.picks.entry(id).or_default() += count;
        }
        self.denied += other.denied;
        self.no_eligible += other.no_eligible;
    }
}

pub(crate) async fn run(mut config: ManagingConfig, args: &SimulateArgs) -> Result<()> {
    ensure!(args.miners > 0, "--miners must be at least 1");
    ensure!(
        (0.0..=1.0).contains(&args.organic_share),
        "--organic-share must be in [0, 1]"
    );

    // Simulations never touch the configured store.
    config.store.path = None;
    let seed = args.seed.unwrap_or_else(rand::random);
    let mut rng = StdRng::seed_from_u64(seed);

    let service = Arc::new(ManagingService::new(config, MemoryMinerStore::new(), SystemClock));
    let quality: HashMap<Hotkey, f64> = (0..args.miners)
        .map(|i| (Hotkey::new(format!("miner-{i:03}")), rng.random::<f64>()))
        .collect();
    for id in quality.keys() {
        service.ensure_registered(id)?;
    }
    let quality = Arc::new(quality);

    info!(seed, miners = args.miners, validators = args.validators, "starting simulation");

    let mut tasks = tokio::task::JoinSet::new();
    for validator in 0..args.validators {
        let service = Arc::clone(&service);
        let quality = Arc::clone(&quality);
        let args = args.clone();
        let rng = StdRng::seed_from_u64(seed.wrapping_add(validator as u64 + 1));
        tasks.spawn(async move { run_validator(validator, &service, &quality, &args, rng).await });
    }

    let mut report = ValidatorReport::default();
    while let Some(result) = tasks.join_next().await {
        report.merge(result??);
    }

    print_report(&service, &quality, &report);
    Ok(())
}

async fn run_validator(
    validator: usize,
    service: &Service,
    quality: &HashMap<Hotkey, f64>,
    args: &SimulateArgs,
    mut rng: StdRng,
) -> Result<ValidatorReport, ManagingError> {
    let mut report = ValidatorReport::default();

    for request in 0..args.requests {
        let organic = rng.random_bool(args.organic_share);
        let mode = if organic {
            SampleMode::organic(args.threshold)
        } else {
            SampleMode::Synthetic
        };

        // Organic traffic falls back to synthetic selection when no miner qualifies yet.
        let picked = match service.sample_with(mode, &mut rng) {
            Err(ManagingError::NoEligibleMiner) if organic => {
                report.no_eligible += 1;
                service.sample_with(SampleMode::Synthetic, &mut rng)
            }
            other => other,
        };
        let id = match picked {
            Ok(id) => id,
            Err(ManagingError::NoEligibleMiner) => {
                report.no_eligible += 1;
                continue;
            }
            Err(e) => return Err(e),
        };

        if !service.consume_rate_limit(&id, 1)?.allowed {
            report.denied += 1;
            continue;
        }
        *report.picks.entry(id.clone()).or_default() += 1;

        if !organic {
            let base = quality.get(&id).copied().unwrap_or_default();
            let score = (base + rng.random_range(-0.1..=0.1)).clamp(0.0, 1.0);
            service.update_score(&id, score)?;
        }

        if request % 32 == 0 {
            tokio::task::yield_now().await;
        }
    }

    debug!(validator, denied = report.denied, "validator finished");
    Ok(report)
}

fn print_report(service: &Service, quality: &HashMap<Hotkey, f64>, report: &ValidatorReport) {
    let mut ids: Vec<&Hotkey> = quality.keys().collect();
    ids.sort();

    println!("{:<12} {:>8} {:>8} {:>8} {:>10}", "miner", "quality", "score", "picks", "remaining");
    for id in ids {
        let score = service
            .representative_score(id)
            .map_or_else(|| "-".to_string(), |s| format!("{s:.3}"));
        let picks = report.picks.get(id).copied().unwrap_or_default();
        let remaining = service.peek_remaining(id).unwrap_or_default();
        let quality = quality.get(id).copied().unwrap_or_default();
        println!("{:<12} {quality:>8.3} {score:>8} {picks:>8} {remaining:>10}", id.as_str());
    }

    let served: usize = report.picks.values().sum();
    println!(
        "served {served}, denied {}, no eligible miner {}",
        report.denied, report.no_eligible
    );
}
