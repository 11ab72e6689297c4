//! `config` and `inspect` subcommands.

use eyre::{Result, WrapErr, eyre};
use subnet_managing::{FileMinerStore, Hotkey, ManagingConfig, ManagingService, SystemClock};

use crate::cli::InspectArgs;

pub(crate) fn print_config(config: &ManagingConfig) -> Result<()> {
    print!("{}", config.to_toml_string()?);
    Ok(())
}

pub(crate) fn inspect(config: ManagingConfig, args: &InspectArgs) -> Result<()> {
    let path = config
        .store
        .path
        .clone()
        .ok_or_else(|| eyre!("no store configured, pass --store.path or set store.path"))?;

    let store = FileMinerStore::<Hotkey>::new(&path)
        .wrap_err_with(|| format!("failed to open miner store: {}", path.display()))?;
    let service = ManagingService::open(config, store, SystemClock)?;

    let mut rows: Vec<_> = service
        .list_all()
        .into_iter()
        .map(|id| {
            let score = service.representative_score(&id);
            let history = service.history(&id).len();
            let remaining = service.peek_remaining(&id).ok();
            (id, score, history, remaining)
        })
        .collect();
    rows.sort_by(|a, b| {
        let (sa, sb) = (a.1.unwrap_or(f64::NEG_INFINITY), b.1.unwrap_or(f64::NEG_INFINITY));
        sb.total_cmp(&sa).then_with(|| a.0.cmp(&b.0))
    });
    if let Some(top) = args.top {
        rows.truncate(top);
    }

    println!("{:<50} {:>8} {:>8} {:>10}", "miner", "score", "history", "remaining");
    for (id, score, history, remaining) in &rows {
        let score = score.map_or_else(|| "-".to_string(), |s| format!("{s:.4}"));
        let remaining = remaining.map_or_else(|| "-".to_string(), |r| r.to_string());
        println!("{:<50} {score:>8} {history:>8} {remaining:>10}", id.as_str());
    }
    println!("{} miners", service.miner_count());
    Ok(())
}
