use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use log::info;

mod catalog;
mod client;
mod config;
mod diff;
mod error;
mod model;
mod pipeline;
mod pool;
mod pricing;
mod report;
mod storage;
mod watchlist;

use crate::catalog::HttpCatalog;
use crate::config::Config;
use crate::pipeline::RunContext;
use crate::pricing::HttpPriceSource;
use crate::report::Report;
use crate::storage::SnapshotStore;

fn main() -> Result<()> {
    color_eyre::install()?;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::from_env()?;
    let client = client::build_client(&config)?;
    let catalog = HttpCatalog::new(&client, config.catalog_url.clone(), config.api_key.clone());
    let prices = HttpPriceSource::new(&client, config.pricing_url.clone(), config.api_key.clone());

    let started_at = time_format::now().map_err(|err| eyre!("failed to read clock: {err:?}"))?;
    let ctx = RunContext {
        region: config.region.clone(),
        concurrency: config.concurrency,
        retry: config.retry_policy(),
        started_at,
        catalog: &catalog,
        prices: &prices,
    };

    let intents = watchlist::load_watchlist(&config.full_list, &config.dlc_list);
    let store = SnapshotStore::new(&config.storage_path, config.keep_snapshots);
    let outcome =
        pipeline::run(&ctx, &intents, &store).wrap_err("price watch run failed, nothing committed")?;
    info!("Snapshot committed to {}", outcome.committed_to.display());
    if outcome.diff.is_unchanged() {
        info!("No price changes since the last run");
    }

    let date = time_format::strftime_utc("%Y-%m-%d", started_at)
        .map_err(|err| eyre!("failed to format run date: {err:?}"))?;
    let report = Report::build(&outcome, date, config.top_discounts);
    println!("{}", report.to_markdown());
    let written = report.write(&config.report_path);
    report::notify(&report, &client, config.webhook_url.as_ref());
    written?;

    Ok(())
}
