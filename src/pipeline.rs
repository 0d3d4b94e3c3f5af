use std::collections::HashMap;
use std::path::PathBuf;

use log::{info, warn};
use serde::Serialize;
use strum_macros::Display;

use crate::catalog::{self, TitleCatalog};
use crate::client::RetryPolicy;
use crate::diff::{Diff, compute_diff};
use crate::error::{FetchFailure, PersistenceFailure, ResolutionFailure};
use crate::model::{CatalogItem, ItemKind, Snapshot, SnapshotRow, TrackingIntent, TrackingMode};
use crate::pricing::{self, PriceSource};
use crate::storage::SnapshotStore;

/// Everything a run's stages share, passed explicitly to each of them.
pub struct RunContext<'a> {
    pub region: String,
    pub concurrency: usize,
    pub retry: RetryPolicy,
    pub started_at: i64,
    pub catalog: &'a dyn TitleCatalog,
    pub prices: &'a dyn PriceSource,
}

#[derive(Display, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailedStage {
    #[strum(to_string = "resolution")]
    Resolution,
    #[strum(to_string = "price fetch")]
    Fetch,
}

/// A title or item the run couldn't check, kept apart from price changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedCheck {
    pub stage: FailedStage,
    pub id: String,
    pub name: String,
    pub reason: String,
}

impl FailedCheck {
    pub fn resolution(intent: &TrackingIntent, err: &ResolutionFailure) -> Self {
        Self {
            stage: FailedStage::Resolution,
            id: intent.key(),
            name: intent.title.to_string(),
            reason: err.to_string(),
        }
    }

    pub fn fetch(item: &CatalogItem, err: &FetchFailure) -> Self {
        Self {
            stage: FailedStage::Fetch,
            id: item.id.clone(),
            name: item.name.clone(),
            reason: err.to_string(),
        }
    }
}

#[derive(Debug)]
pub struct RunOutcome {
    pub tracked_titles: usize,
    /// Rows fetched this run. Carried-over rows are not included.
    pub current: Snapshot,
    pub diff: Diff,
    pub failures: Vec<FailedCheck>,
    pub committed_to: PathBuf,
}

enum Baseline {
    Compare,
    /// Couldn't be checked this run; keep the old row as is.
    Carry,
    /// No longer on the watchlist.
    Drop,
}

fn baseline_for(
    row: &SnapshotRow,
    modes: &HashMap<String, TrackingMode>,
    resolution: &catalog::Resolution,
    fetched: &pricing::Fetched,
) -> Baseline {
    if resolution.failed_titles.contains(&row.title_id) || fetched.failed_items.contains(&row.item_id)
    {
        return Baseline::Carry;
    }
    match modes.get(&row.title_id) {
        None => Baseline::Drop,
        Some(TrackingMode::DlcOnly) if row.kind == ItemKind::BaseGame => Baseline::Drop,
        Some(_) => Baseline::Compare,
    }
}

/// One full pass: resolve, fetch, diff and commit. Only storage failures
/// abort; everything else ends up in the outcome.
pub fn run(
    ctx: &RunContext,
    intents: &[TrackingIntent],
    store: &SnapshotStore,
) -> Result<RunOutcome, PersistenceFailure> {
    let previous = store.load_previous()?;
    if !previous.is_empty() && previous.region != ctx.region {
        warn!(
            "Previous snapshot is for region {}, this run uses {}",
            previous.region, ctx.region
        );
    }

    let resolution = catalog::resolve_all(ctx, intents);
    let fetched = pricing::fetch_all(ctx, &resolution.items);

    let mut current = Snapshot::new(ctx.region.clone(), ctx.started_at);
    current.extend(
        fetched
            .priced
            .iter()
            .map(|(item, record)| SnapshotRow::new(item, record)),
    );

    let modes: HashMap<String, TrackingMode> =
        intents.iter().map(|i| (i.key(), i.mode)).collect();
    let mut baseline = Snapshot::new(previous.region.clone(), previous.generated_at);
    let mut carried = Vec::new();
    for row in previous.into_rows() {
        if current.contains(&row.item_id) {
            baseline.insert(row);
            continue;
        }
        match baseline_for(&row, &modes, &resolution, &fetched) {
            Baseline::Compare => baseline.insert(row),
            Baseline::Carry => carried.push(row),
            Baseline::Drop => info!("{} is no longer tracked, dropping it", row.name),
        }
    }

    let diff = compute_diff(&baseline, &current);

    let mut committed = current.clone();
    committed.extend(carried);
    let committed_to = store.commit(&committed)?;

    let mut failures = resolution.failures;
    failures.extend(fetched.failures);

    Ok(RunOutcome {
        tracked_titles: intents.len(),
        current,
        diff,
        failures,
        committed_to,
    })
}
