use std::collections::HashSet;

use log::{debug, info, warn};
use reqwest::blocking::Client;
use serde::Deserialize;
use url::Url;

use crate::client::get_json;
use crate::error::{ResolutionFailure, UpstreamError};
use crate::model::{CatalogItem, ItemKind, TitleRef, TrackingIntent, TrackingMode};
use crate::pipeline::{FailedCheck, RunContext};
use crate::pool::run_bounded;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedItem {
    pub id: String,
    pub name: String,
}

/// A title as the enumeration service lists it for one region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TitleListing {
    pub title_id: String,
    pub name: String,
    pub base: Option<ListedItem>,
    pub addons: Vec<ListedItem>,
}

pub trait TitleCatalog: Send + Sync {
    fn enumerate(&self, title: &TitleRef, region: &str) -> Result<TitleListing, UpstreamError>;
}

#[derive(Deserialize)]
struct RawListing {
    title_id: String,
    #[serde(default)]
    name: String,
    base: Option<RawEntry>,
    #[serde(default)]
    addons: Vec<RawEntry>,
}

#[derive(Deserialize)]
struct RawEntry {
    id: String,
    #[serde(default)]
    name: String,
}

impl TryFrom<RawEntry> for ListedItem {
    type Error = UpstreamError;

    fn try_from(raw: RawEntry) -> Result<Self, Self::Error> {
        let id = raw.id.trim().to_string();
        if id.is_empty() {
            return Err(UpstreamError::InvalidResponse("catalog entry without id".into()));
        }
        let name = match raw.name.trim() {
            "" => id.clone(),
            name => name.to_string(),
        };
        Ok(Self { id, name })
    }
}

impl TryFrom<RawListing> for TitleListing {
    type Error = UpstreamError;

    fn try_from(raw: RawListing) -> Result<Self, Self::Error> {
        let title_id = raw.title_id.trim().to_string();
        if title_id.is_empty() {
            return Err(UpstreamError::InvalidResponse("listing without title_id".into()));
        }
        Ok(Self {
            name: match raw.name.trim() {
                "" => title_id.clone(),
                name => name.to_string(),
            },
            title_id,
            base: raw.base.map(ListedItem::try_from).transpose()?,
            addons: raw
                .addons
                .into_iter()
                .map(ListedItem::try_from)
                .collect::<Result<_, _>>()?,
        })
    }
}

/// Title-enumeration service over HTTP.
pub struct HttpCatalog<'a> {
    client: &'a Client,
    base_url: Url,
    api_key: Option<String>,
}

impl<'a> HttpCatalog<'a> {
    pub fn new(client: &'a Client, base_url: Url, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url,
            api_key,
        }
    }

    fn listing_url(&self, title: &TitleRef) -> Result<Url, UpstreamError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|()| {
                UpstreamError::Transport(format!("{} cannot be a base url", self.base_url))
            })?;
            segments.pop_if_empty().push("titles");
            if let TitleRef::Id(id) = title {
                segments.push(id);
            }
        }
        if let TitleRef::Name(name) = title {
            url.query_pairs_mut().append_pair("name", name);
        }
        Ok(url)
    }
}

impl TitleCatalog for HttpCatalog<'_> {
    fn enumerate(&self, title: &TitleRef, region: &str) -> Result<TitleListing, UpstreamError> {
        let mut request = self
            .client
            .get(self.listing_url(title)?)
            .query(&[("region", region)]);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        get_json::<RawListing>(request)?.try_into()
    }
}

/// Turns a listing into the items this intent tracks, deduplicated by id.
pub fn catalog_items(intent: &TrackingIntent, listing: TitleListing) -> Vec<CatalogItem> {
    let title_id = intent.key();
    let base_id = listing.base.as_ref().map(|b| b.id.clone());
    let mut seen = HashSet::new();
    let mut items = Vec::new();

    if let (TrackingMode::Full, Some(base)) = (intent.mode, listing.base) {
        seen.insert(base.id.clone());
        items.push(CatalogItem {
            id: base.id,
            title_id: title_id.clone(),
            kind: ItemKind::BaseGame,
            name: base.name,
        });
    }

    for addon in listing.addons {
        if base_id.as_deref() == Some(addon.id.as_str()) {
            continue;
        }
        if !seen.insert(addon.id.clone()) {
            debug!("Dropping duplicate add-on {} of {}", addon.id, listing.title_id);
            continue;
        }
        items.push(CatalogItem {
            id: addon.id,
            title_id: title_id.clone(),
            kind: ItemKind::Dlc,
            name: addon.name,
        });
    }

    items
}

pub fn resolve(
    ctx: &RunContext,
    intent: &TrackingIntent,
) -> Result<Vec<CatalogItem>, ResolutionFailure> {
    let listing = ctx
        .retry
        .run(&format!("enumerate {}", intent.title), || {
            ctx.catalog.enumerate(&intent.title, &ctx.region)
        })
        .map_err(|(attempts, err)| match err {
            UpstreamError::NotFound => ResolutionFailure::NotFound {
                region: ctx.region.clone(),
            },
            source => ResolutionFailure::Service { attempts, source },
        })?;
    debug!(
        "{} resolved to {} ({})",
        intent.title, listing.name, listing.title_id
    );
    Ok(catalog_items(intent, listing))
}

#[derive(Debug, Default)]
pub struct Resolution {
    pub items: Vec<CatalogItem>,
    pub failures: Vec<FailedCheck>,
    /// Keys of the intents that could not be resolved this run.
    pub failed_titles: HashSet<String>,
}

/// Resolves every intent with bounded parallelism. One title failing never
/// affects the others.
pub fn resolve_all(ctx: &RunContext, intents: &[TrackingIntent]) -> Resolution {
    let outcomes = run_bounded(intents, ctx.concurrency, |intent| resolve(ctx, intent));

    let mut resolution = Resolution::default();
    let mut seen = HashSet::new();
    for (intent, outcome) in intents.iter().zip(outcomes) {
        match outcome {
            Ok(items) => {
                if items.is_empty() {
                    info!("{} ({}) has nothing to track", intent.title, intent.mode);
                }
                for item in items {
                    if seen.insert(item.id.clone()) {
                        resolution.items.push(item);
                    } else {
                        debug!("{} is already tracked through another title", item.id);
                    }
                }
            }
            Err(err) => {
                warn!("Couldn't resolve {}: {err}", intent.title);
                resolution.failed_titles.insert(intent.key());
                resolution
                    .failures
                    .push(FailedCheck::resolution(intent, &err));
            }
        }
    }

    info!(
        "Resolved {} items from {} titles ({} failed)",
        resolution.items.len(),
        intents.len(),
        resolution.failed_titles.len()
    );
    resolution
}
