use std::collections::HashSet;

use log::{info, warn};
use reqwest::blocking::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use url::Url;

use crate::client::get_json;
use crate::error::{FetchFailure, UpstreamError};
use crate::model::{CatalogItem, PriceRecord};
use crate::pipeline::{FailedCheck, RunContext};
use crate::pool::run_bounded;

/// Validated answer from the pricing service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceQuote {
    pub amount: Decimal,
    pub currency: String,
    pub discount_pct: u8,
    pub available: bool,
}

pub trait PriceSource: Send + Sync {
    fn quote(&self, item_id: &str, region: &str) -> Result<PriceQuote, UpstreamError>;
}

#[derive(Deserialize)]
struct RawPrice {
    price: Option<Decimal>,
    currency: Option<String>,
    #[serde(default)]
    discount_pct: Option<f64>,
    #[serde(default = "available_by_default")]
    available: bool,
}

fn available_by_default() -> bool {
    true
}

impl TryFrom<RawPrice> for PriceQuote {
    type Error = UpstreamError;

    fn try_from(raw: RawPrice) -> Result<Self, Self::Error> {
        let invalid = |msg: String| UpstreamError::InvalidResponse(msg);

        if !raw.available {
            return Ok(Self {
                amount: raw.price.unwrap_or_default(),
                currency: raw.currency.unwrap_or_default(),
                discount_pct: 0,
                available: false,
            });
        }

        let amount = raw.price.ok_or_else(|| invalid("missing price".into()))?;
        if amount < Decimal::ZERO {
            return Err(invalid(format!("negative price {amount}")));
        }
        let currency = raw
            .currency
            .map(|c| c.trim().to_ascii_uppercase())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| invalid("missing currency".into()))?;
        let discount = raw.discount_pct.unwrap_or(0.0);
        if !discount.is_finite() || !(0.0..=100.0).contains(&discount) {
            return Err(invalid(format!("discount {discount} outside 0..=100")));
        }

        Ok(Self {
            amount,
            currency,
            discount_pct: discount.round() as u8,
            available: true,
        })
    }
}

/// Pricing service over HTTP.
pub struct HttpPriceSource<'a> {
    client: &'a Client,
    base_url: Url,
    api_key: Option<String>,
}

impl<'a> HttpPriceSource<'a> {
    pub fn new(client: &'a Client, base_url: Url, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url,
            api_key,
        }
    }

    fn item_url(&self, item_id: &str) -> Result<Url, UpstreamError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| {
                UpstreamError::Transport(format!("{} cannot be a base url", self.base_url))
            })?
            .pop_if_empty()
            .extend(["items", item_id]);
        Ok(url)
    }
}

impl PriceSource for HttpPriceSource<'_> {
    fn quote(&self, item_id: &str, region: &str) -> Result<PriceQuote, UpstreamError> {
        let mut request = self
            .client
            .get(self.item_url(item_id)?)
            .query(&[("region", region)]);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        get_json::<RawPrice>(request)?.try_into()
    }
}

/// Fetches one item's price in the run's region, retrying throttled or
/// transient failures with backoff.
pub fn fetch(ctx: &RunContext, item: &CatalogItem) -> Result<PriceRecord, FetchFailure> {
    let quote = ctx
        .retry
        .run(&format!("price {}", item.id), || {
            ctx.prices.quote(&item.id, &ctx.region)
        })
        .map_err(|(attempts, err)| match err {
            UpstreamError::NotFound => FetchFailure::Unavailable {
                region: ctx.region.clone(),
            },
            source => FetchFailure::Service { attempts, source },
        })?;

    if !quote.available {
        return Err(FetchFailure::Unavailable {
            region: ctx.region.clone(),
        });
    }

    Ok(PriceRecord {
        item_id: item.id.clone(),
        region: ctx.region.clone(),
        amount: quote.amount,
        currency: quote.currency,
        discount_pct: quote.discount_pct,
        fetched_at: time_format::now().unwrap_or(ctx.started_at),
    })
}

#[derive(Debug, Default)]
pub struct Fetched {
    pub priced: Vec<(CatalogItem, PriceRecord)>,
    pub failures: Vec<FailedCheck>,
    pub failed_items: HashSet<String>,
}

pub fn fetch_all(ctx: &RunContext, items: &[CatalogItem]) -> Fetched {
    let outcomes = run_bounded(items, ctx.concurrency, |item| fetch(ctx, item));

    let mut fetched = Fetched::default();
    for (item, outcome) in items.iter().zip(outcomes) {
        match outcome {
            Ok(record) => fetched.priced.push((item.clone(), record)),
            Err(err) => {
                warn!("Couldn't price {} ({}): {err}", item.name, item.id);
                fetched.failed_items.insert(item.id.clone());
                fetched.failures.push(FailedCheck::fetch(item, &err));
            }
        }
    }

    info!(
        "Priced {} of {} items in {}",
        fetched.priced.len(),
        items.len(),
        ctx.region
    );
    fetched
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;
    use crate::catalog::tests::FakeCatalog;
    use crate::model::ItemKind;
    use crate::pipeline::tests::context;

    #[derive(Default)]
    pub(crate) struct FakePrices {
        pub quotes: HashMap<String, Result<PriceQuote, UpstreamError>>,
        pub calls: Mutex<HashMap<String, u32>>,
    }

    impl FakePrices {
        pub fn with(mut self, item_id: &str, quote: Result<PriceQuote, UpstreamError>) -> Self {
            self.quotes.insert(item_id.to_string(), quote);
            self
        }

        pub fn calls(&self, item_id: &str) -> u32 {
            self.calls
                .lock()
                .unwrap()
                .get(item_id)
                .copied()
                .unwrap_or(0)
        }
    }

    impl PriceSource for FakePrices {
        fn quote(&self, item_id: &str, _region: &str) -> Result<PriceQuote, UpstreamError> {
            *self
                .calls
                .lock()
                .unwrap()
                .entry(item_id.to_string())
                .or_default() += 1;
            self.quotes
                .get(item_id)
                .cloned()
                .unwrap_or(Err(UpstreamError::NotFound))
        }
    }

    pub(crate) fn quote(amount: i64, discount_pct: u8) -> PriceQuote {
        PriceQuote {
            amount: Decimal::from(amount),
            currency: "TRY".into(),
            discount_pct,
            available: true,
        }
    }

    fn item(id: &str) -> CatalogItem {
        CatalogItem {
            id: id.into(),
            title_id: "T".into(),
            kind: ItemKind::Dlc,
            name: format!("{id} name"),
        }
    }

    #[test]
    fn no_discount_is_a_zero_discount_record() {
        let catalog = FakeCatalog::default();
        let prices = FakePrices::default().with("X", Ok(quote(100, 0)));
        let ctx = context(&catalog, &prices);

        let record = fetch(&ctx, &item("X")).unwrap();
        assert_eq!(record.discount_pct, 0);
        assert_eq!(record.amount, Decimal::from(100));
        assert_eq!(record.region, "TR");
    }

    #[test]
    fn unavailable_items_fail_without_retrying() {
        let catalog = FakeCatalog::default();
        let prices = FakePrices::default().with(
            "X",
            Ok(PriceQuote {
                available: false,
                ..quote(0, 0)
            }),
        );
        let ctx = context(&catalog, &prices);

        assert_eq!(
            fetch(&ctx, &item("X")),
            Err(FetchFailure::Unavailable {
                region: "TR".into()
            })
        );
        assert_eq!(prices.calls("X"), 1);
    }

    #[test]
    fn timeouts_exhaust_retries_per_item_only() {
        let catalog = FakeCatalog::default();
        let prices = FakePrices::default()
            .with("Z", Err(UpstreamError::Timeout))
            .with("A", Ok(quote(50, 10)));
        let ctx = context(&catalog, &prices);

        let fetched = fetch_all(&ctx, &[item("Z"), item("A")]);

        assert_eq!(prices.calls("Z"), ctx.retry.max_retries + 1);
        assert_eq!(prices.calls("A"), 1);
        assert_eq!(fetched.priced.len(), 1);
        assert_eq!(fetched.priced[0].0.id, "A");
        assert!(fetched.failed_items.contains("Z"));
        assert_eq!(fetched.failures.len(), 1);
    }

    #[test]
    fn validates_raw_prices() {
        let parse = |json: &str| {
            let raw: RawPrice = serde_json::from_str(json).unwrap();
            PriceQuote::try_from(raw)
        };

        let ok = parse(r#"{"price": 69.9, "currency": "try", "discount_pct": 30}"#).unwrap();
        assert_eq!(ok.amount.to_string(), "69.9");
        assert_eq!(ok.currency, "TRY");
        assert_eq!(ok.discount_pct, 30);
        assert!(ok.available);

        assert!(parse(r#"{"price": 10, "currency": "TRY", "discount_pct": 120}"#).is_err());
        assert!(parse(r#"{"price": -1, "currency": "TRY"}"#).is_err());
        assert!(parse(r#"{"price": 10}"#).is_err());
        assert!(parse(r#"{"currency": "TRY"}"#).is_err());
        assert!(!parse(r#"{"available": false}"#).unwrap().available);
    }

    #[test]
    fn builds_item_urls() {
        let client = Client::new();
        let source = HttpPriceSource::new(
            &client,
            Url::parse("https://prices.example.com").unwrap(),
            None,
        );
        assert_eq!(
            source.item_url("EP9000-CUSA12345_00-DLC1").unwrap().as_str(),
            "https://prices.example.com/items/EP9000-CUSA12345_00-DLC1"
        );
    }
}
