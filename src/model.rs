use std::collections::BTreeMap;
use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum_macros::Display;

pub type ItemId = String;

#[derive(Display, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackingMode {
    #[strum(to_string = "full")]
    Full,
    #[strum(to_string = "dlc-only")]
    DlcOnly,
}

/// A watchlist entry, either a store code or a name the catalog has to look up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TitleRef {
    Id(String),
    Name(String),
}

impl TitleRef {
    /// Case-insensitive identity used for deduplication and as the parent
    /// title identifier of every item resolved from this entry.
    pub fn key(&self) -> String {
        match self {
            Self::Id(id) => id.to_ascii_uppercase(),
            Self::Name(name) => name.to_lowercase(),
        }
    }
}

impl fmt::Display for TitleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) | Self::Name(id) => f.write_str(id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingIntent {
    pub title: TitleRef,
    pub mode: TrackingMode,
}

impl TrackingIntent {
    pub fn key(&self) -> String {
        self.title.key()
    }
}

#[derive(Display, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    #[strum(to_string = "base game")]
    BaseGame,
    #[strum(to_string = "DLC")]
    Dlc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogItem {
    pub id: ItemId,
    pub title_id: String,
    pub kind: ItemKind,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceRecord {
    pub item_id: ItemId,
    pub region: String,
    pub amount: Decimal,
    pub currency: String,
    pub discount_pct: u8,
    pub fetched_at: i64,
}

/// The comparable part of a price record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Quote {
    pub amount: Decimal,
    pub currency: String,
    pub discount_pct: u8,
}

impl fmt::Display for Quote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.discount_pct > 0 {
            write!(
                f,
                "{} {} ({}% off)",
                self.amount, self.currency, self.discount_pct
            )
        } else {
            write!(f, "{} {}", self.amount, self.currency)
        }
    }
}

/// One persisted row: the catalog item plus its last fetched price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRow {
    pub item_id: ItemId,
    pub title_id: String,
    pub kind: ItemKind,
    pub name: String,
    pub price: Decimal,
    pub currency: String,
    pub discount_pct: u8,
    pub fetched_at: i64,
}

impl SnapshotRow {
    pub fn new(item: &CatalogItem, record: &PriceRecord) -> Self {
        debug_assert_eq!(item.id, record.item_id);
        Self {
            item_id: item.id.clone(),
            title_id: item.title_id.clone(),
            kind: item.kind,
            name: item.name.clone(),
            price: record.amount,
            currency: record.currency.clone(),
            discount_pct: record.discount_pct,
            fetched_at: record.fetched_at,
        }
    }

    pub fn quote(&self) -> Quote {
        Quote {
            amount: self.price,
            currency: self.currency.clone(),
            discount_pct: self.discount_pct,
        }
    }
}

/// All rows of one run, keyed by item id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub region: String,
    pub generated_at: i64,
    rows: BTreeMap<ItemId, SnapshotRow>,
}

impl Snapshot {
    pub fn new(region: impl Into<String>, generated_at: i64) -> Self {
        Self {
            region: region.into(),
            generated_at,
            rows: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, row: SnapshotRow) {
        self.rows.insert(row.item_id.clone(), row);
    }

    pub fn get(&self, item_id: &str) -> Option<&SnapshotRow> {
        self.rows.get(item_id)
    }

    pub fn contains(&self, item_id: &str) -> bool {
        self.rows.contains_key(item_id)
    }

    pub fn rows(&self) -> impl Iterator<Item = &SnapshotRow> {
        self.rows.values()
    }

    pub fn into_rows(self) -> impl Iterator<Item = SnapshotRow> {
        self.rows.into_values()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl Extend<SnapshotRow> for Snapshot {
    fn extend<I: IntoIterator<Item = SnapshotRow>>(&mut self, iter: I) {
        for row in iter {
            self.insert(row);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_keys_are_case_insensitive() {
        assert_eq!(TitleRef::Id("cusa12345_00".into()).key(), "CUSA12345_00");
        assert_eq!(
            TitleRef::Name("Elden Ring".into()).key(),
            TitleRef::Name("ELDEN RING".into()).key()
        );
    }

    #[test]
    fn quote_display_mentions_discount_only_when_present() {
        let full = Quote {
            amount: Decimal::from(100),
            currency: "TRY".into(),
            discount_pct: 0,
        };
        let sale = Quote {
            amount: Decimal::from(70),
            discount_pct: 30,
            ..full.clone()
        };
        assert_eq!(full.to_string(), "100 TRY");
        assert_eq!(sale.to_string(), "70 TRY (30% off)");
    }

    #[test]
    fn snapshot_replaces_rows_with_same_id() {
        let mut snapshot = Snapshot::new("TR", 0);
        let row = SnapshotRow {
            item_id: "X".into(),
            title_id: "T".into(),
            kind: ItemKind::BaseGame,
            name: "X".into(),
            price: Decimal::from(100),
            currency: "TRY".into(),
            discount_pct: 0,
            fetched_at: 0,
        };
        snapshot.insert(row.clone());
        snapshot.insert(SnapshotRow {
            price: Decimal::from(90),
            ..row
        });
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.get("X").unwrap().price, Decimal::from(90));
    }
}
