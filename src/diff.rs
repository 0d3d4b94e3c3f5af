use serde::Serialize;
use strum_macros::{Display, VariantArray};

use crate::model::{ItemId, ItemKind, Quote, Snapshot, SnapshotRow};

/// Report sections, in the order they are rendered.
#[derive(Display, Debug, Clone, Copy, PartialEq, Eq, Hash, VariantArray, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeCategory {
    #[strum(to_string = "Discount started or increased")]
    DiscountStartedOrIncreased,
    #[strum(to_string = "Discount ended")]
    DiscountEnded,
    #[strum(to_string = "Price changed")]
    PriceChanged,
    #[strum(to_string = "Newly tracked")]
    NewlyTracked,
    #[strum(to_string = "Delisted")]
    Delisted,
    #[strum(to_string = "Unchanged")]
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffEntry {
    pub item_id: ItemId,
    pub name: String,
    pub kind: ItemKind,
    pub category: ChangeCategory,
    pub previous: Option<Quote>,
    pub current: Option<Quote>,
}

#[derive(Debug, Default, Clone)]
pub struct Diff {
    /// One entry per item in the current snapshot.
    pub entries: Vec<DiffEntry>,
    /// Items only the previous snapshot has.
    pub delisted: Vec<DiffEntry>,
}

impl Diff {
    pub fn in_category(&self, category: ChangeCategory) -> impl Iterator<Item = &DiffEntry> {
        self.entries
            .iter()
            .chain(&self.delisted)
            .filter(move |e| e.category == category)
    }

    pub fn is_unchanged(&self) -> bool {
        self.delisted.is_empty()
            && self
                .entries
                .iter()
                .all(|e| e.category == ChangeCategory::Unchanged)
    }
}

/// Discount movements outrank raw price movements.
pub fn classify(previous: Option<&Quote>, current: &Quote) -> ChangeCategory {
    let Some(previous) = previous else {
        return ChangeCategory::NewlyTracked;
    };
    if current.discount_pct > previous.discount_pct {
        ChangeCategory::DiscountStartedOrIncreased
    } else if current.discount_pct == 0 && previous.discount_pct > 0 {
        ChangeCategory::DiscountEnded
    } else if previous != current {
        ChangeCategory::PriceChanged
    } else {
        ChangeCategory::Unchanged
    }
}

pub fn compute_diff(previous: &Snapshot, current: &Snapshot) -> Diff {
    let entries = current
        .rows()
        .map(|row| {
            let prev = previous.get(&row.item_id).map(SnapshotRow::quote);
            let quote = row.quote();
            DiffEntry {
                item_id: row.item_id.clone(),
                name: row.name.clone(),
                kind: row.kind,
                category: classify(prev.as_ref(), &quote),
                previous: prev,
                current: Some(quote),
            }
        })
        .collect();

    let delisted = previous
        .rows()
        .filter(|row| !current.contains(&row.item_id))
        .map(|row| DiffEntry {
            item_id: row.item_id.clone(),
            name: row.name.clone(),
            kind: row.kind,
            category: ChangeCategory::Delisted,
            previous: Some(row.quote()),
            current: None,
        })
        .collect();

    Diff { entries, delisted }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use strum::VariantArray;

    fn quote(amount: i64, discount_pct: u8) -> Quote {
        Quote {
            amount: Decimal::from(amount),
            currency: "TRY".into(),
            discount_pct,
        }
    }

    fn row(id: &str, amount: i64, discount_pct: u8) -> SnapshotRow {
        SnapshotRow {
            item_id: id.into(),
            title_id: "T".into(),
            kind: ItemKind::BaseGame,
            name: format!("{id} name"),
            price: Decimal::from(amount),
            currency: "TRY".into(),
            discount_pct,
            fetched_at: 0,
        }
    }

    fn snapshot(rows: &[SnapshotRow]) -> Snapshot {
        let mut snapshot = Snapshot::new("TR", 0);
        snapshot.extend(rows.iter().cloned());
        snapshot
    }

    #[test]
    fn absent_from_previous_is_newly_tracked_even_when_discounted() {
        assert_eq!(classify(None, &quote(70, 30)), ChangeCategory::NewlyTracked);
        assert_eq!(classify(None, &quote(100, 0)), ChangeCategory::NewlyTracked);
    }

    #[test]
    fn discount_start_beats_price_change() {
        assert_eq!(
            classify(Some(&quote(100, 0)), &quote(70, 30)),
            ChangeCategory::DiscountStartedOrIncreased
        );
        assert_eq!(
            classify(Some(&quote(70, 30)), &quote(50, 50)),
            ChangeCategory::DiscountStartedOrIncreased
        );
    }

    #[test]
    fn discount_back_to_zero_is_discount_ended() {
        assert_eq!(
            classify(Some(&quote(70, 30)), &quote(100, 0)),
            ChangeCategory::DiscountEnded
        );
    }

    #[test]
    fn price_move_with_same_discount_is_price_changed() {
        assert_eq!(
            classify(Some(&quote(100, 0)), &quote(120, 0)),
            ChangeCategory::PriceChanged
        );
        assert_eq!(
            classify(Some(&quote(70, 30)), &quote(80, 30)),
            ChangeCategory::PriceChanged
        );
    }

    #[test]
    fn smaller_but_nonzero_discount_is_price_changed() {
        assert_eq!(
            classify(Some(&quote(50, 50)), &quote(70, 30)),
            ChangeCategory::PriceChanged
        );
    }

    #[test]
    fn identical_quotes_are_unchanged() {
        assert_eq!(
            classify(Some(&quote(70, 30)), &quote(70, 30)),
            ChangeCategory::Unchanged
        );
    }

    #[test]
    fn discount_scenario_keeps_both_sides() {
        let diff = compute_diff(&snapshot(&[row("X", 100, 0)]), &snapshot(&[row("X", 70, 30)]));
        assert_eq!(
            diff.entries,
            vec![DiffEntry {
                item_id: "X".into(),
                name: "X name".into(),
                kind: ItemKind::BaseGame,
                category: ChangeCategory::DiscountStartedOrIncreased,
                previous: Some(quote(100, 0)),
                current: Some(quote(70, 30)),
            }]
        );
        assert!(diff.delisted.is_empty());
    }

    #[test]
    fn items_missing_from_current_are_delisted() {
        let diff = compute_diff(
            &snapshot(&[row("X", 100, 0), row("GONE", 10, 0)]),
            &snapshot(&[row("X", 100, 0)]),
        );
        assert_eq!(diff.delisted.len(), 1);
        assert_eq!(diff.delisted[0].item_id, "GONE");
        assert_eq!(diff.delisted[0].category, ChangeCategory::Delisted);
        assert!(diff.delisted[0].current.is_none());
        assert!(!diff.is_unchanged());
    }

    #[test]
    fn one_entry_per_current_item() {
        let previous = snapshot(&[row("A", 10, 0), row("B", 20, 0)]);
        let current = snapshot(&[row("A", 10, 0), row("B", 20, 0), row("C", 30, 0)]);
        let diff = compute_diff(&previous, &current);

        assert_eq!(diff.entries.len(), 3);
        assert_eq!(diff.in_category(ChangeCategory::Unchanged).count(), 2);
        assert_eq!(diff.in_category(ChangeCategory::NewlyTracked).count(), 1);
    }

    #[test]
    fn same_snapshot_twice_is_unchanged() {
        let current = snapshot(&[row("A", 10, 0), row("B", 20, 15)]);
        assert!(compute_diff(&current, &current).is_unchanged());
    }

    #[test]
    fn sections_render_in_priority_order() {
        assert_eq!(
            ChangeCategory::VARIANTS.first(),
            Some(&ChangeCategory::DiscountStartedOrIncreased)
        );
        assert_eq!(ChangeCategory::VARIANTS.last(), Some(&ChangeCategory::Unchanged));
    }
}
