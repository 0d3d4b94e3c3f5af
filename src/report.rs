use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use color_eyre::{Result, eyre::Context};
use log::{error, info, warn};
use reqwest::blocking::Client;
use serde::Serialize;
use slack_morphism::prelude::*;
use strum::VariantArray;
use url::Url;

use crate::diff::{ChangeCategory, DiffEntry};
use crate::error::DispatchFailure;
use crate::model::{Quote, SnapshotRow};
use crate::pipeline::{FailedCheck, RunOutcome};

const EMOJI_SALE: &str = ":money_with_wings:";
const EMOJI_WARNING: &str = ":warning:";
/// Slack rejects section text above 3000 characters.
const SECTION_TEXT_LIMIT: usize = 2900;

#[derive(Debug, Clone, Serialize)]
pub struct Section {
    pub category: ChangeCategory,
    pub entries: Vec<DiffEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub region: String,
    pub date: String,
    pub tracked_titles: usize,
    pub checked_items: usize,
    pub top_discounts: Vec<SnapshotRow>,
    pub sections: Vec<Section>,
    pub failures: Vec<FailedCheck>,
}

impl Report {
    pub fn build(outcome: &RunOutcome, date: impl Into<String>, top_n: usize) -> Self {
        let sections = ChangeCategory::VARIANTS
            .iter()
            .filter(|c| **c != ChangeCategory::Unchanged)
            .map(|&category| {
                let mut entries: Vec<DiffEntry> =
                    outcome.diff.in_category(category).cloned().collect();
                entries.sort_by_key(|e| e.name.to_lowercase());
                Section { category, entries }
            })
            .collect();

        let mut top_discounts: Vec<SnapshotRow> = outcome
            .current
            .rows()
            .filter(|r| r.discount_pct > 0)
            .cloned()
            .collect();
        top_discounts.sort_by(|a, b| {
            b.discount_pct
                .cmp(&a.discount_pct)
                .then(a.price.cmp(&b.price))
                .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        });
        top_discounts.truncate(top_n);

        Self {
            region: outcome.current.region.clone(),
            date: date.into(),
            tracked_titles: outcome.tracked_titles,
            checked_items: outcome.current.len(),
            top_discounts,
            sections,
            failures: outcome.failures.clone(),
        }
    }

    /// Anything worth pinging someone about.
    pub fn is_notable(&self) -> bool {
        !self.failures.is_empty() || self.sections.iter().any(|s| !s.entries.is_empty())
    }

    fn count(&self, category: ChangeCategory) -> usize {
        self.sections
            .iter()
            .find(|s| s.category == category)
            .map_or(0, |s| s.entries.len())
    }

    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# Price watch report ({})\n", self.date);
        let _ = writeln!(out, "- Region: **{}**", self.region);
        let _ = writeln!(out, "- Titles tracked: **{}**", self.tracked_titles);
        let _ = writeln!(out, "- Items checked: **{}**", self.checked_items);
        let _ = writeln!(out, "- Failed to check: **{}**\n", self.failures.len());

        out.push_str("## Top discounts today\n\n");
        if self.top_discounts.is_empty() {
            out.push_str("_No discounts today._\n\n");
        } else {
            out.push_str("| Item | Current price | Discount |\n|---|---:|---:|\n");
            for row in &self.top_discounts {
                let _ = writeln!(
                    out,
                    "| {} | {} {} | {}% |",
                    escape_cell(&row.name),
                    row.price,
                    row.currency,
                    row.discount_pct
                );
            }
            out.push('\n');
        }

        for section in &self.sections {
            let _ = writeln!(out, "## {}\n", section.category);
            if section.entries.is_empty() {
                out.push_str("_None._\n\n");
                continue;
            }
            out.push_str("| Item | Kind | Previous | Current |\n|---|---|---|---|\n");
            for entry in &section.entries {
                let _ = writeln!(
                    out,
                    "| {} | {} | {} | {} |",
                    escape_cell(&entry.name),
                    entry.kind,
                    quote_cell(entry.previous.as_ref()),
                    quote_cell(entry.current.as_ref())
                );
            }
            out.push('\n');
        }

        out.push_str("## Failed to check\n\n");
        if self.failures.is_empty() {
            out.push_str("_None._\n");
        } else {
            out.push_str("| Title / item | Stage | Reason |\n|---|---|---|\n");
            for failure in &self.failures {
                let _ = writeln!(
                    out,
                    "| {} | {} | {} |",
                    escape_cell(&failure.name),
                    failure.stage,
                    escape_cell(&failure.reason)
                );
            }
        }
        out
    }

    /// Writes `<date>.md` and `<date>.json` under `dir`.
    pub fn write(&self, dir: &Path) -> Result<(PathBuf, PathBuf)> {
        fs::create_dir_all(dir).wrap_err_with(|| format!("failed to create {}", dir.display()))?;
        let md_path = dir.join(format!("{}.md", self.date));
        let json_path = dir.join(format!("{}.json", self.date));
        fs::write(&md_path, self.to_markdown())
            .wrap_err_with(|| format!("failed to write {}", md_path.display()))?;
        fs::write(&json_path, serde_json::to_string_pretty(self)?)
            .wrap_err_with(|| format!("failed to write {}", json_path.display()))?;
        info!("Wrote {} and {}", md_path.display(), json_path.display());
        Ok((md_path, json_path))
    }

    fn summary(&self) -> String {
        format!(
            "Price watch {} ({}): {} discounts, {} ended, {} price changes, {} new, {} delisted, {} failed",
            self.region,
            self.date,
            self.count(ChangeCategory::DiscountStartedOrIncreased),
            self.count(ChangeCategory::DiscountEnded),
            self.count(ChangeCategory::PriceChanged),
            self.count(ChangeCategory::NewlyTracked),
            self.count(ChangeCategory::Delisted),
            self.failures.len()
        )
    }

    pub fn to_slack_message(&self) -> SlackMessageContent {
        let mut blocks: Vec<SlackBlock> = vec![
            SlackHeaderBlock::new(pt!(format!(
                "{EMOJI_SALE} Price watch {} ({})",
                self.region, self.date
            )))
            .into(),
        ];

        for section in self.sections.iter().filter(|s| !s.entries.is_empty()) {
            let lines: Vec<String> = section
                .entries
                .iter()
                .map(|e| {
                    format!(
                        "• *{}*: {} → {}",
                        escape_markdown(&e.name),
                        quote_cell(e.previous.as_ref()),
                        quote_cell(e.current.as_ref())
                    )
                })
                .collect();
            push_section(&mut blocks, &section.category.to_string(), &lines);
            blocks.push(SlackDividerBlock::new().into());
        }

        if !self.failures.is_empty() {
            let lines: Vec<String> = self
                .failures
                .iter()
                .map(|f| format!("• *{}* ({}): {}", escape_markdown(&f.name), f.stage, f.reason))
                .collect();
            push_section(&mut blocks, &format!("{EMOJI_WARNING} Failed to check"), &lines);
        }

        if matches!(blocks.last(), Some(SlackBlock::Divider(_))) {
            blocks.pop();
        }

        blocks.push(
            SlackContextBlock::new(vec![SlackContextBlockElement::MarkDown(md!(format!(
                "{} titles · {} items checked",
                self.tracked_titles, self.checked_items
            )))])
            .into(),
        );

        SlackMessageContent::new()
            .with_text(self.summary())
            .with_blocks(blocks)
    }

    pub fn dispatch(&self, client: &Client, webhook_url: &Url) -> Result<(), DispatchFailure> {
        client
            .post(webhook_url.clone())
            .json(&self.to_slack_message())
            .send()?
            .error_for_status()?;
        info!("Sent report to messaging endpoint");
        Ok(())
    }
}

/// Sends the report if a webhook is configured and the report is notable.
/// A failed send is only logged. Returns whether the message went out.
pub fn notify(report: &Report, client: &Client, webhook_url: Option<&Url>) -> bool {
    let Some(url) = webhook_url else {
        warn!("WEBHOOK_URL not set, report was not sent");
        return false;
    };
    if !report.is_notable() {
        info!("Nothing changed, not sending a notification");
        return false;
    }
    match report.dispatch(client, url) {
        Ok(()) => true,
        Err(err) => {
            error!("{err}");
            false
        }
    }
}

/// Splits long sections so each stays under Slack's text limit.
fn push_section(blocks: &mut Vec<SlackBlock>, heading: &str, lines: &[String]) {
    let mut text = format!("*{heading}*\n");
    for line in lines {
        let line = clip(line, SECTION_TEXT_LIMIT - 1);
        if text.len() + line.len() + 1 > SECTION_TEXT_LIMIT {
            blocks.push(SlackSectionBlock::new().with_text(md!(text)).into());
            text = String::new();
        }
        text.push_str(line);
        text.push('\n');
    }
    blocks.push(SlackSectionBlock::new().with_text(md!(text)).into());
}

/// Cuts `line` to at most `max` bytes on a char boundary.
fn clip(line: &str, max: usize) -> &str {
    if line.len() <= max {
        return line;
    }
    let mut end = max;
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    &line[..end]
}

fn quote_cell(quote: Option<&Quote>) -> String {
    quote.map_or_else(|| "—".to_string(), Quote::to_string)
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|")
}

fn escape_markdown(text: &str) -> String {
    text.chars()
        .flat_map(|c| match c {
            '_' | '*' | '~' | '`' => vec!['\\', c],
            _ => vec![c],
        })
        .collect()
}
