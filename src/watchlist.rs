use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use log::{info, warn};

use crate::error::InputFormatError;
use crate::model::{TitleRef, TrackingIntent, TrackingMode};

const COMMENT_MARKER: char = '#';
const MAX_LINE_LEN: usize = 200;

/// Section headings people paste in from their notes.
const HEADER_PREFIXES: &[&str] = &["to-do platinum", "todo platinum", "to do platinum"];

/// Loads both lists and merges them into one ordered set of intents.
pub fn load_watchlist(full: &Path, dlc_only: &Path) -> Vec<TrackingIntent> {
    let full_titles = read_list(full);
    let dlc_titles = read_list(dlc_only);
    let raw = full_titles.len() + dlc_titles.len();
    let intents = merge(full_titles, dlc_titles);
    info!("Loaded {} tracked titles ({raw} raw lines)", intents.len());
    intents
}

fn read_list(path: &Path) -> Vec<TitleRef> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            warn!("Watchlist {} does not exist, treating it as empty", path.display());
            return Vec::new();
        }
        Err(err) => {
            warn!("Couldn't read watchlist {}: {err}", path.display());
            return Vec::new();
        }
    };

    let (titles, errors) = parse_list(&path.display().to_string(), &text);
    for err in &errors {
        warn!("Skipping malformed watchlist line {err}");
    }
    titles
}

/// Parses one list. Malformed lines are returned as errors next to the good ones.
pub fn parse_list(source_name: &str, text: &str) -> (Vec<TitleRef>, Vec<InputFormatError>) {
    let mut titles = Vec::new();
    let mut errors = Vec::new();

    for (index, line) in text.lines().enumerate() {
        match parse_line(line) {
            Ok(Some(title)) => titles.push(title),
            Ok(None) => {}
            Err(reason) => errors.push(InputFormatError {
                source_name: source_name.to_string(),
                line: index + 1,
                reason,
            }),
        }
    }

    (titles, errors)
}

/// `Ok(None)` for lines that are intentionally ignored.
fn parse_line(line: &str) -> Result<Option<TitleRef>, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with(COMMENT_MARKER) || is_section_header(line) {
        return Ok(None);
    }

    if line.chars().any(|c| c.is_control() && !c.is_whitespace()) {
        return Err("contains control characters".into());
    }
    if line.chars().count() > MAX_LINE_LEN {
        return Err(format!("longer than {MAX_LINE_LEN} characters"));
    }

    let title = strip_numbering(line)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    if title.is_empty() {
        return Err("no title after list numbering".into());
    }

    let upper = title.to_ascii_uppercase();
    if is_product_id(&upper) || is_title_code(&upper) {
        Ok(Some(TitleRef::Id(upper)))
    } else {
        Ok(Some(TitleRef::Name(title)))
    }
}

fn is_section_header(line: &str) -> bool {
    let lower = line.to_lowercase();
    HEADER_PREFIXES.iter().any(|p| lower.starts_with(p))
        || lower
            .strip_prefix("backlog")
            .is_some_and(|rest| !rest.starts_with(char::is_alphanumeric))
}

/// Drops "12. ", "12) " or "12 - " style prefixes.
fn strip_numbering(line: &str) -> &str {
    let digits = line.len() - line.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    if digits == 0 {
        return line;
    }
    let rest = line[digits..].trim_start();
    match rest.strip_prefix(['.', ')', '-']) {
        Some(rest) => rest.trim_start(),
        None => line,
    }
}

/// `CUSA12345` or `PPSA01234_00`.
fn is_title_code(s: &str) -> bool {
    let (code, suffix) = match s.split_once('_') {
        Some((code, suffix)) => (code, Some(suffix)),
        None => (s, None),
    };
    let bytes = code.as_bytes();
    bytes.len() == 9
        && bytes[..4].iter().all(u8::is_ascii_uppercase)
        && bytes[4..].iter().all(u8::is_ascii_digit)
        && suffix.is_none_or(|s| s.len() == 2 && s.bytes().all(|b| b.is_ascii_digit()))
}

/// `EP9000-CUSA12345_00-SOMEGAMEBUNDLE01`.
fn is_product_id(s: &str) -> bool {
    let mut parts = s.splitn(3, '-');
    let (Some(publisher), Some(code), Some(label)) = (parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    let publisher = publisher.as_bytes();
    publisher.len() == 6
        && publisher[..2].iter().all(u8::is_ascii_uppercase)
        && publisher[2..].iter().all(u8::is_ascii_digit)
        && is_title_code(code)
        && !label.is_empty()
        && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

/// Dedupes case-insensitively; a title in both lists is tracked in full.
pub fn merge(full: Vec<TitleRef>, dlc_only: Vec<TitleRef>) -> Vec<TrackingIntent> {
    let mut seen = HashSet::new();
    let mut intents = Vec::new();

    for (titles, mode) in [(full, TrackingMode::Full), (dlc_only, TrackingMode::DlcOnly)] {
        for title in titles {
            if seen.insert(title.key()) {
                intents.push(TrackingIntent { title, mode });
            }
        }
    }

    intents
}
