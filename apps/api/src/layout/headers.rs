//! Header-integrity validation: drops headings that are not followed by real content.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::pipeline::classifier::ContentClassifier;

/// Lines inspected after each heading.
const LOOKAHEAD_LINES: usize = 7;
const SUBSTANTIAL_LINE_CHARS: usize = 15;
const MIN_SUBSTANTIAL_LINES: usize = 2;
const MIN_COMBINED_CHARS: usize = 100;
const MIN_BULLET_LINES: usize = 3;
const LONG_LINE_CHARS: usize = 50;

static BULLET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:[-*+•]|\d+\.)\s*.{5,}").expect("Invalid bullet regex"));

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeaderReport {
    pub content: String,
    /// Headings that were dropped, in document order.
    pub removed: Vec<String>,
}

pub fn remove_orphaned_headers(text: &str, classifier: &dyn ContentClassifier) -> HeaderReport {
    let lines: Vec<&str> = text.lines().collect();
    let mut kept: Vec<&str> = Vec::with_capacity(lines.len());
    let mut removed = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        if classifier.heading_level(line.trim()).is_none() {
            kept.push(line);
            i += 1;
            continue;
        }

        let window_end = lines[i + 1..]
            .iter()
            .take(LOOKAHEAD_LINES)
            .position(|l| classifier.heading_level(l.trim()).is_some())
            .map(|offset| i + 1 + offset)
            .unwrap_or_else(|| (i + 1 + LOOKAHEAD_LINES).min(lines.len()));
        let window = &lines[i + 1..window_end];

        if has_substantial_content(window) {
            kept.push(line);
            i += 1;
        } else {
            debug!(heading = line.trim(), "Removing orphaned heading");
            removed.push(line.trim().to_string());
            i = window_end;
        }
    }

    HeaderReport {
        content: kept.join("\n"),
        removed,
    }
}

fn has_substantial_content(window: &[&str]) -> bool {
    let content: Vec<&str> = window
        .iter()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .collect();

    let substantial = content
        .iter()
        .filter(|l| l.chars().count() > SUBSTANTIAL_LINE_CHARS)
        .count();
    let combined: usize = content.iter().map(|l| l.chars().count()).sum();
    let bullets = content.iter().filter(|l| BULLET.is_match(l)).count();
    let has_long_line = content.iter().any(|l| l.chars().count() > LONG_LINE_CHARS);

    substantial >= MIN_SUBSTANTIAL_LINES
        || combined > MIN_COMBINED_CHARS
        || bullets >= MIN_BULLET_LINES
        || has_long_line
}
