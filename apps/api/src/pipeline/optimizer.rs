//! Layout optimizer: rewrites distilled text to fit a line budget.
//!
//! Order of attempts:
//! 1. The text service rewrites the content for the page format.
//! 2. If the estimate is still over budget, or the service failed, the local chain runs:
//!    collapse blank lines, inline bullets, abbreviate, truncate.
//!
//! Each applied technique is recorded in `optimizations`, in the order it ran.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use crate::pipeline::distiller::ratio_saved;
use crate::pipeline::models::{LayoutConstraints, LayoutMetrics, OptimizeOutput};
use crate::pipeline::prompts;
use crate::pipeline::text_service::TextService;
use crate::pipeline::PipelineError;

pub const OPT_MODEL_REWRITE: &str = "Applied LLM-based layout optimization";
pub const OPT_COLLAPSE_BLANK_LINES: &str = "Removed excessive whitespace";
pub const OPT_INLINE_BULLETS: &str = "Condensed bullet points to inline format";
pub const OPT_ABBREVIATIONS: &str = "Applied common abbreviations";
pub const OPT_TRUNCATION: &str = "Applied aggressive truncation to fit page";

/// Share of the original length kept by the last-resort truncation.
const TRUNCATE_KEEP: f64 = 0.7;

static BLANK_LINES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n\s*\n").expect("Invalid blank lines regex"));

static BULLET_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n•\s*").expect("Invalid bullet line regex"));

const ABBREVIATIONS: &[(&str, &str)] = &[
    ("University", "Univ."),
    ("Bachelor", "B."),
    ("Master", "M."),
    ("Doctor", "Dr."),
    ("Management", "Mgmt"),
    ("Development", "Dev"),
    ("Engineering", "Eng"),
    ("Technology", "Tech"),
    ("Information", "Info"),
    ("Department", "Dept"),
    ("Corporation", "Corp"),
    ("Company", "Co."),
    ("International", "Intl"),
    ("Professional", "Prof"),
    ("Experience", "Exp"),
    ("Certificate", "Cert"),
    ("Project", "Proj"),
    ("Manager", "Mgr"),
    ("Senior", "Sr."),
    ("Junior", "Jr."),
    ("Assistant", "Asst"),
];

static ABBREVIATION_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    ABBREVIATIONS
        .iter()
        .map(|(full, short)| {
            let re = Regex::new(&format!(r"\b{full}\b")).expect("Invalid abbreviation regex");
            (re, *short)
        })
        .collect()
});

#[derive(Clone)]
pub struct LayoutOptimizer {
    text: Arc<dyn TextService>,
}

impl LayoutOptimizer {
    pub fn new(text: Arc<dyn TextService>) -> Self {
        Self { text }
    }

    pub async fn optimize(
        &self,
        content: &str,
        constraints: &LayoutConstraints,
    ) -> Result<OptimizeOutput, PipelineError> {
        constraints.validate()?;

        let original_length = content.chars().count();
        let mut optimizations = Vec::new();

        let prompt = prompts::optimize_prompt(
            content,
            constraints.max_lines,
            constraints.max_chars_per_line,
            constraints.page_format.paper_name(),
        );

        let optimized = match self.text.generate(prompts::OPTIMIZE_SYSTEM, &prompt).await {
            Ok(generated) if !generated.content.trim().is_empty() => {
                debug!(model = %generated.model, "Optimized with text service");
                optimizations.push(OPT_MODEL_REWRITE.to_string());
                let rewritten = generated.content;
                if estimate_lines(&rewritten, constraints.max_chars_per_line) > constraints.max_lines {
                    local_chain(&rewritten, original_length, constraints, &mut optimizations)
                } else {
                    rewritten
                }
            }
            Ok(_) => {
                warn!("Text service returned empty layout rewrite, using local optimization");
                local_chain(content, original_length, constraints, &mut optimizations)
            }
            Err(e) => {
                warn!(error = %e, "Text service optimize failed, using local optimization");
                local_chain(content, original_length, constraints, &mut optimizations)
            }
        };

        let estimated_lines = estimate_lines(&optimized, constraints.max_chars_per_line);
        let compression_ratio = ratio_saved(original_length, optimized.chars().count());

        Ok(OptimizeOutput {
            content: optimized,
            layout_metrics: LayoutMetrics {
                estimated_lines,
                fits_on_single_page: estimated_lines <= constraints.max_lines,
                compression_ratio,
            },
            optimizations,
        })
    }
}

/// Rough printed-line count: each `\n`-separated line takes `ceil(chars / width)`
/// rows, and an empty line takes one.
pub fn estimate_lines(text: &str, max_chars_per_line: u32) -> u32 {
    let width = max_chars_per_line.max(1) as usize;
    text.split('\n')
        .map(|line| match line.chars().count() {
            0 => 1,
            n => n.div_ceil(width) as u32,
        })
        .sum()
}

fn local_chain(
    text: &str,
    original_length: usize,
    constraints: &LayoutConstraints,
    optimizations: &mut Vec<String>,
) -> String {
    let over = |t: &str| estimate_lines(t, constraints.max_chars_per_line) > constraints.max_lines;
    let mut current = text.to_string();

    let collapsed = BLANK_LINES.replace_all(&current, "\n").into_owned();
    if collapsed != current {
        current = collapsed;
        optimizations.push(OPT_COLLAPSE_BLANK_LINES.to_string());
    }

    let inlined = BULLET_LINE.replace_all(&current, " • ").into_owned();
    if inlined != current {
        current = inlined;
        optimizations.push(OPT_INLINE_BULLETS.to_string());
    }

    if over(&current) {
        let abbreviated = apply_abbreviations(&current);
        if abbreviated != current {
            current = abbreviated;
            optimizations.push(OPT_ABBREVIATIONS.to_string());
        }
    }

    if over(&current) {
        let keep = (original_length as f64 * TRUNCATE_KEEP).floor() as usize;
        let mut truncated: String = current.chars().take(keep).collect();
        truncated.push_str("...");
        current = truncated;
        optimizations.push(OPT_TRUNCATION.to_string());
    }

    current
}

/// Replaces whole-word occurrences from the abbreviation dictionary.
pub fn apply_abbreviations(text: &str) -> String {
    ABBREVIATION_PATTERNS
        .iter()
        .fold(text.to_string(), |acc, (re, short)| {
            re.replace_all(&acc, *short).into_owned()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::text_service::testing::{Script, ScriptedTextService};

    fn optimizer(script: Script) -> LayoutOptimizer {
        LayoutOptimizer::new(Arc::new(ScriptedTextService::new(script)))
    }

    fn constraints(max_lines: u32, max_chars_per_line: u32) -> LayoutConstraints {
        LayoutConstraints {
            max_lines,
            max_chars_per_line,
            ..LayoutConstraints::default()
        }
    }

    #[test]
    fn test_estimate_lines_laws() {
        assert_eq!(estimate_lines("", 80), 1);
        assert_eq!(estimate_lines("\n\n", 80), 3);
        assert_eq!(estimate_lines(&"x".repeat(80), 80), 1);
        assert_eq!(estimate_lines(&"x".repeat(81), 80), 2);
        assert_eq!(estimate_lines("abc\n\ndef", 2), 2 + 1 + 2);
        // k embedded newlines, every line within the width: k + 1
        assert_eq!(estimate_lines("aa\nbb\ncc\nd", 2), 4);
        assert_eq!(estimate_lines(&"a".repeat(160), 80), 2);
    }

    #[test]
    fn test_estimate_lines_is_monotonic_in_width() {
        let text = "A fairly long line of text that wraps several times at narrow widths\nshort";
        let mut previous = u32::MAX;
        for width in 1..100 {
            let lines = estimate_lines(text, width);
            assert!(lines <= previous);
            previous = lines;
        }
    }

    #[test]
    fn test_abbreviations_match_whole_words_only() {
        assert_eq!(
            apply_abbreviations("Senior Manager, University Project"),
            "Sr. Mgr, Univ. Proj"
        );
        assert_eq!(apply_abbreviations("Projects and Managers"), "Projects and Managers");
    }

    #[tokio::test]
    async fn test_model_rewrite_that_fits_skips_local_chain() {
        let out = optimizer(Script::Reply("Short\nand sweet".to_string()))
            .optimize("Some\n\nlong\ncontent here", &constraints(45, 80))
            .await
            .unwrap();
        assert_eq!(out.content, "Short\nand sweet");
        assert_eq!(out.optimizations, vec![OPT_MODEL_REWRITE]);
        assert!(out.layout_metrics.fits_on_single_page);
    }

    #[tokio::test]
    async fn test_model_rewrite_over_budget_runs_chain() {
        let rewrite = "Senior Engineering Manager\n\n\n• Led University Project\n• Shipped";
        let out = optimizer(Script::Reply(rewrite.to_string()))
            .optimize(&"x".repeat(200), &constraints(1, 200))
            .await
            .unwrap();

        assert_eq!(
            out.optimizations,
            vec![
                OPT_MODEL_REWRITE,
                OPT_COLLAPSE_BLANK_LINES,
                OPT_INLINE_BULLETS,
            ]
        );
        assert_eq!(
            out.content,
            "Senior Engineering Manager • Led University Project • Shipped"
        );
        assert_eq!(out.layout_metrics.estimated_lines, 1);
    }

    #[tokio::test]
    async fn test_failure_runs_full_chain_on_original_text() {
        let text = format!(
            "Senior Engineering Manager\n\n• {}\n• University Project",
            "Development ".repeat(10)
        );
        let out = optimizer(Script::Fail)
            .optimize(&text, &constraints(1, 20))
            .await
            .unwrap();

        assert_eq!(
            out.optimizations,
            vec![
                OPT_COLLAPSE_BLANK_LINES,
                OPT_INLINE_BULLETS,
                OPT_ABBREVIATIONS,
                OPT_TRUNCATION,
            ]
        );
        assert!(out.content.starts_with("Sr. Eng Mgr • Dev"));
        assert!(out.content.ends_with("Univ. Proj..."));
        assert!(out.layout_metrics.compression_ratio > 0.0);
    }

    #[tokio::test]
    async fn test_truncation_keeps_seventy_percent_of_original() {
        let text = "a".repeat(300);
        let out = optimizer(Script::Fail)
            .optimize(&text, &constraints(1, 20))
            .await
            .unwrap();

        assert_eq!(out.optimizations, vec![OPT_TRUNCATION]);
        assert_eq!(out.content.chars().count(), 210 + 3);
        assert!(out.content.ends_with("..."));
        assert!(!out.layout_metrics.fits_on_single_page);
    }

    #[tokio::test]
    async fn test_failure_on_text_that_fits_only_logs_real_changes() {
        let out = optimizer(Script::Fail)
            .optimize("one\ntwo\nthree", &constraints(45, 80))
            .await
            .unwrap();
        assert!(out.optimizations.is_empty());
        assert_eq!(out.content, "one\ntwo\nthree");
        assert_eq!(out.layout_metrics.compression_ratio, 0.0);
    }

    #[tokio::test]
    async fn test_empty_input_has_zero_compression() {
        let out = optimizer(Script::Fail)
            .optimize("", &constraints(45, 80))
            .await
            .unwrap();
        assert_eq!(out.layout_metrics.estimated_lines, 1);
        assert_eq!(out.layout_metrics.compression_ratio, 0.0);
    }

    #[tokio::test]
    async fn test_zero_width_is_malformed() {
        let err = optimizer(Script::Fail)
            .optimize("text", &constraints(45, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Malformed(_)));
    }
}
