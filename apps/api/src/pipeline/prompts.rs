//! Prompt constants and style templates for the distill and optimize stages.
//!
//! Templates use `{placeholder}` markers filled with `str::replace`.

use crate::pipeline::models::TargetStyle;

// ────────────────────────────────────────────────────────────────────────────
// Distill
// ────────────────────────────────────────────────────────────────────────────

const DISTILL_SYSTEM_BASE: &str =
    "You are an expert CV writer specializing in creating concise, impactful single-page resumes.";

/// System instruction for the distill call, keyed by style.
pub fn distill_system(style: TargetStyle) -> String {
    let focus = match style {
        TargetStyle::Executive => {
            "Focus on leadership achievements, strategic impact, and quantifiable results. \
             Use executive-level language."
        }
        TargetStyle::Academic => {
            "Emphasize research, publications, teaching, and academic achievements. \
             Maintain scholarly tone."
        }
        TargetStyle::Technical => {
            "Highlight technical skills, projects, and hands-on experience. \
             Use precise technical terminology."
        }
        TargetStyle::Professional => {
            "Create a professional, well-balanced CV suitable for corporate environments."
        }
    };
    format!("{DISTILL_SYSTEM_BASE} {focus}")
}

pub const DISTILL_PROMPT_TEMPLATE: &str = "\
Please distill the following CV into a concise, single-page format \
(approximately {max_length} characters).\n\
\n\
Requirements:\n\
- Maintain the most impactful information\n\
- Keep it {style} in tone\n\
- Preserve key achievements and skills\n\
- Ensure readability and flow\n\
- Focus on results and quantifiable accomplishments\n\
\n\
Original CV:\n\
\n\
{cv_text}";

pub fn distill_prompt(cv_text: &str, style: TargetStyle, max_length: usize) -> String {
    DISTILL_PROMPT_TEMPLATE
        .replace("{max_length}", &max_length.to_string())
        .replace("{style}", style_name(style))
        .replace("{cv_text}", cv_text)
}

// ────────────────────────────────────────────────────────────────────────────
// Optimize
// ────────────────────────────────────────────────────────────────────────────

pub const OPTIMIZE_SYSTEM: &str =
    "You are a professional document formatter specializing in CV optimization for single-page layouts.";

pub const OPTIMIZE_PROMPT_TEMPLATE: &str = "\
Optimize the following CV content for single-page {page_format} format:\n\
\n\
Constraints:\n\
- Maximum {max_lines} lines\n\
- Maximum {max_chars} characters per line\n\
- Must fit on one page\n\
- Maintain professional formatting\n\
- Use bullet points and concise language\n\
- Preserve all essential information\n\
\n\
Content to optimize:\n\
\n\
{content}";

pub fn optimize_prompt(content: &str, max_lines: u32, max_chars: u32, page_format: &str) -> String {
    OPTIMIZE_PROMPT_TEMPLATE
        .replace("{page_format}", page_format)
        .replace("{max_lines}", &max_lines.to_string())
        .replace("{max_chars}", &max_chars.to_string())
        .replace("{content}", content)
}

// ────────────────────────────────────────────────────────────────────────────
// Fallback template
// ────────────────────────────────────────────────────────────────────────────

/// Opening of the deterministic summary used when no model output is available.
pub fn fallback_opening(style: TargetStyle, name: &str) -> String {
    match style {
        TargetStyle::Executive => format!(
            "{name} - Executive Summary\n\nSeasoned professional with extensive leadership \
             experience and proven track record of driving organizational success."
        ),
        TargetStyle::Academic => format!(
            "{name}\n\nAcademic researcher with specialized expertise and commitment to \
             advancing knowledge in the field."
        ),
        TargetStyle::Technical => format!(
            "{name}\n\nTechnical specialist with hands-on experience in cutting-edge \
             technologies and methodologies."
        ),
        TargetStyle::Professional => format!(
            "{name}\n\nDedicated professional with proven track record of delivering results \
             and driving innovation."
        ),
    }
}

fn style_name(style: TargetStyle) -> &'static str {
    match style {
        TargetStyle::Professional => "professional",
        TargetStyle::Academic => "academic",
        TargetStyle::Technical => "technical",
        TargetStyle::Executive => "executive",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distill_prompt_fills_every_placeholder() {
        let prompt = distill_prompt("Name: Ada", TargetStyle::Technical, 1500);
        assert!(prompt.contains("approximately 1500 characters"));
        assert!(prompt.contains("Keep it technical in tone"));
        assert!(prompt.ends_with("Name: Ada"));
        assert!(!prompt.contains('{'));
    }

    #[test]
    fn test_system_prompts_differ_by_style() {
        let exec = distill_system(TargetStyle::Executive);
        let academic = distill_system(TargetStyle::Academic);
        assert!(exec.starts_with(DISTILL_SYSTEM_BASE));
        assert_ne!(exec, academic);
    }

    #[test]
    fn test_optimize_prompt_mentions_constraints() {
        let prompt = optimize_prompt("body", 45, 80, "Letter");
        assert!(prompt.contains("single-page Letter format"));
        assert!(prompt.contains("Maximum 45 lines"));
        assert!(prompt.contains("Maximum 80 characters per line"));
    }
}
