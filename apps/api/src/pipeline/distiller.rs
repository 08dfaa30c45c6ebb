//! Content distiller: condenses a structured CV record into a narrative within a
//! character budget.
//!
//! The text service is tried first. When it is unavailable, fails, or returns nothing
//! usable, a style-keyed template built from the record is used instead, so a
//! distill call on a well-formed record always succeeds.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use crate::pipeline::classifier::ContentClassifier;
use crate::pipeline::models::{CvRecord, DistillMetadata, DistillOutput, TargetStyle};
use crate::pipeline::prompts;
use crate::pipeline::text_service::TextService;
use crate::pipeline::PipelineError;

pub const DEFAULT_MAX_LENGTH: usize = 2000;
const MODEL_CONFIDENCE: f32 = 0.9;
const TEMPLATE_CONFIDENCE: f32 = 0.5;
const TEMPLATE_TOP_SKILLS: usize = 5;
const ELLIPSIS: &str = "...";

#[derive(Clone)]
pub struct ContentDistiller {
    text: Arc<dyn TextService>,
    classifier: Arc<dyn ContentClassifier>,
}

impl ContentDistiller {
    pub fn new(text: Arc<dyn TextService>, classifier: Arc<dyn ContentClassifier>) -> Self {
        Self { text, classifier }
    }

    pub async fn distill(
        &self,
        record: &CvRecord,
        style: TargetStyle,
        max_length: usize,
    ) -> Result<DistillOutput, PipelineError> {
        let started = Instant::now();

        if record.personal_info.name.full.trim().is_empty() {
            return Err(PipelineError::Malformed(
                "source_record.personal_info.name.full is required".to_string(),
            ));
        }
        if max_length == 0 {
            return Err(PipelineError::Malformed(
                "max_length must be greater than 0".to_string(),
            ));
        }

        let original = serialize_record(record);
        let original_length = original.chars().count();

        let system = prompts::distill_system(style);
        let prompt = prompts::distill_prompt(&original, style, max_length);

        let (content, model_id, confidence) = match self.text.generate(&system, &prompt).await {
            Ok(generated) if !generated.content.trim().is_empty() => {
                debug!(model = %generated.model, "Distilled with text service");
                (generated.content, Some(generated.model), MODEL_CONFIDENCE)
            }
            Ok(_) => {
                warn!("Text service returned empty distillation, using template");
                (template_distill(record, style, max_length), None, TEMPLATE_CONFIDENCE)
            }
            Err(e) => {
                warn!(error = %e, "Text service distill failed, using template");
                (template_distill(record, style, max_length), None, TEMPLATE_CONFIDENCE)
            }
        };

        let distilled_length = content.chars().count();
        let reduction_ratio = ratio_saved(original_length, distilled_length);
        if reduction_ratio < 0.0 {
            warn!(
                original_length,
                distilled_length, "Distilled content is longer than the source record"
            );
        }

        let sections_included = self.classifier.sections_included(record, &content);

        Ok(DistillOutput {
            content,
            sections_included,
            reduction_ratio,
            metadata: DistillMetadata {
                original_length,
                distilled_length,
                processing_time_ms: started.elapsed().as_millis() as u64,
                model_id,
                confidence,
            },
        })
    }
}

/// `1 - after/before`, or 0 when there was nothing to begin with.
pub(crate) fn ratio_saved(before: usize, after: usize) -> f64 {
    if before == 0 {
        0.0
    } else {
        1.0 - after as f64 / before as f64
    }
}

/// Plain-text rendering of a record, used both as the prompt body and as the
/// baseline length for the reduction ratio.
pub fn serialize_record(record: &CvRecord) -> String {
    let info = &record.personal_info;
    let mut lines = vec![
        format!("Name: {}", info.name.full),
        format!("Email: {}", info.contact.email),
    ];
    if let Some(phone) = &info.contact.phone {
        lines.push(format!("Phone: {phone}"));
    }

    if !record.experience.is_empty() {
        lines.push("EXPERIENCE:".to_string());
        for exp in &record.experience {
            lines.push(format!(
                "{} at {} ({} - {})",
                exp.position,
                exp.company,
                exp.start_date,
                exp.end_date.as_deref().unwrap_or("Present")
            ));
            lines.extend(exp.responsibilities.iter().cloned());
            if let Some(description) = &exp.description {
                lines.push(description.clone());
            }
        }
    }

    if !record.education.is_empty() {
        lines.push("EDUCATION:".to_string());
        for edu in &record.education {
            let when = edu
                .graduation_date
                .as_deref()
                .or(edu.end_date.as_deref())
                .unwrap_or("N/A");
            lines.push(format!("{} from {} ({})", edu.degree, edu.institution, when));
        }
    }

    if !record.skills.is_empty() {
        let names: Vec<&str> = record.skills.iter().map(|s| s.name()).collect();
        lines.push(format!("SKILLS: {}", names.join(", ")));
    }

    lines.join("\n")
}

/// Deterministic summary: style opening, most recent role, top skills, first
/// education entry, truncated to `max_length` characters.
pub fn template_distill(record: &CvRecord, style: TargetStyle, max_length: usize) -> String {
    let mut text = prompts::fallback_opening(style, &record.personal_info.name.full);

    if let Some(role) = record.experience.first() {
        let title = non_empty_or(&role.position, "Position");
        let company = non_empty_or(&role.company, "Company");
        text.push_str(&format!(
            " Currently serving as {title} at {company}, bringing expertise in strategic \
             planning and execution."
        ));
    }

    if !record.skills.is_empty() {
        let top: Vec<&str> = record
            .skills
            .iter()
            .take(TEMPLATE_TOP_SKILLS)
            .map(|s| s.name())
            .collect();
        text.push_str(&format!(" Core competencies include: {}.", top.join(", ")));
    }

    if let Some(edu) = record.education.first() {
        text.push_str(&format!(
            " Educational background: {} from {}.",
            edu.degree, edu.institution
        ));
    }

    truncate_chars(&text, max_length)
}

/// Cuts `text` to at most `max` characters, ending in `...` when anything was removed
/// and the budget has room for it.
pub fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    if max < ELLIPSIS.len() {
        return text.chars().take(max).collect();
    }
    let keep = max.saturating_sub(ELLIPSIS.len());
    let mut out: String = text.chars().take(keep).collect();
    out.push_str(ELLIPSIS);
    out
}

fn non_empty_or<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.trim().is_empty() {
        fallback
    } else {
        value
    }
}
