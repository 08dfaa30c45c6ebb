//! Records flowing through the distill → optimize pipeline.

use serde::{Deserialize, Serialize};

use crate::layout::page::{Margins, PageFormat};
use crate::pipeline::PipelineError;

// ────────────────────────────────────────────────────────────────────────────
// Source record
// ────────────────────────────────────────────────────────────────────────────

/// Structured CV supplied by the caller. Experience and education are ordered
/// most recent first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CvRecord {
    pub personal_info: PersonalInfo,
    #[serde(default)]
    pub experience: Vec<Experience>,
    #[serde(default)]
    pub education: Vec<Education>,
    #[serde(default)]
    pub skills: Vec<Skill>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonalInfo {
    pub name: PersonName,
    pub contact: Contact,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonName {
    #[serde(default)]
    pub first: String,
    #[serde(default)]
    pub last: String,
    pub full: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub email: String,
    pub phone: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experience {
    pub company: String,
    pub position: String,
    pub start_date: String,
    pub end_date: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub responsibilities: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Education {
    pub institution: String,
    pub degree: String,
    pub field: Option<String>,
    pub graduation_date: Option<String>,
    pub end_date: Option<String>,
}

/// A skill is either a bare name or a named entry with an optional level.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Skill {
    Name(String),
    Detailed { name: String, level: Option<String> },
}

impl Skill {
    pub fn name(&self) -> &str {
        match self {
            Skill::Name(name) => name,
            Skill::Detailed { name, .. } => name,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Request parameters
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetStyle {
    #[default]
    Professional,
    Academic,
    Technical,
    Executive,
}

/// Line and page budget the optimizer has to satisfy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutConstraints {
    pub max_lines: u32,
    pub max_chars_per_line: u32,
    #[serde(default)]
    pub page_format: PageFormat,
    #[serde(default)]
    pub margins: Margins,
}

impl Default for LayoutConstraints {
    fn default() -> Self {
        Self {
            max_lines: 45,
            max_chars_per_line: 80,
            page_format: PageFormat::Letter,
            margins: Margins::default(),
        }
    }
}

impl LayoutConstraints {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.max_lines == 0 {
            return Err(PipelineError::Malformed(
                "layout_constraints.max_lines must be greater than 0".to_string(),
            ));
        }
        if self.max_chars_per_line == 0 {
            return Err(PipelineError::Malformed(
                "layout_constraints.max_chars_per_line must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Full single-page request: distill the record, then fit it to the constraints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingRequest {
    #[serde(default)]
    pub request_id: String,
    pub source_record: CvRecord,
    #[serde(default)]
    pub target_style: TargetStyle,
    #[serde(default)]
    pub layout_constraints: Option<LayoutConstraints>,
}

/// Where an in-flight request currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Pipeline,
    Distill,
    Optimize,
}

// ────────────────────────────────────────────────────────────────────────────
// Stage outputs
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistillOutput {
    pub content: String,
    pub sections_included: Vec<String>,
    /// `1 - distilled/original`. Negative when the output is longer than the source.
    pub reduction_ratio: f64,
    pub metadata: DistillMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistillMetadata {
    pub original_length: usize,
    pub distilled_length: usize,
    pub processing_time_ms: u64,
    pub model_id: Option<String>,
    pub confidence: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizeOutput {
    pub content: String,
    pub layout_metrics: LayoutMetrics,
    /// Techniques applied, in the order they ran.
    pub optimizations: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutMetrics {
    pub estimated_lines: u32,
    /// Estimate only; the page fitter reconciles against real rendering.
    pub fits_on_single_page: bool,
    pub compression_ratio: f64,
}

/// Outcome of a `cv:process:single-page` request, published on success and failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub request_id: String,
    pub distilled: Option<DistillOutput>,
    pub optimized: Option<OptimizeOutput>,
    pub processing_time_ms: u64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProcessingResult {
    pub fn failed(request_id: &str, error: String, processing_time_ms: u64) -> Self {
        Self {
            request_id: request_id.to_string(),
            distilled: None,
            optimized: None,
            processing_time_ms,
            success: false,
            error: Some(error),
        }
    }
}
