use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::AppError;
use crate::layout::fitter::corrective_css;
use crate::layout::{
    fit_single_page, markup, remove_orphaned_headers, FitOptions, FitReport, Margins,
    MetricPageEngine, PageFormat, RenderEngine,
};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct FitRequest {
    /// Optimized text: `#` headings, bullet lines and plain paragraphs.
    pub content: String,
    pub format: Option<PageFormat>,
    pub margins: Option<Margins>,
    pub requested_scale: Option<f32>,
    pub max_passes: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct FitResponse {
    /// Content after orphaned headings were removed.
    pub content: String,
    pub removed_headers: Vec<String>,
    pub html: String,
    /// Stylesheet to inject before printing; absent when the content already fits.
    pub corrective_css: Option<String>,
    pub report: FitReport,
}

/// POST /api/v1/layout/fit
pub async fn handle_fit(
    State(state): State<AppState>,
    Json(req): Json<FitRequest>,
) -> Result<Json<FitResponse>, AppError> {
    if req.content.trim().is_empty() {
        return Err(AppError::Validation("content must not be empty".to_string()));
    }

    let defaults = state.fit_defaults;
    let options = FitOptions {
        format: req.format.unwrap_or(defaults.format),
        margins: req.margins.unwrap_or(defaults.margins),
        requested_scale: req.requested_scale.unwrap_or(defaults.requested_scale),
        max_passes: req.max_passes.unwrap_or(defaults.max_passes),
    };
    options.validate()?;

    let headers = remove_orphaned_headers(&req.content, state.classifier.as_ref());
    let html = markup::to_html(&headers.content, state.classifier.as_ref());

    let mut engine = MetricPageEngine::new(options.format, options.margins);
    engine.set_content(&html).await?;
    let report = fit_single_page(&mut engine, &options).await?;

    info!(
        removed_headers = headers.removed.len(),
        passes = report.passes.len(),
        fits = report.fits,
        "Layout fit complete"
    );

    Ok(Json(FitResponse {
        corrective_css: report.passes.last().map(|p| corrective_css(p.adjusted_scale)),
        content: headers.content,
        removed_headers: headers.removed,
        html,
        report,
    }))
}
