//! Single-page fitter: measures rendered height against the page budget and injects a
//! corrective scale transform plus font-size floors until the content fits or the pass
//! budget runs out.
//!
//! Render engines report `scroll_height` after transforms, so every pass after the first
//! recovers the unscaled height as `measured / current_scale` before computing a new
//! scale. Later passes never grow the scale.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::layout::engine::{PdfOptions, RenderEngine, RenderError};
use crate::layout::page::{available_height, Margins, PageFormat};

/// Fraction of the exact compression ratio actually applied.
pub const SAFETY_MARGIN: f32 = 0.95;
pub const DEFAULT_REQUESTED_SCALE: f32 = 0.9;
/// Lower bound on any injected scale.
pub const MIN_SCALE: f32 = 0.1;

#[derive(Debug, Error)]
pub enum FitError {
    #[error("Invalid fit options: {0}")]
    InvalidOptions(String),

    #[error(transparent)]
    Render(#[from] RenderError),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitOptions {
    pub format: PageFormat,
    pub margins: Margins,
    /// Upper bound for the scale injected on the first pass.
    pub requested_scale: f32,
    pub max_passes: u32,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            format: PageFormat::Letter,
            margins: Margins::default(),
            requested_scale: DEFAULT_REQUESTED_SCALE,
            max_passes: 1,
        }
    }
}

impl FitOptions {
    pub fn validate(&self) -> Result<(), FitError> {
        if !(self.requested_scale > 0.0 && self.requested_scale <= 1.0) {
            return Err(FitError::InvalidOptions(format!(
                "requested_scale must be in (0, 1], got {}",
                self.requested_scale
            )));
        }
        if self.max_passes == 0 {
            return Err(FitError::InvalidOptions(
                "max_passes must be at least 1".to_string(),
            ));
        }
        let m = &self.margins;
        if [m.top, m.right, m.bottom, m.left].iter().any(|v| *v < 0.0 || !v.is_finite()) {
            return Err(FitError::InvalidOptions(
                "margins must be finite and non-negative".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Correction {
    pub compression_ratio: f32,
    pub adjusted_scale: f32,
}

/// Scale needed to bring `scroll_height` under `available_height`, capped at `cap`.
/// `None` when the content already fits.
pub fn compute_correction(scroll_height: f32, available_height: f32, cap: f32) -> Option<Correction> {
    if scroll_height <= available_height {
        return None;
    }
    let compression_ratio = available_height / scroll_height;
    let adjusted_scale = (compression_ratio * SAFETY_MARGIN).min(cap).max(MIN_SCALE);
    Some(Correction {
        compression_ratio,
        adjusted_scale,
    })
}

/// Stylesheet that scales the body and applies font-size floors.
pub fn corrective_css(scale: f32) -> String {
    format!(
        "body {{ transform: scale({scale:.4}) !important; transform-origin: top left !important; width: {width:.4}% !important; }}\n\
         h1 {{ font-size: 16pt !important; }}\n\
         h2 {{ font-size: 13pt !important; }}\n\
         h3 {{ font-size: 11pt !important; }}\n\
         p, li {{ font-size: 9pt !important; }}",
        width = 100.0 / scale
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FitPass {
    /// Scroll height measured before this pass's correction.
    pub measured: f32,
    pub compression_ratio: f32,
    pub adjusted_scale: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FitReport {
    pub available_height: f32,
    pub passes: Vec<FitPass>,
    pub final_scale: f32,
    pub final_height: f32,
    pub fits: bool,
}

/// Fits the content already loaded into `engine`.
pub async fn fit_single_page(
    engine: &mut dyn RenderEngine,
    options: &FitOptions,
) -> Result<FitReport, FitError> {
    options.validate()?;
    let available = available_height(options.format, &options.margins);

    let mut scale = 1.0_f32;
    let mut passes = Vec::new();
    let mut measured = engine.evaluate_metrics().await?.scroll_height;
    debug!(measured, available, "Measured content height");

    for pass in 0..options.max_passes {
        if measured <= available {
            break;
        }
        let cap = if pass == 0 { options.requested_scale } else { scale };
        let Some(correction) = compute_correction(measured / scale, available, cap) else {
            break;
        };
        if pass > 0 && correction.adjusted_scale >= scale {
            break;
        }

        engine.add_style_tag(&corrective_css(correction.adjusted_scale)).await?;
        info!(
            pass = pass + 1,
            measured,
            available,
            compression_ratio = correction.compression_ratio,
            scale = correction.adjusted_scale,
            "Content exceeds page, applying corrective scale"
        );

        passes.push(FitPass {
            measured,
            compression_ratio: correction.compression_ratio,
            adjusted_scale: correction.adjusted_scale,
        });
        scale = correction.adjusted_scale;
        measured = engine.evaluate_metrics().await?.scroll_height;
    }

    let fits = measured <= available;
    if !fits {
        warn!(
            measured,
            available,
            passes = passes.len(),
            "Content still exceeds page after fitting"
        );
    }

    Ok(FitReport {
        available_height: available,
        passes,
        final_scale: scale,
        final_height: measured,
        fits,
    })
}

/// Loads `html`, fits it, and prints the first page.
pub async fn render_single_page(
    engine: &mut dyn RenderEngine,
    html: &str,
    options: &FitOptions,
) -> Result<(Bytes, FitReport), FitError> {
    options.validate()?;
    engine.set_content(html).await?;
    let report = fit_single_page(engine, options).await?;
    let pdf = engine
        .pdf(&PdfOptions::single_page(options.format, options.margins))
        .await?;
    Ok((pdf, report))
}
