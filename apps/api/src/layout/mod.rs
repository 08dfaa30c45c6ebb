// Single-page layout: header validation, markup, and the measurement-driven fitter.
// The fitter only talks to a RenderEngine; MetricPageEngine is the built-in
// measurement-only engine used for previews.

pub mod engine;
pub mod fitter;
pub mod font_metrics;
pub mod headers;
pub mod markup;
pub mod metric_engine;
pub mod page;

pub use engine::{ContentMetrics, PdfOptions, RenderEngine, RenderError};
pub use fitter::{fit_single_page, render_single_page, FitError, FitOptions, FitReport};
pub use headers::{remove_orphaned_headers, HeaderReport};
pub use metric_engine::MetricPageEngine;
pub use page::{Margins, PageFormat};
