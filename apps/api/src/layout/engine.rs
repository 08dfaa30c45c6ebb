//! Render engine seam: the only operations the fitter needs from a page renderer.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::layout::page::{Margins, PageFormat};

/// Document box measurements in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContentMetrics {
    pub scroll_height: f32,
    pub client_height: f32,
    pub scroll_width: f32,
}

/// Print options for a single-page PDF.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PdfOptions {
    pub format: PageFormat,
    pub margins: Margins,
    pub print_background: bool,
    pub prefer_css_page_size: bool,
    /// Page range to print, e.g. `"1"`.
    pub page_ranges: String,
}

impl PdfOptions {
    pub fn single_page(format: PageFormat, margins: Margins) -> Self {
        Self {
            format,
            margins,
            print_background: true,
            prefer_css_page_size: false,
            page_ranges: "1".to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("{0} is not supported by this render engine")]
    Unsupported(&'static str),
}

#[async_trait]
pub trait RenderEngine: Send {
    async fn set_content(&mut self, html: &str) -> Result<(), RenderError>;

    /// Appends a stylesheet; later sheets win over earlier ones.
    async fn add_style_tag(&mut self, css: &str) -> Result<(), RenderError>;

    async fn evaluate_metrics(&mut self) -> Result<ContentMetrics, RenderError>;

    async fn pdf(&mut self, options: &PdfOptions) -> Result<Bytes, RenderError>;
}
