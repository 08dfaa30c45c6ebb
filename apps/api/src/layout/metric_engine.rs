//! Headless render engine that measures documents from static font metrics.
//!
//! Understands exactly the markup produced by [`crate::layout::markup`]: `h1`-`h3`, `p`
//! and `li` blocks, `font-size: Npt` rules keyed by tag name, and a `body` rule carrying
//! `transform: scale(s)` and `width: N%`. Later stylesheets override earlier ones.
//! It cannot print; `pdf()` reports `Unsupported`.

use async_trait::async_trait;
use bytes::Bytes;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::layout::engine::{ContentMetrics, PdfOptions, RenderEngine, RenderError};
use crate::layout::font_metrics::SANS;
use crate::layout::page::{available_height, available_width, Margins, PageFormat, PX_PER_POINT};

const LINE_HEIGHT: f32 = 1.15;
/// Left padding of list items, in pixels.
const LIST_INDENT_PX: f32 = 20.0;

static STYLE_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<style[^>]*>(.*?)</style>").expect("Invalid style regex"));
static CONTENT_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<(h[1-3]|p|li)(?:\s[^>]*)?>(.*?)</(?:h[1-3]|p|li)>")
        .expect("Invalid block regex")
});
static CSS_RULE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([^{}]+)\{([^{}]*)\}").expect("Invalid css rule regex"));
static FONT_SIZE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"font-size\s*:\s*([0-9]*\.?[0-9]+)pt").expect("Invalid font-size regex"));
static SCALE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"transform\s*:\s*scale\(\s*([0-9]*\.?[0-9]+)\s*\)").expect("Invalid scale regex")
});
static WIDTH_PERCENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|[;\s])width\s*:\s*([0-9]*\.?[0-9]+)%").expect("Invalid width regex")
});
static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("Invalid tag regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    H1,
    H2,
    H3,
    Paragraph,
    ListItem,
}

impl BlockKind {
    fn from_tag(tag: &str) -> Option<Self> {
        match tag.to_ascii_lowercase().as_str() {
            "h1" => Some(Self::H1),
            "h2" => Some(Self::H2),
            "h3" => Some(Self::H3),
            "p" => Some(Self::Paragraph),
            "li" => Some(Self::ListItem),
            _ => None,
        }
    }

    fn selector(self) -> &'static str {
        match self {
            Self::H1 => "h1",
            Self::H2 => "h2",
            Self::H3 => "h3",
            Self::Paragraph => "p",
            Self::ListItem => "li",
        }
    }

    /// Vertical spacing around the block, in em.
    fn spacing_em(self) -> f32 {
        match self {
            Self::H1 | Self::H2 | Self::H3 => 0.75,
            Self::Paragraph => 0.5,
            Self::ListItem => 0.15,
        }
    }
}

/// Font sizes in points plus the body transform, after all stylesheets are applied.
#[derive(Debug, Clone, PartialEq)]
struct ComputedStyle {
    h1: f32,
    h2: f32,
    h3: f32,
    paragraph: f32,
    list_item: f32,
    scale: f32,
    width_percent: f32,
}

impl Default for ComputedStyle {
    fn default() -> Self {
        Self {
            h1: 18.0,
            h2: 14.0,
            h3: 12.0,
            paragraph: 10.0,
            list_item: 10.0,
            scale: 1.0,
            width_percent: 100.0,
        }
    }
}

impl ComputedStyle {
    fn font_pt(&self, kind: BlockKind) -> f32 {
        match kind {
            BlockKind::H1 => self.h1,
            BlockKind::H2 => self.h2,
            BlockKind::H3 => self.h3,
            BlockKind::Paragraph => self.paragraph,
            BlockKind::ListItem => self.list_item,
        }
    }

    fn font_pt_mut(&mut self, kind: BlockKind) -> &mut f32 {
        match kind {
            BlockKind::H1 => &mut self.h1,
            BlockKind::H2 => &mut self.h2,
            BlockKind::H3 => &mut self.h3,
            BlockKind::Paragraph => &mut self.paragraph,
            BlockKind::ListItem => &mut self.list_item,
        }
    }

    fn apply(&mut self, css: &str) {
        for rule in CSS_RULE.captures_iter(css) {
            let declarations = &rule[2];
            for selector in rule[1].split(',').map(str::trim) {
                let selector = selector.to_ascii_lowercase();
                if let Some(kind) = BlockKind::from_tag(&selector) {
                    if let Some(size) = capture_f32(&FONT_SIZE, declarations) {
                        *self.font_pt_mut(kind) = size;
                    }
                } else if selector == "body" {
                    if let Some(scale) = capture_f32(&SCALE, declarations) {
                        self.scale = scale;
                    }
                    if let Some(width) = capture_f32(&WIDTH_PERCENT, declarations) {
                        self.width_percent = width;
                    }
                }
            }
        }
    }
}

fn capture_f32(pattern: &Regex, haystack: &str) -> Option<f32> {
    pattern
        .captures(haystack)
        .and_then(|c| c[1].parse::<f32>().ok())
        .filter(|v| v.is_finite() && *v > 0.0)
}

#[derive(Debug, Clone)]
struct Block {
    kind: BlockKind,
    text: String,
}

pub struct MetricPageEngine {
    format: PageFormat,
    margins: Margins,
    document_css: Vec<String>,
    injected_css: Vec<String>,
    blocks: Vec<Block>,
}

impl MetricPageEngine {
    pub fn new(format: PageFormat, margins: Margins) -> Self {
        Self {
            format,
            margins,
            document_css: Vec::new(),
            injected_css: Vec::new(),
            blocks: Vec::new(),
        }
    }

    fn computed_style(&self) -> ComputedStyle {
        let mut style = ComputedStyle::default();
        for css in self.document_css.iter().chain(&self.injected_css) {
            style.apply(css);
        }
        style
    }

    fn measure(&self) -> ContentMetrics {
        let style = self.computed_style();
        let content_width = available_width(self.format, &self.margins) * style.width_percent / 100.0;

        let mut height = 0.0_f32;
        for block in &self.blocks {
            let font_px = style.font_pt(block.kind) * PX_PER_POINT;
            let width = match block.kind {
                BlockKind::ListItem => content_width - LIST_INDENT_PX,
                _ => content_width,
            };
            let lines = SANS.wrapped_lines(&block.text, font_px, width.max(1.0));
            height += lines as f32 * font_px * LINE_HEIGHT + block.kind.spacing_em() * font_px;
        }

        ContentMetrics {
            scroll_height: height * style.scale,
            client_height: available_height(self.format, &self.margins),
            scroll_width: content_width * style.scale,
        }
    }
}

#[async_trait]
impl RenderEngine for MetricPageEngine {
    async fn set_content(&mut self, html: &str) -> Result<(), RenderError> {
        self.document_css = STYLE_BLOCK
            .captures_iter(html)
            .map(|c| c[1].to_string())
            .collect();
        self.injected_css.clear();
        self.blocks = CONTENT_BLOCK
            .captures_iter(html)
            .filter_map(|c| {
                let kind = BlockKind::from_tag(&c[1])?;
                Some(Block {
                    kind,
                    text: unescape(&TAG.replace_all(&c[2], " ")),
                })
            })
            .collect();

        debug!(
            blocks = self.blocks.len(),
            stylesheets = self.document_css.len(),
            "Metric engine loaded document"
        );
        Ok(())
    }

    async fn add_style_tag(&mut self, css: &str) -> Result<(), RenderError> {
        self.injected_css.push(css.to_string());
        Ok(())
    }

    async fn evaluate_metrics(&mut self) -> Result<ContentMetrics, RenderError> {
        Ok(self.measure())
    }

    async fn pdf(&mut self, _options: &PdfOptions) -> Result<Bytes, RenderError> {
        Err(RenderError::Unsupported("PDF output"))
    }
}

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}
