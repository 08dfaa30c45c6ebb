//! Physical page geometry in CSS pixels (96 DPI).

use serde::{Deserialize, Serialize};

pub const PX_PER_INCH: f32 = 96.0;
pub const PX_PER_POINT: f32 = PX_PER_INCH / 72.0;

/// Paper size of the single-page output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageFormat {
    A4,
    #[default]
    Letter,
}

impl PageFormat {
    /// Approximate page height in pixels at 96 DPI.
    pub fn height_px(self) -> f32 {
        match self {
            PageFormat::A4 => 1123.0,
            PageFormat::Letter => 1056.0,
        }
    }

    pub fn width_px(self) -> f32 {
        match self {
            PageFormat::A4 => 794.0,
            PageFormat::Letter => 816.0,
        }
    }

    /// Name understood by the render engine's `pdf()` call.
    pub fn paper_name(self) -> &'static str {
        match self {
            PageFormat::A4 => "A4",
            PageFormat::Letter => "letter",
        }
    }
}

/// Page margins in inches.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Margins {
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
    pub left: f32,
}

impl Default for Margins {
    fn default() -> Self {
        Self::uniform(0.5)
    }
}

impl Margins {
    pub fn uniform(inches: f32) -> Self {
        Self {
            top: inches,
            right: inches,
            bottom: inches,
            left: inches,
        }
    }

    pub fn vertical_px(&self) -> f32 {
        (self.top + self.bottom) * PX_PER_INCH
    }

    pub fn horizontal_px(&self) -> f32 {
        (self.left + self.right) * PX_PER_INCH
    }
}

/// Height left for content once the top and bottom margins are removed.
pub fn available_height(format: PageFormat, margins: &Margins) -> f32 {
    (format.height_px() - margins.vertical_px()).max(0.0)
}

/// Width left for content once the left and right margins are removed.
pub fn available_width(format: PageFormat, margins: &Margins) -> f32 {
    (format.width_px() - margins.horizontal_px()).max(0.0)
}
