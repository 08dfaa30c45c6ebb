//! Static character-width table used by the metric page engine.
//!
//! Widths are in em units (relative to font size) for a humanist sans-serif
//! close to Inter.
//! Index = (char as usize) - 32, covering ASCII 0x20..=0x7E.

pub struct FontMetrics {
    widths: [f32; 95],
    /// Fallback width for characters outside printable ASCII.
    average_char_width: f32,
    space_width: f32,
}

/// Sans-serif body font used for single-page output.
pub static SANS: FontMetrics = FontMetrics {
    #[rustfmt::skip]
    widths: [
        // sp    !     "     #     $     %     &     '     (     )     *     +     ,     -     .     /
        0.25, 0.30, 0.38, 0.56, 0.56, 0.89, 0.67, 0.22, 0.33, 0.33, 0.39, 0.59, 0.28, 0.33, 0.28, 0.31,
        // 0     1     2     3     4     5     6     7     8     9
        0.56, 0.56, 0.56, 0.56, 0.56, 0.56, 0.56, 0.56, 0.56, 0.56,
        // :     ;     <     =     >     ?     @
        0.28, 0.28, 0.59, 0.59, 0.59, 0.50, 1.02,
        // A     B     C     D     E     F     G     H     I     J     K     L     M
        0.67, 0.61, 0.61, 0.67, 0.56, 0.50, 0.67, 0.67, 0.25, 0.39, 0.61, 0.53, 0.78,
        // N     O     P     Q     R     S     T     U     V     W     X     Y     Z
        0.67, 0.72, 0.56, 0.72, 0.61, 0.50, 0.56, 0.67, 0.67, 0.89, 0.61, 0.61, 0.56,
        // [     \     ]     ^     _     `
        0.28, 0.31, 0.28, 0.47, 0.56, 0.34,
        // a     b     c     d     e     f     g     h     i     j     k     l     m
        0.56, 0.56, 0.50, 0.56, 0.56, 0.31, 0.56, 0.56, 0.22, 0.22, 0.53, 0.22, 0.83,
        // n     o     p     q     r     s     t     u     v     w     x     y     z
        0.56, 0.56, 0.56, 0.56, 0.33, 0.44, 0.39, 0.56, 0.50, 0.72, 0.50, 0.50, 0.44,
        // {     |     }     ~
        0.33, 0.26, 0.33, 0.59,
    ],
    average_char_width: 0.52,
    space_width: 0.25,
};

impl FontMetrics {
    /// Width of `s` in em units.
    pub fn measure_em(&self, s: &str) -> f32 {
        s.chars()
            .map(|c| {
                let code = c as usize;
                if (32..=126).contains(&code) {
                    self.widths[code - 32]
                } else {
                    self.average_char_width
                }
            })
            .sum()
    }

    /// Number of lines `text` occupies when greedily word-wrapped into `max_width_px`
    /// at `font_size_px`. Empty text takes no lines; a word wider than the line
    /// overflows onto a line of its own.
    pub fn wrapped_lines(&self, text: &str, font_size_px: f32, max_width_px: f32) -> u32 {
        let max_em = max_width_px / font_size_px.max(f32::EPSILON);
        let mut lines = 0u32;
        let mut current = 0.0_f32;

        for word in text.split_whitespace() {
            let word_em = self.measure_em(word);
            if lines == 0 {
                lines = 1;
                current = word_em;
            } else if current + self.space_width + word_em > max_em {
                lines += 1;
                current = word_em;
            } else {
                current += self.space_width + word_em;
            }
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_measure_ascii_and_fallback() {
        assert!((SANS.measure_em("i") - 0.22).abs() < 1e-6);
        assert!((SANS.measure_em("é") - 0.52).abs() < 1e-6);
        assert_eq!(SANS.measure_em(""), 0.0);
    }

    #[test]
    fn test_wrapped_lines_grows_as_width_shrinks() {
        let text = "Led a team of engineers building distributed storage for analytics workloads";
        let wide = SANS.wrapped_lines(text, 12.0, 2000.0);
        let narrow = SANS.wrapped_lines(text, 12.0, 150.0);
        assert_eq!(wide, 1);
        assert!(narrow > wide);
    }

    #[test]
    fn test_wrapped_lines_empty_and_long_word() {
        assert_eq!(SANS.wrapped_lines("   ", 12.0, 100.0), 0);
        assert_eq!(SANS.wrapped_lines(&"m".repeat(100), 12.0, 50.0), 1);
    }

    #[test]
    fn test_larger_font_wraps_more() {
        let text = "Senior engineer with a decade of backend and infrastructure experience";
        assert!(SANS.wrapped_lines(text, 24.0, 300.0) > SANS.wrapped_lines(text, 12.0, 300.0));
    }
}
