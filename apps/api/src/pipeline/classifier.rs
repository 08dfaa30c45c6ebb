//! Section and heading detection used by the distiller and the header validator.

use crate::pipeline::models::CvRecord;

pub const SECTION_PERSONAL_INFO: &str = "personal_info";
pub const SECTION_EXPERIENCE: &str = "experience";
pub const SECTION_EDUCATION: &str = "education";
pub const SECTION_SKILLS: &str = "skills";

pub trait ContentClassifier: Send + Sync {
    /// Record sections whose canonical strings appear in `content`.
    fn sections_included(&self, record: &CvRecord, content: &str) -> Vec<String>;

    /// Heading level of `line` (1 for `#`, 2 for `##`, ...), or `None` for body text.
    fn heading_level(&self, line: &str) -> Option<usize>;
}

/// Substring presence for sections, leading `#` for headings.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicClassifier;

impl ContentClassifier for HeuristicClassifier {
    fn sections_included(&self, record: &CvRecord, content: &str) -> Vec<String> {
        let mentions = |needle: &str| !needle.trim().is_empty() && content.contains(needle);

        let mut sections = Vec::new();
        if mentions(&record.personal_info.name.full) {
            sections.push(SECTION_PERSONAL_INFO.to_string());
        }
        if record.experience.iter().any(|e| mentions(&e.company)) {
            sections.push(SECTION_EXPERIENCE.to_string());
        }
        if record.education.iter().any(|e| mentions(&e.institution)) {
            sections.push(SECTION_EDUCATION.to_string());
        }
        if record.skills.iter().any(|s| mentions(s.name())) {
            sections.push(SECTION_SKILLS.to_string());
        }
        sections
    }

    fn heading_level(&self, line: &str) -> Option<usize> {
        let trimmed = line.trim_start();
        let level = trimmed.chars().take_while(|&c| c == '#').count();
        if level == 0 || level > 6 {
            return None;
        }
        let rest = &trimmed[level..];
        if rest.starts_with(char::is_whitespace) && !rest.trim().is_empty() {
            Some(level)
        } else {
            None
        }
    }
}
