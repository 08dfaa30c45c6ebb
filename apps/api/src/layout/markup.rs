//! Converts optimized text into the minimal HTML document handed to a render engine.
//!
//! `#`, `##`, `###` lines become headings (deeper levels render as `h3`), `-`/`*`/`+`/`•`
//! lines become list items grouped in a `<ul>`, and every other non-empty line is a
//! paragraph. Blank lines only close an open list.

use crate::pipeline::classifier::ContentClassifier;

/// Base print stylesheet for single-page output.
pub const BASE_CSS: &str = "\
body { font-family: Inter, Helvetica, Arial, sans-serif; font-size: 11pt; line-height: 1.15; margin: 0; }
h1 { font-size: 18pt; margin: 0 0 4pt 0; }
h2 { font-size: 14pt; margin: 8pt 0 4pt 0; }
h3 { font-size: 12pt; margin: 6pt 0 3pt 0; }
p, li { font-size: 10pt; }
ul { margin: 2pt 0; padding-left: 15pt; }";

const BULLET_MARKERS: [char; 4] = ['-', '*', '+', '•'];

pub fn to_html(text: &str, classifier: &dyn ContentClassifier) -> String {
    let mut body = String::new();
    let mut in_list = false;

    for line in text.lines() {
        let trimmed = line.trim();

        if let Some(item) = bullet_text(trimmed) {
            if !in_list {
                body.push_str("<ul>\n");
                in_list = true;
            }
            body.push_str(&format!("<li>{}</li>\n", escape(item)));
            continue;
        }

        if in_list {
            body.push_str("</ul>\n");
            in_list = false;
        }

        if trimmed.is_empty() {
            continue;
        }

        match classifier.heading_level(trimmed) {
            Some(level) => {
                let level = level.min(3);
                let title = trimmed.trim_start_matches('#').trim();
                body.push_str(&format!("<h{level}>{}</h{level}>\n", escape(title)));
            }
            None => body.push_str(&format!("<p>{}</p>\n", escape(trimmed))),
        }
    }

    if in_list {
        body.push_str("</ul>\n");
    }

    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<style>\n{BASE_CSS}\n</style>\n</head>\n<body>\n{body}</body>\n</html>\n"
    )
}

fn bullet_text(line: &str) -> Option<&str> {
    let mut chars = line.chars();
    let marker = chars.next()?;
    if !BULLET_MARKERS.contains(&marker) {
        return None;
    }
    let rest = chars.as_str();
    if rest.starts_with(char::is_whitespace) {
        Some(rest.trim())
    } else {
        None
    }
}

pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::classifier::HeuristicClassifier;

    fn body_of(html: &str) -> &str {
        let start = html.find("<body>\n").unwrap() + "<body>\n".len();
        let end = html.find("</body>").unwrap();
        &html[start..end]
    }

    #[test]
    fn test_headings_lists_and_paragraphs() {
        let text = "# Ada Lovelace\nAnalyst & writer\n\n## Skills\n- Mathematics\n• Poetry\n\n#### Notes\nplain";
        let html = to_html(text, &HeuristicClassifier);
        assert_eq!(
            body_of(&html),
            "<h1>Ada Lovelace</h1>\n<p>Analyst &amp; writer</p>\n<h2>Skills</h2>\n<ul>\n<li>Mathematics</li>\n<li>Poetry</li>\n</ul>\n<h3>Notes</h3>\n<p>plain</p>\n"
        );
    }

    #[test]
    fn test_list_closed_at_end_of_text() {
        let html = to_html("* one\n* two", &HeuristicClassifier);
        assert_eq!(body_of(&html), "<ul>\n<li>one</li>\n<li>two</li>\n</ul>\n");
    }

    #[test]
    fn test_dash_without_space_is_text() {
        let html = to_html("-5% churn", &HeuristicClassifier);
        assert_eq!(body_of(&html), "<p>-5% churn</p>\n");
    }

    #[test]
    fn test_document_carries_base_styles() {
        let html = to_html("", &HeuristicClassifier);
        assert!(html.contains("h1 { font-size: 18pt;"));
        assert_eq!(escape("<a href=\"x\">'"), "&lt;a href=&quot;x&quot;&gt;&#39;");
    }
}
