//! HTML to plain text conversion for page bodies.

use regex::Regex;
use scraper::Html;
use std::sync::OnceLock;

/// Strip tags from a page body, keeping text nodes separated by newlines.
///
/// Carriage returns are removed and runs of three or more newlines collapse to a blank
/// line, so downstream paragraph extraction sees at most one blank line between blocks.
pub fn html_to_text(html: &str) -> String {
    if html.trim().is_empty() {
        return String::new();
    }

    let document = Html::parse_document(html);
    let text = document
        .root_element()
        .text()
        .collect::<Vec<_>>()
        .join("\n")
        .replace('\r', "");

    let collapsed = blank_run_regex().replace_all(&text, "\n\n");
    collapsed.trim().to_string()
}

fn blank_run_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n{3,}").expect("static regex"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_stripped_and_blocks_separated() {
        let text = html_to_text("<h2>درس اول</h2><p>پاراگراف نخست</p><p>پاراگراف دوم</p>");
        assert!(text.contains("درس اول"));
        assert!(text.contains("پاراگراف نخست"));
        assert!(text.contains('\n'));
        assert!(!text.contains('<'));
    }

    #[test]
    fn carriage_returns_are_removed() {
        let text = html_to_text("<p>سطر اول\r\nسطر دوم</p>");
        assert!(!text.contains('\r'));
        assert!(text.contains("سطر اول"));
    }

    #[test]
    fn long_blank_runs_collapse_to_one_blank_line() {
        let text = html_to_text("<p>الف</p>\n\n\n\n<p>ب</p>");
        assert!(!text.contains("\n\n\n"));
        assert!(text.contains("الف"));
        assert!(text.contains("ب"));
    }

    #[test]
    fn empty_input_yields_empty_output() {
        assert_eq!(html_to_text(""), "");
        assert_eq!(html_to_text("   "), "");
    }
}
