//! Paragraph extraction and short-paragraph merging.
//!
//! Page text splits on blank lines. Each block keeps a whitespace-collapsed text, the
//! non-empty line count of its pre-collapse form, and a title flag. Consecutive short
//! non-title paragraphs are then merged until they reach the configured line budget so a
//! heading never dangles alone and one-line fragments stop producing near-empty segments.

use regex::Regex;
use std::sync::OnceLock;

/// Title detection knobs. All of these are data, not code paths: tuning the corpus means
/// editing these lists, not the matcher.
#[derive(Debug, Clone)]
pub struct TitleHeuristics {
    /// Blocks at or under this many characters are treated as headings.
    pub max_title_chars: usize,
    /// Leaked markup fragments that mark a heading block.
    pub header_markers: Vec<String>,
    /// Characters that mark a heading when the block ends with one.
    pub trailing_marks: Vec<char>,
    /// Corpus-specific lead words that mark a heading.
    pub title_markers: Vec<String>,
}

impl Default for TitleHeuristics {
    fn default() -> Self {
        Self {
            max_title_chars: 40,
            header_markers: ["<h1", "<h2", "<h3", "<h4"]
                .map(str::to_string)
                .to_vec(),
            trailing_marks: vec![':', '؟', '!', '?'],
            title_markers: ["درس", "فصل", "بخش", "باب", "مقدمه", "پرسش"]
                .map(str::to_string)
                .to_vec(),
        }
    }
}

/// One paragraph block, before or after merging.
#[derive(Debug, Clone, PartialEq)]
pub struct Paragraph {
    /// Whitespace-collapsed text.
    pub text: String,
    /// Non-empty line count of the originating block(s), pre-collapse.
    pub line_count: usize,
    /// Ordinals of the raw paragraphs this block was built from, strictly increasing.
    pub source_indices: Vec<usize>,
    /// Whether the block was classified as a heading.
    pub is_title: bool,
}

/// Heading classifier driven by [`TitleHeuristics`].
pub fn looks_like_title(text: &str, heuristics: &TitleHeuristics) -> bool {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return false;
    }
    if trimmed.chars().count() <= heuristics.max_title_chars {
        return true;
    }
    if heuristics
        .header_markers
        .iter()
        .any(|marker| trimmed.contains(marker.as_str()))
    {
        return true;
    }
    if trimmed
        .chars()
        .next_back()
        .is_some_and(|last| heuristics.trailing_marks.contains(&last))
    {
        return true;
    }
    heuristics
        .title_markers
        .iter()
        .any(|marker| trimmed.contains(marker.as_str()))
}

/// Split page text on blank lines into cleaned paragraph blocks.
pub fn extract_paragraphs(text: &str, heuristics: &TitleHeuristics) -> Vec<Paragraph> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let mut paragraphs = Vec::new();
    for (index, raw) in paragraph_split_regex().split(text).enumerate() {
        let cleaned = raw.split_whitespace().collect::<Vec<_>>().join(" ");
        if cleaned.is_empty() {
            continue;
        }
        let line_count = raw
            .lines()
            .filter(|line| !line.trim().is_empty())
            .count()
            .max(1);
        let is_title = looks_like_title(&cleaned, heuristics);
        paragraphs.push(Paragraph {
            text: cleaned,
            line_count,
            source_indices: vec![index],
            is_title,
        });
    }
    paragraphs
}

/// Merge consecutive short non-title paragraphs until each bundle reaches
/// `min_paragraph_lines`. Titles flush the running buffer and pass through unchanged.
pub fn merge_short_paragraphs(
    paragraphs: Vec<Paragraph>,
    min_paragraph_lines: usize,
) -> Vec<Paragraph> {
    if min_paragraph_lines <= 1 {
        return paragraphs;
    }

    let mut merged: Vec<Paragraph> = Vec::with_capacity(paragraphs.len());
    let mut buffer: Vec<Paragraph> = Vec::new();
    let mut buffered_lines = 0usize;

    let flush = |buffer: &mut Vec<Paragraph>, buffered_lines: &mut usize, merged: &mut Vec<Paragraph>| {
        if buffer.is_empty() {
            return;
        }
        let bundle = std::mem::take(buffer);
        *buffered_lines = 0;
        if bundle.len() == 1 {
            merged.extend(bundle);
            return;
        }
        let text = bundle
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let line_count = bundle.iter().map(|p| p.line_count).sum();
        let source_indices = bundle
            .iter()
            .flat_map(|p| p.source_indices.iter().copied())
            .collect();
        merged.push(Paragraph {
            text,
            line_count,
            source_indices,
            is_title: false,
        });
    };

    for paragraph in paragraphs {
        if paragraph.is_title {
            flush(&mut buffer, &mut buffered_lines, &mut merged);
            merged.push(paragraph);
            continue;
        }
        buffered_lines += paragraph.line_count;
        buffer.push(paragraph);
        if buffered_lines >= min_paragraph_lines {
            flush(&mut buffer, &mut buffered_lines, &mut merged);
        }
    }
    flush(&mut buffer, &mut buffered_lines, &mut merged);
    merged
}

/// Extract and merge in one call; the shape the exporter consumes.
pub fn prepare_paragraphs(
    text: &str,
    min_paragraph_lines: usize,
    heuristics: &TitleHeuristics,
) -> Vec<Paragraph> {
    merge_short_paragraphs(extract_paragraphs(text, heuristics), min_paragraph_lines)
}

fn paragraph_split_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n\s*\n+").expect("static regex"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heuristics() -> TitleHeuristics {
        TitleHeuristics::default()
    }

    #[test]
    fn blocks_split_on_blank_lines_and_collapse_whitespace() {
        let text = "پاراگراف   اول\nادامه سطر\n\nپاراگراف دوم";
        let paragraphs = extract_paragraphs(text, &heuristics());
        assert_eq!(paragraphs.len(), 2);
        assert_eq!(paragraphs[0].text, "پاراگراف اول ادامه سطر");
        assert_eq!(paragraphs[0].line_count, 2);
        assert_eq!(paragraphs[1].source_indices, vec![1]);
    }

    #[test]
    fn line_count_ignores_blank_lines_in_block() {
        let text = "سطر اول\n   \nسطر دوم";
        // The whitespace-only middle line splits the block per the blank-line rule.
        let paragraphs = extract_paragraphs(text, &heuristics());
        assert_eq!(paragraphs.len(), 2);
        assert_eq!(paragraphs[0].line_count, 1);
    }

    #[test]
    fn short_blocks_and_question_marks_read_as_titles() {
        let h = heuristics();
        assert!(looks_like_title("درس سوم", &h));
        assert!(looks_like_title("چرا باید دین را جست‌وجو کرد؟", &h));
        assert!(!looks_like_title(
            &"متن بلند غیرعنوان ".repeat(10),
            &h
        ));
    }

    #[test]
    fn merged_line_counts_sum_and_indices_stay_increasing() {
        let long_tail = format!("بدنه پایانی {}", "متن ".repeat(20));
        let text = format!(
            "{}\n\n{}\n\n{}",
            "سطر یک", // 1 line, title-short -> stays separate
            "بدنه نخست بدون علامت پایانی و به اندازه کافی بلند برای رد شدن از آستانه عنوان",
            long_tail
        );
        let raw = extract_paragraphs(&text, &heuristics());
        let merged = merge_short_paragraphs(raw.clone(), 3);

        for paragraph in &merged {
            let expected: usize = paragraph
                .source_indices
                .iter()
                .map(|&i| raw[i].line_count)
                .sum();
            assert_eq!(paragraph.line_count, expected);
            assert!(
                paragraph
                    .source_indices
                    .windows(2)
                    .all(|pair| pair[0] < pair[1])
            );
        }
    }

    #[test]
    fn titles_flush_the_buffer_and_pass_through() {
        let body = "بدنه نخست که باید با بدنه بعدی ادغام شود چون کوتاه است و به آستانه نمی‌رسد";
        let paragraphs = vec![
            Paragraph {
                text: body.into(),
                line_count: 1,
                source_indices: vec![0],
                is_title: false,
            },
            Paragraph {
                text: "درس دوم".into(),
                line_count: 1,
                source_indices: vec![1],
                is_title: true,
            },
            Paragraph {
                text: body.into(),
                line_count: 2,
                source_indices: vec![2],
                is_title: false,
            },
            Paragraph {
                text: body.into(),
                line_count: 1,
                source_indices: vec![3],
                is_title: false,
            },
        ];

        let merged = merge_short_paragraphs(paragraphs, 3);
        assert_eq!(merged.len(), 3);
        assert!(!merged[0].is_title);
        assert_eq!(merged[0].source_indices, vec![0]);
        assert!(merged[1].is_title);
        assert_eq!(merged[2].line_count, 3);
        assert_eq!(merged[2].source_indices, vec![2, 3]);
        assert!(merged[2].text.contains('\n'));
    }

    #[test]
    fn min_lines_of_one_disables_merging() {
        let text = "الف\n\nب\n\nج";
        let raw = extract_paragraphs(text, &heuristics());
        let merged = merge_short_paragraphs(raw.clone(), 1);
        assert_eq!(merged, raw);
    }
}
