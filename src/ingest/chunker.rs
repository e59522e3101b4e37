//! Overlapping character windows over prepared paragraphs.
//!
//! Offsets count characters, not bytes; the corpus is Persian and byte offsets would split
//! codepoints. A paragraph at or under `max_length` yields exactly one window covering it;
//! longer paragraphs emit windows of `max_length` characters advancing by
//! `max(1, max_length - context_length)` until a window reaches the end.

/// One window over a paragraph, with character offsets into the paragraph text.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentWindow {
    /// Window text.
    pub text: String,
    /// Inclusive character start offset.
    pub start: usize,
    /// Exclusive character end offset.
    pub end: usize,
}

/// Split a paragraph into overlapping windows.
pub fn segment_paragraph(
    text: &str,
    max_length: usize,
    context_length: usize,
) -> Vec<SegmentWindow> {
    assert!(max_length > 0, "max_length must be positive");

    let char_count = text.chars().count();
    if char_count == 0 {
        return Vec::new();
    }
    if char_count <= max_length {
        return vec![SegmentWindow {
            text: text.to_string(),
            start: 0,
            end: char_count,
        }];
    }

    // Byte offset of every character boundary, plus the end of the string.
    let mut boundaries: Vec<usize> = text.char_indices().map(|(offset, _)| offset).collect();
    boundaries.push(text.len());

    let step = max_length.saturating_sub(context_length).max(1);
    let mut windows = Vec::new();
    let mut start = 0usize;
    loop {
        let end = (start + max_length).min(char_count);
        windows.push(SegmentWindow {
            text: text[boundaries[start]..boundaries[end]].to_string(),
            start,
            end,
        });
        if end == char_count {
            break;
        }
        start += step;
    }
    windows
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_paragraph_yields_one_full_window() {
        let text = "متن کوتاه";
        let windows = segment_paragraph(text, 200, 100);
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].start, 0);
        assert_eq!(windows[0].end, text.chars().count());
        assert_eq!(windows[0].text, text);
    }

    #[test]
    fn exact_max_length_is_still_one_window() {
        let text: String = std::iter::repeat('ب').take(200).collect();
        let windows = segment_paragraph(&text, 200, 100);
        assert_eq!(windows.len(), 1);
    }

    #[test]
    fn one_char_over_max_yields_two_windows_with_overlap() {
        let text: String = std::iter::repeat('ب').take(201).collect();
        let windows = segment_paragraph(&text, 200, 100);
        assert_eq!(windows.len(), 2);
        assert_eq!((windows[0].start, windows[0].end), (0, 200));
        assert_eq!((windows[1].start, windows[1].end), (100, 201));
    }

    #[test]
    fn window_length_matches_offsets_for_multibyte_text() {
        let text: String = "آ".repeat(450);
        let windows = segment_paragraph(&text, 200, 100);
        for window in &windows {
            assert_eq!(window.text.chars().count(), window.end - window.start);
        }
    }

    #[test]
    fn deoverlapped_concatenation_reproduces_the_paragraph() {
        let source: String = (0..520)
            .map(|i| char::from_u32(0x0627 + (i % 30) as u32).unwrap())
            .collect();
        let windows = segment_paragraph(&source, 120, 40);

        let mut rebuilt = String::new();
        let mut covered = 0usize;
        for window in &windows {
            let skip = covered.saturating_sub(window.start);
            rebuilt.extend(window.text.chars().skip(skip));
            covered = window.end;
        }
        assert_eq!(rebuilt, source);
    }

    #[test]
    fn zero_context_advances_by_full_windows() {
        let text: String = std::iter::repeat('ن').take(500).collect();
        let windows = segment_paragraph(&text, 200, 0);
        assert_eq!(windows.len(), 3);
        assert_eq!((windows[2].start, windows[2].end), (400, 500));
    }
}
