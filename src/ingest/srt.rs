//! SubRip (`.srt`) parsing and formatting.
//!
//! The auxiliary tooling around the corpus exchanges subtitles in SRT: an index line, a
//! `HH:MM:SS,mmm --> HH:MM:SS,mmm` timecode line, text lines, and a blank separator. This
//! module is the I/O contract for that format, including the millisecond offset arithmetic
//! used when per-segment files are merged into one track.

use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;

/// One subtitle cue.
#[derive(Debug, Clone, PartialEq)]
pub struct SrtEntry {
    /// Cue start, relative to track origin.
    pub start: Duration,
    /// Cue end, relative to track origin.
    pub end: Duration,
    /// Text lines, without the trailing blank separator.
    pub lines: Vec<String>,
}

/// Parse an SRT document, shifting every cue by `offset`.
///
/// Malformed blocks are skipped, matching the tolerant reader the merge tooling uses.
pub fn parse_srt(content: &str, offset: Duration) -> Vec<SrtEntry> {
    let lines: Vec<&str> = content.lines().collect();
    let mut entries = Vec::new();
    let mut i = 0usize;

    while i < lines.len() {
        if lines[i].trim().chars().all(|c| c.is_ascii_digit()) && !lines[i].trim().is_empty() {
            i += 1;
        }
        if i >= lines.len() {
            break;
        }
        let Some(captures) = timecode_regex().captures(lines[i]) else {
            i += 1;
            continue;
        };
        let (Some(start), Some(end)) = (
            parse_timecode(&captures[1]),
            parse_timecode(&captures[2]),
        ) else {
            i += 1;
            continue;
        };
        i += 1;

        let mut text_lines = Vec::new();
        while i < lines.len() && !lines[i].trim().is_empty() {
            text_lines.push(lines[i].to_string());
            i += 1;
        }
        while i < lines.len() && lines[i].trim().is_empty() {
            i += 1;
        }
        entries.push(SrtEntry {
            start: start + offset,
            end: end + offset,
            lines: text_lines,
        });
    }
    entries
}

/// Render cues back to SRT with 1-based indices.
pub fn format_srt(entries: &[SrtEntry]) -> String {
    let mut output = String::new();
    for (index, entry) in entries.iter().enumerate() {
        output.push_str(&format!(
            "{}\n{} --> {}\n{}\n\n",
            index + 1,
            format_timecode(entry.start),
            format_timecode(entry.end),
            entry.lines.join("\n")
        ));
    }
    output
}

/// Parse `HH:MM:SS,mmm` into a duration.
pub fn parse_timecode(value: &str) -> Option<Duration> {
    let (hms, millis) = value.split_once(',')?;
    let mut parts = hms.split(':');
    let hours: u64 = parts.next()?.parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let seconds: u64 = parts.next()?.parse().ok()?;
    let millis: u64 = millis.parse().ok()?;
    Some(Duration::from_millis(
        ((hours * 60 + minutes) * 60 + seconds) * 1000 + millis,
    ))
}

/// Render a duration as `HH:MM:SS,mmm`.
pub fn format_timecode(duration: Duration) -> String {
    let total_ms = duration.as_millis();
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms % 3_600_000) / 60_000;
    let seconds = (total_ms % 60_000) / 1000;
    let millis = total_ms % 1000;
    format!("{hours:02}:{minutes:02}:{seconds:02},{millis:03}")
}

fn timecode_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\d\d:\d\d:\d\d,\d\d\d)\s+-->\s+(\d\d:\d\d:\d\d,\d\d\d)")
            .expect("static regex")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "1\n00:00:01,500 --> 00:00:03,250\nسطر اول\nسطر دوم\n\n2\n00:00:04,000 --> 00:00:05,000\nسطر سوم\n";

    #[test]
    fn timecodes_round_trip() {
        let parsed = parse_timecode("01:02:03,456").expect("timecode");
        assert_eq!(format_timecode(parsed), "01:02:03,456");
    }

    #[test]
    fn parse_reads_cues_and_text_lines() {
        let entries = parse_srt(SAMPLE, Duration::ZERO);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].lines, vec!["سطر اول", "سطر دوم"]);
        assert_eq!(entries[0].start, Duration::from_millis(1500));
        assert_eq!(entries[1].end, Duration::from_millis(5000));
    }

    #[test]
    fn offset_shifts_every_cue() {
        let entries = parse_srt(SAMPLE, Duration::from_secs(60));
        assert_eq!(entries[0].start, Duration::from_millis(61_500));
        assert_eq!(entries[1].start, Duration::from_millis(64_000));
    }

    #[test]
    fn format_then_parse_round_trips() {
        let entries = parse_srt(SAMPLE, Duration::ZERO);
        let rendered = format_srt(&entries);
        let reparsed = parse_srt(&rendered, Duration::ZERO);
        assert_eq!(entries, reparsed);
    }

    #[test]
    fn malformed_blocks_are_skipped() {
        let content = "garbage line\n\n1\nnot a timecode\ntext\n\n2\n00:00:01,000 --> 00:00:02,000\nok\n";
        let entries = parse_srt(content, Duration::ZERO);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].lines, vec!["ok"]);
    }
}
