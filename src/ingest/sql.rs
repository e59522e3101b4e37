//! SQL dump parsing for `book_pages` INSERT lines.
//!
//! Relevant lines carry the `` INSERT INTO `book_pages` VALUES `` prefix followed by a
//! single parenthesized tuple. The tuple is CSV with single-quote quoting and backslash
//! escaping; string columns additionally carry SQL escape sequences that must be resolved
//! without damaging the Persian payload.

use crate::ingest::IngestError;
use regex::Regex;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::OnceLock;

/// Line prefix identifying rows of the `book_pages` table.
pub const SQL_INSERT_PREFIX: &str = "INSERT INTO `book_pages` VALUES ";

/// Number of columns a `book_pages` tuple must carry.
const EXPECTED_COLUMNS: usize = 9;

/// One row of the dumped `book_pages` table.
#[derive(Debug, Clone, PartialEq)]
pub struct BookPageRecord {
    /// Primary key of the dumped row.
    pub record_id: i64,
    /// Book the page belongs to.
    pub book_id: i64,
    /// Book title.
    pub book_title: String,
    /// Section the page belongs to.
    pub section_id: i64,
    /// Section title.
    pub section_title: String,
    /// Page number within the book.
    pub page_id: i64,
    /// Raw page body as stored (HTML).
    pub page_text_html: String,
    /// Canonical source link of the page.
    pub source_link: String,
    /// Crawl error recorded for the page, empty when clean.
    pub error: String,
}

/// Streaming reader over the `INSERT` lines of a dump file.
pub struct BookPageReader<R: BufRead> {
    lines: std::io::Lines<R>,
}

impl BookPageReader<BufReader<std::fs::File>> {
    /// Open a dump file for streaming.
    pub fn open(path: &Path) -> Result<Self, IngestError> {
        let file = std::fs::File::open(path)?;
        Ok(Self {
            lines: BufReader::new(file).lines(),
        })
    }
}

impl<R: BufRead> BookPageReader<R> {
    /// Wrap an arbitrary buffered reader (used by tests).
    pub fn from_reader(reader: R) -> Self {
        Self {
            lines: reader.lines(),
        }
    }
}

impl<R: BufRead> Iterator for BookPageReader<R> {
    type Item = Result<BookPageRecord, IngestError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(err) => return Some(Err(err.into())),
            };
            let line = line.trim();
            if line.is_empty() || !line.starts_with("INSERT INTO") {
                continue;
            }
            match parse_insert_line(line) {
                Ok(Some(record)) => return Some(Ok(record)),
                Ok(None) => continue,
                Err(err) => return Some(Err(err)),
            }
        }
    }
}

/// Parse one `INSERT` line into a record; `Ok(None)` for inserts of other tables.
pub fn parse_insert_line(line: &str) -> Result<Option<BookPageRecord>, IngestError> {
    let Some(payload) = line.strip_prefix(SQL_INSERT_PREFIX) else {
        return Ok(None);
    };

    let mut payload = payload.trim();
    payload = payload.strip_suffix(';').unwrap_or(payload).trim();
    if let Some(stripped) = payload
        .strip_prefix('(')
        .and_then(|rest| rest.strip_suffix(')'))
    {
        payload = stripped;
    }

    let record = split_tuple_fields(payload)
        .map_err(|err| IngestError::Parse(format!("{err}: {}", truncate(line))))?;

    if record.len() < EXPECTED_COLUMNS {
        return Err(IngestError::Parse(format!(
            "unexpected number of columns ({}): {}",
            record.len(),
            truncate(line)
        )));
    }
    if record.len() > EXPECTED_COLUMNS {
        tracing::warn!(
            columns = record.len(),
            line = truncate(line),
            "Truncating extra columns in INSERT tuple"
        );
    }

    let field = |index: usize| record.get(index).map(String::as_str).unwrap_or_default();
    let int_field = |index: usize| {
        field(index).trim().parse::<i64>().map_err(|_| {
            IngestError::Parse(format!(
                "column {index} is not an integer: {}",
                truncate(line)
            ))
        })
    };

    Ok(Some(BookPageRecord {
        record_id: int_field(0)?,
        book_id: int_field(1)?,
        book_title: decode_sql_string(field(2)).trim().to_string(),
        section_id: int_field(3)?,
        section_title: decode_sql_string(field(4)).trim().to_string(),
        page_id: int_field(5)?,
        page_text_html: decode_sql_string(field(6)),
        source_link: decode_sql_string(field(7)).trim().to_string(),
        error: decode_sql_string(field(8)).trim().to_string(),
    }))
}

/// Split a tuple body into fields: comma-delimited, single-quote quoted, backslash
/// escaped. Escape sequences inside quoted fields are preserved verbatim so
/// [`decode_sql_string`] sees them untouched.
fn split_tuple_fields(payload: &str) -> Result<Vec<String>, String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = payload.chars();
    let mut in_quotes = false;

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '\\' => {
                    current.push('\\');
                    match chars.next() {
                        Some(next) => current.push(next),
                        None => return Err("dangling escape at end of tuple".into()),
                    }
                }
                '\'' => in_quotes = false,
                _ => current.push(c),
            }
        } else {
            match c {
                '\'' => in_quotes = true,
                ',' => fields.push(std::mem::take(&mut current)),
                _ => current.push(c),
            }
        }
    }
    if in_quotes {
        return Err("unterminated quoted field".into());
    }
    fields.push(current);
    Ok(fields)
}

fn truncate(line: &str) -> String {
    let mut prefix: String = line.chars().take(120).collect();
    if prefix.len() < line.len() {
        prefix.push_str("...");
    }
    prefix
}

/// Decode a SQL string column, resolving escape sequences while preserving the Persian
/// payload.
///
/// Pure-ASCII payloads go through the plain unicode-escape scanner; payloads that already
/// carry multi-byte characters take the manual pass (backslash marker substitution, literal
/// replacements, then regex passes for `\uXXXX` and `\xXX`) so the scanner cannot
/// misinterpret bytes inside multi-byte sequences. Both paths finish with a single mojibake
/// reversal attempt for byte-escaped UTF-8.
pub fn decode_sql_string(value: &str) -> String {
    if value.is_empty() || value == "NULL" {
        return String::new();
    }
    let decoded = if value.is_ascii() {
        decode_ascii_payload(value)
    } else {
        decode_mixed_payload(value)
    };
    fix_mojibake(decoded)
}

/// Linear unicode-escape scanner for ASCII-only payloads. `\xHH` yields `U+00HH`, exactly
/// like the reference decoder, leaving byte-escaped UTF-8 for the mojibake reversal.
fn decode_ascii_payload(value: &str) -> String {
    let mut output = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            output.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => output.push('\n'),
            Some('r') => output.push('\r'),
            Some('t') => output.push('\t'),
            Some('"') => output.push('"'),
            Some('\'') => output.push('\''),
            Some('\\') => output.push('\\'),
            Some('x') => match take_hex(&mut chars, 2) {
                Some(code) => output.push(char_from_u32(code)),
                None => output.push_str("\\x"),
            },
            Some('u') => match take_hex(&mut chars, 4) {
                Some(code) => output.push(char_from_u32(code)),
                None => output.push_str("\\u"),
            },
            Some(other) => {
                output.push('\\');
                output.push(other);
            }
            None => output.push('\\'),
        }
    }
    output
}

/// Manual pass for payloads that already contain multi-byte characters.
fn decode_mixed_payload(value: &str) -> String {
    // Private-use marker keeps literal backslashes out of the later passes.
    const MARKER: char = '\u{E000}';

    let mut text = value.replace("\\\\", &MARKER.to_string());
    for (escaped, replacement) in [
        ("\\n", "\n"),
        ("\\r", "\r"),
        ("\\t", "\t"),
        ("\\\"", "\""),
        ("\\'", "'"),
    ] {
        text = text.replace(escaped, replacement);
    }

    let text = unicode_escape_regex()
        .replace_all(&text, |caps: &regex::Captures<'_>| {
            let code = u32::from_str_radix(&caps[1], 16).unwrap_or(0xFFFD);
            char_from_u32(code).to_string()
        })
        .into_owned();
    let text = byte_escape_regex()
        .replace_all(&text, |caps: &regex::Captures<'_>| {
            let code = u32::from_str_radix(&caps[1], 16).unwrap_or(0xFFFD);
            char_from_u32(code).to_string()
        })
        .into_owned();

    text.replace(MARKER, "\\")
}

/// Reverse byte-escaped UTF-8: when every scalar fits in Latin-1 and some are non-ASCII,
/// the string is reinterpreted as raw bytes and decoded as UTF-8. Non-decodable byte runs
/// surrender to replacement characters.
fn fix_mojibake(decoded: String) -> String {
    let all_latin1 = decoded.chars().all(|c| (c as u32) <= 0xFF);
    let has_high_byte = decoded.chars().any(|c| (c as u32) > 0x7F);
    if !(all_latin1 && has_high_byte) {
        return decoded;
    }

    let bytes: Vec<u8> = decoded.chars().map(|c| c as u8).collect();
    match String::from_utf8(bytes) {
        Ok(fixed) => fixed,
        Err(err) => String::from_utf8_lossy(err.as_bytes()).into_owned(),
    }
}

fn take_hex(chars: &mut std::str::Chars<'_>, count: usize) -> Option<u32> {
    let digits: String = chars.clone().take(count).collect();
    if digits.len() != count || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    for _ in 0..count {
        chars.next();
    }
    u32::from_str_radix(&digits, 16).ok()
}

fn char_from_u32(code: u32) -> char {
    char::from_u32(code).unwrap_or('\u{FFFD}')
}

fn unicode_escape_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\\u([0-9a-fA-F]{4})").expect("static regex"))
}

fn byte_escape_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\\x([0-9a-fA-F]{2})").expect("static regex"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn newline_escapes_survive_around_multibyte_text() {
        let decoded = decode_sql_string("سلام\\nدنیا");
        assert_eq!(decoded, "سلام\nدنیا");
        // Byte-for-byte stability through a re-encode round trip.
        assert_eq!(String::from_utf8(decoded.into_bytes()).unwrap(), "سلام\nدنیا");
    }

    #[test]
    fn byte_escaped_utf8_is_reversed_into_persian() {
        // 0xD8 0xA2 is the UTF-8 encoding of آ.
        assert_eq!(decode_sql_string("\\xD8\\xA2"), "آ");
        assert_eq!(decode_sql_string("\\xD8\\xA2\\xD9\\x85"), "آم");
    }

    #[test]
    fn unicode_escapes_decode_in_both_paths() {
        assert_eq!(decode_sql_string("\\u0622"), "آ");
        assert_eq!(decode_sql_string("متن \\u0622 دوم"), "متن آ دوم");
    }

    #[test]
    fn quotes_and_backslashes_unescape() {
        assert_eq!(decode_sql_string("a\\'b\\\"c\\\\d"), "a'b\"c\\d");
        assert_eq!(decode_sql_string("کتاب\\'ها\\\\پایان"), "کتاب'ها\\پایان");
    }

    #[test]
    fn null_literal_becomes_empty() {
        assert_eq!(decode_sql_string("NULL"), "");
        assert_eq!(decode_sql_string(""), "");
    }

    #[test]
    fn plain_ascii_passes_through() {
        assert_eq!(decode_sql_string("https://example.org/page?id=2"),
                   "https://example.org/page?id=2");
    }

    #[test]
    fn insert_line_parses_all_nine_columns() {
        let line = "INSERT INTO `book_pages` VALUES (12,3,'کتاب نمونه',4,'فصل اول',7,'<p>متن\\nصفحه</p>','https://example.org/7','');";
        let record = parse_insert_line(line).expect("parse").expect("record");
        assert_eq!(record.record_id, 12);
        assert_eq!(record.book_id, 3);
        assert_eq!(record.book_title, "کتاب نمونه");
        assert_eq!(record.section_title, "فصل اول");
        assert_eq!(record.page_id, 7);
        assert_eq!(record.page_text_html, "<p>متن\nصفحه</p>");
        assert_eq!(record.source_link, "https://example.org/7");
        assert_eq!(record.error, "");
    }

    #[test]
    fn quoted_commas_do_not_split_fields() {
        let line = "INSERT INTO `book_pages` VALUES (1,1,'عنوان، با ویرگول',1,'بخش',1,'<p>الف، ب</p>','link','')";
        let record = parse_insert_line(line).expect("parse").expect("record");
        assert_eq!(record.book_title, "عنوان، با ویرگول");
        assert_eq!(record.page_text_html, "<p>الف، ب</p>");
    }

    #[test]
    fn too_few_columns_is_an_error() {
        let line = "INSERT INTO `book_pages` VALUES (1,2,'t')";
        assert!(parse_insert_line(line).is_err());
    }

    #[test]
    fn other_tables_are_skipped() {
        let line = "INSERT INTO `books` VALUES (1,'x')";
        assert!(parse_insert_line(line).expect("parse").is_none());
    }

    #[test]
    fn reader_streams_only_book_page_inserts() {
        let dump = "\
-- comment line
INSERT INTO `books` VALUES (1,'x');
INSERT INTO `book_pages` VALUES (1,1,'کتاب',1,'بخش',1,'<p>متن</p>','l','');

INSERT INTO `book_pages` VALUES (2,1,'کتاب',1,'بخش',2,'<p>متن دوم</p>','l','');
";
        let records: Vec<_> = BookPageReader::from_reader(Cursor::new(dump))
            .collect::<Result<_, _>>()
            .expect("records");
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].page_id, 2);
    }
}
