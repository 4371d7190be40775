//! Lossy text rendering of raw payloads
//!
//! Bytes are read as Latin-1 with backslash escapes interpreted, invalid
//! escapes are dropped, and the result is shown as a quoted literal with
//! non-printable characters escaped again.

use std::fmt::{self, Write};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("failed to render payload text: {0}")]
    Format(#[from] fmt::Error),
}

/// Render `data` as a quoted, escaped literal
pub fn render(data: &[u8]) -> Result<String, DecodeError> {
    let text = unescape(data);
    let quote = if text.contains('\'') && !text.contains('"') {
        '"'
    } else {
        '\''
    };

    let mut out = String::with_capacity(text.len() + 2);
    out.push(quote);
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if is_printable(c) => out.push(c),
            c if u32::from(c) < 0x100 => write!(out, "\\x{:02x}", u32::from(c))?,
            c if u32::from(c) < 0x10000 => write!(out, "\\u{:04x}", u32::from(c))?,
            c => write!(out, "\\U{:08x}", u32::from(c))?,
        }
    }
    out.push(quote);

    Ok(out)
}

fn is_printable(c: char) -> bool {
    !(c.is_control() || (c.is_whitespace() && c != ' ') || is_format_or_private(c))
}

/// Format (Cf) and private-use (Co) characters
fn is_format_or_private(c: char) -> bool {
    matches!(
        u32::from(c),
        0xad | 0x600..=0x605
            | 0x61c
            | 0x6dd
            | 0x70f
            | 0x890..=0x891
            | 0x8e2
            | 0x180e
            | 0x200b..=0x200f
            | 0x202a..=0x202e
            | 0x2060..=0x2064
            | 0x2066..=0x206f
            | 0xe000..=0xf8ff
            | 0xfeff
            | 0xfff9..=0xfffb
            | 0x110bd
            | 0x110cd
            | 0x13430..=0x1343f
            | 0x1bca0..=0x1bca3
            | 0x1d173..=0x1d17a
            | 0xe0001
            | 0xe0020..=0xe007f
            | 0xf0000..=0xffffd
            | 0x100000..=0x10fffd
    )
}

/// Interpret backslash escapes, ignoring any that are malformed
fn unescape(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len());
    let mut i = 0;

    while i < data.len() {
        let byte = data[i];
        i += 1;
        if byte != b'\\' {
            out.push(char::from(byte));
            continue;
        }

        // A trailing backslash is dropped
        let Some(&escape) = data.get(i) else {
            break;
        };
        i += 1;

        match escape {
            b'\n' => {}
            b'\\' => out.push('\\'),
            b'\'' => out.push('\''),
            b'"' => out.push('"'),
            b'a' => out.push('\x07'),
            b'b' => out.push('\x08'),
            b'f' => out.push('\x0c'),
            b'n' => out.push('\n'),
            b'r' => out.push('\r'),
            b't' => out.push('\t'),
            b'v' => out.push('\x0b'),
            b'0'..=b'7' => {
                let mut value = u32::from(escape - b'0');
                for _ in 0..2 {
                    match data.get(i) {
                        Some(&digit @ b'0'..=b'7') => {
                            value = value * 8 + u32::from(digit - b'0');
                            i += 1;
                        }
                        _ => break,
                    }
                }
                push_code_point(&mut out, value);
            }
            b'x' => i = hex_escape(data, i, 2, &mut out),
            b'u' => i = hex_escape(data, i, 4, &mut out),
            b'U' => i = hex_escape(data, i, 8, &mut out),
            b'N' => {
                if data.get(i) == Some(&b'{') {
                    match data[i..].iter().position(|&b| b == b'}') {
                        Some(end) => {
                            let name: String = data[i + 1..i + end]
                                .iter()
                                .map(|&b| char::from(b).to_ascii_uppercase())
                                .collect();
                            if let Some(c) = unicode_names2::character(&name) {
                                out.push(c);
                            }
                            i += end + 1;
                        }
                        // Unterminated name swallows the rest of the input
                        None => break,
                    }
                }
            }
            other => {
                out.push('\\');
                out.push(char::from(other));
            }
        }
    }

    out
}

/// Consume up to `digits` hex digits starting at `start`; returns the new position.
/// Short sequences and invalid code points produce nothing.
fn hex_escape(data: &[u8], start: usize, digits: usize, out: &mut String) -> usize {
    let mut value: u32 = 0;
    let mut i = start;

    while i < start + digits {
        match data.get(i).and_then(|&b| char::from(b).to_digit(16)) {
            Some(digit) => {
                value = value * 16 + digit;
                i += 1;
            }
            None => return i,
        }
    }

    push_code_point(out, value);
    i
}

fn push_code_point(out: &mut String, value: u32) {
    if let Some(c) = char::from_u32(value) {
        out.push(c);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendered(data: &[u8]) -> String {
        render(data).unwrap()
    }

    #[test]
    fn test_plain_ascii() {
        assert_eq!(rendered(b"GET / HTTP/1.1"), "'GET / HTTP/1.1'");
        assert_eq!(rendered(b""), "''");
    }

    #[test]
    fn test_control_bytes_are_escaped() {
        assert_eq!(rendered(b"\r\n"), "'\\r\\n'");
        assert_eq!(rendered(b"\x00\x01\x7f"), "'\\x00\\x01\\x7f'");
    }

    #[test]
    fn test_high_bytes_are_latin1() {
        assert_eq!(rendered(b"\xe9"), "'\u{e9}'");
        assert_eq!(rendered(b"\x80\xa0"), "'\\x80\\xa0'");
    }

    #[test]
    fn test_escapes_are_interpreted() {
        assert_eq!(rendered(b"a\\nb"), "'a\\nb'");
        assert_eq!(rendered(b"\\x41\\102\\u00e9"), "'AB\u{e9}'");
        assert_eq!(rendered(b"\\U0001F600"), "'\u{1F600}'");
    }

    #[test]
    fn test_invalid_escapes_are_dropped() {
        assert_eq!(rendered(b"\\x4"), "''");
        assert_eq!(rendered(b"a\\xzz"), "'azz'");
        assert_eq!(rendered(b"ab\\"), "'ab'");
        assert_eq!(rendered(b"\\ud800"), "''");
        assert_eq!(rendered(b"\\U00110000"), "''");
        assert_eq!(rendered(b"\\N{NOT A CHARACTER}x"), "'x'");
        assert_eq!(rendered(b"a\\N{x"), "'a'");
    }

    #[test]
    fn test_unknown_escape_keeps_backslash() {
        assert_eq!(rendered(b"\\q"), "'\\\\q'");
    }

    #[test]
    fn test_quote_selection() {
        assert_eq!(rendered(b"it's"), "\"it's\"");
        assert_eq!(rendered(b"it's \"x\""), "'it\\'s \"x\"'");
    }

    #[test]
    fn test_named_escapes_are_resolved() {
        assert_eq!(rendered(b"\\N{SNOWMAN}"), "'\u{2603}'");
        assert_eq!(rendered(b"\\N{latin small letter e with acute}"), "'\u{e9}'");
    }

    #[test]
    fn test_format_characters_are_escaped() {
        assert_eq!(rendered(b"\\ufeff\\u200b"), "'\\ufeff\\u200b'");
        assert_eq!(rendered(b"\\ue000"), "'\\ue000'");
        assert_eq!(rendered(b"\\xad"), "'\\xad'");
    }
}
