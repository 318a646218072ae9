//! JSON recovery from noisy byte buffers.
//!
//! Decompressed save payloads routinely carry trailing NUL padding, stale
//! bytes from a previously larger save, or the next block's framing. This
//! module locates the first syntactically complete top-level JSON value by
//! depth tracking with string/escape awareness, and decodes it across the
//! text encodings the save writer has been observed to use.

use serde_json::Value;

use crate::error::{LedgerError, LedgerErrorCode, byte_preview};

/// Recover the top-level JSON document contained somewhere in `buf`.
pub fn recover(buf: &[u8]) -> Result<Value, LedgerError> {
    // Fast path: the whole buffer is clean JSON in some encoding. This runs
    // before NUL stripping because wide encodings end in a legitimate NUL
    // byte (the high half of the closing bracket).
    if let Some(doc) = decode_text_variants(buf) {
        return Ok(doc);
    }

    let trimmed = strip_trailing_nuls(buf);
    if trimmed.is_empty() {
        return Err(LedgerError::new(
            LedgerErrorCode::NoJsonFound,
            "buffer is empty after NUL stripping",
        ));
    }
    if trimmed.len() != buf.len()
        && let Some(doc) = decode_text_variants(trimmed)
    {
        return Ok(doc);
    }

    // Slice exactly the first complete top-level value and retry the
    // encoding ladder on the slice.
    if let Some((start, end)) = slice_top_level(trimmed)
        && let Some(doc) = decode_text_variants(&trimmed[start..end])
    {
        return Ok(doc);
    }

    // Tolerate truncated-tail corruption: cut at the last closing bracket
    // found anywhere and retry.
    let last_close = trimmed
        .iter()
        .rposition(|&b| b == b'}' || b == b']')
        .map(|i| i + 1);
    if let Some(end) = last_close
        && let Some(doc) = decode_text_variants(&trimmed[..end])
    {
        return Ok(doc);
    }

    if trimmed.iter().any(|&b| b == b'{' || b == b'[') {
        Err(LedgerError::new(
            LedgerErrorCode::JsonSyntax,
            format!(
                "located JSON-like bytes but none parsed; preview: {}",
                byte_preview(trimmed)
            ),
        ))
    } else {
        Err(LedgerError::new(
            LedgerErrorCode::NoJsonFound,
            format!("no JSON opener in buffer; preview: {}", byte_preview(trimmed)),
        ))
    }
}

pub fn strip_trailing_nuls(buf: &[u8]) -> &[u8] {
    let end = buf.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    &buf[..end]
}

/// Try decoding a buffer as JSON text under each known encoding, BOM-aware
/// first, then BOM-less heuristics, then Latin-1 as the last resort (it can
/// decode arbitrary bytes, so it must come last).
pub fn decode_text_variants(buf: &[u8]) -> Option<Value> {
    // BOM fast paths. UTF-32 LE shares its prefix with UTF-16 LE, so the
    // 4-byte BOMs are checked first.
    if let Some(rest) = buf.strip_prefix(&[0xEF, 0xBB, 0xBF][..]) {
        if let Some(doc) = parse_utf8(rest) {
            return Some(doc);
        }
    }
    if let Some(rest) = buf.strip_prefix(&[0xFF, 0xFE, 0x00, 0x00][..]) {
        if let Some(doc) = decode_utf32(rest, true).and_then(|s| parse_str(&s)) {
            return Some(doc);
        }
    }
    if let Some(rest) = buf.strip_prefix(&[0x00, 0x00, 0xFE, 0xFF][..]) {
        if let Some(doc) = decode_utf32(rest, false).and_then(|s| parse_str(&s)) {
            return Some(doc);
        }
    }
    if let Some(rest) = buf.strip_prefix(&[0xFF, 0xFE][..]) {
        if let Some(doc) = decode_utf16(rest, true).and_then(|s| parse_str(&s)) {
            return Some(doc);
        }
    }
    if let Some(rest) = buf.strip_prefix(&[0xFE, 0xFF][..]) {
        if let Some(doc) = decode_utf16(rest, false).and_then(|s| parse_str(&s)) {
            return Some(doc);
        }
    }

    // No BOM: UTF-8 first.
    if let Some(doc) = parse_utf8(buf) {
        return Some(doc);
    }

    // BOM-less UTF-16/32 betray themselves by NULs around the opener.
    if buf.len() >= 4 && (buf[0] == b'{' || buf[0] == b'[') {
        if buf[1..4] == [0, 0, 0] {
            if let Some(doc) = decode_utf32(buf, true).and_then(|s| parse_str(&s)) {
                return Some(doc);
            }
        }
        if buf[1] == 0 {
            if let Some(doc) = decode_utf16(buf, true).and_then(|s| parse_str(&s)) {
                return Some(doc);
            }
        }
    }
    if buf.len() >= 4 && buf[0] == 0 {
        if buf[..3] == [0, 0, 0] && (buf[3] == b'{' || buf[3] == b'[') {
            if let Some(doc) = decode_utf32(buf, false).and_then(|s| parse_str(&s)) {
                return Some(doc);
            }
        }
        if buf[1] == b'{' || buf[1] == b'[' {
            if let Some(doc) = decode_utf16(buf, false).and_then(|s| parse_str(&s)) {
                return Some(doc);
            }
        }
    }

    // Latin-1 maps every byte to a char, so it only runs when nothing else
    // parsed.
    let latin1: String = buf.iter().map(|&b| b as char).collect();
    parse_str(&latin1)
}

fn parse_utf8(buf: &[u8]) -> Option<Value> {
    std::str::from_utf8(buf).ok().and_then(parse_str)
}

fn parse_str(s: &str) -> Option<Value> {
    serde_json::from_str(s.trim_matches(['\0', ' ', '\t', '\r', '\n'])).ok()
}

fn decode_utf16(buf: &[u8], little_endian: bool) -> Option<String> {
    if buf.len() % 2 != 0 {
        return None;
    }
    let units: Vec<u16> = buf
        .chunks_exact(2)
        .map(|c| {
            if little_endian {
                u16::from_le_bytes([c[0], c[1]])
            } else {
                u16::from_be_bytes([c[0], c[1]])
            }
        })
        .collect();
    String::from_utf16(&units).ok()
}

fn decode_utf32(buf: &[u8], little_endian: bool) -> Option<String> {
    if buf.len() % 4 != 0 {
        return None;
    }
    buf.chunks_exact(4)
        .map(|c| {
            let n = if little_endian {
                u32::from_le_bytes([c[0], c[1], c[2], c[3]])
            } else {
                u32::from_be_bytes([c[0], c[1], c[2], c[3]])
            };
            char::from_u32(n)
        })
        .collect()
}

/// Locate `(start, end)` of the first complete top-level JSON object or
/// array in a noisy buffer.
///
/// Bytes inside double-quoted strings are skipped with backslash-escape
/// awareness, so brackets appearing in string values cannot fool the depth
/// tracking. If the value opened at one candidate position never closes,
/// the scan resumes at the next opener.
pub fn slice_top_level(buf: &[u8]) -> Option<(usize, usize)> {
    let n = buf.len();
    let mut i = 0;
    while i < n {
        if buf[i] != b'{' && buf[i] != b'[' {
            i += 1;
            continue;
        }
        let start = i;
        let mut depth = 0usize;
        let mut in_str = false;
        let mut esc = false;
        let mut j = start;
        while j < n {
            let ch = buf[j];
            if in_str {
                if esc {
                    esc = false;
                } else if ch == b'\\' {
                    esc = true;
                } else if ch == b'"' {
                    in_str = false;
                }
            } else if ch == b'"' {
                in_str = true;
            } else if ch == b'{' || ch == b'[' {
                depth += 1;
            } else if ch == b'}' || ch == b']' {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some((start, j + 1));
                }
            }
            j += 1;
        }
        // Never closed: try the next opener after this one.
        i = start + 1;
    }
    None
}
