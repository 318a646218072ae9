//! Container decoding for raw save files.
//!
//! The on-disk wrapping is not formally documented and varies between
//! platform exports: plain JSON text, a magic-framed block-LZ4 stream,
//! gzip, an LZ4 frame, or a bare zlib/deflate stream. Each candidate is
//! tried in order and the first that yields a recoverable JSON document
//! wins.

use std::fs;
use std::io::Read;
use std::path::Path;

use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};
use serde_json::Value;

use crate::error::{LedgerError, LedgerErrorCode, byte_preview};
use crate::format::{BLOCK_HEADER_LEN, BLOCK_MAGIC, GZIP_MAGIC, LZ4_FRAME_MAGIC};
use crate::recover;

/// Which wrapping succeeded, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeMethod {
    PlainText,
    BlockStream { blocks: usize },
    Gzip,
    Lz4Frame,
    Zlib,
    Deflate,
}

impl DecodeMethod {
    pub fn label(&self) -> &'static str {
        match self {
            DecodeMethod::PlainText => "plain-text",
            DecodeMethod::BlockStream { .. } => "block-stream",
            DecodeMethod::Gzip => "gzip",
            DecodeMethod::Lz4Frame => "lz4-frame",
            DecodeMethod::Zlib => "zlib",
            DecodeMethod::Deflate => "deflate",
        }
    }
}

#[derive(Debug)]
pub struct Decoded {
    pub doc: Value,
    pub method: DecodeMethod,
}

/// One stitched block from the magic-framed stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    pub offset: usize,
    pub compressed_len: usize,
    pub decompressed_len: usize,
}

/// Read and decode a save container straight from disk.
pub fn decode_file(path: &Path) -> Result<Decoded, LedgerError> {
    let raw = fs::read(path)?;
    decode_to_document(&raw)
}

/// Decode a raw save container all the way to its JSON document.
pub fn decode_to_document(raw: &[u8]) -> Result<Decoded, LedgerError> {
    if raw.is_empty() {
        return Err(LedgerError::new(
            LedgerErrorCode::UnrecognizedFormat,
            "input is empty",
        ));
    }

    // 0) Plain JSON text in any supported encoding.
    if let Some(doc) = recover::decode_text_variants(raw) {
        return Ok(Decoded {
            doc,
            method: DecodeMethod::PlainText,
        });
    }

    let mut attempts: Vec<String> = vec!["plain-text".to_string()];

    // 1) Magic-framed block stream, scanned across the whole file. A
    // stitched stream that still fails JSON recovery falls through to the
    // remaining wrappings rather than aborting.
    match decode_block_stream(raw).and_then(|(buf, blocks)| {
        recover::recover(&buf).map(|doc| (doc, blocks.len()))
    }) {
        Ok((doc, blocks)) => {
            return Ok(Decoded {
                doc,
                method: DecodeMethod::BlockStream { blocks },
            });
        }
        Err(e) => attempts.push(format!("block-stream ({})", e.message)),
    }

    // 2) gzip.
    if raw.starts_with(&GZIP_MAGIC) {
        if let Some(buf) = inflate(GzDecoder::new(raw)) {
            let doc = recover::recover(&buf)?;
            return Ok(Decoded {
                doc,
                method: DecodeMethod::Gzip,
            });
        }
        attempts.push("gzip (inflate failed)".to_string());
    } else {
        attempts.push("gzip (no magic)".to_string());
    }

    // 3) LZ4 frame.
    if raw.starts_with(&LZ4_FRAME_MAGIC) {
        if let Some(buf) = inflate(lz4_flex::frame::FrameDecoder::new(raw)) {
            let doc = recover::recover(&buf)?;
            return Ok(Decoded {
                doc,
                method: DecodeMethod::Lz4Frame,
            });
        }
        attempts.push("lz4-frame (decode failed)".to_string());
    } else {
        attempts.push("lz4-frame (no magic)".to_string());
    }

    // 4) Bare zlib, then raw deflate.
    if let Some(buf) = inflate(ZlibDecoder::new(raw)) {
        let doc = recover::recover(&buf)?;
        return Ok(Decoded {
            doc,
            method: DecodeMethod::Zlib,
        });
    }
    attempts.push("zlib".to_string());
    if let Some(buf) = inflate(DeflateDecoder::new(raw)) {
        let doc = recover::recover(&buf)?;
        return Ok(Decoded {
            doc,
            method: DecodeMethod::Deflate,
        });
    }
    attempts.push("deflate".to_string());

    // 5) Last chance: NUL-stripped plain decode.
    if let Some(doc) = recover::decode_text_variants(recover::strip_trailing_nuls(raw)) {
        return Ok(Decoded {
            doc,
            method: DecodeMethod::PlainText,
        });
    }

    Err(LedgerError::new(
        LedgerErrorCode::UnrecognizedFormat,
        format!(
            "no container wrapping matched; tried: {}; preview: {}",
            attempts.join(", "),
            byte_preview(raw)
        ),
    ))
}

/// Scan the entire buffer for magic-framed compressed blocks and stitch
/// every valid one in file order.
///
/// There is no reliable top-level header: blocks can be interspersed with
/// other data, and the magic value can coincidentally appear inside
/// compressed bytes. A match that fails to decompress is treated as a
/// false positive and the scan resumes one byte later.
pub fn decode_block_stream(raw: &[u8]) -> Result<(Vec<u8>, Vec<BlockInfo>), LedgerError> {
    let magic = BLOCK_MAGIC.to_le_bytes();
    let mut out: Vec<u8> = Vec::new();
    let mut found: Vec<BlockInfo> = Vec::new();
    let mut pos = 0usize;

    while let Some(idx) = find_from(raw, &magic, pos) {
        if idx + BLOCK_HEADER_LEN > raw.len() {
            break;
        }
        let comp_len = read_u32_le(raw, idx + 4) as usize;
        let decomp_len = read_u32_le(raw, idx + 8) as usize;
        if comp_len == 0 {
            pos = idx + 4;
            continue;
        }
        let start = idx + BLOCK_HEADER_LEN;
        let Some(end) = start.checked_add(comp_len).filter(|&e| e <= raw.len()) else {
            pos = idx + 4;
            continue;
        };
        match lz4_flex::block::decompress(&raw[start..end], decomp_len) {
            Ok(dec) => {
                out.extend_from_slice(&dec);
                found.push(BlockInfo {
                    offset: idx,
                    compressed_len: comp_len,
                    decompressed_len: dec.len(),
                });
                pos = end;
            }
            Err(_) => {
                // Coincidental magic inside data; step past it.
                pos = idx + 1;
            }
        }
    }

    if found.is_empty() {
        return Err(LedgerError::new(
            LedgerErrorCode::BlockDecode,
            "block magic not found anywhere in file",
        ));
    }
    Ok((out, found))
}

fn find_from(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|i| i + from)
}

fn read_u32_le(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn inflate<R: Read>(mut reader: R) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    reader.read_to_end(&mut out).ok().filter(|_| !out.is_empty())?;
    Some(out)
}
