use std::error::Error;
use std::fmt;
use std::io;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerErrorCode {
    /// No supported container wrapping matched the raw bytes.
    UnrecognizedFormat,
    /// Decompression succeeded but no JSON value could be located.
    NoJsonFound,
    /// A JSON candidate was located but failed to parse.
    JsonSyntax,
    /// A magic-framed block failed to decompress.
    BlockDecode,
    Io,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerError {
    pub code: LedgerErrorCode,
    pub message: String,
}

impl LedgerError {
    pub fn new(code: LedgerErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl Error for LedgerError {}

impl From<io::Error> for LedgerError {
    fn from(e: io::Error) -> Self {
        Self::new(LedgerErrorCode::Io, e.to_string())
    }
}

/// Hex preview of the first bytes of a buffer, for error context.
pub(crate) fn byte_preview(buf: &[u8]) -> String {
    let shown = buf.len().min(16);
    let hex: Vec<String> = buf[..shown].iter().map(|b| format!("{b:02x}")).collect();
    if buf.len() > shown {
        format!("{} .. ({} bytes)", hex.join(" "), buf.len())
    } else {
        format!("{} ({} bytes)", hex.join(" "), buf.len())
    }
}
