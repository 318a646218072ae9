//! Save-container decoding and resource-ledger library.
//!
//! Pipeline stages, in order: [`decode`] unwraps the binary container,
//! [`recover`] pulls a clean JSON document out of the decompressed bytes,
//! [`indexer`] locates inventory structure by shape, [`extract`] turns
//! indexed slot arrays into normalized records, and [`ledger`] aggregates
//! records into snapshots, deltas and sessions. [`sink`] emits SQL text for
//! an external database and [`manifest`] tracks the most recent decode.

pub mod decode;
pub mod error;
pub mod extract;
pub mod format;
pub mod indexer;
pub mod ledger;
pub mod manifest;
pub mod recover;
pub mod sink;
pub mod walk;

pub use decode::{DecodeMethod, Decoded, decode_file, decode_to_document};
pub use error::{LedgerError, LedgerErrorCode};
pub use extract::{AmountStrategy, ExtractOptions, SlotRecord, extract};
pub use indexer::{IndexerConfig, PathIndex, index, index_with, summarize};
pub use ledger::{Snapshot, aggregate, coalesce, diff};
pub use recover::recover;
pub use walk::{JsonPath, Walker};
