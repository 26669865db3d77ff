#![warn(missing_docs)]

//! Packvault backup engine: selection, compression, sealing, archival.
//!
//! Backup path: Walk tree → Filter → Concatenate → Compress (Huffman/LZSS/Joined)
//!              → Seal (AES-256-GCM, optional) → Write archive atomically
//! Restore path: Read archive → Authenticate tag → Open → Decompress → Materialize tree

pub mod codec;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod filter;
pub mod format;
pub mod manifest;
pub mod walk;

pub use codec::CompressionAlgorithm;
pub use engine::{BackupEngine, BackupSummary, RestoreSummary};
pub use error::EngineError;
pub use filter::{CompiledFilter, FilterOptions};
pub use format::{Archive, ARCHIVE_SUFFIX, FORMAT_VERSION, MAGIC};
pub use manifest::{EntryKind, ManifestEntry};
