//! Compression codecs for the archive payload.
//!
//! One archive uses exactly one algorithm for its whole payload; the
//! algorithm id is recorded in the archive header.

pub mod bitio;
pub mod huffman;
pub mod joined;
pub mod lzss;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Payload compression algorithm selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CompressionAlgorithm {
    /// Canonical Huffman entropy coding of the raw byte stream
    Huffman,
    /// Sliding-window dictionary coding (window 4096, match 3..=18)
    #[default]
    Lzss,
    /// LZSS tokenization followed by Huffman coding of the token stream
    Joined,
}

impl CompressionAlgorithm {
    /// Wire id stored in the archive header.
    pub fn id(self) -> u8 {
        match self {
            CompressionAlgorithm::Huffman => 0,
            CompressionAlgorithm::Lzss => 1,
            CompressionAlgorithm::Joined => 2,
        }
    }

    /// Decode a wire id.
    pub fn from_id(id: u8) -> Result<Self, EngineError> {
        match id {
            0 => Ok(CompressionAlgorithm::Huffman),
            1 => Ok(CompressionAlgorithm::Lzss),
            2 => Ok(CompressionAlgorithm::Joined),
            other => Err(EngineError::CorruptArchive(format!(
                "unknown compression algorithm id {other}"
            ))),
        }
    }
}

impl std::fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompressionAlgorithm::Huffman => write!(f, "huffman"),
            CompressionAlgorithm::Lzss => write!(f, "lzss"),
            CompressionAlgorithm::Joined => write!(f, "joined"),
        }
    }
}

/// Compress `input` with the given algorithm.
pub fn encode(algo: CompressionAlgorithm, input: &[u8]) -> Result<Vec<u8>, EngineError> {
    match algo {
        CompressionAlgorithm::Huffman => huffman::encode(input),
        CompressionAlgorithm::Lzss => lzss::encode(input),
        CompressionAlgorithm::Joined => joined::encode(input),
    }
}

/// Decompress `input` with the algorithm it was compressed with.
pub fn decode(algo: CompressionAlgorithm, input: &[u8]) -> Result<Vec<u8>, EngineError> {
    match algo {
        CompressionAlgorithm::Huffman => huffman::decode(input),
        CompressionAlgorithm::Lzss => lzss::decode(input),
        CompressionAlgorithm::Joined => joined::decode(input),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [CompressionAlgorithm; 3] = [
        CompressionAlgorithm::Huffman,
        CompressionAlgorithm::Lzss,
        CompressionAlgorithm::Joined,
    ];

    #[test]
    fn wire_ids_round_trip() {
        for algo in ALL {
            assert_eq!(CompressionAlgorithm::from_id(algo.id()).unwrap(), algo);
        }
        assert!(CompressionAlgorithm::from_id(3).is_err());
    }

    #[test]
    fn dispatch_round_trips() {
        let input: Vec<u8> = b"dispatch through every algorithm "
            .iter()
            .cycle()
            .take(3000)
            .copied()
            .collect();
        for algo in ALL {
            let enc = encode(algo, &input).unwrap();
            assert_eq!(decode(algo, &enc).unwrap(), input, "{algo}");
        }
    }

    #[test]
    fn empty_and_single_byte_round_trip() {
        for algo in ALL {
            for input in [vec![], vec![0xA5u8]] {
                let enc = encode(algo, &input).unwrap();
                assert_eq!(decode(algo, &enc).unwrap(), input, "{algo}");
            }
        }
    }
}
