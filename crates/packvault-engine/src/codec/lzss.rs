//! LZSS sliding-window codec.
//!
//! Window 4096 bytes, match length 3..=18. Tokens are emitted with a flag
//! bit each: `1` + 8-bit literal, or `0` + 12-bit offset (distance − 1)
//! + 4-bit (length − 3). The tokenizer is shared with the joined codec,
//! which entropy-codes the same tokens instead of emitting them raw.

use crate::codec::bitio::{BitReader, BitWriter};
use crate::codec::huffman::MAX_PREALLOC;
use crate::error::EngineError;

/// Sliding window size; offsets fit in 12 bits.
pub const WINDOW_SIZE: usize = 4096;
/// Shortest match worth a token.
pub const MIN_MATCH: usize = 3;
/// Longest match a token can express; lengths fit in 4 bits.
pub const MAX_MATCH: usize = 18;

const HASH_BITS: usize = 13;
const HASH_SIZE: usize = 1 << HASH_BITS;

/// One LZSS token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    /// A byte passed through verbatim
    Literal(u8),
    /// A back-reference: `distance` bytes back, `len` bytes long
    Match {
        /// 1-based distance into the window
        distance: u16,
        /// Match length, MIN_MATCH..=MAX_MATCH
        len: u8,
    },
}

fn hash3(a: u8, b: u8, c: u8) -> usize {
    ((usize::from(a) << 10) ^ (usize::from(b) << 5) ^ usize::from(c)) & (HASH_SIZE - 1)
}

/// Greedy tokenization with hash-chain match search.
///
/// Chains are scanned most-recent-first; a candidate replaces the current
/// best only on a strictly longer match, so equal-length ties keep the
/// smallest offset.
pub fn tokenize(input: &[u8]) -> Vec<Token> {
    let n = input.len();
    let mut tokens = Vec::new();
    let mut head = vec![usize::MAX; HASH_SIZE];
    let mut prev = vec![usize::MAX; n];

    let insert = |head: &mut [usize], prev: &mut [usize], pos: usize| {
        if pos + MIN_MATCH <= n {
            let h = hash3(input[pos], input[pos + 1], input[pos + 2]);
            prev[pos] = head[h];
            head[h] = pos;
        }
    };

    let mut i = 0;
    while i < n {
        let mut best_len = 0usize;
        let mut best_pos = 0usize;
        if i + MIN_MATCH <= n {
            let h = hash3(input[i], input[i + 1], input[i + 2]);
            let max_len = MAX_MATCH.min(n - i);
            let mut cand = head[h];
            while cand != usize::MAX && i - cand <= WINDOW_SIZE {
                let mut l = 0;
                while l < max_len && input[cand + l] == input[i + l] {
                    l += 1;
                }
                if l > best_len {
                    best_len = l;
                    best_pos = cand;
                    if l == max_len {
                        break;
                    }
                }
                cand = prev[cand];
            }
        }

        if best_len >= MIN_MATCH {
            tokens.push(Token::Match {
                distance: (i - best_pos) as u16,
                len: best_len as u8,
            });
            for k in 0..best_len {
                insert(&mut head, &mut prev, i + k);
            }
            i += best_len;
        } else {
            tokens.push(Token::Literal(input[i]));
            insert(&mut head, &mut prev, i);
            i += 1;
        }
    }
    tokens
}

/// Expand one token into `out`, bounds-checked against the window.
pub fn expand_token(out: &mut Vec<u8>, token: Token) -> Result<(), EngineError> {
    match token {
        Token::Literal(b) => out.push(b),
        Token::Match { distance, len } => {
            let distance = distance as usize;
            if distance == 0 || distance > out.len() {
                return Err(EngineError::CorruptArchive(
                    "lzss back-reference outside window".to_string(),
                ));
            }
            // Overlapping copies are legal (distance < len): copy bytewise.
            let start = out.len() - distance;
            for k in 0..len as usize {
                let b = out[start + k];
                out.push(b);
            }
        }
    }
    Ok(())
}

/// Compress a byte stream: `u64 LE original size` then the flagged token
/// bitstream, zero-padded to a whole byte.
pub fn encode(input: &[u8]) -> Result<Vec<u8>, EngineError> {
    let mut header = Vec::with_capacity(8);
    header.extend_from_slice(&(input.len() as u64).to_le_bytes());
    let mut w = BitWriter::with_prefix(header);
    for token in tokenize(input) {
        match token {
            Token::Literal(b) => {
                w.write_bit(true);
                w.write_bits(u64::from(b), 8);
            }
            Token::Match { distance, len } => {
                w.write_bit(false);
                w.write_bits(u64::from(distance - 1), 12);
                w.write_bits(u64::from(len) - MIN_MATCH as u64, 4);
            }
        }
    }
    Ok(w.finish())
}

/// Decompress a stream produced by [`encode`].
pub fn decode(input: &[u8]) -> Result<Vec<u8>, EngineError> {
    if input.len() < 8 {
        return Err(EngineError::CorruptArchive(
            "lzss stream too short for header".to_string(),
        ));
    }
    let original_size = u64::from_le_bytes(input[..8].try_into().expect("8 bytes"));
    let mut out = Vec::with_capacity(original_size.min(MAX_PREALLOC) as usize);
    let mut r = BitReader::new(&input[8..]);
    while (out.len() as u64) < original_size {
        let token = if r.read_bit()? {
            Token::Literal(r.read_bits(8)? as u8)
        } else {
            let distance = r.read_bits(12)? as u16 + 1;
            let len = r.read_bits(4)? as u8 + MIN_MATCH as u8;
            Token::Match { distance, len }
        };
        expand_token(&mut out, token)?;
    }
    if out.len() as u64 != original_size {
        return Err(EngineError::CorruptArchive(
            "lzss output overran declared size".to_string(),
        ));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn empty_round_trips() {
        let enc = encode(&[]).unwrap();
        assert_eq!(enc.len(), 8);
        assert_eq!(decode(&enc).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn single_byte_round_trips() {
        let enc = encode(&[9]).unwrap();
        assert_eq!(decode(&enc).unwrap(), vec![9]);
    }

    #[test]
    fn short_input_is_all_literals() {
        let tokens = tokenize(b"ab");
        assert_eq!(tokens, vec![Token::Literal(b'a'), Token::Literal(b'b')]);
    }

    #[test]
    fn repeated_run_becomes_matches() {
        let input = vec![b'x'; 100];
        let tokens = tokenize(&input);
        // One literal seeds the window, matches cover the rest.
        assert!(matches!(tokens[0], Token::Literal(b'x')));
        assert!(tokens.len() < 100 / MIN_MATCH + 2);
        let enc = encode(&input).unwrap();
        assert!(enc.len() < input.len());
        assert_eq!(decode(&enc).unwrap(), input);
    }

    #[test]
    fn overlapping_match_round_trips() {
        // "abcabcabc..." forces distance < len copies.
        let input: Vec<u8> = b"abc".iter().cycle().take(300).copied().collect();
        let enc = encode(&input).unwrap();
        assert_eq!(decode(&enc).unwrap(), input);
    }

    #[test]
    fn ties_prefer_most_recent_offset() {
        // "abcd" appears at 0 and 8; the match at 16 must reference
        // position 8 (distance 8), not position 0 (distance 16).
        let input = b"abcdwxyzabcdwxyzabcd";
        let tokens = tokenize(input);
        let m = tokens
            .iter()
            .find_map(|t| match t {
                Token::Match { distance, len } if *len as usize >= 4 => Some(*distance),
                _ => None,
            })
            .expect("expected a match token");
        assert_eq!(m, 8);
    }

    #[test]
    fn far_apart_repeats_outside_window_stay_literal() {
        let mut input = b"needle".to_vec();
        input.extend(std::iter::repeat(0u8).take(WINDOW_SIZE + 10));
        input.extend_from_slice(b"needle");
        let enc = encode(&input).unwrap();
        assert_eq!(decode(&enc).unwrap(), input);
    }

    #[test]
    fn corrupt_back_reference_is_an_error() {
        // Hand-build: size 1, then a match token pointing before start.
        let mut w = BitWriter::with_prefix(1u64.to_le_bytes().to_vec());
        w.write_bit(false);
        w.write_bits(100, 12);
        w.write_bits(0, 4);
        let bad = w.finish();
        assert!(matches!(
            decode(&bad),
            Err(EngineError::CorruptArchive(_))
        ));
    }

    #[test]
    fn truncated_stream_is_an_error() {
        let input: Vec<u8> = (0..200u8).collect();
        let enc = encode(&input).unwrap();
        assert!(decode(&enc[..enc.len() - 1]).is_err());
    }

    #[test]
    fn encoding_is_deterministic() {
        let input: Vec<u8> = b"deterministic deterministic deterministic"
            .iter()
            .cycle()
            .take(5000)
            .copied()
            .collect();
        assert_eq!(encode(&input).unwrap(), encode(&input).unwrap());
    }

    proptest! {
        #[test]
        fn prop_round_trip(data in prop::collection::vec(0u8..=255, 0..20_000)) {
            let enc = encode(&data).unwrap();
            prop_assert_eq!(decode(&enc).unwrap(), data);
        }

        #[test]
        fn prop_compressible_round_trip(
            seed in prop::collection::vec(0u8..=3, 1..64),
            repeats in 1usize..200,
        ) {
            let data: Vec<u8> = seed.iter().cycle().take(seed.len() * repeats).copied().collect();
            let enc = encode(&data).unwrap();
            prop_assert_eq!(decode(&enc).unwrap(), data);
        }
    }
}
