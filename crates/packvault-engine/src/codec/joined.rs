//! Joined codec: LZSS tokenization entropy-coded with a canonical
//! Huffman code.
//!
//! Literals and match codes share one 272-symbol alphabet: 0..=255 are
//! literal bytes, 256 + i escapes to a match of length i + MIN_MATCH whose
//! 12-bit offset follows raw in the bitstream. Stored form is
//! `u64 LE original size | 272 length bytes | packed stream`.

use crate::codec::bitio::{BitReader, BitWriter};
use crate::codec::huffman::{build_code_lengths, CanonicalDecoder, CodeBook, MAX_PREALLOC};
use crate::codec::lzss::{expand_token, tokenize, Token, MAX_MATCH, MIN_MATCH};
use crate::error::EngineError;

/// 256 literals + one escape symbol per match length.
const ALPHABET: usize = 256 + (MAX_MATCH - MIN_MATCH + 1);

fn symbol_of(token: Token) -> usize {
    match token {
        Token::Literal(b) => b as usize,
        Token::Match { len, .. } => 256 + (len as usize - MIN_MATCH),
    }
}

/// Compress a byte stream.
pub fn encode(input: &[u8]) -> Result<Vec<u8>, EngineError> {
    let tokens = tokenize(input);

    let mut freqs = vec![0u64; ALPHABET];
    for &t in &tokens {
        freqs[symbol_of(t)] += 1;
    }
    let lengths = build_code_lengths(&freqs)?;

    let mut header = Vec::with_capacity(8 + ALPHABET);
    header.extend_from_slice(&(input.len() as u64).to_le_bytes());
    header.extend_from_slice(&lengths);

    if input.is_empty() {
        return Ok(header);
    }
    let book = CodeBook::from_lengths(&lengths)?;
    let mut w = BitWriter::with_prefix(header);
    for &t in &tokens {
        book.write_symbol(&mut w, symbol_of(t));
        if let Token::Match { distance, .. } = t {
            w.write_bits(u64::from(distance - 1), 12);
        }
    }
    Ok(w.finish())
}

/// Decompress a stream produced by [`encode`].
pub fn decode(input: &[u8]) -> Result<Vec<u8>, EngineError> {
    if input.len() < 8 + ALPHABET {
        return Err(EngineError::CorruptArchive(
            "joined stream too short for header".to_string(),
        ));
    }
    let original_size = u64::from_le_bytes(input[..8].try_into().expect("8 bytes"));
    let lengths = &input[8..8 + ALPHABET];
    if original_size == 0 {
        return Ok(Vec::new());
    }

    let decoder = CanonicalDecoder::from_lengths(lengths)?;
    let mut out = Vec::with_capacity(original_size.min(MAX_PREALLOC) as usize);
    let mut r = BitReader::new(&input[8 + ALPHABET..]);
    while (out.len() as u64) < original_size {
        let sym = decoder.read_symbol(&mut r)?;
        let token = if sym < 256 {
            Token::Literal(sym as u8)
        } else {
            let distance = r.read_bits(12)? as u16 + 1;
            Token::Match {
                distance,
                len: (sym - 256 + MIN_MATCH) as u8,
            }
        };
        expand_token(&mut out, token)?;
    }
    if out.len() as u64 != original_size {
        return Err(EngineError::CorruptArchive(
            "joined output overran declared size".to_string(),
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
        assert_eq!(enc.len(), 8 + ALPHABET);
        assert_eq!(decode(&enc).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn single_byte_round_trips() {
        let enc = encode(&[0]).unwrap();
        assert_eq!(decode(&enc).unwrap(), vec![0]);
    }

    #[test]
    fn repetitive_input_beats_plain_huffman() {
        let input: Vec<u8> = b"packvault packs vaults; packvault packs vaults; "
            .iter()
            .cycle()
            .take(12_000)
            .copied()
            .collect();
        let joined = encode(&input).unwrap();
        let plain = crate::codec::huffman::encode(&input).unwrap();
        assert!(joined.len() < plain.len());
        assert_eq!(decode(&joined).unwrap(), input);
    }

    #[test]
    fn truncated_stream_is_an_error() {
        let input: Vec<u8> = b"truncate me, truncate me, truncate me".to_vec();
        let enc = encode(&input).unwrap();
        assert!(decode(&enc[..enc.len() - 1]).is_err());
        assert!(decode(&enc[..20]).is_err());
    }

    #[test]
    fn encoding_is_deterministic() {
        let input: Vec<u8> = (0..=255u8).cycle().take(6000).collect();
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
            seed in prop::collection::vec(0u8..=7, 1..48),
            repeats in 1usize..300,
        ) {
            let data: Vec<u8> = seed.iter().cycle().take(seed.len() * repeats).copied().collect();
            let enc = encode(&data).unwrap();
            prop_assert_eq!(decode(&enc).unwrap(), data);
        }
    }
}
