//! Canonical Huffman coding over a caller-chosen alphabet.
//!
//! The byte codec (alphabet 256) lives here; the joined codec reuses the
//! same tables over its 272-symbol literal/match alphabet. Stored form is a
//! code-length table — codes are reconstructed canonically on both sides,
//! so encoder and decoder agree without shipping the tree.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::codec::bitio::{BitReader, BitWriter};
use crate::error::EngineError;

/// Longest admissible code. With 64-bit frequency counts a deeper code
/// would require more input than fits in memory.
const MAX_CODE_LEN: u8 = 63;

/// Cap on upfront allocation for a declared output size; the vector grows
/// past this organically if the (authenticated) size is really that large.
pub(crate) const MAX_PREALLOC: u64 = 64 * 1024 * 1024;

/// Derive one code length per symbol from a frequency table.
///
/// Ties are broken by symbol value (leaves) and creation order (internal
/// nodes) so the table is a pure function of the input.
pub fn build_code_lengths(freqs: &[u64]) -> Result<Vec<u8>, EngineError> {
    struct Node {
        children: Option<(usize, usize)>,
        symbol: usize,
    }

    let mut lengths = vec![0u8; freqs.len()];
    let used: Vec<usize> = (0..freqs.len()).filter(|&s| freqs[s] > 0).collect();
    match used.len() {
        0 => return Ok(lengths),
        1 => {
            // A lone symbol still needs one bit on the wire.
            lengths[used[0]] = 1;
            return Ok(lengths);
        }
        _ => {}
    }

    let mut nodes: Vec<Node> = Vec::with_capacity(used.len() * 2);
    let mut heap: BinaryHeap<Reverse<(u64, usize, usize)>> = BinaryHeap::new();
    for &s in &used {
        nodes.push(Node {
            children: None,
            symbol: s,
        });
        heap.push(Reverse((freqs[s], s, nodes.len() - 1)));
    }

    let mut tie = freqs.len();
    while heap.len() > 1 {
        let Reverse((fa, _, a)) = heap.pop().expect("heap len checked");
        let Reverse((fb, _, b)) = heap.pop().expect("heap len checked");
        nodes.push(Node {
            children: Some((a, b)),
            symbol: 0,
        });
        heap.push(Reverse((fa + fb, tie, nodes.len() - 1)));
        tie += 1;
    }

    let Reverse((_, _, root)) = heap.pop().expect("nonempty heap");
    let mut stack = vec![(root, 0u8)];
    while let Some((idx, depth)) = stack.pop() {
        match nodes[idx].children {
            Some((l, r)) => {
                if depth == MAX_CODE_LEN {
                    return Err(EngineError::CorruptArchive(
                        "huffman code depth overflow".to_string(),
                    ));
                }
                stack.push((l, depth + 1));
                stack.push((r, depth + 1));
            }
            None => lengths[nodes[idx].symbol] = depth,
        }
    }
    Ok(lengths)
}

/// Per-symbol canonical codes for encoding.
pub struct CodeBook {
    codes: Vec<(u8, u64)>,
}

impl CodeBook {
    /// Assign canonical codes in (length, symbol) order.
    pub fn from_lengths(lengths: &[u8]) -> Result<Self, EngineError> {
        let mut order: Vec<usize> = (0..lengths.len()).filter(|&s| lengths[s] > 0).collect();
        order.sort_by_key(|&s| (lengths[s], s));

        let mut codes = vec![(0u8, 0u64); lengths.len()];
        let mut code = 0u64;
        let mut prev_len = 0u8;
        for &s in &order {
            let len = lengths[s];
            if len > MAX_CODE_LEN {
                return Err(EngineError::CorruptArchive(
                    "huffman code length out of range".to_string(),
                ));
            }
            code <<= len - prev_len;
            if len < 64 && code >= 1u64 << len {
                return Err(EngineError::CorruptArchive(
                    "huffman length table is not a prefix code".to_string(),
                ));
            }
            codes[s] = (len, code);
            code += 1;
            prev_len = len;
        }
        Ok(Self { codes })
    }

    /// Emit the code for `symbol`.
    pub fn write_symbol(&self, w: &mut BitWriter, symbol: usize) {
        let (len, code) = self.codes[symbol];
        debug_assert!(len > 0, "symbol without a code");
        w.write_bits(code, len);
    }
}

/// Canonical decoder: first-code/first-index tables per length.
pub struct CanonicalDecoder {
    max_len: u8,
    first_code: Vec<u64>,
    first_index: Vec<usize>,
    counts: Vec<usize>,
    symbols: Vec<usize>,
}

impl CanonicalDecoder {
    /// Build the decode tables from a stored length table.
    pub fn from_lengths(lengths: &[u8]) -> Result<Self, EngineError> {
        let mut order: Vec<usize> = (0..lengths.len()).filter(|&s| lengths[s] > 0).collect();
        if order.is_empty() {
            return Err(EngineError::CorruptArchive(
                "empty huffman length table".to_string(),
            ));
        }
        order.sort_by_key(|&s| (lengths[s], s));
        let max_len = lengths[*order.last().expect("nonempty")];
        if max_len > MAX_CODE_LEN {
            return Err(EngineError::CorruptArchive(
                "huffman code length out of range".to_string(),
            ));
        }

        let n = max_len as usize + 1;
        let mut first_code = vec![0u64; n];
        let mut first_index = vec![0usize; n];
        let mut counts = vec![0usize; n];

        let mut code = 0u64;
        let mut prev_len = 0u8;
        for (i, &s) in order.iter().enumerate() {
            let len = lengths[s];
            code <<= len - prev_len;
            if len < 64 && code >= 1u64 << len {
                return Err(EngineError::CorruptArchive(
                    "huffman length table is not a prefix code".to_string(),
                ));
            }
            if counts[len as usize] == 0 {
                first_code[len as usize] = code;
                first_index[len as usize] = i;
            }
            counts[len as usize] += 1;
            code += 1;
            prev_len = len;
        }

        Ok(Self {
            max_len,
            first_code,
            first_index,
            counts,
            symbols: order,
        })
    }

    /// Read one symbol from the bit stream.
    pub fn read_symbol(&self, r: &mut BitReader<'_>) -> Result<usize, EngineError> {
        let mut code = 0u64;
        let mut len = 0u8;
        loop {
            code = (code << 1) | u64::from(r.read_bit()?);
            len += 1;
            if len > self.max_len {
                return Err(EngineError::CorruptArchive(
                    "invalid huffman code in stream".to_string(),
                ));
            }
            let l = len as usize;
            let count = self.counts[l];
            if count > 0 && code >= self.first_code[l] {
                let offset = (code - self.first_code[l]) as usize;
                if offset < count {
                    return Ok(self.symbols[self.first_index[l] + offset]);
                }
            }
        }
    }
}

/// Compress a byte stream: `u64 LE original size | 256 length bytes |
/// packed canonical codes`.
pub fn encode(input: &[u8]) -> Result<Vec<u8>, EngineError> {
    let mut freqs = [0u64; 256];
    for &b in input {
        freqs[b as usize] += 1;
    }
    let lengths = build_code_lengths(&freqs)?;

    let mut header = Vec::with_capacity(8 + 256);
    header.extend_from_slice(&(input.len() as u64).to_le_bytes());
    header.extend_from_slice(&lengths);

    if input.is_empty() {
        return Ok(header);
    }
    let book = CodeBook::from_lengths(&lengths)?;
    let mut w = BitWriter::with_prefix(header);
    for &b in input {
        book.write_symbol(&mut w, b as usize);
    }
    Ok(w.finish())
}

/// Decompress a stream produced by [`encode`].
pub fn decode(input: &[u8]) -> Result<Vec<u8>, EngineError> {
    if input.len() < 8 + 256 {
        return Err(EngineError::CorruptArchive(
            "huffman stream too short for header".to_string(),
        ));
    }
    let original_size = u64::from_le_bytes(input[..8].try_into().expect("8 bytes"));
    let lengths = &input[8..8 + 256];
    if original_size == 0 {
        return Ok(Vec::new());
    }

    let decoder = CanonicalDecoder::from_lengths(lengths)?;
    let mut out = Vec::with_capacity(original_size.min(MAX_PREALLOC) as usize);
    let mut r = BitReader::new(&input[8 + 256..]);
    while (out.len() as u64) < original_size {
        out.push(decoder.read_symbol(&mut r)? as u8);
    }
    Ok(out)
}
