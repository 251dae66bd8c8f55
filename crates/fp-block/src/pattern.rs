//! Deterministic per-block content.
//!
//! Every block starts with a 32-byte self-describing header followed by a
//! BLAKE3 XOF keystream derived from `(index, block_size)`:
//!
//! | Offset | Len | Field |
//! |--------|-----|-------|
//! | 0 | 8 | magic `FPRBLK01` |
//! | 8 | 8 | block index (LE u64) |
//! | 16 | 8 | block size in bytes (LE u64) |
//! | 24 | 8 | seal: first 8 bytes of BLAKE3 over bytes 0..24 |
//! | 32 | .. | keystream |
//!
//! The header lets a verifier recognise *which* block it read back, so
//! a block holding another block's data (wraparound) can be told apart
//! from a block holding garbage. The seal keeps random bytes that happen to
//! start with the magic from being mistaken for a header.
//!
//! Content is a pure function of `(index, block_size)`: nothing is stored,
//! and any byte range can be regenerated on demand with
//! [`BlockPattern::fill_at`].

use fp_types::{
    BLOCK_HEADER_LEN, BLOCK_MAGIC, BlockIndex, ParseError, read_fixed, read_le_u64,
};

const KEYSTREAM_CONTEXT: &str = "flashprobe 2025-05 block payload v1";
const SEAL_LEN: usize = 8;
const SEALED_PREFIX_LEN: usize = BLOCK_HEADER_LEN - SEAL_LEN;

/// Decoded block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub index: BlockIndex,
    pub block_size: u64,
}

impl BlockHeader {
    #[must_use]
    pub fn new(index: BlockIndex, block_size: u64) -> Self {
        Self { index, block_size }
    }

    #[must_use]
    pub fn encode(&self) -> [u8; BLOCK_HEADER_LEN] {
        let mut out = [0_u8; BLOCK_HEADER_LEN];
        out[0..8].copy_from_slice(&BLOCK_MAGIC);
        out[8..16].copy_from_slice(&self.index.0.to_le_bytes());
        out[16..24].copy_from_slice(&self.block_size.to_le_bytes());
        let seal = seal(&out[..SEALED_PREFIX_LEN]);
        out[SEALED_PREFIX_LEN..].copy_from_slice(&seal);
        out
    }

    /// Parse and authenticate a header from the start of `bytes`.
    pub fn decode(bytes: &[u8]) -> Result<Self, ParseError> {
        let magic = read_fixed::<8>(bytes, 0)?;
        if magic != BLOCK_MAGIC {
            return Err(ParseError::InvalidMagic {
                expected: u64::from_le_bytes(BLOCK_MAGIC),
                actual: u64::from_le_bytes(magic),
            });
        }
        let index = read_le_u64(bytes, 8)?;
        let block_size = read_le_u64(bytes, 16)?;
        let stored_seal = read_fixed::<SEAL_LEN>(bytes, SEALED_PREFIX_LEN)?;
        if stored_seal != seal(&bytes[..SEALED_PREFIX_LEN]) {
            return Err(ParseError::InvalidField {
                field: "header_seal",
                reason: "seal does not match header fields",
            });
        }
        Ok(Self {
            index: BlockIndex(index),
            block_size,
        })
    }
}

fn seal(prefix: &[u8]) -> [u8; SEAL_LEN] {
    let digest = blake3::hash(prefix);
    let mut out = [0_u8; SEAL_LEN];
    out.copy_from_slice(&digest.as_bytes()[..SEAL_LEN]);
    out
}

/// Lazily generated content of one block.
///
/// Holds only the header and the keyed hasher state, so a 1 GiB block costs
/// the same memory as a 4 KiB one.
#[derive(Debug, Clone)]
pub struct BlockPattern {
    index: BlockIndex,
    len: u64,
    header: [u8; BLOCK_HEADER_LEN],
    keystream: blake3::Hasher,
}

impl BlockPattern {
    #[must_use]
    pub fn new(index: BlockIndex, len: u64) -> Self {
        let mut keystream = blake3::Hasher::new_derive_key(KEYSTREAM_CONTEXT);
        keystream.update(&index.0.to_le_bytes());
        keystream.update(&len.to_le_bytes());
        Self {
            index,
            len,
            header: BlockHeader::new(index, len).encode(),
            keystream,
        }
    }

    #[must_use]
    pub fn index(&self) -> BlockIndex {
        self.index
    }

    #[must_use]
    pub fn len(&self) -> u64 {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Fill `buf` with the block bytes starting at `offset`.
    ///
    /// Returns how many bytes were produced; fewer than `buf.len()` only when
    /// the range runs past the end of the block.
    pub fn fill_at(&self, offset: u64, buf: &mut [u8]) -> usize {
        let end = offset.saturating_add(len_u64(buf.len())).min(self.len);
        if offset >= end {
            return 0;
        }
        let produced = usize::try_from(end - offset).unwrap_or(buf.len());
        let buf = &mut buf[..produced];

        let header_len = len_u64(BLOCK_HEADER_LEN);
        let mut done = 0_usize;
        if offset < header_len {
            let start = usize::try_from(offset).unwrap_or(BLOCK_HEADER_LEN);
            let stop = usize::try_from(end.min(header_len)).unwrap_or(BLOCK_HEADER_LEN);
            done = stop - start;
            buf[..done].copy_from_slice(&self.header[start..stop]);
        }

        if done < produced {
            let position = offset + len_u64(done) - header_len;
            let mut reader = self.keystream.finalize_xof();
            reader.set_position(position);
            reader.fill(&mut buf[done..]);
        }
        produced
    }

    /// Materialize the whole block.
    ///
    /// Only suitable for small blocks; writers and verifiers stream through
    /// [`Self::fill_at`] instead.
    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> {
        let len = usize::try_from(self.len).unwrap_or(usize::MAX);
        let mut out = vec![0_u8; len];
        self.fill_at(0, &mut out);
        out
    }

    /// BLAKE3 digest of the full block content, computed in bounded memory.
    #[must_use]
    pub fn digest(&self, chunk_size: usize) -> blake3::Hash {
        let mut hasher = blake3::Hasher::new();
        let mut chunk = vec![0_u8; chunk_size.max(1)];
        let mut offset = 0_u64;
        while offset < self.len {
            let n = self.fill_at(offset, &mut chunk);
            hasher.update(&chunk[..n]);
            offset += len_u64(n);
        }
        hasher.finalize()
    }
}

/// Generate the complete content of block `index` for a block of `len` bytes.
#[must_use]
pub fn generate(index: BlockIndex, len: u64) -> Vec<u8> {
    BlockPattern::new(index, len).to_vec()
}

pub(crate) fn len_u64(len: usize) -> u64 {
    u64::try_from(len).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn header_round_trips_and_rejects_tampering() {
        let header = BlockHeader::new(BlockIndex(42), 4096);
        let mut bytes = header.encode();
        assert_eq!(BlockHeader::decode(&bytes).unwrap(), header);

        bytes[9] ^= 0x01;
        assert!(matches!(
            BlockHeader::decode(&bytes),
            Err(ParseError::InvalidField {
                field: "header_seal",
                ..
            })
        ));

        let zeroes = [0_u8; BLOCK_HEADER_LEN];
        assert!(matches!(
            BlockHeader::decode(&zeroes),
            Err(ParseError::InvalidMagic { .. })
        ));
        assert!(matches!(
            BlockHeader::decode(&bytes[..12]),
            Err(ParseError::InsufficientData { .. })
        ));
    }

    #[test]
    fn generated_block_starts_with_its_header() {
        let block = generate(BlockIndex(7), 8192);
        assert_eq!(block.len(), 8192);
        let header = BlockHeader::decode(&block).unwrap();
        assert_eq!(header.index, BlockIndex(7));
        assert_eq!(header.block_size, 8192);
    }

    #[test]
    fn short_blocks_carry_a_header_prefix() {
        let block = generate(BlockIndex(3), 10);
        assert_eq!(block, BlockHeader::new(BlockIndex(3), 10).encode()[..10]);
    }

    #[test]
    fn fill_at_clamps_to_block_end() {
        let pattern = BlockPattern::new(BlockIndex(1), 100);
        let mut buf = [0xAA_u8; 64];
        assert_eq!(pattern.fill_at(80, &mut buf), 20);
        assert_eq!(&buf[20..], &[0xAA_u8; 44][..]);
        assert_eq!(pattern.fill_at(100, &mut buf), 0);
        assert_eq!(pattern.fill_at(u64::MAX, &mut buf), 0);
    }

    #[test]
    fn digest_matches_materialized_content() {
        let pattern = BlockPattern::new(BlockIndex(11), 10_000);
        let expected = blake3::hash(&pattern.to_vec());
        assert_eq!(pattern.digest(777), expected);
        assert_eq!(pattern.digest(1 << 20), expected);
    }

    #[test]
    fn block_size_is_part_of_the_key() {
        let small = generate(BlockIndex(5), 4096);
        let large = generate(BlockIndex(5), 8192);
        assert_ne!(small[BLOCK_HEADER_LEN..], large[BLOCK_HEADER_LEN..4096]);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn generation_is_deterministic(index in any::<u64>(), len in 1_u64..20_000) {
            let a = generate(BlockIndex(index), len);
            let b = BlockPattern::new(BlockIndex(index), len).to_vec();
            prop_assert_eq!(a, b);
        }

        #[test]
        fn distinct_indices_produce_distinct_blocks(
            i in any::<u64>(),
            j in any::<u64>(),
            len in 64_u64..8192,
        ) {
            prop_assume!(i != j);
            prop_assert_ne!(generate(BlockIndex(i), len), generate(BlockIndex(j), len));
        }

        #[test]
        fn any_window_matches_the_full_block(
            index in 0_u64..1_000,
            offset in 0_u64..6_000,
            window in 1_usize..3_000,
        ) {
            let len = 5_000_u64;
            let full = generate(BlockIndex(index), len);
            let pattern = BlockPattern::new(BlockIndex(index), len);
            let mut buf = vec![0_u8; window];
            let n = pattern.fill_at(offset, &mut buf);
            let start = usize::try_from(offset.min(len)).unwrap();
            let stop = usize::try_from((offset + len_u64(window)).min(len)).unwrap();
            prop_assert_eq!(n, stop - start);
            prop_assert_eq!(&buf[..n], &full[start..stop]);
        }
    }
}
