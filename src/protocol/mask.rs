//! Payload masking (RFC 6455 Section 5.3) and masking key generation.

/// XOR `data` in place with `mask`, byte `i` using `mask[i % 4]`.
///
/// Masking is its own inverse, so the same call unmasks.
#[inline]
pub fn apply_mask(data: &mut [u8], mask: [u8; 4]) {
    apply_mask_offset(data, mask, 0);
}

/// Like [`apply_mask`], for a slice that starts `offset` bytes into the payload.
#[inline]
pub fn apply_mask_offset(data: &mut [u8], mask: [u8; 4], offset: usize) {
    let mut rotated = mask;
    rotated.rotate_left(offset % 4);
    let word = u32::from_ne_bytes(rotated);

    let mut chunks = data.chunks_exact_mut(4);
    for chunk in &mut chunks {
        let val = u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) ^ word;
        chunk.copy_from_slice(&val.to_ne_bytes());
    }
    for (i, byte) in chunks.into_remainder().iter_mut().enumerate() {
        *byte ^= rotated[i];
    }
}

/// Produces masking keys for initiator frames.
///
/// Seeded from the OS RNG, then advanced with a multiplicative mix so every
/// frame does not cost a syscall.
#[derive(Debug, Clone)]
pub struct MaskGenerator {
    state: u32,
}

impl MaskGenerator {
    /// Create a generator seeded from `getrandom`, falling back to the clock.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: random_seed(),
        }
    }

    /// Next 4-byte masking key.
    pub fn next_key(&mut self) -> [u8; 4] {
        self.state = self.state.wrapping_add(0x9E37_79B9);
        let a = self.state.wrapping_mul(0x85EB_CA6B);
        let b = a ^ (a >> 13);
        b.wrapping_mul(0xC2B2_AE35).to_le_bytes()
    }
}

impl Default for MaskGenerator {
    fn default() -> Self {
        Self::new()
    }
}

fn random_seed() -> u32 {
    let mut buf = [0u8; 4];
    if getrandom::getrandom(&mut buf).is_ok() {
        u32::from_le_bytes(buf)
    } else {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u32)
            .unwrap_or(0x1234_5678)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference_mask(data: &mut [u8], mask: [u8; 4]) {
        for (i, byte) in data.iter_mut().enumerate() {
            *byte ^= mask[i % 4];
        }
    }

    #[test]
    fn test_rfc_example() {
        // RFC 6455 Section 5.7: masked "Hello"
        let mut data = *b"Hello";
        apply_mask(&mut data, [0x37, 0xfa, 0x21, 0x3d]);
        assert_eq!(data, [0x7f, 0x9f, 0x4d, 0x51, 0x58]);
    }

    #[test]
    fn test_mask_is_involution() {
        let original: Vec<u8> = (0..=255).collect();
        let mut data = original.clone();
        let mask = [0xde, 0xad, 0xbe, 0xef];
        apply_mask(&mut data, mask);
        assert_ne!(data, original);
        apply_mask(&mut data, mask);
        assert_eq!(data, original);
    }

    #[test]
    fn test_matches_bytewise_for_all_lengths() {
        let mask = [0x01, 0x23, 0x45, 0x67];
        for len in 0..33 {
            let mut fast: Vec<u8> = (0..len as u8).collect();
            let mut slow = fast.clone();
            apply_mask(&mut fast, mask);
            reference_mask(&mut slow, mask);
            assert_eq!(fast, slow, "length {len}");
        }
    }

    #[test]
    fn test_offset_masking_matches_whole_payload() {
        let mask = [0x10, 0x20, 0x30, 0x40];
        let mut whole: Vec<u8> = (0..19).collect();
        let mut split = whole.clone();
        apply_mask(&mut whole, mask);

        let (head, tail) = split.split_at_mut(7);
        apply_mask_offset(head, mask, 0);
        apply_mask_offset(tail, mask, 7);
        assert_eq!(whole, split);
    }

    #[test]
    fn test_mask_generator_varies() {
        let mut masks = MaskGenerator::new();
        let a = masks.next_key();
        let b = masks.next_key();
        let c = masks.next_key();
        assert!(a != b || b != c);
    }
}
