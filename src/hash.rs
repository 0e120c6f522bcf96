// ============================================================================
// SECTION 5: HASH ENGINE
// ============================================================================
// Bob Jenkins' lookup2 hash (1996, public domain). Three 32-bit accumulators
// mixed reversibly; every input bit affects every output bit. Used for bucket
// selection in the name index and for deriving instance ids from keys.
// Not suitable for cryptographic purposes.
// ============================================================================

use crate::constants::GOLDEN_RATIO;

#[inline(always)]
fn mix(a: &mut u32, b: &mut u32, c: &mut u32) {
    *a = a.wrapping_sub(*b).wrapping_sub(*c) ^ (*c >> 13);
    *b = b.wrapping_sub(*c).wrapping_sub(*a) ^ (*a << 8);
    *c = c.wrapping_sub(*a).wrapping_sub(*b) ^ (*b >> 13);
    *a = a.wrapping_sub(*b).wrapping_sub(*c) ^ (*c >> 12);
    *b = b.wrapping_sub(*c).wrapping_sub(*a) ^ (*a << 16);
    *c = c.wrapping_sub(*a).wrapping_sub(*b) ^ (*b >> 5);
    *a = a.wrapping_sub(*b).wrapping_sub(*c) ^ (*c >> 3);
    *b = b.wrapping_sub(*c).wrapping_sub(*a) ^ (*a << 10);
    *c = c.wrapping_sub(*a).wrapping_sub(*b) ^ (*b >> 15);
}

#[inline(always)]
fn word(k: &[u8]) -> u32 {
    u32::from_le_bytes([k[0], k[1], k[2], k[3]])
}

/// Hash a variable-length key into 32 bits, continuing from `initval`.
///
/// Chaining is done by passing the previous result as `initval`, which is how
/// key-based allocation walks its probe sequence.
pub fn hash(key: &[u8], initval: u32) -> u32 {
    let mut a = GOLDEN_RATIO;
    let mut b = GOLDEN_RATIO;
    let mut c = initval;

    let mut chunks = key.chunks_exact(12);
    for k in &mut chunks {
        a = a.wrapping_add(word(&k[0..4]));
        b = b.wrapping_add(word(&k[4..8]));
        c = c.wrapping_add(word(&k[8..12]));
        mix(&mut a, &mut b, &mut c);
    }

    // The low byte of c is reserved for the length.
    c = c.wrapping_add(key.len() as u32);
    let tail = chunks.remainder();
    for (i, &byte) in tail.iter().enumerate() {
        let byte = byte as u32;
        match i {
            0..=3 => a = a.wrapping_add(byte << (8 * i)),
            4..=7 => b = b.wrapping_add(byte << (8 * (i - 4))),
            _ => c = c.wrapping_add(byte << (8 * (i - 7))),
        }
    }
    mix(&mut a, &mut b, &mut c);

    c
}

/// Hash the significant prefix of an instance name
#[inline]
pub fn hash_name(name: &str, match_len: usize) -> u32 {
    hash(&name.as_bytes()[..match_len], 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_deterministic() {
        assert_eq!(hash(b"disk0", 0), hash(b"disk0", 0));
        assert_eq!(hash(b"", 7), hash(b"", 7));
    }

    #[test]
    fn test_hash_depends_on_seed() {
        assert_ne!(hash(b"disk0", 0), hash(b"disk0", 1));
    }

    #[test]
    fn test_hash_sees_every_tail_byte() {
        // Exercise every remainder length, including the 12-byte block path.
        let base: Vec<u8> = (1..=30).collect();
        for len in 1..base.len() {
            let mut flipped = base[..len].to_vec();
            let last = len - 1;
            flipped[last] ^= 0x80;
            assert_ne!(
                hash(&base[..len], 0),
                hash(&flipped, 0),
                "last byte ignored for length {}",
                len
            );
        }
    }

    #[test]
    fn test_hash_includes_length() {
        // Trailing zero bytes must still change the result.
        assert_ne!(hash(&[0u8; 3], 0), hash(&[0u8; 4], 0));
        assert_ne!(hash(&[0u8; 12], 0), hash(&[0u8; 13], 0));
    }

    #[test]
    fn test_hash_name_uses_prefix_only() {
        assert_eq!(hash_name("sda extra", 3), hash_name("sda", 3));
        assert_ne!(hash_name("sda", 3), hash_name("sdb", 3));
    }
}
