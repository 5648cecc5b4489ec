//! Feature hashing into a fixed-width bucket space.
//!
//! Keys are digested with SHA-1, the 160-bit digest is read as a big-endian
//! unsigned integer and reduced modulo the dimension. Collisions are accepted;
//! there is no vocabulary table to fall back on.

use sha1::{Digest, Sha1};

const UNIGRAM_PREFIX: &str = "uni::";
const BIGRAM_PREFIX: &str = "bi::";
const BIGRAM_JOINER: char = '|';

/// Feature key for a single token.
pub fn unigram_key(token: &str) -> String {
    format!("{UNIGRAM_PREFIX}{token}")
}

/// Feature key for an ordered pair of adjacent tokens.
pub fn bigram_key(first: &str, second: &str) -> String {
    format!("{BIGRAM_PREFIX}{first}{BIGRAM_JOINER}{second}")
}

/// Maps `key` to a bucket in `[0, dim)`.
///
/// Returns `0` when `dim` is zero; callers validate the dimension up front.
pub fn bucket(key: &str, dim: usize) -> usize {
    if dim == 0 {
        return 0;
    }
    let digest = Sha1::digest(key.as_bytes());
    let modulus = dim as u128;
    // Horner reduction keeps the remainder below `dim`, so `rem << 8` fits in u128.
    let rem = digest
        .iter()
        .fold(0u128, |rem, &byte| ((rem << 8) | u128::from(byte)) % modulus);
    rem as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn keys_carry_feature_prefixes() {
        assert_eq!(unigram_key("hello"), "uni::hello");
        assert_eq!(bigram_key("hello", "world"), "bi::hello|world");
    }

    #[test]
    fn buckets_match_reference_digests() {
        // sha1("uni::hello") = b32d1920...f397deb1
        assert_eq!(bucket("uni::hello", 16), 1);
        assert_eq!(bucket("uni::world", 16), 1);
        assert_eq!(bucket("bi::hello|world", 16), 7);
        assert_eq!(bucket("uni::a", 512), 426);
    }

    #[test]
    fn reduces_full_digest_for_non_power_of_two_dims() {
        assert_eq!(bucket("uni::hello", 1000), 937);
        assert_eq!(bucket("uni::world", 997), 622);
        assert_eq!(bucket("bi::hello|world", 384), 327);
        assert_eq!(bucket("uni::a", (1usize << 40) + 15), 198_270_092_134);
    }

    #[test]
    fn stays_in_range() {
        for dim in [1usize, 2, 3, 7, 64, 512, 1536] {
            for key in ["uni::x", "bi::x|y", "", "uni::longer-token-value"] {
                assert!(bucket(key, dim) < dim);
            }
        }
    }

    #[test]
    fn zero_dimension_is_total() {
        assert_eq!(bucket("uni::x", 0), 0);
    }
}
