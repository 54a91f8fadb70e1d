//! Probabilistic admission throttle.
//!
//! Without central coordination each node estimates its fair share of the
//! desired global replica count and converts it into a weighted coin
//! flip. The draw is intentionally a true coin flip, not a deterministic
//! hash: repeated evaluations of the same file may land differently, and
//! only the expected aggregate behavior across the fleet matters.

use sha2::{Digest, Sha256};

/// Source of uniform draws in `[0, 1)`.
///
/// An object-safe seam so tests can pin the draw while production mixes
/// the seed material with fresh OS entropy on every call.
pub trait RandomSource: Send + Sync {
    fn draw(&self, seed: &str) -> f64;
}

/// Production source: sha256(seed ‖ 32 bytes of OS entropy), top 53 bits
/// mapped to `[0, 1)`. Same seed, independent draws.
pub struct EntropyMixedRandom;

impl RandomSource for EntropyMixedRandom {
    fn draw(&self, seed: &str) -> f64 {
        let nonce: [u8; 32] = rand::random();
        let mut hasher = Sha256::new();
        hasher.update(seed.as_bytes());
        hasher.update(nonce);
        let digest = hasher.finalize();
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        // keep 53 bits so the quotient is exact in an f64
        (u64::from_be_bytes(head) >> 11) as f64 / (1u64 << 53) as f64
    }
}

/// Weighted coin flip deciding local candidacy for one file.
///
/// Acceptance probability is `(replica_cap / node_count) * max(1,
/// group_members)`: the group jointly serves one replica slot, so a
/// bigger group raises each member's share. `node_count == 0` means the
/// cluster size is unknown and nothing is admitted.
pub fn should_take(
    node_count: u64,
    group_members: usize,
    replica_cap: u32,
    seed: &str,
    rng: &dyn RandomSource,
) -> bool {
    if node_count == 0 {
        return false;
    }
    let p = f64::from(replica_cap) / node_count as f64 * group_members.max(1) as f64;
    p > rng.draw(seed)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedRandom(f64);

    impl RandomSource for FixedRandom {
        fn draw(&self, _seed: &str) -> f64 {
            self.0
        }
    }

    #[test]
    fn test_zero_node_count_never_admits() {
        let rng = FixedRandom(0.0);
        assert!(!should_take(0, 0, 300, "acct", &rng));
        assert!(!should_take(0, 100, 300, "acct", &rng));
    }

    #[test]
    fn test_probability_exceeding_one_always_admits() {
        // 160 / 100 nodes * 1 member = 1.6
        let rng = FixedRandom(0.999_999);
        assert!(should_take(100, 1, 160, "acct", &rng));
    }

    #[test]
    fn test_group_size_inflates_share() {
        // 160 / 1000 = 0.16 alone, 0.64 with four members
        assert!(!should_take(1000, 1, 160, "acct", &FixedRandom(0.5)));
        assert!(should_take(1000, 4, 160, "acct", &FixedRandom(0.5)));
    }

    #[test]
    fn test_zero_members_counts_as_one() {
        assert!(should_take(100, 0, 160, "acct", &FixedRandom(0.9)));
    }

    #[test]
    fn test_entropy_mixed_draw_is_in_unit_interval() {
        let rng = EntropyMixedRandom;
        for _ in 0..64 {
            let x = rng.draw("acct");
            assert!((0.0..1.0).contains(&x), "draw out of range: {x}");
        }
    }
}
