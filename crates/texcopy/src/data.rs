//! Deterministic reference bytes.

/// Prime modulus; keeps the sequence from repeating with any power-of-two row stride.
const MODULUS: u64 = 251;

/// Reference byte at index `i`: `(i^3 + i) mod 251`.
pub fn reference_byte(i: u64) -> u8 {
    let m = i % MODULUS;
    ((m * m * m + m) % MODULUS) as u8
}

/// Generates `byte_count` reference bytes. The output depends only on `byte_count`.
pub fn generate(byte_count: usize) -> Vec<u8> {
    (0..byte_count as u64).map(reference_byte).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_cubic_formula() {
        let data = generate(8);
        assert_eq!(data, vec![0, 2, 10, 30, 68, 130, 222, 99]);
        // Large indices must not overflow.
        assert_eq!(
            reference_byte(u64::from(u32::MAX)),
            ((u128::from(u32::MAX).pow(3) + u128::from(u32::MAX)) % 251) as u8
        );
    }

    #[test]
    fn is_reproducible_and_prefix_stable() {
        let long = generate(4096);
        assert_eq!(long, generate(4096));
        assert_eq!(&long[..100], &generate(100)[..]);
        assert!(long.iter().all(|&b| u64::from(b) < MODULUS));
    }

    #[test]
    fn rows_at_power_of_two_strides_differ() {
        let data = generate(256 * 4);
        assert_ne!(&data[0..16], &data[256..272]);
        assert_ne!(&data[256..272], &data[512..528]);
    }
}
