//! Reduced-precision conversions for the gradient-sync payload

/// Convert f32 to bf16 (truncated)
///
/// BF16 uses the same exponent as f32 but only 7 mantissa bits.
pub fn f32_to_bf16(value: f32) -> u16 {
    let bits = value.to_bits();
    (bits >> 16) as u16
}

/// Convert bf16 to f32
pub fn bf16_to_f32(value: u16) -> f32 {
    let bits = u32::from(value) << 16;
    f32::from_bits(bits)
}

/// Round a buffer through bf16, in place
///
/// Emulates a reduced-precision communication hook: the synchronization
/// payload carries 16-bit values, so every worker sees bf16-rounded
/// gradients after the collective.
pub fn round_trip_bf16(buf: &mut [f32]) {
    for v in buf.iter_mut() {
        *v = bf16_to_f32(f32_to_bf16(*v));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bf16_preserves_powers_of_two() {
        for v in [0.0_f32, 1.0, -2.0, 0.5, 1024.0] {
            assert_eq!(bf16_to_f32(f32_to_bf16(v)), v);
        }
    }

    #[test]
    fn test_bf16_truncates_mantissa() {
        let v = 1.0 + f32::EPSILON;
        assert_eq!(bf16_to_f32(f32_to_bf16(v)), 1.0);
    }

    #[test]
    fn test_round_trip_relative_error_small() {
        let mut buf: Vec<f32> = (1..100).map(|i| i as f32 * 0.137).collect();
        let orig = buf.clone();
        round_trip_bf16(&mut buf);
        for (a, b) in orig.iter().zip(buf.iter()) {
            assert!((a - b).abs() / a.abs() < 0.01);
        }
    }
}
