//! Bit-field primitives for 64-bit register values
//!
//! Every access to a packed register field goes through [`extract_bits`] and
//! [`replace_bits`]. Ranges are inclusive and numbered from bit 0 (LSB).

/// Mask covering `last - first + 1` low bits.
#[inline]
fn field_mask(first: u8, last: u8) -> u64 {
    u64::MAX >> (63 - (last - first))
}

/// Return bits `first..=last` of `value`, shifted down to bit 0.
///
/// # Panics
///
/// In debug builds, if `first > last` or `last >= 64`.
#[inline]
pub fn extract_bits(value: u64, first: u8, last: u8) -> u64 {
    debug_assert!(first <= last, "invalid bit range {first}..={last}");
    debug_assert!(last < 64, "bit {last} out of range");
    (value >> first) & field_mask(first, last)
}

/// Return `value` with bits `first..=last` replaced by the low bits of `data`.
///
/// Bits of `data` that do not fit the field are discarded; bits of `value`
/// outside the field are preserved.
///
/// # Panics
///
/// In debug builds, if `first > last` or `last >= 64`.
#[inline]
pub fn replace_bits(value: u64, data: u64, first: u8, last: u8) -> u64 {
    debug_assert!(first <= last, "invalid bit range {first}..={last}");
    debug_assert!(last < 64, "bit {last} out of range");
    let mask = field_mask(first, last) << first;
    (value & !mask) | ((data << first) & mask)
}

/// Test a single bit.
#[inline]
pub fn bit_is_set(value: u64, bit: u8) -> bool {
    extract_bits(value, bit, bit) == 1
}

/// Set or clear a single bit.
#[inline]
pub fn set_bit(value: u64, bit: u8, on: bool) -> u64 {
    replace_bits(value, u64::from(on), bit, bit)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLES: [u64; 5] = [
        0,
        u64::MAX,
        0x0A0A_0A0A_0A0A_0A0A,
        0x8000_0000_0001_8000,
        0xDEAD_BEEF_CAFE_F00D,
    ];

    #[test]
    fn test_extract_bits() {
        assert_eq!(extract_bits(0xA0A0F, 0, 3), 0xF);
        assert_eq!(extract_bits(0xA0A0F, 16, 19), 0xA);
        assert_eq!(extract_bits(1 << 63, 63, 63), 1);
        assert_eq!(extract_bits(u64::MAX, 0, 63), u64::MAX);
        assert_eq!(extract_bits(0x7FFF_0000_0000, 32, 46), 0x7FFF);
    }

    #[test]
    fn test_replace_extracted_field_is_noop() {
        for &v in &SAMPLES {
            for (first, last) in [
                (0, 14),
                (15, 15),
                (17, 21),
                (22, 23),
                (32, 46),
                (49, 55),
                (0, 63),
            ] {
                let field = extract_bits(v, first, last);
                assert_eq!(replace_bits(v, field, first, last), v);
            }
        }
    }

    #[test]
    fn test_replace_preserves_other_bits() {
        for &v in &SAMPLES {
            let (first, last) = (17u8, 21u8);
            let out = replace_bits(v, 0x15, first, last);
            let outside = !(0x1Fu64 << first);
            assert_eq!(out & outside, v & outside);
            assert_eq!(extract_bits(out, first, last), 0x15);
        }
    }

    #[test]
    fn test_replace_truncates_oversized_data() {
        // Only the low two bits of 0b111 fit the field.
        let out = replace_bits(0, 0b111, 22, 23);
        assert_eq!(out, 0b11 << 22);
    }

    #[test]
    fn test_single_bit_helpers() {
        let v = set_bit(0, 47, true);
        assert!(bit_is_set(v, 47));
        assert!(!bit_is_set(v, 15));
        assert_eq!(set_bit(v, 47, false), 0);
    }
}
