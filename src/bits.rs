//! Bit-range extraction helpers for descriptor sub-fields.

/// Extracts `width` bits starting at `offset` (from the least significant
/// bit) of `value`.
///
/// # Panics
///
/// Panics if the requested range does not fit in the value.
pub fn extract_u8(value: u8, offset: u32, width: u32) -> u8 {
    assert!(offset + width <= 8, "bit range {offset}+{width} exceeds u8");
    ((value as u32 >> offset) & ((1 << width) - 1)) as u8
}

/// Extracts `width` bits starting at `offset` (from the least significant
/// bit) of `value`.
///
/// # Panics
///
/// Panics if the requested range does not fit in the value.
pub fn extract_u16(value: u16, offset: u32, width: u32) -> u16 {
    assert!(offset + width <= 16, "bit range {offset}+{width} exceeds u16");
    ((value as u32 >> offset) & ((1 << width) - 1)) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_endpoint_style_fields() {
        // Endpoint address 0x85: number in bits 0..4, direction in bit 7.
        assert_eq!(extract_u8(0x85, 0, 4), 5);
        assert_eq!(extract_u8(0x85, 7, 1), 1);
        assert_eq!(extract_u8(0x03, 7, 1), 0);

        // wMaxPacketSize: size in bits 0..11, opportunities in bits 11..13.
        assert_eq!(extract_u16(0x0840, 0, 11), 64);
        assert_eq!(extract_u16(0x0840, 11, 2), 1);
    }

    #[test]
    fn extract_then_reinsert_reproduces_the_masked_region() {
        for &value in &[0u16, 1, 0x00ff, 0x1234, 0xfedc, 0xffff] {
            for offset in 0..16 {
                for width in 1..=(16 - offset) {
                    let field = extract_u16(value, offset, width);
                    let mask = ((1u32 << width) - 1) as u16;
                    assert_eq!(field & !mask, 0);
                    assert_eq!((field << offset) & (mask << offset), value & (mask << offset));
                }
            }
        }
    }

    #[test]
    fn full_width_extraction_is_identity() {
        assert_eq!(extract_u8(0xa5, 0, 8), 0xa5);
        assert_eq!(extract_u16(0xbeef, 0, 16), 0xbeef);
    }

    #[test]
    #[should_panic(expected = "exceeds u8")]
    fn rejects_out_of_range_requests() {
        extract_u8(0, 4, 5);
    }
}
