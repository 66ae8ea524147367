//! CRC-32 checksum used to verify heap transfers
//!
//! MSB-first CRC over the 0x04C11DB7 polynomial with a zero initial value and
//! no final inversion. Parent and child compute it over their own view of the
//! heap; the two values must agree.

use lazy_static::lazy_static;

/// Generator polynomial
pub const CRC_POLYNOMIAL: u32 = 0x04C1_1DB7;

lazy_static! {
    /// Division table, built on first use
    static ref CRC_TABLE: [u32; 256] = build_table();
}

fn build_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    for (div, entry) in table.iter_mut().enumerate() {
        let mut cb = (div as u32) << 24;
        for _ in 0..8 {
            cb = if cb & 0x8000_0000 != 0 {
                (cb << 1) ^ CRC_POLYNOMIAL
            } else {
                cb << 1
            };
        }
        *entry = cb;
    }
    table
}

/// Return the CRC-32 of `buf`
pub fn checksum(buf: &[u8]) -> u32 {
    let table = &*CRC_TABLE;
    buf.iter().fold(0u32, |crc, &byte| {
        let pos = ((crc >> 24) ^ byte as u32) as usize;
        (crc << 8) ^ table[pos]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_empty_buffer() {
        assert_eq!(checksum(&[]), 0);
    }

    #[test]
    fn test_check_value() {
        // CRC-32/CKSUM without the final inversion
        assert_eq!(checksum(b"123456789"), 0x765E_7680 ^ 0xFFFF_FFFF);
    }

    #[test]
    fn test_table_edges() {
        assert_eq!(CRC_TABLE[0], 0);
        assert_eq!(CRC_TABLE[1], CRC_POLYNOMIAL);
    }

    proptest! {
        #[test]
        fn prop_checksum_is_pure(data in proptest::collection::vec(any::<u8>(), 0..4096)) {
            prop_assert_eq!(checksum(&data), checksum(&data));
        }

        #[test]
        fn prop_single_byte_change_detected(
            data in proptest::collection::vec(any::<u8>(), 1..4096),
            index in any::<prop::sample::Index>(),
            delta in 1u8..=255,
        ) {
            let mut altered = data.clone();
            let i = index.index(altered.len());
            altered[i] = altered[i].wrapping_add(delta);
            prop_assert_ne!(checksum(&data), checksum(&altered));
        }
    }
}
