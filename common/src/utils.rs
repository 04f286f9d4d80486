//! Common Utilities
//!
//! Bit manipulation and CRC helpers used across the sniffer implementation

use bytes::{BufMut, Bytes, BytesMut};

/// Convert a byte slice to hex string for debugging
pub fn bytes_to_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// CRC-24C polynomial for 5G NR DCI (TS 38.212 Section 5.1), without the x^24 term
pub const CRC24C_POLY: u32 = 0xB2B117;

/// Calculate CRC-24C over a sequence of bits (one bit per byte, MSB first)
pub fn crc24c_bits(bits: &[u8]) -> u32 {
    let mut crc: u32 = 0;

    for &bit in bits {
        let feedback = ((crc >> 23) & 1) ^ (bit as u32 & 1);
        crc = (crc << 1) & 0xFFFFFF;
        if feedback != 0 {
            crc ^= CRC24C_POLY;
        }
    }

    crc
}

/// Pack bits (one bit per byte) into bytes, MSB first
pub fn pack_bits(bits: &[u8]) -> Bytes {
    let mut bytes = BytesMut::with_capacity((bits.len() + 7) / 8);

    for chunk in bits.chunks(8) {
        let mut byte = 0u8;
        for (i, &bit) in chunk.iter().enumerate() {
            if bit != 0 {
                byte |= 1 << (7 - i);
            }
        }
        bytes.put_u8(byte);
    }

    bytes.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_to_hex() {
        let data = vec![0x12, 0x34, 0xAB, 0xCD];
        assert_eq!(bytes_to_hex(&data), "12 34 ab cd");
    }

    #[test]
    fn test_crc24c_determinism() {
        let bits: Vec<u8> = (0..40).map(|i| (i % 3 == 0) as u8).collect();
        let a = crc24c_bits(&bits);
        let b = crc24c_bits(&bits);
        assert_eq!(a, b);
        assert_eq!(a & 0xFFFFFF, a);
    }

    #[test]
    fn test_crc24c_detects_single_bit_error() {
        let mut bits: Vec<u8> = vec![1, 0, 1, 1, 0, 0, 1, 0, 1, 1, 1, 0, 0, 1, 0, 1];
        let crc = crc24c_bits(&bits);
        bits[7] ^= 1;
        assert_ne!(crc, crc24c_bits(&bits));
    }

    #[test]
    fn test_bit_packing() {
        let bits = vec![1u8, 0, 1, 0, 1, 0, 1, 0];
        let packed = pack_bits(&bits);
        assert_eq!(packed[0], 0xAA);
    }

}
