//! Zero-suppression packet compression.
//!
//! Payloads are processed in groups of eight consecutive bytes. Each group
//! emits one mask byte (bit `i` set iff byte `i` of the group is non-zero)
//! followed by the non-zero bytes of the group in order. Input words that sit
//! at zero most frames therefore cost one bit per byte instead of eight.

use crate::ProtocolError;

/// Largest payload the codec accepts, compressed or not.
pub const MAX_PACKET_SIZE: usize = 1024;

/// Compresses `input` with the 8-byte-group bitmask scheme.
///
/// Empty input compresses to empty output. Fails if the input is longer than
/// [`MAX_PACKET_SIZE`] or the compressed form would exceed it.
pub fn compress(input: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    if input.len() > MAX_PACKET_SIZE {
        return Err(ProtocolError::LengthOutOfRange(input.len()));
    }

    let mut out = Vec::with_capacity(input.len() + input.len() / 8 + 1);
    for group in input.chunks(8) {
        let mask_pos = out.len();
        out.push(0);
        let mut mask = 0u8;
        for (bit, &value) in group.iter().enumerate() {
            if value != 0 {
                mask |= 1 << bit;
                out.push(value);
            }
        }
        out[mask_pos] = mask;
        if out.len() > MAX_PACKET_SIZE {
            return Err(ProtocolError::CompressionOverflow);
        }
    }

    Ok(out)
}

/// Decompresses `input` into exactly `original_length` bytes.
///
/// Positions whose mask bit is clear come back as zero. Trailing all-zero
/// groups may be absent from the compressed form; the tail is zero-filled.
/// Fails on a set bit with no corresponding literal or on
/// `original_length > MAX_PACKET_SIZE`.
pub fn decompress(input: &[u8], original_length: usize) -> Result<Vec<u8>, ProtocolError> {
    if original_length > MAX_PACKET_SIZE {
        return Err(ProtocolError::LengthOutOfRange(original_length));
    }

    let mut out = vec![0u8; original_length];
    let mut read = 0;
    let mut write = 0;
    while read < input.len() && write < original_length {
        let mask = input[read];
        read += 1;
        for bit in 0..8 {
            if write >= original_length {
                break;
            }
            if mask & (1 << bit) != 0 {
                let Some(&literal) = input.get(read) else {
                    return Err(ProtocolError::TruncatedPacket);
                };
                out[write] = literal;
                read += 1;
            }
            write += 1;
        }
    }

    Ok(out)
}

/// Decompresses a datagram whose original length is not known up front.
///
/// Used on the receive path: the output is however many bytes the masks
/// encode, rounded up to the last group boundary, capped at
/// [`MAX_PACKET_SIZE`].
pub fn decompress_unbounded(input: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let mut out = Vec::with_capacity(input.len().saturating_mul(2).min(MAX_PACKET_SIZE));
    let mut read = 0;
    while read < input.len() {
        let mask = input[read];
        read += 1;
        for bit in 0..8 {
            if mask & (1 << bit) != 0 {
                let Some(&literal) = input.get(read) else {
                    return Err(ProtocolError::TruncatedPacket);
                };
                out.push(literal);
                read += 1;
            } else {
                out.push(0);
            }
            if out.len() > MAX_PACKET_SIZE {
                return Err(ProtocolError::CompressionOverflow);
            }
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_roundtrip() {
        let compressed = compress(&[]).unwrap();
        assert!(compressed.is_empty());
        assert!(decompress(&compressed, 0).unwrap().is_empty());
    }

    #[test]
    fn mixed_groups_roundtrip() {
        let input = vec![1, 0, 3, 0, 0, 6, 7, 0, 9, 0, 0, 0, 0, 0, 0, 0, 42];
        let compressed = compress(&input).unwrap();
        assert_eq!(decompress(&compressed, input.len()).unwrap(), input);
    }

    #[test]
    fn known_encoding() {
        // Two groups: bytes 2 and 6 set in the first, byte 0 in the second.
        let input = vec![0, 0, 1, 0, 0, 0, 2, 0, 3, 0, 0, 0, 0, 0, 0, 0];
        let compressed = compress(&input).unwrap();
        assert_eq!(compressed, vec![0b0100_0100, 0x01, 0x02, 0b0000_0001, 0x03]);
        assert_eq!(decompress(&compressed, 16).unwrap(), input);
    }

    #[test]
    fn all_zeros_is_one_mask_per_group() {
        let input = vec![0u8; 24];
        let compressed = compress(&input).unwrap();
        assert_eq!(compressed, vec![0, 0, 0]);
        assert_eq!(decompress(&compressed, 24).unwrap(), input);
    }

    #[test]
    fn all_nonzero_group() {
        let input = vec![1, 2, 3, 4, 5, 6, 7, 8];
        let compressed = compress(&input).unwrap();
        assert_eq!(compressed.len(), 9);
        assert_eq!(compressed[0], 0xFF);
        assert_eq!(decompress(&compressed, 8).unwrap(), input);
    }

    #[test]
    fn compress_rejects_oversized_output() {
        // 1024 non-zero bytes need 1024 literals + 128 masks.
        let input = vec![0xAB; MAX_PACKET_SIZE];
        assert!(matches!(
            compress(&input),
            Err(ProtocolError::CompressionOverflow)
        ));
    }

    #[test]
    fn compress_rejects_oversized_input() {
        let input = vec![0u8; MAX_PACKET_SIZE + 1];
        assert!(matches!(
            compress(&input),
            Err(ProtocolError::LengthOutOfRange(_))
        ));
    }

    #[test]
    fn decompress_rejects_oversized_length() {
        assert!(matches!(
            decompress(&[0], MAX_PACKET_SIZE + 1),
            Err(ProtocolError::LengthOutOfRange(_))
        ));
    }

    #[test]
    fn decompress_rejects_missing_literals() {
        // Mask promises eight literals, none follow.
        assert!(matches!(
            decompress(&[0xFF], 8),
            Err(ProtocolError::TruncatedPacket)
        ));
        assert!(matches!(
            decompress_unbounded(&[0xFF, 1, 2]),
            Err(ProtocolError::TruncatedPacket)
        ));
    }

    #[test]
    fn short_final_group_pads_to_group_boundary() {
        let input = vec![9, 0, 0, 0, 0, 0, 0, 0, 7];
        let compressed = compress(&input).unwrap();
        let expanded = decompress_unbounded(&compressed).unwrap();
        assert_eq!(expanded.len(), 16);
        assert_eq!(&expanded[..9], &input[..]);
        assert!(expanded[9..].iter().all(|&b| b == 0));
    }

    #[test]
    fn compressed_output_stays_bounded() {
        let mut input = vec![0u8; MAX_PACKET_SIZE];
        for (i, b) in input.iter_mut().enumerate() {
            if i % 2 == 0 {
                *b = (i % 255) as u8 + 1;
            }
        }
        let compressed = compress(&input).unwrap();
        assert!(compressed.len() <= MAX_PACKET_SIZE);
        assert_eq!(decompress(&compressed, input.len()).unwrap(), input);
    }
}
