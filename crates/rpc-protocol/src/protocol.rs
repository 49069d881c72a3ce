//! RPC Wire Framing
//!
//! Every packet is `magic (u16 LE) | body | crc16 (u16 LE)` where the CRC
//! covers the magic and the body.

use crate::error::RpcError;

/// Command header packet (method hash + payload length)
pub const COMMAND_HEADER_MAGIC: u16 = 0x1209;
/// Command data packet (call arguments)
pub const COMMAND_DATA_MAGIC: u16 = 0xABD1;
/// Result header packet (result length)
pub const RESULT_HEADER_MAGIC: u16 = 0x9021;
/// Result data packet (result bytes)
pub const RESULT_DATA_MAGIC: u16 = 0x1DBA;

/// Magic plus CRC
pub const PACKET_OVERHEAD: usize = 4;
/// Encoded command header length
pub const COMMAND_HEADER_LEN: usize = PACKET_OVERHEAD + 8;
/// Encoded result header length
pub const RESULT_HEADER_LEN: usize = PACKET_OVERHEAD + 4;

/// Largest payload or result carried in a single data packet
pub const MAX_PACKET_PAYLOAD: usize = 8 * 1024;

/// Stray bytes tolerated before a result header is found
pub const MAX_RESYNC_BYTES: usize = 4 * 1024;

/// Hash a method name (djb2, xor variant)
pub fn method_hash(name: &str) -> u32 {
    name.bytes()
        .fold(5381u32, |h, b| h.wrapping_mul(33) ^ u32::from(b))
}

/// CRC-16/CCITT-FALSE
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= u16::from(byte) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// Wrap a body into a packet
pub fn encode_packet(magic: u16, body: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(body.len() + PACKET_OVERHEAD);
    packet.extend_from_slice(&magic.to_le_bytes());
    packet.extend_from_slice(body);
    let crc = crc16(&packet);
    packet.extend_from_slice(&crc.to_le_bytes());
    packet
}

/// Validate a packet and return its body
pub fn decode_packet(magic: u16, packet: &[u8]) -> Result<&[u8], RpcError> {
    if packet.len() < PACKET_OVERHEAD {
        return Err(RpcError::Protocol(format!(
            "packet too short: {} bytes",
            packet.len()
        )));
    }

    let found = u16::from_le_bytes([packet[0], packet[1]]);
    if found != magic {
        return Err(RpcError::Protocol(format!(
            "bad magic: expected {:04X}, got {:04X}",
            magic, found
        )));
    }

    let split = packet.len() - 2;
    let expected = u16::from_le_bytes([packet[split], packet[split + 1]]);
    let actual = crc16(&packet[..split]);
    if expected != actual {
        return Err(RpcError::Protocol(format!(
            "crc mismatch: expected {:04X}, got {:04X}",
            expected, actual
        )));
    }

    Ok(&packet[2..split])
}

/// Encode the header announcing a call
pub fn encode_command_header(method: &str, payload_len: usize) -> Result<Vec<u8>, RpcError> {
    let len = checked_len(payload_len)?;
    let mut body = [0u8; 8];
    body[..4].copy_from_slice(&method_hash(method).to_le_bytes());
    body[4..].copy_from_slice(&len.to_le_bytes());
    Ok(encode_packet(COMMAND_HEADER_MAGIC, &body))
}

/// Decode a command header into `(method_hash, payload_len)`
pub fn decode_command_header(packet: &[u8]) -> Result<(u32, usize), RpcError> {
    let body = decode_packet(COMMAND_HEADER_MAGIC, packet)?;
    if body.len() != 8 {
        return Err(RpcError::Protocol(format!(
            "command header body is {} bytes",
            body.len()
        )));
    }
    let hash = read_u32_le(&body[..4]);
    let len = read_u32_le(&body[4..]) as usize;
    if len > MAX_PACKET_PAYLOAD {
        return Err(RpcError::Protocol(format!("payload length {} exceeds frame limit", len)));
    }
    Ok((hash, len))
}

/// Encode the header announcing a result
pub fn encode_result_header(result_len: usize) -> Result<Vec<u8>, RpcError> {
    let len = checked_len(result_len)?;
    Ok(encode_packet(RESULT_HEADER_MAGIC, &len.to_le_bytes()))
}

/// Decode a result header into the announced result length
pub fn decode_result_header(packet: &[u8]) -> Result<usize, RpcError> {
    let body = decode_packet(RESULT_HEADER_MAGIC, packet)?;
    if body.len() != 4 {
        return Err(RpcError::Protocol(format!(
            "result header body is {} bytes",
            body.len()
        )));
    }
    let len = read_u32_le(body) as usize;
    if len > MAX_PACKET_PAYLOAD {
        return Err(RpcError::Protocol(format!("result length {} exceeds frame limit", len)));
    }
    Ok(len)
}

/// Interpret a 4-byte little-endian unsigned length
pub fn decode_length(bytes: &[u8]) -> Result<u32, RpcError> {
    if bytes.len() != 4 {
        return Err(RpcError::Protocol(format!(
            "length field must be 4 bytes, got {}",
            bytes.len()
        )));
    }
    Ok(read_u32_le(bytes))
}

fn checked_len(len: usize) -> Result<u32, RpcError> {
    if len > MAX_PACKET_PAYLOAD {
        return Err(RpcError::Protocol(format!("length {} exceeds frame limit", len)));
    }
    // MAX_PACKET_PAYLOAD fits in u32
    Ok(len as u32)
}

fn read_u32_le(bytes: &[u8]) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_crc16_check_value() {
        assert_eq!(crc16(b"123456789"), 0x29B1);
    }

    #[test]
    fn test_method_hash_distinguishes_calls() {
        assert_eq!(method_hash(""), 5381);
        assert_ne!(
            method_hash("jpeg_image_snapshot"),
            method_hash("jpeg_image_read")
        );
    }

    #[test]
    fn test_command_header_layout() {
        let packet = encode_command_header("jpeg_image_read", 0).unwrap();
        assert_eq!(packet.len(), COMMAND_HEADER_LEN);
        assert_eq!(&packet[..2], &COMMAND_HEADER_MAGIC.to_le_bytes());

        let (hash, len) = decode_command_header(&packet).unwrap();
        assert_eq!(hash, method_hash("jpeg_image_read"));
        assert_eq!(len, 0);
    }

    #[test]
    fn test_corrupted_packet_rejected() {
        let mut packet = encode_result_header(4).unwrap();
        packet[2] ^= 0xFF;
        assert!(matches!(
            decode_result_header(&packet),
            Err(RpcError::Protocol(_))
        ));
    }

    #[test]
    fn test_wrong_magic_rejected() {
        let packet = encode_packet(RESULT_DATA_MAGIC, &[1, 2, 3]);
        assert!(decode_packet(COMMAND_DATA_MAGIC, &packet).is_err());
    }

    #[test]
    fn test_oversized_lengths_rejected() {
        assert!(encode_result_header(MAX_PACKET_PAYLOAD + 1).is_err());

        let body = ((MAX_PACKET_PAYLOAD + 1) as u32).to_le_bytes();
        let packet = encode_packet(RESULT_HEADER_MAGIC, &body);
        assert!(decode_result_header(&packet).is_err());
    }

    proptest! {
        #[test]
        fn prop_any_flipped_byte_is_rejected(
            body in proptest::collection::vec(any::<u8>(), 0..64),
            index in any::<prop::sample::Index>(),
            mask in 1u8..=255,
        ) {
            let mut packet = encode_packet(RESULT_DATA_MAGIC, &body);
            let at = index.index(packet.len());
            packet[at] ^= mask;
            prop_assert!(decode_packet(RESULT_DATA_MAGIC, &packet).is_err());
        }
    }

    #[test]
    fn test_length_is_little_endian() {
        assert_eq!(decode_length(&[0x10, 0x27, 0x00, 0x00]).unwrap(), 10_000);
        assert!(decode_length(&[0x10, 0x27]).is_err());
        assert!(decode_length(&[]).is_err());
    }
}
