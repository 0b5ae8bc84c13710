//! PLC address encoding.

use crate::error::{PcccError, PcccResult};
use crate::types::{PlcAddress, ASCII_ADDR_LEN};
use bytes::{Buf, BufMut, BytesMut};

/// Encode one address level. Values above 254 expand into a three byte
/// sequence prefixed with 0xFF.
pub fn encode_level(dst: &mut BytesMut, value: u16) {
    if value > 254 {
        dst.put_u8(0xff);
        dst.put_u16_le(value);
    } else {
        dst.put_u8(value as u8);
    }
}

/// Decode a one or three byte address level. Returns None if the buffer
/// ends before the value is complete.
pub fn decode_level(src: &mut &[u8]) -> Option<u16> {
    if !src.has_remaining() {
        return None;
    }
    let first = src.get_u8();
    if first == 0xff {
        if src.remaining() < 2 {
            return None;
        }
        Some(src.get_u16_le())
    } else {
        Some(first as u16)
    }
}

/// Encode a PLC address in either of its forms.
pub fn encode_plc_addr(dst: &mut BytesMut, addr: &PlcAddress) -> PcccResult<()> {
    match addr {
        PlcAddress::Logical(levels) => encode_logical(dst, levels),
        PlcAddress::Ascii(text) => encode_ascii(dst, text),
    }
}

fn encode_logical(dst: &mut BytesMut, levels: &[u16]) -> PcccResult<()> {
    if levels.is_empty() {
        return Err(PcccError::InvalidParameter(
            "number of address levels must be non-zero".into(),
        ));
    }
    if levels.len() > 7 {
        return Err(PcccError::InvalidParameter(
            "number of address levels cannot be greater than seven".into(),
        ));
    }
    let mut mask: u8 = 0;
    for (i, &level) in levels.iter().enumerate() {
        if level > 999 {
            return Err(PcccError::InvalidParameter(
                "logical binary address level values must be less than 1000".into(),
            ));
        }
        mask |= 1 << i;
    }
    dst.put_u8(mask);
    for &level in levels {
        encode_level(dst, level);
    }
    Ok(())
}

fn encode_ascii(dst: &mut BytesMut, text: &str) -> PcccResult<()> {
    if text.is_empty() {
        return Err(PcccError::InvalidParameter(
            "logical ASCII address cannot be empty".into(),
        ));
    }
    if text.len() > ASCII_ADDR_LEN {
        return Err(PcccError::InvalidParameter(
            "logical ASCII address too long".into(),
        ));
    }
    // The address is prefixed NUL '$' and terminated with a NUL.
    dst.put_u8(0);
    dst.put_u8(b'$');
    dst.put_slice(text.as_bytes());
    dst.put_u8(0);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_one_byte_iff_at_most_254() {
        let mut buf = BytesMut::new();
        encode_level(&mut buf, 254);
        assert_eq!(&buf[..], &[254]);
        buf.clear();
        encode_level(&mut buf, 255);
        assert_eq!(&buf[..], &[0xff, 0xff, 0x00]);
        buf.clear();
        encode_level(&mut buf, 999);
        assert_eq!(&buf[..], &[0xff, 0xe7, 0x03]);
    }

    #[test]
    fn level_round_trips_whole_range() {
        for value in [0u16, 1, 127, 254, 255, 256, 999, 0x1234, u16::MAX] {
            let mut buf = BytesMut::new();
            encode_level(&mut buf, value);
            let mut cursor = &buf[..];
            assert_eq!(decode_level(&mut cursor), Some(value));
            assert!(cursor.is_empty());
        }
    }

    #[test]
    fn decode_level_rejects_truncation() {
        let mut cursor: &[u8] = &[0xff, 0x01];
        assert_eq!(decode_level(&mut cursor), None);
        let mut empty: &[u8] = &[];
        assert_eq!(decode_level(&mut empty), None);
    }

    #[test]
    fn logical_address_mask_and_levels() {
        let mut buf = BytesMut::new();
        encode_plc_addr(&mut buf, &PlcAddress::Logical(vec![0, 7, 300])).unwrap();
        // Mask has bits 0..=2 set, level 300 takes the long form.
        assert_eq!(&buf[..], &[0x07, 0x00, 0x07, 0xff, 0x2c, 0x01]);
    }

    #[test]
    fn logical_address_validation() {
        let mut buf = BytesMut::new();
        assert!(encode_plc_addr(&mut buf, &PlcAddress::Logical(vec![])).is_err());
        assert!(encode_plc_addr(&mut buf, &PlcAddress::Logical(vec![0; 8])).is_err());
        assert!(encode_plc_addr(&mut buf, &PlcAddress::Logical(vec![1000])).is_err());
    }

    #[test]
    fn ascii_address_wire_form() {
        let mut buf = BytesMut::new();
        encode_plc_addr(&mut buf, &PlcAddress::Ascii("N7:0".into())).unwrap();
        assert_eq!(&buf[..], b"\0$N7:0\0");
    }

    #[test]
    fn ascii_address_length_limits() {
        let mut buf = BytesMut::new();
        assert!(encode_plc_addr(&mut buf, &PlcAddress::Ascii(String::new())).is_err());
        assert!(encode_plc_addr(&mut buf, &PlcAddress::Ascii("X".repeat(15))).is_err());
        assert!(encode_plc_addr(&mut buf, &PlcAddress::Ascii("X".repeat(14))).is_ok());
    }
}
