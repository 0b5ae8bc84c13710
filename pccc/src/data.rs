//! Data table element codecs.
//!
//! Converts between host-side element values and their wire form: 16-bit
//! words and IEEE-754 singles little-endian, structured timer, counter
//! and control elements as three words of packed flags plus operands,
//! and string elements with the controller's swapped character pairs.

use crate::error::{PcccError, PcccResult};
use crate::types::{
    ControlElement, CounterElement, FileData, FileType, StringElement, TimeBase, TimerElement,
    STR_TEXT_LEN,
};
use bytes::{Buf, BufMut, BytesMut};

const BIT_TMR_EN: u16 = 0x8000;
const BIT_TMR_TT: u16 = 0x4000;
const BIT_TMR_DN: u16 = 0x2000;
/// Time base selector inside a timer control word; set means one-second.
const BIT_TMR_TB1: u16 = 0x0200;
const BIT_CNT_CU: u16 = 0x8000;
const BIT_CNT_CD: u16 = 0x4000;
const BIT_CNT_DN: u16 = 0x2000;
const BIT_CNT_OV: u16 = 0x1000;
const BIT_CNT_UN: u16 = 0x0800;
const BIT_CNT_UA: u16 = 0x0400;
const BIT_CTL_EN: u16 = 0x8000;
const BIT_CTL_EU: u16 = 0x4000;
const BIT_CTL_DN: u16 = 0x2000;
const BIT_CTL_EM: u16 = 0x1000;
const BIT_CTL_ER: u16 = 0x0800;
const BIT_CTL_UL: u16 = 0x0400;
const BIT_CTL_IN: u16 = 0x0200;
const BIT_CTL_FD: u16 = 0x0100;

/// Encode every element of `data` into `dst` in wire form.
pub fn encode_array(dst: &mut BytesMut, data: &FileData) -> PcccResult<()> {
    match data {
        FileData::Int(v) => {
            for &x in v {
                dst.put_i16_le(x);
            }
        }
        FileData::Bin(v) | FileData::Stat(v) => {
            for &x in v {
                dst.put_u16_le(x);
            }
        }
        FileData::Float(v) => {
            for &x in v {
                dst.put_f32_le(x);
            }
        }
        FileData::Timer(v) => {
            for t in v {
                enc_timer(dst, t);
            }
        }
        FileData::Counter(v) => {
            for c in v {
                enc_counter(dst, c);
            }
        }
        FileData::Control(v) => {
            for c in v {
                enc_control(dst, c);
            }
        }
        FileData::Str(v) => {
            for s in v {
                enc_str(dst, s)?;
            }
        }
    }
    Ok(())
}

/// Decode `elements` items of `file_type` from a reply data section.
pub fn decode_array(src: &[u8], file_type: FileType, elements: usize) -> PcccResult<FileData> {
    let mut cur = src;
    let short = || PcccError::Reply("reply data truncated while decoding elements".into());
    Ok(match file_type {
        FileType::Int => {
            let mut v = Vec::with_capacity(elements);
            for _ in 0..elements {
                if cur.remaining() < 2 {
                    return Err(short());
                }
                v.push(cur.get_i16_le());
            }
            FileData::Int(v)
        }
        FileType::Bin | FileType::Stat => {
            let mut v = Vec::with_capacity(elements);
            for _ in 0..elements {
                if cur.remaining() < 2 {
                    return Err(short());
                }
                v.push(cur.get_u16_le());
            }
            if file_type == FileType::Bin {
                FileData::Bin(v)
            } else {
                FileData::Stat(v)
            }
        }
        FileType::Float => {
            let mut v = Vec::with_capacity(elements);
            for _ in 0..elements {
                if cur.remaining() < 4 {
                    return Err(short());
                }
                v.push(cur.get_f32_le());
            }
            FileData::Float(v)
        }
        FileType::Timer => {
            let mut v = Vec::with_capacity(elements);
            for _ in 0..elements {
                v.push(dec_timer(&mut cur).ok_or_else(short)?);
            }
            FileData::Timer(v)
        }
        FileType::Count => {
            let mut v = Vec::with_capacity(elements);
            for _ in 0..elements {
                v.push(dec_counter(&mut cur).ok_or_else(short)?);
            }
            FileData::Counter(v)
        }
        FileType::Ctl => {
            let mut v = Vec::with_capacity(elements);
            for _ in 0..elements {
                v.push(dec_control(&mut cur).ok_or_else(short)?);
            }
            FileData::Control(v)
        }
        FileType::Str => {
            let mut v = Vec::with_capacity(elements);
            for _ in 0..elements {
                v.push(dec_str(&mut cur).ok_or_else(short)?);
            }
            FileData::Str(v)
        }
        FileType::Out | FileType::In | FileType::Asc | FileType::Bcd => {
            return Err(PcccError::InvalidParameter(
                "file type not supported".into(),
            ));
        }
    })
}

fn enc_timer(dst: &mut BytesMut, t: &TimerElement) {
    let mut bits: u16 = 0;
    if t.en {
        bits |= BIT_TMR_EN;
    }
    if t.tt {
        bits |= BIT_TMR_TT;
    }
    if t.dn {
        bits |= BIT_TMR_DN;
    }
    if t.base == TimeBase::Seconds {
        bits |= BIT_TMR_TB1;
    }
    dst.put_u16_le(bits);
    dst.put_i16_le(t.pre);
    dst.put_i16_le(t.acc);
}

fn dec_timer(cur: &mut &[u8]) -> Option<TimerElement> {
    if cur.remaining() < 6 {
        return None;
    }
    let bits = cur.get_u16_le();
    Some(TimerElement {
        en: bits & BIT_TMR_EN != 0,
        tt: bits & BIT_TMR_TT != 0,
        dn: bits & BIT_TMR_DN != 0,
        base: if bits & BIT_TMR_TB1 != 0 {
            TimeBase::Seconds
        } else {
            TimeBase::Hundredths
        },
        pre: cur.get_i16_le(),
        acc: cur.get_i16_le(),
    })
}

fn enc_counter(dst: &mut BytesMut, c: &CounterElement) {
    let mut bits: u16 = 0;
    if c.cu {
        bits |= BIT_CNT_CU;
    }
    if c.cd {
        bits |= BIT_CNT_CD;
    }
    if c.dn {
        bits |= BIT_CNT_DN;
    }
    if c.ov {
        bits |= BIT_CNT_OV;
    }
    if c.un {
        bits |= BIT_CNT_UN;
    }
    if c.ua {
        bits |= BIT_CNT_UA;
    }
    dst.put_u16_le(bits);
    dst.put_i16_le(c.pre);
    dst.put_i16_le(c.acc);
}

fn dec_counter(cur: &mut &[u8]) -> Option<CounterElement> {
    if cur.remaining() < 6 {
        return None;
    }
    let bits = cur.get_u16_le();
    Some(CounterElement {
        cu: bits & BIT_CNT_CU != 0,
        cd: bits & BIT_CNT_CD != 0,
        dn: bits & BIT_CNT_DN != 0,
        ov: bits & BIT_CNT_OV != 0,
        un: bits & BIT_CNT_UN != 0,
        ua: bits & BIT_CNT_UA != 0,
        pre: cur.get_i16_le(),
        acc: cur.get_i16_le(),
    })
}

fn enc_control(dst: &mut BytesMut, c: &ControlElement) {
    let mut bits: u16 = 0;
    if c.en {
        bits |= BIT_CTL_EN;
    }
    if c.eu {
        bits |= BIT_CTL_EU;
    }
    if c.dn {
        bits |= BIT_CTL_DN;
    }
    if c.em {
        bits |= BIT_CTL_EM;
    }
    if c.er {
        bits |= BIT_CTL_ER;
    }
    if c.ul {
        bits |= BIT_CTL_UL;
    }
    if c.inh {
        bits |= BIT_CTL_IN;
    }
    if c.fd {
        bits |= BIT_CTL_FD;
    }
    dst.put_u16_le(bits);
    dst.put_i16_le(c.len);
    dst.put_i16_le(c.pos);
}

fn dec_control(cur: &mut &[u8]) -> Option<ControlElement> {
    if cur.remaining() < 6 {
        return None;
    }
    let bits = cur.get_u16_le();
    Some(ControlElement {
        en: bits & BIT_CTL_EN != 0,
        eu: bits & BIT_CTL_EU != 0,
        dn: bits & BIT_CTL_DN != 0,
        em: bits & BIT_CTL_EM != 0,
        er: bits & BIT_CTL_ER != 0,
        ul: bits & BIT_CTL_UL != 0,
        inh: bits & BIT_CTL_IN != 0,
        fd: bits & BIT_CTL_FD != 0,
        len: cur.get_i16_le(),
        pos: cur.get_i16_le(),
    })
}

/// String elements swap the byte order of every character pair on the
/// wire: wire position 2k holds text\[2k+1\] and wire position 2k+1 holds
/// text\[2k\]. An odd length leaves a zero byte paired with the last
/// character. The text field is padded with zeros to its full width.
fn enc_str(dst: &mut BytesMut, s: &StringElement) -> PcccResult<()> {
    let len = s.len as usize;
    if len > STR_TEXT_LEN {
        return Err(PcccError::InvalidParameter(format!(
            "string element with invalid length, {}. {} maximum allowed value",
            len, STR_TEXT_LEN
        )));
    }
    dst.put_u16_le(s.len);
    let mut wire = [0u8; STR_TEXT_LEN];
    for k in 0..len / 2 {
        wire[2 * k] = s.text[2 * k + 1];
        wire[2 * k + 1] = s.text[2 * k];
    }
    if len % 2 == 1 {
        wire[len] = s.text[len - 1];
    }
    dst.put_slice(&wire);
    Ok(())
}

fn dec_str(cur: &mut &[u8]) -> Option<StringElement> {
    if cur.remaining() < 2 + STR_TEXT_LEN {
        return None;
    }
    let mut len = cur.get_u16_le();
    if len as usize > STR_TEXT_LEN {
        len = STR_TEXT_LEN as u16;
    }
    let mut text = [0u8; STR_TEXT_LEN];
    for k in 0..STR_TEXT_LEN / 2 {
        let a = cur.get_u8();
        let b = cur.get_u8();
        text[2 * k] = b;
        text[2 * k + 1] = a;
    }
    // Everything past the declared length is padding.
    for byte in text.iter_mut().skip(len as usize) {
        *byte = 0;
    }
    Some(StringElement { len, text })
}

/// Encode a type/data parameter. The flag byte holds the type in its
/// upper nibble and the size in its lower nibble; values of eight or
/// more set the nibble's extended bit and follow the flag as a
/// little-endian byte sequence whose length sits in the remaining three
/// bits. Both values must fit in seven bytes.
pub fn encode_type_size(dst: &mut BytesMut, ty: u64, size: u64) -> PcccResult<()> {
    if ty >> 56 != 0 {
        return Err(PcccError::InvalidParameter(
            "type/data parameter 'type' value doesn't fit within seven byte limit".into(),
        ));
    }
    if size >> 56 != 0 {
        return Err(PcccError::InvalidParameter(
            "type/data parameter 'size' value doesn't fit within seven byte limit".into(),
        ));
    }
    let flag_pos = dst.len();
    dst.put_u8(0);
    let mut flag: u8 = 0;
    if ty < 8 {
        flag |= (ty as u8) << 4;
    } else {
        flag |= 0x80 | (put_extended(dst, ty) << 4);
    }
    if size < 8 {
        flag |= size as u8;
    } else {
        flag |= 0x08 | put_extended(dst, size);
    }
    dst[flag_pos] = flag;
    Ok(())
}

/// Decode a type/data parameter, the dual of [`encode_type_size`].
pub fn decode_type_size(cur: &mut &[u8]) -> PcccResult<(u64, u64)> {
    let short =
        || PcccError::Reply("unexpected end of buffer while decoding type/data parameter".into());
    if !cur.has_remaining() {
        return Err(short());
    }
    let flag = cur.get_u8();
    let ty = if flag & 0x80 != 0 {
        get_extended(cur, ((flag & 0x70) >> 4) as usize).ok_or_else(short)?
    } else {
        ((flag & 0x70) >> 4) as u64
    };
    let size = if flag & 0x08 != 0 {
        get_extended(cur, (flag & 0x07) as usize).ok_or_else(short)?
    } else {
        (flag & 0x07) as u64
    };
    Ok((ty, size))
}

/// Emit a value little-endian using as few bytes as possible, returning
/// the byte count (1..=7 given the caller's range check).
fn put_extended(dst: &mut BytesMut, mut x: u64) -> u8 {
    let mut bytes = 0u8;
    while x != 0 {
        dst.put_u8((x & 0xff) as u8);
        x >>= 8;
        bytes += 1;
    }
    bytes
}

fn get_extended(cur: &mut &[u8], bytes: usize) -> Option<u64> {
    if cur.remaining() < bytes {
        return None;
    }
    let mut x = 0u64;
    for i in 0..bytes {
        x |= (cur.get_u8() as u64) << (i * 8);
    }
    Some(x)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_array_wire_form() {
        let mut buf = BytesMut::new();
        encode_array(&mut buf, &FileData::Int(vec![2, 1, -1, -32768])).unwrap();
        assert_eq!(
            &buf[..],
            &[0x02, 0x00, 0x01, 0x00, 0xff, 0xff, 0x00, 0x80]
        );
        let decoded = decode_array(&buf, FileType::Int, 4).unwrap();
        assert_eq!(decoded, FileData::Int(vec![2, 1, -1, -32768]));
    }

    #[test]
    fn float_round_trip() {
        let values = vec![0.0f32, -1.5, 1234.5678, f32::MIN_POSITIVE];
        let mut buf = BytesMut::new();
        encode_array(&mut buf, &FileData::Float(values.clone())).unwrap();
        assert_eq!(buf.len(), 16);
        assert_eq!(
            decode_array(&buf, FileType::Float, 4).unwrap(),
            FileData::Float(values)
        );
    }

    #[test]
    fn timer_flags_pack_at_fixed_positions() {
        let t = TimerElement {
            pre: 500,
            acc: 123,
            base: TimeBase::Seconds,
            en: true,
            tt: false,
            dn: true,
        };
        let mut buf = BytesMut::new();
        encode_array(&mut buf, &FileData::Timer(vec![t])).unwrap();
        let bits = u16::from_le_bytes([buf[0], buf[1]]);
        assert_eq!(bits, 0x8000 | 0x2000 | 0x0200);
        assert_eq!(
            decode_array(&buf, FileType::Timer, 1).unwrap(),
            FileData::Timer(vec![t])
        );
    }

    #[test]
    fn counter_round_trip() {
        let c = CounterElement {
            pre: -5,
            acc: 17,
            cu: true,
            cd: false,
            dn: false,
            ov: true,
            un: false,
            ua: true,
        };
        let mut buf = BytesMut::new();
        encode_array(&mut buf, &FileData::Counter(vec![c])).unwrap();
        let bits = u16::from_le_bytes([buf[0], buf[1]]);
        assert_eq!(bits, 0x8000 | 0x1000 | 0x0400);
        assert_eq!(
            decode_array(&buf, FileType::Count, 1).unwrap(),
            FileData::Counter(vec![c])
        );
    }

    #[test]
    fn control_words_are_flags_length_position() {
        let c = ControlElement {
            pos: 3,
            len: 10,
            en: true,
            fd: true,
            ..Default::default()
        };
        let mut buf = BytesMut::new();
        encode_array(&mut buf, &FileData::Control(vec![c])).unwrap();
        assert_eq!(u16::from_le_bytes([buf[0], buf[1]]), 0x8000 | 0x0100);
        assert_eq!(u16::from_le_bytes([buf[2], buf[3]]), 10);
        assert_eq!(u16::from_le_bytes([buf[4], buf[5]]), 3);
        assert_eq!(
            decode_array(&buf, FileType::Ctl, 1).unwrap(),
            FileData::Control(vec![c])
        );
    }

    #[test]
    fn string_pairs_are_swapped() {
        let s = StringElement::from_text("AB").unwrap();
        let mut buf = BytesMut::new();
        encode_array(&mut buf, &FileData::Str(vec![s])).unwrap();
        assert_eq!(buf.len(), 84);
        assert_eq!(&buf[..2], &[2, 0]);
        assert_eq!(&buf[2..4], b"BA");
        assert!(buf[4..].iter().all(|&b| b == 0));
    }

    #[test]
    fn odd_length_string_pads_with_zero_before_last_char() {
        let s = StringElement::from_text("ABC").unwrap();
        let mut buf = BytesMut::new();
        encode_array(&mut buf, &FileData::Str(vec![s])).unwrap();
        assert_eq!(&buf[2..6], &[b'B', b'A', 0, b'C']);
    }

    #[test]
    fn string_round_trips_and_clears_padding() {
        for text in ["", "x", "hello world", "odd"] {
            let s = StringElement::from_text(text).unwrap();
            let mut buf = BytesMut::new();
            encode_array(&mut buf, &FileData::Str(vec![s])).unwrap();
            let decoded = decode_array(&buf, FileType::Str, 1).unwrap();
            match decoded {
                FileData::Str(v) => {
                    assert_eq!(v[0].len as usize, text.len());
                    assert_eq!(v[0].as_bytes(), text.as_bytes());
                    assert!(v[0].text[text.len()..].iter().all(|&b| b == 0));
                }
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[test]
    fn oversized_string_rejected() {
        let s = StringElement {
            len: 83,
            text: [0; STR_TEXT_LEN],
        };
        let mut buf = BytesMut::new();
        assert!(matches!(
            encode_array(&mut buf, &FileData::Str(vec![s])),
            Err(PcccError::InvalidParameter(_))
        ));
    }

    #[test]
    fn truncated_reply_surfaces_reply_error() {
        let err = decode_array(&[0x01, 0x00, 0x02], FileType::Int, 2);
        assert!(matches!(err, Err(PcccError::Reply(_))));
    }

    #[test]
    fn type_size_small_values_fit_in_flag() {
        let mut buf = BytesMut::new();
        encode_type_size(&mut buf, 4, 6).unwrap();
        assert_eq!(&buf[..], &[0x46]);
        let mut cur = &buf[..];
        assert_eq!(decode_type_size(&mut cur).unwrap(), (4, 6));
    }

    #[test]
    fn type_size_extended_values_round_trip() {
        for (ty, size) in [(8u64, 9u64), (0x1234, 7), (3, 0x0102030405), (0xff, 0xffff)] {
            let mut buf = BytesMut::new();
            encode_type_size(&mut buf, ty, size).unwrap();
            let mut cur = &buf[..];
            assert_eq!(decode_type_size(&mut cur).unwrap(), (ty, size));
            assert!(cur.is_empty());
        }
    }

    #[test]
    fn type_size_seven_byte_limit() {
        let mut buf = BytesMut::new();
        assert!(encode_type_size(&mut buf, 1 << 56, 0).is_err());
        assert!(encode_type_size(&mut buf, 0, 1 << 56).is_err());
        assert!(encode_type_size(&mut buf, (1 << 56) - 1, (1 << 56) - 1).is_ok());
    }
}
