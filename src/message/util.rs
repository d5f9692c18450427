use nom::bytes::complete::take;
use nom::IResult;

/// Parse a big-endian 24-bit unsigned integer.
pub fn be_u24(input: &[u8]) -> IResult<&[u8], u32> {
    let (input, bytes) = take(3usize)(input)?;
    let value = (bytes[0] as u32) << 16 | (bytes[1] as u32) << 8 | bytes[2] as u32;
    Ok((input, value))
}

/// Parse a big-endian 48-bit unsigned integer.
pub fn be_u48(input: &[u8]) -> IResult<&[u8], u64> {
    let (input, bytes) = take(6usize)(input)?;
    let mut value = 0u64;
    for b in bytes {
        value = value << 8 | *b as u64;
    }
    Ok((input, value))
}

/// Serialize a 24-bit unsigned integer big-endian.
pub fn put_u24(out: &mut Vec<u8>, value: u32) {
    debug_assert!(value <= 0xFF_FFFF);
    out.extend_from_slice(&value.to_be_bytes()[1..]);
}

/// Serialize a 48-bit unsigned integer big-endian.
pub fn put_u48(out: &mut Vec<u8>, value: u64) {
    debug_assert!(value <= 0xFFFF_FFFF_FFFF);
    out.extend_from_slice(&value.to_be_bytes()[2..]);
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn u24_roundtrip() {
        let mut out = Vec::new();
        put_u24(&mut out, 0x01_0203);
        assert_eq!(out, [0x01, 0x02, 0x03]);
        let (rest, v) = be_u24(&out).unwrap();
        assert!(rest.is_empty());
        assert_eq!(v, 0x01_0203);
    }

    #[test]
    fn u48_roundtrip() {
        let mut out = Vec::new();
        put_u48(&mut out, 0x0102_0304_0506);
        assert_eq!(out, [0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);
        let (rest, v) = be_u48(&out).unwrap();
        assert!(rest.is_empty());
        assert_eq!(v, 0x0102_0304_0506);
    }
}
