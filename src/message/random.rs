use std::time::{SystemTime, UNIX_EPOCH};

use nom::bytes::complete::take;
use nom::IResult;
use rand::rngs::OsRng;
use rand::RngCore;

/// TLS 1.3 downgrade protection sentinels (last 8 bytes of server random).
const DOWNGRADE_TLS12: [u8; 8] = [0x44, 0x4F, 0x57, 0x4E, 0x47, 0x52, 0x44, 0x01];
const DOWNGRADE_TLS11: [u8; 8] = [0x44, 0x4F, 0x57, 0x4E, 0x47, 0x52, 0x44, 0x00];

/// 32 bytes of hello randomness: 4 bytes gmt time + 28 random bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Random(pub [u8; 32]);

impl Random {
    pub fn generate() -> Random {
        let mut bytes = [0u8; 32];
        let gmt = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0);
        bytes[..4].copy_from_slice(&gmt.to_be_bytes());
        OsRng.fill_bytes(&mut bytes[4..]);
        Random(bytes)
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Random> {
        let (input, bytes) = take(32usize)(input)?;
        // take(32) guarantees the length.
        Ok((input, Random(bytes.try_into().unwrap())))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.extend_from_slice(&self.0);
    }

    /// A server signalling it downgraded from a later version it supports.
    pub fn has_downgrade_sentinel(&self) -> bool {
        self.0[24..] == DOWNGRADE_TLS12 || self.0[24..] == DOWNGRADE_TLS11
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn detects_downgrade_sentinel() {
        let mut bytes = [7u8; 32];
        assert!(!Random(bytes).has_downgrade_sentinel());

        bytes[24..].copy_from_slice(&DOWNGRADE_TLS12);
        assert!(Random(bytes).has_downgrade_sentinel());

        bytes[24..].copy_from_slice(&DOWNGRADE_TLS11);
        assert!(Random(bytes).has_downgrade_sentinel());
    }

    #[test]
    fn generated_randoms_differ() {
        assert_ne!(Random::generate(), Random::generate());
    }
}
