use std::fmt;

use nom::bytes::complete::take;
use nom::number::complete::{be_u16, be_u8};
use nom::IResult;

use super::util::{be_u48, put_u48};

/// Size of the record header on the wire.
pub const RECORD_HEADER_LEN: usize = 13;

/// Largest plaintext fragment a record may carry.
pub const MAX_FRAGMENT_LEN: usize = 16_384;

/// Extra room allowed for cipher expansion in a ciphertext fragment.
pub const MAX_CIPHER_EXPANSION: usize = 2048;

/// One record parsed from (or to be written to) a datagram.
#[derive(Debug, PartialEq, Eq)]
pub struct Record<'a> {
    pub content_type: ContentType,
    pub version: ProtocolVersion,
    pub epoch: u16,
    pub sequence_number: u64,
    pub fragment: &'a [u8],
}

impl<'a> Record<'a> {
    pub fn parse(input: &'a [u8]) -> IResult<&'a [u8], Record<'a>> {
        let (input, content_type) = ContentType::parse(input)?;
        let (input, version) = ProtocolVersion::parse(input)?;
        let (input, epoch) = be_u16(input)?;
        let (input, sequence_number) = be_u48(input)?;
        let (input, length) = be_u16(input)?;
        let (input, fragment) = take(length as usize)(input)?;

        Ok((
            input,
            Record {
                content_type,
                version,
                epoch,
                sequence_number,
                fragment,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.push(self.content_type.as_u8());
        self.version.serialize(output);
        output.extend_from_slice(&self.epoch.to_be_bytes());
        put_u48(output, self.sequence_number);
        output.extend_from_slice(&(self.fragment.len() as u16).to_be_bytes());
        output.extend_from_slice(self.fragment);
    }

    /// The 64-bit value combining epoch and sequence number used as
    /// cipher nonce input and replay key.
    pub fn seq_with_epoch(&self) -> u64 {
        (self.epoch as u64) << 48 | self.sequence_number
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    ChangeCipherSpec,
    Alert,
    Handshake,
    ApplicationData,
    Heartbeat,
    Unknown(u8),
}

impl ContentType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            20 => ContentType::ChangeCipherSpec,
            21 => ContentType::Alert,
            22 => ContentType::Handshake,
            23 => ContentType::ApplicationData,
            24 => ContentType::Heartbeat,
            _ => ContentType::Unknown(value),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            ContentType::ChangeCipherSpec => 20,
            ContentType::Alert => 21,
            ContentType::Handshake => 22,
            ContentType::ApplicationData => 23,
            ContentType::Heartbeat => 24,
            ContentType::Unknown(v) => *v,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], ContentType> {
        let (input, v) = be_u8(input)?;
        Ok((input, ContentType::from_u8(v)))
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// DTLS protocol version. The on-wire encoding is the one's complement
/// style used by DTLS, so a *newer* version has *smaller* bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
}

impl ProtocolVersion {
    pub const DTLS1_0: ProtocolVersion = ProtocolVersion {
        major: 254,
        minor: 255,
    };
    pub const DTLS1_2: ProtocolVersion = ProtocolVersion {
        major: 254,
        minor: 253,
    };

    pub fn parse(input: &[u8]) -> IResult<&[u8], ProtocolVersion> {
        let (input, major) = be_u8(input)?;
        let (input, minor) = be_u8(input)?;
        Ok((input, ProtocolVersion { major, minor }))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.push(self.major);
        output.push(self.minor);
    }

    pub fn is_dtls(&self) -> bool {
        self.major == 254
    }

    /// True if `self` is a newer protocol version than `other`.
    pub fn is_later_than(&self, other: ProtocolVersion) -> bool {
        // DTLS encodes newer versions with smaller minor values.
        self.major == other.major && self.minor < other.minor
    }

    /// Largest cookie a HelloVerifyRequest may carry at this version.
    pub fn max_cookie_len(&self) -> usize {
        if self.is_later_than(ProtocolVersion::DTLS1_0) {
            255
        } else {
            32
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ProtocolVersion::DTLS1_0 => write!(f, "DTLS 1.0"),
            ProtocolVersion::DTLS1_2 => write!(f, "DTLS 1.2"),
            _ => write!(f, "version {}.{}", self.major, self.minor),
        }
    }
}

/// Cipher suite identity. The engine treats suites as opaque identifiers;
/// the crypto provider decides which ones it can instantiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CipherSuite(pub u16);

impl CipherSuite {
    /// TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256
    pub const ECDHE_RSA_AES128_GCM_SHA256: CipherSuite = CipherSuite(0xC02F);
    /// TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256
    pub const ECDHE_ECDSA_AES128_GCM_SHA256: CipherSuite = CipherSuite(0xC02B);
    /// TLS_PSK_WITH_AES_128_GCM_SHA256
    pub const PSK_AES128_GCM_SHA256: CipherSuite = CipherSuite(0x00A8);

    pub fn parse(input: &[u8]) -> IResult<&[u8], CipherSuite> {
        let (input, v) = be_u16(input)?;
        Ok((input, CipherSuite(v)))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.extend_from_slice(&self.0.to_be_bytes());
    }
}

impl fmt::Display for CipherSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}
