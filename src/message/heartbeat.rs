use nom::bytes::complete::take;
use nom::number::complete::{be_u16, be_u8};
use nom::IResult;
use rand::rngs::OsRng;
use rand::RngCore;

/// Minimum padding required by the heartbeat message format (RFC 6520).
pub const HEARTBEAT_PADDING: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatMessageType {
    Request,
    Response,
    Unknown(u8),
}

impl HeartbeatMessageType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => HeartbeatMessageType::Request,
            2 => HeartbeatMessageType::Response,
            _ => HeartbeatMessageType::Unknown(value),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            HeartbeatMessageType::Request => 1,
            HeartbeatMessageType::Response => 2,
            HeartbeatMessageType::Unknown(v) => *v,
        }
    }
}

/// Heartbeat extension modes (RFC 6520).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatMode {
    PeerAllowedToSend,
    PeerNotAllowedToSend,
}

impl HeartbeatMode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(HeartbeatMode::PeerAllowedToSend),
            2 => Some(HeartbeatMode::PeerNotAllowedToSend),
            _ => None,
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            HeartbeatMode::PeerAllowedToSend => 1,
            HeartbeatMode::PeerNotAllowedToSend => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatMessage {
    pub message_type: HeartbeatMessageType,
    pub payload: Vec<u8>,
}

impl HeartbeatMessage {
    pub fn request(payload: Vec<u8>) -> Self {
        HeartbeatMessage {
            message_type: HeartbeatMessageType::Request,
            payload,
        }
    }

    pub fn response(payload: Vec<u8>) -> Self {
        HeartbeatMessage {
            message_type: HeartbeatMessageType::Response,
            payload,
        }
    }

    /// Parse a heartbeat message. Messages whose declared payload does not
    /// leave room for the mandatory padding are invalid and must be dropped.
    pub fn parse(input: &[u8]) -> IResult<&[u8], HeartbeatMessage> {
        let total = input.len();
        let (input, message_type) = be_u8(input)?;
        let (input, payload_len) = be_u16(input)?;

        if payload_len as usize + 3 + HEARTBEAT_PADDING > total {
            return Err(nom::Err::Error(nom::error::Error::new(
                input,
                nom::error::ErrorKind::LengthValue,
            )));
        }

        let (input, payload) = take(payload_len as usize)(input)?;
        // Remaining bytes are padding, discarded without inspection.
        let (input, _padding) = take(input.len())(input)?;

        Ok((
            input,
            HeartbeatMessage {
                message_type: HeartbeatMessageType::from_u8(message_type),
                payload: payload.to_vec(),
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.push(self.message_type.as_u8());
        output.extend_from_slice(&(self.payload.len() as u16).to_be_bytes());
        output.extend_from_slice(&self.payload);

        let mut padding = [0u8; HEARTBEAT_PADDING];
        OsRng.fill_bytes(&mut padding);
        output.extend_from_slice(&padding);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn heartbeat_roundtrip() {
        let msg = HeartbeatMessage::request(vec![1, 2, 3, 4]);
        let mut out = Vec::new();
        msg.serialize(&mut out);
        assert_eq!(out.len(), 3 + 4 + HEARTBEAT_PADDING);

        let (_, parsed) = HeartbeatMessage::parse(&out).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn rejects_payload_overrunning_padding() {
        // Declares a 100 byte payload in a 10 byte message.
        let bogus = [1u8, 0, 100, 1, 2, 3, 4, 5, 6, 7];
        assert!(HeartbeatMessage::parse(&bogus).is_err());
    }
}
