use nom::bytes::complete::take;
use nom::number::complete::be_u16;
use nom::IResult;

/// Extension type ids the engine itself understands. Everything else is
/// carried opaquely between the policy objects on both sides.
pub const EXT_HEARTBEAT: u16 = 15;
pub const EXT_EXTENDED_MASTER_SECRET: u16 = 23;
pub const EXT_SESSION_TICKET: u16 = 35;

/// One hello extension: the engine only cares about presence/absence of a
/// few ids, payloads are opaque.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extension {
    pub id: u16,
    pub data: Vec<u8>,
}

impl Extension {
    pub fn new(id: u16, data: Vec<u8>) -> Self {
        Extension { id, data }
    }
}

/// Parse the extensions block of a hello message (u16 total length followed
/// by (id, u16-length, data) entries). An absent block parses as empty.
pub fn parse_extensions(input: &[u8]) -> IResult<&[u8], Vec<Extension>> {
    if input.is_empty() {
        return Ok((input, Vec::new()));
    }

    let (input, total) = be_u16(input)?;
    let (input, mut block) = take(total as usize)(input)?;

    let mut extensions = Vec::new();
    while !block.is_empty() {
        let (rest, id) = be_u16(block)?;
        let (rest, len) = be_u16(rest)?;
        let (rest, data) = take(len as usize)(rest)?;
        extensions.push(Extension {
            id,
            data: data.to_vec(),
        });
        block = rest;
    }

    Ok((input, extensions))
}

pub fn serialize_extensions(extensions: &[Extension], output: &mut Vec<u8>) {
    if extensions.is_empty() {
        return;
    }

    let total: usize = extensions.iter().map(|e| 4 + e.data.len()).sum();
    output.extend_from_slice(&(total as u16).to_be_bytes());
    for ext in extensions {
        output.extend_from_slice(&ext.id.to_be_bytes());
        output.extend_from_slice(&(ext.data.len() as u16).to_be_bytes());
        output.extend_from_slice(&ext.data);
    }
}

pub fn find_extension<'a>(extensions: &'a [Extension], id: u16) -> Option<&'a Extension> {
    extensions.iter().find(|e| e.id == id)
}
