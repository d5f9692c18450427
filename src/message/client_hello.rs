use nom::bytes::complete::take;
use nom::number::complete::be_u8;
use nom::IResult;

use super::extension::{parse_extensions, serialize_extensions, Extension};
use super::record::{CipherSuite, ProtocolVersion};
use super::Random;
use crate::message::AlertDescription;
use crate::Error;

/// Offset of the session id length byte inside an encoded ClientHello:
/// version (2) + random (32).
const SESSION_ID_LEN_OFFSET: usize = 34;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHello {
    pub client_version: ProtocolVersion,
    pub random: Random,
    pub session_id: Vec<u8>,
    pub cookie: Vec<u8>,
    pub cipher_suites: Vec<CipherSuite>,
    pub compression_methods: Vec<u8>,
    pub extensions: Vec<Extension>,
}

impl ClientHello {
    pub fn parse(input: &[u8]) -> IResult<&[u8], ClientHello> {
        let (input, client_version) = ProtocolVersion::parse(input)?;
        let (input, random) = Random::parse(input)?;

        let (input, session_id_len) = be_u8(input)?;
        let (input, session_id) = take(session_id_len as usize)(input)?;

        let (input, cookie_len) = be_u8(input)?;
        let (input, cookie) = take(cookie_len as usize)(input)?;

        let (input, suites_len) = nom::number::complete::be_u16(input)?;
        let (input, mut suites_block) = take(suites_len as usize)(input)?;
        let mut cipher_suites = Vec::new();
        while !suites_block.is_empty() {
            let (rest, suite) = CipherSuite::parse(suites_block)?;
            cipher_suites.push(suite);
            suites_block = rest;
        }

        let (input, comp_len) = be_u8(input)?;
        let (input, compression_methods) = take(comp_len as usize)(input)?;

        let (input, extensions) = parse_extensions(input)?;

        Ok((
            input,
            ClientHello {
                client_version,
                random,
                session_id: session_id.to_vec(),
                cookie: cookie.to_vec(),
                cipher_suites,
                compression_methods: compression_methods.to_vec(),
                extensions,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        self.client_version.serialize(output);
        self.random.serialize(output);

        output.push(self.session_id.len() as u8);
        output.extend_from_slice(&self.session_id);

        output.push(self.cookie.len() as u8);
        output.extend_from_slice(&self.cookie);

        output.extend_from_slice(&((self.cipher_suites.len() * 2) as u16).to_be_bytes());
        for suite in &self.cipher_suites {
            suite.serialize(output);
        }

        output.push(self.compression_methods.len() as u8);
        output.extend_from_slice(&self.compression_methods);

        serialize_extensions(&self.extensions, output);
    }
}

/// Replace the cookie in an already-encoded ClientHello body.
///
/// The cookie field sits right after the session id, at offset
/// 34 + 1 + session_id_len, with its own one byte length prefix. Everything
/// after the old cookie is carried over unchanged.
pub fn patch_cookie(body: &[u8], cookie: &[u8]) -> Result<Vec<u8>, Error> {
    if cookie.len() > 255 {
        return Err(Error::fatal(AlertDescription::IllegalParameter));
    }
    if body.len() < SESSION_ID_LEN_OFFSET + 1 {
        return Err(Error::fatal(AlertDescription::DecodeError));
    }

    let session_id_len = body[SESSION_ID_LEN_OFFSET] as usize;
    let cookie_len_pos = SESSION_ID_LEN_OFFSET + 1 + session_id_len;
    if body.len() < cookie_len_pos + 1 {
        return Err(Error::fatal(AlertDescription::DecodeError));
    }

    let old_cookie_len = body[cookie_len_pos] as usize;
    let tail_pos = cookie_len_pos + 1 + old_cookie_len;
    if body.len() < tail_pos {
        return Err(Error::fatal(AlertDescription::DecodeError));
    }

    let mut patched = Vec::with_capacity(body.len() - old_cookie_len + cookie.len());
    patched.extend_from_slice(&body[..cookie_len_pos]);
    patched.push(cookie.len() as u8);
    patched.extend_from_slice(cookie);
    patched.extend_from_slice(&body[tail_pos..]);

    Ok(patched)
}
