use nom::bytes::complete::take;
use nom::number::complete::be_u8;
use nom::IResult;

use super::extension::{parse_extensions, serialize_extensions, Extension};
use super::record::{CipherSuite, ProtocolVersion};
use super::Random;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHello {
    pub server_version: ProtocolVersion,
    pub random: Random,
    pub session_id: Vec<u8>,
    pub cipher_suite: CipherSuite,
    pub compression_method: u8,
    pub extensions: Vec<Extension>,
}

impl ServerHello {
    pub fn parse(input: &[u8]) -> IResult<&[u8], ServerHello> {
        let (input, server_version) = ProtocolVersion::parse(input)?;
        let (input, random) = Random::parse(input)?;

        let (input, session_id_len) = be_u8(input)?;
        let (input, session_id) = take(session_id_len as usize)(input)?;

        let (input, cipher_suite) = CipherSuite::parse(input)?;
        let (input, compression_method) = be_u8(input)?;

        let (input, extensions) = parse_extensions(input)?;

        Ok((
            input,
            ServerHello {
                server_version,
                random,
                session_id: session_id.to_vec(),
                cipher_suite,
                compression_method,
                extensions,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        self.server_version.serialize(output);
        self.random.serialize(output);

        output.push(self.session_id.len() as u8);
        output.extend_from_slice(&self.session_id);

        self.cipher_suite.serialize(output);
        output.push(self.compression_method);

        serialize_extensions(&self.extensions, output);
    }
}

#[cfg(test)]
mod test {
    use super::super::extension::EXT_EXTENDED_MASTER_SECRET;
    use super::*;

    #[test]
    fn server_hello_roundtrip() {
        let hello = ServerHello {
            server_version: ProtocolVersion::DTLS1_2,
            random: Random([0x24; 32]),
            session_id: vec![1, 2, 3, 4],
            cipher_suite: CipherSuite::ECDHE_RSA_AES128_GCM_SHA256,
            compression_method: 0,
            extensions: vec![Extension::new(EXT_EXTENDED_MASTER_SECRET, vec![])],
        };

        let mut out = Vec::new();
        hello.serialize(&mut out);

        let (rest, parsed) = ServerHello::parse(&out).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, hello);
    }
}
