use nom::bytes::complete::take;
use nom::number::complete::{be_u16, be_u8};
use nom::IResult;

use super::util::{be_u24, put_u24};

/// Certificate message body: a u24-length list of u24-length opaque
/// certificates. The engine never looks inside the DER blobs, those go to
/// the policy object for validation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CertificateChain {
    pub certificates: Vec<Vec<u8>>,
}

impl CertificateChain {
    pub fn parse(input: &[u8]) -> IResult<&[u8], CertificateChain> {
        let (input, total) = be_u24(input)?;
        let (input, mut block) = take(total as usize)(input)?;

        let mut certificates = Vec::new();
        while !block.is_empty() {
            let (rest, len) = be_u24(block)?;
            let (rest, cert) = take(len as usize)(rest)?;
            certificates.push(cert.to_vec());
            block = rest;
        }

        Ok((input, CertificateChain { certificates }))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        let total: usize = self.certificates.iter().map(|c| 3 + c.len()).sum();
        put_u24(output, total as u32);
        for cert in &self.certificates {
            put_u24(output, cert.len() as u32);
            output.extend_from_slice(cert);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }
}

/// CertificateRequest body, parsed far enough to hand the policy object a
/// view of what the server asked for.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CertificateRequest {
    pub certificate_types: Vec<u8>,
    pub signature_algorithms: Vec<u16>,
    pub certificate_authorities: Vec<Vec<u8>>,
}

impl CertificateRequest {
    pub fn parse(input: &[u8]) -> IResult<&[u8], CertificateRequest> {
        let (input, types_len) = be_u8(input)?;
        let (input, types) = take(types_len as usize)(input)?;

        let (input, algs_len) = be_u16(input)?;
        let (input, mut algs_block) = take(algs_len as usize)(input)?;
        let mut signature_algorithms = Vec::new();
        while !algs_block.is_empty() {
            let (rest, alg) = be_u16(algs_block)?;
            signature_algorithms.push(alg);
            algs_block = rest;
        }

        let (input, cas_len) = be_u16(input)?;
        let (input, mut cas_block) = take(cas_len as usize)(input)?;
        let mut certificate_authorities = Vec::new();
        while !cas_block.is_empty() {
            let (rest, len) = be_u16(cas_block)?;
            let (rest, dn) = take(len as usize)(rest)?;
            certificate_authorities.push(dn.to_vec());
            cas_block = rest;
        }

        Ok((
            input,
            CertificateRequest {
                certificate_types: types.to_vec(),
                signature_algorithms,
                certificate_authorities,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.push(self.certificate_types.len() as u8);
        output.extend_from_slice(&self.certificate_types);

        output.extend_from_slice(&((self.signature_algorithms.len() * 2) as u16).to_be_bytes());
        for alg in &self.signature_algorithms {
            output.extend_from_slice(&alg.to_be_bytes());
        }

        let cas_total: usize = self.certificate_authorities.iter().map(|d| 2 + d.len()).sum();
        output.extend_from_slice(&(cas_total as u16).to_be_bytes());
        for dn in &self.certificate_authorities {
            output.extend_from_slice(&(dn.len() as u16).to_be_bytes());
            output.extend_from_slice(dn);
        }
    }
}

/// DigitallySigned structure used by CertificateVerify: signature scheme
/// id plus opaque signature bytes. Verification happens in the policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigitallySigned {
    pub algorithm: u16,
    pub signature: Vec<u8>,
}

impl DigitallySigned {
    pub fn parse(input: &[u8]) -> IResult<&[u8], DigitallySigned> {
        let (input, algorithm) = be_u16(input)?;
        let (input, sig_len) = be_u16(input)?;
        let (input, signature) = take(sig_len as usize)(input)?;

        Ok((
            input,
            DigitallySigned {
                algorithm,
                signature: signature.to_vec(),
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.extend_from_slice(&self.algorithm.to_be_bytes());
        output.extend_from_slice(&(self.signature.len() as u16).to_be_bytes());
        output.extend_from_slice(&self.signature);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn chain_roundtrip() {
        let chain = CertificateChain {
            certificates: vec![vec![1; 100], vec![2; 50]],
        };
        let mut out = Vec::new();
        chain.serialize(&mut out);

        let (rest, parsed) = CertificateChain::parse(&out).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, chain);
    }

    #[test]
    fn empty_chain_roundtrip() {
        let chain = CertificateChain::default();
        let mut out = Vec::new();
        chain.serialize(&mut out);
        assert_eq!(out, [0, 0, 0]);

        let (_, parsed) = CertificateChain::parse(&out).unwrap();
        assert!(parsed.is_empty());
    }

    #[test]
    fn certificate_request_roundtrip() {
        let req = CertificateRequest {
            certificate_types: vec![1, 64],
            signature_algorithms: vec![0x0403, 0x0401],
            certificate_authorities: vec![vec![0x30, 0x00]],
        };
        let mut out = Vec::new();
        req.serialize(&mut out);

        let (rest, parsed) = CertificateRequest::parse(&out).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, req);
    }

    #[test]
    fn digitally_signed_roundtrip() {
        let ds = DigitallySigned {
            algorithm: 0x0403,
            signature: vec![9; 70],
        };
        let mut out = Vec::new();
        ds.serialize(&mut out);

        let (rest, parsed) = DigitallySigned::parse(&out).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, ds);
    }
}
