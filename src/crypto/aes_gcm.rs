//! Built-in AES-GCM record protection using the RustCrypto stack.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes128Gcm, Aes256Gcm, Key, Nonce};

use super::{Cipher, CryptoProvider, SessionKeys};
use crate::message::{AlertDescription, CipherSuite, ContentType, ProtocolVersion};
use crate::Error;

/// Explicit nonce carried in front of each AES-GCM record (RFC 5288).
const EXPLICIT_NONCE_LEN: usize = 8;
const TAG_LEN: usize = 16;
const FIXED_IV_LEN: usize = 4;

const SUPPORTED: &[CipherSuite] = &[
    CipherSuite::ECDHE_ECDSA_AES128_GCM_SHA256,
    CipherSuite::ECDHE_RSA_AES128_GCM_SHA256,
    CipherSuite::PSK_AES128_GCM_SHA256,
];

/// Provider backed by the `aes-gcm` crate. Covers the AES-128-GCM suites.
#[derive(Debug, Default)]
pub struct RustCryptoProvider;

impl RustCryptoProvider {
    pub fn new() -> Self {
        RustCryptoProvider
    }
}

impl CryptoProvider for RustCryptoProvider {
    fn supported_suites(&self) -> &[CipherSuite] {
        SUPPORTED
    }

    fn key_lengths(&self, suite: CipherSuite) -> Result<(usize, usize), Error> {
        if !SUPPORTED.contains(&suite) {
            return Err(Error::Crypto(format!("unsupported cipher suite {suite}")));
        }
        Ok((16, FIXED_IV_LEN))
    }

    fn new_cipher(
        &self,
        suite: CipherSuite,
        keys: &SessionKeys,
        is_client: bool,
    ) -> Result<Box<dyn Cipher>, Error> {
        if !SUPPORTED.contains(&suite) {
            return Err(Error::Crypto(format!("unsupported cipher suite {suite}")));
        }

        // Our write direction uses our own key, decode uses the peer's.
        let (write_key, write_iv, read_key, read_iv) = if is_client {
            (
                &keys.client_write_key,
                &keys.client_write_iv,
                &keys.server_write_key,
                &keys.server_write_iv,
            )
        } else {
            (
                &keys.server_write_key,
                &keys.server_write_iv,
                &keys.client_write_key,
                &keys.client_write_iv,
            )
        };

        Ok(Box::new(AesGcmCipher {
            write: AesGcmKey::new(write_key)?,
            read: AesGcmKey::new(read_key)?,
            write_iv: fixed_iv(write_iv)?,
            read_iv: fixed_iv(read_iv)?,
        }))
    }
}

fn fixed_iv(iv: &[u8]) -> Result<[u8; FIXED_IV_LEN], Error> {
    iv.try_into()
        .map_err(|_| Error::Crypto(format!("bad fixed iv length {}", iv.len())))
}

enum AesGcmKey {
    Aes128(Box<Aes128Gcm>),
    Aes256(Box<Aes256Gcm>),
}

impl AesGcmKey {
    fn new(key: &[u8]) -> Result<Self, Error> {
        match key.len() {
            16 => Ok(AesGcmKey::Aes128(Box::new(Aes128Gcm::new(
                Key::<Aes128Gcm>::from_slice(key),
            )))),
            32 => Ok(AesGcmKey::Aes256(Box::new(Aes256Gcm::new(
                Key::<Aes256Gcm>::from_slice(key),
            )))),
            n => Err(Error::Crypto(format!("bad AES-GCM key length {n}"))),
        }
    }

    fn seal(&self, nonce: &[u8; 12], payload: Payload) -> Result<Vec<u8>, Error> {
        let nonce = Nonce::from_slice(nonce);
        match self {
            AesGcmKey::Aes128(c) => c.encrypt(nonce, payload),
            AesGcmKey::Aes256(c) => c.encrypt(nonce, payload),
        }
        .map_err(|_| Error::Crypto("AES-GCM encryption failed".into()))
    }

    fn open(&self, nonce: &[u8; 12], payload: Payload) -> Result<Vec<u8>, Error> {
        let nonce = Nonce::from_slice(nonce);
        match self {
            AesGcmKey::Aes128(c) => c.decrypt(nonce, payload),
            AesGcmKey::Aes256(c) => c.decrypt(nonce, payload),
        }
        .map_err(|_| Error::fatal(AlertDescription::BadRecordMac))
    }
}

struct AesGcmCipher {
    write: AesGcmKey,
    read: AesGcmKey,
    write_iv: [u8; FIXED_IV_LEN],
    read_iv: [u8; FIXED_IV_LEN],
}

impl AesGcmCipher {
    fn nonce(iv: &[u8; FIXED_IV_LEN], explicit: &[u8; EXPLICIT_NONCE_LEN]) -> [u8; 12] {
        let mut nonce = [0u8; 12];
        nonce[..FIXED_IV_LEN].copy_from_slice(iv);
        nonce[FIXED_IV_LEN..].copy_from_slice(explicit);
        nonce
    }

    fn aad(seq: u64, content_type: ContentType, version: ProtocolVersion, len: usize) -> [u8; 13] {
        let mut aad = [0u8; 13];
        aad[..8].copy_from_slice(&seq.to_be_bytes());
        aad[8] = content_type.as_u8();
        aad[9] = version.major;
        aad[10] = version.minor;
        aad[11..].copy_from_slice(&(len as u16).to_be_bytes());
        aad
    }
}

impl Cipher for AesGcmCipher {
    fn plaintext_limit(&self, ciphertext_limit: usize) -> usize {
        ciphertext_limit.saturating_sub(EXPLICIT_NONCE_LEN + TAG_LEN)
    }

    fn ciphertext_encode_limit(&self, plaintext_limit: usize) -> usize {
        plaintext_limit + EXPLICIT_NONCE_LEN + TAG_LEN
    }

    fn ciphertext_decode_limit(&self, plaintext_limit: usize) -> usize {
        plaintext_limit + EXPLICIT_NONCE_LEN + TAG_LEN
    }

    fn encode_plaintext(
        &mut self,
        seq: u64,
        content_type: ContentType,
        version: ProtocolVersion,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, Error> {
        // The record sequence doubles as the explicit nonce.
        let explicit: [u8; EXPLICIT_NONCE_LEN] = seq.to_be_bytes();
        let nonce = Self::nonce(&self.write_iv, &explicit);
        let aad = Self::aad(seq, content_type, version, plaintext.len());

        let sealed = self.write.seal(
            &nonce,
            Payload {
                msg: plaintext,
                aad: &aad,
            },
        )?;

        let mut out = Vec::with_capacity(EXPLICIT_NONCE_LEN + sealed.len());
        out.extend_from_slice(&explicit);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    fn decode_ciphertext(
        &mut self,
        seq: u64,
        content_type: ContentType,
        version: ProtocolVersion,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, Error> {
        if ciphertext.len() < EXPLICIT_NONCE_LEN + TAG_LEN {
            return Err(Error::fatal(AlertDescription::DecodeError));
        }

        let explicit: [u8; EXPLICIT_NONCE_LEN] = ciphertext[..EXPLICIT_NONCE_LEN]
            .try_into()
            .expect("length checked");
        let nonce = Self::nonce(&self.read_iv, &explicit);

        let inner_len = ciphertext.len() - EXPLICIT_NONCE_LEN - TAG_LEN;
        let aad = Self::aad(seq, content_type, version, inner_len);

        self.read.open(
            &nonce,
            Payload {
                msg: &ciphertext[EXPLICIT_NONCE_LEN..],
                aad: &aad,
            },
        )
    }
}
