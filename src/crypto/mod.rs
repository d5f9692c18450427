//! Crypto collaborator boundary.
//!
//! The engine never does asymmetric cryptography itself: key exchange math
//! lives behind [`KeyExchange`], record protection behind [`Cipher`] objects
//! created by a [`CryptoProvider`]. The built-in provider covers the AES-GCM
//! suites with the RustCrypto stack; anything else is supplied by the caller.

mod aes_gcm;
mod keying;
mod prf;

use std::fmt;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use zeroize::Zeroizing;

use crate::message::{CipherSuite, ContentType, ProtocolVersion};
use crate::Error;

pub use aes_gcm::RustCryptoProvider;
pub use keying::{
    derive_key_block, derive_master_secret, verify_data, SessionKeys, MASTER_SECRET_LEN,
    VERIFY_DATA_LEN,
};
pub use prf::prf_tls12_sha256;

/// Record protection for one epoch, both directions.
///
/// `seq` is the 64-bit concatenation of epoch and 48-bit sequence number,
/// used for nonce construction and additional authenticated data.
pub trait Cipher: Send {
    /// Largest plaintext that fits a ciphertext fragment of the given size.
    fn plaintext_limit(&self, ciphertext_limit: usize) -> usize;

    /// Largest ciphertext produced for a plaintext of the given size.
    fn ciphertext_encode_limit(&self, plaintext_limit: usize) -> usize;

    /// Largest ciphertext accepted when decoding toward the given plaintext
    /// limit.
    fn ciphertext_decode_limit(&self, plaintext_limit: usize) -> usize;

    fn encode_plaintext(
        &mut self,
        seq: u64,
        content_type: ContentType,
        version: ProtocolVersion,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, Error>;

    fn decode_ciphertext(
        &mut self,
        seq: u64,
        content_type: ContentType,
        version: ProtocolVersion,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, Error>;
}

/// The identity cipher used by epoch 0 before any keys exist.
#[derive(Debug, Default)]
pub struct NullCipher;

impl Cipher for NullCipher {
    fn plaintext_limit(&self, ciphertext_limit: usize) -> usize {
        ciphertext_limit
    }

    fn ciphertext_encode_limit(&self, plaintext_limit: usize) -> usize {
        plaintext_limit
    }

    fn ciphertext_decode_limit(&self, plaintext_limit: usize) -> usize {
        plaintext_limit
    }

    fn encode_plaintext(
        &mut self,
        _seq: u64,
        _content_type: ContentType,
        _version: ProtocolVersion,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, Error> {
        Ok(plaintext.to_vec())
    }

    fn decode_ciphertext(
        &mut self,
        _seq: u64,
        _content_type: ContentType,
        _version: ProtocolVersion,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, Error> {
        Ok(ciphertext.to_vec())
    }
}

/// Factory for per-suite [`Cipher`] objects.
pub trait CryptoProvider: fmt::Debug + Send + Sync {
    /// Suites this provider can instantiate, in preference order.
    fn supported_suites(&self) -> &[CipherSuite];

    /// Key and IV lengths needed in the key block for a suite.
    fn key_lengths(&self, suite: CipherSuite) -> Result<(usize, usize), Error>;

    fn new_cipher(
        &self,
        suite: CipherSuite,
        keys: &SessionKeys,
        is_client: bool,
    ) -> Result<Box<dyn Cipher>, Error>;
}

static DEFAULT_PROVIDER: OnceCell<Arc<dyn CryptoProvider>> = OnceCell::new();

/// Install a process-wide default provider. May only succeed once.
pub fn install_default_provider(provider: Arc<dyn CryptoProvider>) -> Result<(), Error> {
    DEFAULT_PROVIDER
        .set(provider)
        .map_err(|_| Error::Config("default crypto provider already installed".into()))
}

/// The installed default provider, or the built-in RustCrypto one.
pub fn default_provider() -> Arc<dyn CryptoProvider> {
    DEFAULT_PROVIDER
        .get_or_init(|| Arc::new(RustCryptoProvider::new()))
        .clone()
}

/// Key exchange collaborator. Bodies of ServerKeyExchange and
/// ClientKeyExchange are opaque to the engine; this trait owns their
/// meaning and ultimately yields the premaster secret.
pub trait KeyExchange: Send {
    /// Whether this exchange needs a ServerKeyExchange message at all.
    fn requires_server_key_exchange(&self) -> bool;

    /// Server side: produce the ServerKeyExchange body, if any.
    fn generate_server_key_exchange(&mut self) -> Result<Option<Vec<u8>>, Error> {
        Ok(None)
    }

    /// Client side: absorb the ServerKeyExchange body.
    fn process_server_key_exchange(&mut self, body: &[u8]) -> Result<(), Error>;

    /// Client side: produce the ClientKeyExchange body.
    fn generate_client_key_exchange(&mut self) -> Result<Vec<u8>, Error>;

    /// Server side: absorb the ClientKeyExchange body.
    fn process_client_key_exchange(&mut self, body: &[u8]) -> Result<(), Error>;

    /// The shared premaster secret. Called once, after the exchange
    /// messages have been processed.
    fn premaster_secret(&mut self) -> Result<Zeroizing<Vec<u8>>, Error>;
}
