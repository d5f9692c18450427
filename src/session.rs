use zeroize::Zeroizing;

use crate::message::{CipherSuite, ProtocolVersion};

/// A completed handshake's resumable state.
///
/// Holding on to a session (client: via `session_to_resume`, server: via a
/// session cache behind `accept_resumption`) enables the abbreviated
/// handshake. The master secret is wiped when the last copy drops.
#[derive(Clone)]
pub struct DtlsSession {
    id: Vec<u8>,
    version: ProtocolVersion,
    cipher_suite: CipherSuite,
    master_secret: Zeroizing<Vec<u8>>,
    extended_master_secret: bool,
}

impl DtlsSession {
    pub(crate) fn new(
        id: Vec<u8>,
        version: ProtocolVersion,
        cipher_suite: CipherSuite,
        master_secret: Zeroizing<Vec<u8>>,
        extended_master_secret: bool,
    ) -> Self {
        DtlsSession {
            id,
            version,
            cipher_suite,
            master_secret,
            extended_master_secret,
        }
    }

    pub fn id(&self) -> &[u8] {
        &self.id
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    pub fn cipher_suite(&self) -> CipherSuite {
        self.cipher_suite
    }

    pub fn is_extended_master_secret(&self) -> bool {
        self.extended_master_secret
    }

    /// A session without an id cannot be resumed.
    pub fn is_resumable(&self) -> bool {
        !self.id.is_empty() && !self.master_secret.is_empty()
    }

    pub(crate) fn master_secret(&self) -> &[u8] {
        &self.master_secret
    }

    /// Wipe the secret material and drop the id, making the session
    /// unusable for resumption.
    pub fn invalidate(&mut self) {
        self.master_secret = Zeroizing::new(Vec::new());
        self.id.clear();
    }
}

impl std::fmt::Debug for DtlsSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DtlsSession")
            .field("id_len", &self.id.len())
            .field("version", &self.version)
            .field("cipher_suite", &self.cipher_suite)
            .field("extended_master_secret", &self.extended_master_secret)
            .finish()
    }
}
