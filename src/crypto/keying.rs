//! Master secret and key block derivation (RFC 5246 sections 8.1 and 6.3,
//! RFC 7627 for the extended master secret).

use zeroize::{Zeroize, Zeroizing};

use super::prf::prf_tls12_sha256;

pub const MASTER_SECRET_LEN: usize = 48;
pub const VERIFY_DATA_LEN: usize = 12;

/// Directional keys cut from the key block. Wiped on drop.
pub struct SessionKeys {
    pub client_write_key: Vec<u8>,
    pub server_write_key: Vec<u8>,
    pub client_write_iv: Vec<u8>,
    pub server_write_iv: Vec<u8>,
}

impl Drop for SessionKeys {
    fn drop(&mut self) {
        self.client_write_key.zeroize();
        self.server_write_key.zeroize();
        self.client_write_iv.zeroize();
        self.server_write_iv.zeroize();
    }
}

impl std::fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SessionKeys")
    }
}

/// Derive the 48-byte master secret.
///
/// With the extended master secret the seed is the session hash (transcript
/// hash up to and including ClientKeyExchange); legacy derivation seeds with
/// client_random || server_random.
pub fn derive_master_secret(
    premaster: &[u8],
    client_random: &[u8; 32],
    server_random: &[u8; 32],
    session_hash: Option<&[u8]>,
) -> Zeroizing<Vec<u8>> {
    match session_hash {
        Some(hash) => prf_tls12_sha256(premaster, "extended master secret", hash, MASTER_SECRET_LEN),
        None => {
            let mut seed = [0u8; 64];
            seed[..32].copy_from_slice(client_random);
            seed[32..].copy_from_slice(server_random);
            prf_tls12_sha256(premaster, "master secret", &seed, MASTER_SECRET_LEN)
        }
    }
}

/// Expand the master secret into directional keys. Note the seed order for
/// key expansion is server_random || client_random.
pub fn derive_key_block(
    master_secret: &[u8],
    client_random: &[u8; 32],
    server_random: &[u8; 32],
    key_len: usize,
    iv_len: usize,
) -> SessionKeys {
    let mut seed = [0u8; 64];
    seed[..32].copy_from_slice(server_random);
    seed[32..].copy_from_slice(client_random);

    let total = 2 * key_len + 2 * iv_len;
    let block = prf_tls12_sha256(master_secret, "key expansion", &seed, total);

    let mut at = 0;
    let mut cut = |len: usize| {
        let piece = block[at..at + len].to_vec();
        at += len;
        piece
    };

    SessionKeys {
        client_write_key: cut(key_len),
        server_write_key: cut(key_len),
        client_write_iv: cut(iv_len),
        server_write_iv: cut(iv_len),
    }
}

/// Finished verify_data for one side of the handshake.
pub fn verify_data(master_secret: &[u8], is_client: bool, transcript_hash: &[u8]) -> Vec<u8> {
    let label = if is_client {
        "client finished"
    } else {
        "server finished"
    };
    prf_tls12_sha256(master_secret, label, transcript_hash, VERIFY_DATA_LEN).to_vec()
}
