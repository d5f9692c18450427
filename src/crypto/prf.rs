//! TLS 1.2 PRF (RFC 5246 section 5), SHA-256 based.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

/// PRF(secret, label, seed) = P_SHA256(secret, label + seed), truncated to
/// `output_len` bytes.
pub fn prf_tls12_sha256(
    secret: &[u8],
    label: &str,
    seed: &[u8],
    output_len: usize,
) -> Zeroizing<Vec<u8>> {
    debug_assert!(label.is_ascii());

    let mut full_seed = Zeroizing::new(Vec::with_capacity(label.len() + seed.len()));
    full_seed.extend_from_slice(label.as_bytes());
    full_seed.extend_from_slice(seed);

    p_sha256(secret, &full_seed, output_len)
}

fn p_sha256(secret: &[u8], full_seed: &[u8], output_len: usize) -> Zeroizing<Vec<u8>> {
    let mut result = Zeroizing::new(Vec::with_capacity(output_len));

    // A(1) = HMAC(secret, seed), A(i) = HMAC(secret, A(i-1))
    let mut a = hmac_sha256(secret, &[full_seed]);

    while result.len() < output_len {
        let output = hmac_sha256(secret, &[&a, full_seed]);
        let remaining = output_len - result.len();
        result.extend_from_slice(&output[..remaining.min(output.len())]);
        a = hmac_sha256(secret, &[&a]);
    }

    result
}

fn hmac_sha256(key: &[u8], parts: &[&[u8]]) -> [u8; 32] {
    // SHA-256 HMAC accepts keys of any length.
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
    for part in parts {
        mac.update(part);
    }
    mac.finalize().into_bytes().into()
}
