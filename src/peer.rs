//! Caller-supplied policy at the two endpoints.
//!
//! The engine drives the message flow; everything requiring judgement or
//! asymmetric cryptography (suite selection, certificate validation,
//! signatures, key exchange math) is delegated through these traits.
//! Certificate bodies are opaque to the engine.

use crate::crypto::KeyExchange;
use crate::message::{
    CertificateChain, CertificateRequest, CipherSuite, DigitallySigned, Random,
};
use crate::session::DtlsSession;
use crate::Error;

/// Client-side handshake policy.
pub trait ClientPolicy: Send {
    /// Cipher suites to offer, in preference order.
    fn cipher_suites(&self) -> Vec<CipherSuite>;

    /// A previously established session to offer for resumption.
    fn session_to_resume(&mut self) -> Option<DtlsSession> {
        None
    }

    /// Validate the server's certificate chain. An error aborts the
    /// handshake with a fatal alert.
    fn verify_server_certificate(&mut self, chain: &CertificateChain) -> Result<(), Error>;

    /// A stapled CertificateStatus (e.g. an OCSP response) the server sent
    /// after its certificate. Opaque to the engine; an error aborts the
    /// handshake.
    fn certificate_status(&mut self, status: &[u8]) -> Result<(), Error> {
        let _ = status;
        Ok(())
    }

    /// Body of an optional SupplementalData message to send at the head of
    /// the client's second flight. Opaque to the engine.
    fn supplemental_data(&mut self) -> Option<Vec<u8>> {
        None
    }

    /// Key exchange implementation for the negotiated suite. The randoms
    /// are provided so signed exchanges can verify the server's signature
    /// over them.
    fn key_exchange(
        &mut self,
        suite: CipherSuite,
        client_random: &Random,
        server_random: &Random,
    ) -> Result<Box<dyn KeyExchange>, Error>;

    /// Credentials to answer a CertificateRequest with. `None` sends an
    /// empty certificate list and no CertificateVerify.
    fn credentials(
        &mut self,
        request: &CertificateRequest,
    ) -> Option<Box<dyn ClientCredentials>> {
        let _ = request;
        None
    }

    /// The server issued a session ticket. Purely informational; the
    /// engine does not interpret tickets.
    fn new_session_ticket(&mut self, ticket: &[u8]) {
        let _ = ticket;
    }
}

/// Client certificate and the ability to sign the handshake transcript.
pub trait ClientCredentials: Send {
    fn certificate_chain(&self) -> CertificateChain;

    /// Produce the CertificateVerify signature over the raw concatenated
    /// handshake messages.
    fn sign_transcript(&mut self, transcript: &[u8]) -> Result<DigitallySigned, Error>;
}

/// Server-side handshake policy.
pub trait ServerPolicy: Send {
    /// Pick a suite from the client's offer, or `None` to abort with
    /// handshake_failure.
    fn select_cipher_suite(&mut self, offered: &[CipherSuite]) -> Option<CipherSuite>;

    /// The certificate chain to present for the suite, if the suite uses
    /// certificates at all.
    fn certificate_chain(&mut self, suite: CipherSuite) -> Option<CertificateChain> {
        let _ = suite;
        None
    }

    /// Key exchange implementation for the selected suite.
    fn key_exchange(
        &mut self,
        suite: CipherSuite,
        client_random: &Random,
        server_random: &Random,
    ) -> Result<Box<dyn KeyExchange>, Error>;

    /// A CertificateStatus body (e.g. an OCSP response) to staple after the
    /// certificate chain. Only sent when a chain was sent. Opaque to the
    /// engine.
    fn certificate_status(&mut self) -> Option<Vec<u8>> {
        None
    }

    /// Body of an optional SupplementalData message to send ahead of the
    /// certificate chain. Opaque to the engine.
    fn supplemental_data(&mut self) -> Option<Vec<u8>> {
        None
    }

    /// Demand a client certificate by returning the request to send.
    fn certificate_request(&mut self) -> Option<CertificateRequest> {
        None
    }

    /// Validate the client's certificate chain. Only called when a
    /// CertificateRequest was sent; the chain may be empty if the client
    /// declined.
    fn verify_client_certificate(&mut self, chain: &CertificateChain) -> Result<(), Error> {
        let _ = chain;
        Err(Error::Config(
            "client certificates requested but no verifier implemented".into(),
        ))
    }

    /// Check the client's CertificateVerify signature over the raw
    /// concatenated handshake messages.
    fn verify_certificate_verify(
        &mut self,
        chain: &CertificateChain,
        transcript: &[u8],
        signature: &DigitallySigned,
    ) -> Result<(), Error> {
        let _ = (chain, transcript, signature);
        Err(Error::Config(
            "client certificates requested but no verifier implemented".into(),
        ))
    }

    /// Look up a resumable session for the id the client offered.
    fn accept_resumption(&mut self, session_id: &[u8]) -> Option<DtlsSession> {
        let _ = session_id;
        None
    }

    /// A ticket to issue via NewSessionTicket, opaque to the engine.
    fn session_ticket(&mut self) -> Option<Vec<u8>> {
        None
    }

    /// A full handshake completed; the session may be cached for later
    /// resumption.
    fn store_session(&mut self, session: &DtlsSession) {
        let _ = session;
    }
}
