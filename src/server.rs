//! Server side of the handshake.

use hmac::{Hmac, Mac};
use log::{debug, info};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;

use crate::config::{Config, ExtendedMasterSecretMode};
use crate::crypto::{derive_key_block, derive_master_secret, verify_data};
use crate::heartbeat::Heartbeat;
use crate::message::{
    find_extension, AlertDescription, CertificateChain, CipherSuite, ClientHello, DigitallySigned,
    Extension, HeartbeatMode, HelloVerifyRequest, MessageType, ProtocolVersion, Random,
    ServerHello, EXT_EXTENDED_MASTER_SECRET, EXT_HEARTBEAT, EXT_SESSION_TICKET,
};
use crate::peer::ServerPolicy;
use crate::record_layer::{DatagramRecordLayer, HandshakeRetransmit};
use crate::reliable::{check_finished, parse_full, ReliableHandshake};
use crate::session::DtlsSession;
use crate::transport::{DatagramTransport, DtlsTransport};
use crate::Error;

type CookieMac = Hmac<Sha256>;

/// Cookies sent in HelloVerifyRequest. Plenty below the 32 byte cap the
/// DTLS 1.0 record version in that message imposes.
const COOKIE_LEN: usize = 20;

/// Drives a server handshake over a caller-supplied datagram transport.
pub struct ServerProtocol {
    config: Config,
    policy: Box<dyn ServerPolicy>,
    /// Per-instance secret for stateless cookie generation.
    cookie_secret: [u8; 32],
}

struct HandshakeOutcome {
    session: DtlsSession,
    retransmit: Option<Box<dyn HandshakeRetransmit>>,
    heartbeat: Option<Heartbeat>,
}

impl ServerProtocol {
    pub fn new(config: Config, policy: Box<dyn ServerPolicy>) -> Self {
        let mut cookie_secret = [0u8; 32];
        OsRng.fill_bytes(&mut cookie_secret);
        ServerProtocol {
            config,
            policy,
            cookie_secret,
        }
    }

    /// Run the handshake to completion. Returns a connected transport or
    /// the error that aborted the handshake; there is no in-between state.
    pub fn accept(mut self, transport: Box<dyn DatagramTransport>) -> Result<DtlsTransport, Error> {
        let mut records = DatagramRecordLayer::new(transport);

        match self.run_handshake(&mut records) {
            Ok(outcome) => {
                if let Some(heartbeat) = outcome.heartbeat {
                    records.set_heartbeat(heartbeat);
                }
                records.handshake_successful(outcome.retransmit);
                info!("server handshake complete");
                Ok(DtlsTransport::new(records, outcome.session))
            }
            Err(e) => {
                records.fail(&e);
                Err(e)
            }
        }
    }

    fn run_handshake(
        &mut self,
        records: &mut DatagramRecordLayer,
    ) -> Result<HandshakeOutcome, Error> {
        let mut handshake = ReliableHandshake::new(records, self.config.handshake_timeout());

        let msg = handshake.receive_message()?;
        if msg.msg_type != MessageType::ClientHello {
            return Err(Error::fatal(AlertDescription::UnexpectedMessage));
        }
        let mut client_hello = parse_full(&msg.body, ClientHello::parse)?;
        self.check_client_hello(&client_hello)?;

        if self.config.require_cookie() && !self.cookie_matches(&client_hello) {
            // The pre-cookie hello never enters the transcript.
            handshake.reset_transcript();

            let hvr = HelloVerifyRequest {
                server_version: ProtocolVersion::DTLS1_0,
                cookie: self.cookie_for(&client_hello),
            };
            let mut body = Vec::new();
            hvr.serialize(&mut body);
            handshake.send_message(MessageType::HelloVerifyRequest, &body)?;
            debug!("sent HelloVerifyRequest, awaiting cookie echo");

            let msg = handshake.receive_message()?;
            if msg.msg_type != MessageType::ClientHello {
                return Err(Error::fatal(AlertDescription::UnexpectedMessage));
            }
            client_hello = parse_full(&msg.body, ClientHello::parse)?;
            self.check_client_hello(&client_hello)?;
            if !self.cookie_matches(&client_hello) {
                return Err(Error::fatal(AlertDescription::HandshakeFailure));
            }
        }

        let client_ems =
            find_extension(&client_hello.extensions, EXT_EXTENDED_MASTER_SECRET).is_some();
        let ems = match self.config.extended_master_secret() {
            ExtendedMasterSecretMode::Disabled => false,
            ExtendedMasterSecretMode::Allowed => client_ems,
            ExtendedMasterSecretMode::Required => {
                if !client_ems {
                    return Err(Error::fatal(AlertDescription::HandshakeFailure));
                }
                true
            }
        };

        // A cached session is only resumed when the client still offers its
        // suite and the master secret policy matches.
        let resume_session = if client_hello.session_id.is_empty() {
            None
        } else {
            self.policy
                .accept_resumption(&client_hello.session_id)
                .filter(|s| {
                    s.is_resumable()
                        && client_hello.cipher_suites.contains(&s.cipher_suite())
                        && s.is_extended_master_secret() == ems
                })
        };

        let suite = match &resume_session {
            Some(s) => s.cipher_suite(),
            None => self
                .policy
                .select_cipher_suite(&client_hello.cipher_suites)
                .ok_or_else(|| Error::fatal(AlertDescription::HandshakeFailure))?,
        };
        if !client_hello.cipher_suites.contains(&suite) {
            return Err(Error::Config(format!(
                "policy selected suite {suite} the client did not offer"
            )));
        }

        let ticket = if find_extension(&client_hello.extensions, EXT_SESSION_TICKET).is_some()
            && resume_session.is_none()
        {
            self.policy.session_ticket()
        } else {
            None
        };

        let server_random = Random::generate();
        let session_id = match &resume_session {
            Some(_) => client_hello.session_id.clone(),
            None => {
                let mut id = vec![0u8; 32];
                OsRng.fill_bytes(&mut id);
                id
            }
        };

        let mut extensions = Vec::new();
        if ems {
            extensions.push(Extension::new(EXT_EXTENDED_MASTER_SECRET, Vec::new()));
        }
        let heartbeat = self.negotiate_heartbeat(&client_hello, &mut extensions)?;
        if ticket.is_some() {
            extensions.push(Extension::new(EXT_SESSION_TICKET, Vec::new()));
        }

        let server_hello = ServerHello {
            server_version: ProtocolVersion::DTLS1_2,
            random: server_random,
            session_id: session_id.clone(),
            cipher_suite: suite,
            compression_method: 0,
            extensions,
        };
        handshake.records().set_version(ProtocolVersion::DTLS1_2);
        let mut body = Vec::new();
        server_hello.serialize(&mut body);
        handshake.send_message(MessageType::ServerHello, &body)?;

        let session = match resume_session {
            Some(session) => {
                debug!("resuming session ({} byte id)", session.id().len());
                self.finish_abbreviated(&mut handshake, &session, &client_hello.random, &server_random)?;
                session
            }
            None => self.finish_full(
                &mut handshake,
                &client_hello,
                &server_random,
                suite,
                session_id,
                ems,
                ticket,
            )?,
        };

        let retransmit = handshake.finish();
        Ok(HandshakeOutcome {
            session,
            retransmit,
            heartbeat,
        })
    }

    fn check_client_hello(&self, client_hello: &ClientHello) -> Result<(), Error> {
        let version = client_hello.client_version;
        if !version.is_dtls() {
            return Err(Error::fatal(AlertDescription::ProtocolVersion));
        }
        // The client's version is its highest supported; we need 1.2.
        if version != ProtocolVersion::DTLS1_2 && !version.is_later_than(ProtocolVersion::DTLS1_2)
        {
            return Err(Error::fatal(AlertDescription::ProtocolVersion));
        }
        if !client_hello.compression_methods.contains(&0) {
            return Err(Error::fatal(AlertDescription::HandshakeFailure));
        }
        if client_hello.cipher_suites.is_empty() {
            return Err(Error::fatal(AlertDescription::HandshakeFailure));
        }
        Ok(())
    }

    /// Cookie bound to the hello's random and session id with a keyed MAC,
    /// so no per-client state exists before the cookie round trip.
    fn cookie_for(&self, client_hello: &ClientHello) -> Vec<u8> {
        let mut mac =
            CookieMac::new_from_slice(&self.cookie_secret).expect("HMAC accepts any key length");
        mac.update(&client_hello.random.0);
        mac.update(&client_hello.session_id);
        mac.finalize().into_bytes()[..COOKIE_LEN].to_vec()
    }

    fn cookie_matches(&self, client_hello: &ClientHello) -> bool {
        if client_hello.cookie.len() != COOKIE_LEN {
            return false;
        }
        let mut mac = match CookieMac::new_from_slice(&self.cookie_secret) {
            Ok(mac) => mac,
            Err(_) => return false,
        };
        mac.update(&client_hello.random.0);
        mac.update(&client_hello.session_id);
        mac.verify_truncated_left(&client_hello.cookie).is_ok()
    }

    fn negotiate_heartbeat(
        &self,
        client_hello: &ClientHello,
        extensions: &mut Vec<Extension>,
    ) -> Result<Option<Heartbeat>, Error> {
        let Some(config) = self.config.heartbeat() else {
            return Ok(None);
        };
        let Some(ext) = find_extension(&client_hello.extensions, EXT_HEARTBEAT) else {
            return Ok(None);
        };
        let client_mode = ext
            .data
            .first()
            .and_then(|b| HeartbeatMode::from_u8(*b))
            .ok_or_else(|| Error::fatal(AlertDescription::IllegalParameter))?;

        let our_mode = if config.allow_peer_requests {
            HeartbeatMode::PeerAllowedToSend
        } else {
            HeartbeatMode::PeerNotAllowedToSend
        };
        extensions.push(Extension::new(EXT_HEARTBEAT, vec![our_mode.as_u8()]));

        let can_send = client_mode == HeartbeatMode::PeerAllowedToSend;
        Ok(Some(Heartbeat::new(
            config,
            can_send,
            config.allow_peer_requests,
        )))
    }

    /// Abbreviated handshake: we finish first off the resumed master secret.
    fn finish_abbreviated(
        &mut self,
        handshake: &mut ReliableHandshake,
        session: &DtlsSession,
        client_random: &Random,
        server_random: &Random,
    ) -> Result<(), Error> {
        handshake.seal_transcript();

        let suite = session.cipher_suite();
        let provider = self.config.crypto_provider().clone();
        let (key_len, iv_len) = provider.key_lengths(suite)?;
        let keys = derive_key_block(
            session.master_secret(),
            &client_random.0,
            &server_random.0,
            key_len,
            iv_len,
        );
        let cipher = provider.new_cipher(suite, &keys, false)?;
        let secure_epoch = handshake.records().init_pending_epoch(cipher)?;

        let server_vd = verify_data(session.master_secret(), false, &handshake.transcript_hash());
        handshake.send_message(MessageType::Finished, &server_vd)?;

        let expected = verify_data(session.master_secret(), true, &handshake.transcript_hash());
        let msg = handshake.receive_message()?;
        if msg.msg_type != MessageType::Finished {
            return Err(Error::fatal(AlertDescription::UnexpectedMessage));
        }
        check_finished(&msg, &expected, secure_epoch)?;
        Ok(())
    }

    /// Full handshake from after ServerHello.
    #[allow(clippy::too_many_arguments)]
    fn finish_full(
        &mut self,
        handshake: &mut ReliableHandshake,
        client_hello: &ClientHello,
        server_random: &Random,
        suite: CipherSuite,
        session_id: Vec<u8>,
        ems: bool,
        ticket: Option<Vec<u8>>,
    ) -> Result<DtlsSession, Error> {
        let mut kx = self
            .policy
            .key_exchange(suite, &client_hello.random, server_random)?;

        if let Some(data) = self.policy.supplemental_data() {
            handshake.send_message(MessageType::SupplementalData, &data)?;
        }

        let server_chain = self.policy.certificate_chain(suite);
        if let Some(chain) = &server_chain {
            let mut body = Vec::new();
            chain.serialize(&mut body);
            handshake.send_message(MessageType::Certificate, &body)?;

            if let Some(status) = self.policy.certificate_status() {
                handshake.send_message(MessageType::CertificateStatus, &status)?;
            }
        }

        if let Some(ske_body) = kx.generate_server_key_exchange()? {
            handshake.send_message(MessageType::ServerKeyExchange, &ske_body)?;
        }

        let certificate_request = self.policy.certificate_request();
        if let Some(request) = &certificate_request {
            let mut body = Vec::new();
            request.serialize(&mut body);
            handshake.send_message(MessageType::CertificateRequest, &body)?;
        }

        handshake.send_message(MessageType::ServerHelloDone, &[])?;

        // Client flight.
        let mut msg = handshake.receive_message()?;

        if msg.msg_type == MessageType::SupplementalData {
            // Carried for the policy layers above; nothing in it concerns
            // the engine.
            debug!("ignoring {} byte SupplementalData", msg.body.len());
            msg = handshake.receive_message()?;
        }

        let mut client_chain = None;
        if certificate_request.is_some() {
            if msg.msg_type != MessageType::Certificate {
                return Err(Error::fatal(AlertDescription::UnexpectedMessage));
            }
            let chain = parse_full(&msg.body, CertificateChain::parse)?;
            self.policy.verify_client_certificate(&chain)?;
            client_chain = Some(chain);
            msg = handshake.receive_message()?;
        }

        if msg.msg_type != MessageType::ClientKeyExchange {
            return Err(Error::fatal(AlertDescription::UnexpectedMessage));
        }
        kx.process_client_key_exchange(&msg.body)?;

        // Session hash for the extended master secret: everything up to and
        // including ClientKeyExchange.
        let session_hash = handshake.transcript_hash();
        let premaster = kx.premaster_secret()?;
        let master = derive_master_secret(
            &premaster,
            &client_hello.random.0,
            &server_random.0,
            ems.then_some(session_hash.as_slice()),
        );

        let expect_verify = client_chain.as_ref().map(|c| !c.is_empty()).unwrap_or(false);
        if expect_verify {
            // The signature covers the raw messages up to, but excluding,
            // CertificateVerify itself.
            let raw = handshake
                .transcript_messages()
                .ok_or_else(|| Error::Config("transcript sealed before CertificateVerify".into()))?
                .to_vec();
            let msg = handshake.receive_message()?;
            if msg.msg_type != MessageType::CertificateVerify {
                return Err(Error::fatal(AlertDescription::UnexpectedMessage));
            }
            let signed = parse_full(&msg.body, DigitallySigned::parse)?;
            let chain = client_chain.as_ref().ok_or_else(|| {
                Error::Config("certificate verify without client chain".into())
            })?;
            self.policy
                .verify_certificate_verify(chain, &raw, &signed)?;
        }
        handshake.seal_transcript();

        let provider = self.config.crypto_provider().clone();
        let (key_len, iv_len) = provider.key_lengths(suite)?;
        let keys = derive_key_block(
            &master,
            &client_hello.random.0,
            &server_random.0,
            key_len,
            iv_len,
        );
        let cipher = provider.new_cipher(suite, &keys, false)?;
        let secure_epoch = handshake.records().init_pending_epoch(cipher)?;

        let expected = verify_data(&master, true, &handshake.transcript_hash());
        let msg = handshake.receive_message()?;
        if msg.msg_type != MessageType::Finished {
            return Err(Error::fatal(AlertDescription::UnexpectedMessage));
        }
        check_finished(&msg, &expected, secure_epoch)?;

        if let Some(ticket) = ticket {
            // NewSessionTicket: u32 lifetime hint (unspecified), u16-length
            // opaque ticket.
            let mut body = Vec::with_capacity(6 + ticket.len());
            body.extend_from_slice(&0u32.to_be_bytes());
            body.extend_from_slice(&(ticket.len() as u16).to_be_bytes());
            body.extend_from_slice(&ticket);
            handshake.send_message(MessageType::NewSessionTicket, &body)?;
        }

        let server_vd = verify_data(&master, false, &handshake.transcript_hash());
        handshake.send_message(MessageType::Finished, &server_vd)?;

        let session = DtlsSession::new(session_id, ProtocolVersion::DTLS1_2, suite, master, ems);
        self.policy.store_session(&session);
        Ok(session)
    }
}
