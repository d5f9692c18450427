//! Client side of the handshake.

use log::{debug, info};

use crate::config::{Config, ExtendedMasterSecretMode};
use crate::crypto::{derive_key_block, derive_master_secret, verify_data};
use crate::heartbeat::Heartbeat;
use crate::message::{
    find_extension, patch_cookie, AlertDescription, CertificateChain, CertificateRequest,
    CipherSuite, ClientHello, Extension, HeartbeatMode, HelloVerifyRequest, MessageType,
    ProtocolVersion, Random, ServerHello, EXT_EXTENDED_MASTER_SECRET, EXT_HEARTBEAT,
    EXT_SESSION_TICKET,
};
use crate::peer::ClientPolicy;
use crate::record_layer::{DatagramRecordLayer, HandshakeRetransmit};
use crate::reliable::{check_finished, parse_full, HandshakeMessage, ReliableHandshake};
use crate::session::DtlsSession;
use crate::transport::{DatagramTransport, DtlsTransport};
use crate::Error;

/// Drives a client handshake over a caller-supplied datagram transport.
pub struct ClientProtocol {
    config: Config,
    policy: Box<dyn ClientPolicy>,
}

struct HandshakeOutcome {
    session: DtlsSession,
    retransmit: Option<Box<dyn HandshakeRetransmit>>,
    heartbeat: Option<Heartbeat>,
}

impl ClientProtocol {
    pub fn new(config: Config, policy: Box<dyn ClientPolicy>) -> Self {
        ClientProtocol { config, policy }
    }

    /// Run the handshake to completion. Returns a connected transport or
    /// the error that aborted the handshake; there is no in-between state.
    pub fn connect(mut self, transport: Box<dyn DatagramTransport>) -> Result<DtlsTransport, Error> {
        let mut records = DatagramRecordLayer::new(transport);

        match self.run_handshake(&mut records) {
            Ok(outcome) => {
                if let Some(heartbeat) = outcome.heartbeat {
                    records.set_heartbeat(heartbeat);
                }
                records.handshake_successful(outcome.retransmit);
                info!("client handshake complete");
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

        let offered_suites = self.policy.cipher_suites();
        if offered_suites.is_empty() {
            return Err(Error::Config("no cipher suites to offer".into()));
        }

        let resume_session = self
            .policy
            .session_to_resume()
            .filter(|s| s.is_resumable() && offered_suites.contains(&s.cipher_suite()));

        let client_random = Random::generate();

        let mut extensions = Vec::new();
        if self.config.extended_master_secret() != ExtendedMasterSecretMode::Disabled {
            extensions.push(Extension::new(EXT_EXTENDED_MASTER_SECRET, Vec::new()));
        }
        if let Some(hb) = self.config.heartbeat() {
            let mode = if hb.allow_peer_requests {
                HeartbeatMode::PeerAllowedToSend
            } else {
                HeartbeatMode::PeerNotAllowedToSend
            };
            extensions.push(Extension::new(EXT_HEARTBEAT, vec![mode.as_u8()]));
        }
        extensions.push(Extension::new(EXT_SESSION_TICKET, Vec::new()));

        let client_hello = ClientHello {
            client_version: ProtocolVersion::DTLS1_2,
            random: client_random,
            session_id: resume_session
                .as_ref()
                .map(|s| s.id().to_vec())
                .unwrap_or_default(),
            cookie: Vec::new(),
            cipher_suites: offered_suites.clone(),
            compression_methods: vec![0],
            extensions,
        };
        let mut hello_body = Vec::new();
        client_hello.serialize(&mut hello_body);
        handshake.send_message(MessageType::ClientHello, &hello_body)?;

        // The server may demand a cookie round trip before proceeding. Only
        // a single HelloVerifyRequest is tolerated.
        let mut msg = handshake.receive_message()?;
        if msg.msg_type == MessageType::HelloVerifyRequest {
            let hvr = parse_full(&msg.body, HelloVerifyRequest::parse)?;
            if !hvr.server_version.is_dtls()
                || hvr.cookie.is_empty()
                || hvr.cookie.len() > hvr.server_version.max_cookie_len()
            {
                return Err(Error::fatal(AlertDescription::IllegalParameter));
            }
            debug!("HelloVerifyRequest with {} byte cookie", hvr.cookie.len());

            // The verify round trip never enters the transcript; the
            // replayed hello starts it over.
            handshake.reset_transcript();
            let patched = patch_cookie(&hello_body, &hvr.cookie)?;
            handshake.send_message(MessageType::ClientHello, &patched)?;
            msg = handshake.receive_message()?;
        }

        if msg.msg_type != MessageType::ServerHello {
            return Err(Error::fatal(AlertDescription::UnexpectedMessage));
        }
        let server_hello = parse_full(&msg.body, ServerHello::parse)?;
        self.check_server_hello(&server_hello, &offered_suites)?;
        handshake.records().set_version(ProtocolVersion::DTLS1_2);

        let ems = find_extension(&server_hello.extensions, EXT_EXTENDED_MASTER_SECRET).is_some();
        if self.config.extended_master_secret() == ExtendedMasterSecretMode::Required && !ems {
            return Err(Error::fatal(AlertDescription::HandshakeFailure));
        }
        if self.config.extended_master_secret() == ExtendedMasterSecretMode::Disabled && ems {
            return Err(Error::fatal(AlertDescription::UnsupportedExtension));
        }

        let expect_ticket =
            find_extension(&server_hello.extensions, EXT_SESSION_TICKET).is_some();
        let heartbeat = self.negotiate_heartbeat(&server_hello)?;

        let resuming = match &resume_session {
            Some(s) => {
                !server_hello.session_id.is_empty() && server_hello.session_id == s.id()
            }
            None => false,
        };

        let session = if resuming {
            let session = resume_session.ok_or_else(|| {
                Error::Config("resumption accepted without a session".into())
            })?;
            if server_hello.cipher_suite != session.cipher_suite()
                || ems != session.is_extended_master_secret()
            {
                return Err(Error::fatal(AlertDescription::IllegalParameter));
            }
            debug!("resuming session ({} byte id)", session.id().len());
            self.finish_abbreviated(
                &mut handshake,
                &session,
                &client_random,
                &server_hello,
                expect_ticket,
            )?;
            session
        } else {
            self.finish_full(
                &mut handshake,
                &client_random,
                &server_hello,
                ems,
                expect_ticket,
            )?
        };

        let retransmit = handshake.finish();
        Ok(HandshakeOutcome {
            session,
            retransmit,
            heartbeat,
        })
    }

    fn check_server_hello(
        &self,
        server_hello: &ServerHello,
        offered: &[CipherSuite],
    ) -> Result<(), Error> {
        if server_hello.server_version != ProtocolVersion::DTLS1_2 {
            return Err(Error::fatal(AlertDescription::ProtocolVersion));
        }
        if !offered.contains(&server_hello.cipher_suite) {
            return Err(Error::fatal(AlertDescription::IllegalParameter));
        }
        if server_hello.compression_method != 0 {
            return Err(Error::fatal(AlertDescription::IllegalParameter));
        }
        if server_hello.random.has_downgrade_sentinel() {
            // The server supports a later version but negotiated down.
            return Err(Error::fatal(AlertDescription::IllegalParameter));
        }
        Ok(())
    }

    fn negotiate_heartbeat(&self, server_hello: &ServerHello) -> Result<Option<Heartbeat>, Error> {
        let Some(config) = self.config.heartbeat() else {
            return Ok(None);
        };
        let Some(ext) = find_extension(&server_hello.extensions, EXT_HEARTBEAT) else {
            return Ok(None);
        };
        let mode = ext
            .data
            .first()
            .and_then(|b| HeartbeatMode::from_u8(*b))
            .ok_or_else(|| Error::fatal(AlertDescription::IllegalParameter))?;

        let can_send = mode == HeartbeatMode::PeerAllowedToSend;
        Ok(Some(Heartbeat::new(
            config,
            can_send,
            config.allow_peer_requests,
        )))
    }

    /// Abbreviated handshake: the server finishes first, both sides reuse
    /// the resumed master secret.
    fn finish_abbreviated(
        &mut self,
        handshake: &mut ReliableHandshake,
        session: &DtlsSession,
        client_random: &Random,
        server_hello: &ServerHello,
        expect_ticket: bool,
    ) -> Result<(), Error> {
        handshake.seal_transcript();

        let suite = server_hello.cipher_suite;
        let provider = self.config.crypto_provider().clone();
        let (key_len, iv_len) = provider.key_lengths(suite)?;
        let keys = derive_key_block(
            session.master_secret(),
            &client_random.0,
            &server_hello.random.0,
            key_len,
            iv_len,
        );
        let cipher = provider.new_cipher(suite, &keys, true)?;
        let secure_epoch = handshake.records().init_pending_epoch(cipher)?;

        let mut seen_ticket = false;
        loop {
            let expected = verify_data(session.master_secret(), false, &handshake.transcript_hash());
            let msg = handshake.receive_message()?;
            match msg.msg_type {
                MessageType::NewSessionTicket if expect_ticket && !seen_ticket => {
                    seen_ticket = true;
                    self.deliver_ticket(&msg)?;
                }
                MessageType::Finished => {
                    check_finished(&msg, &expected, secure_epoch)?;
                    break;
                }
                _ => return Err(Error::fatal(AlertDescription::UnexpectedMessage)),
            }
        }

        let client_vd = verify_data(session.master_secret(), true, &handshake.transcript_hash());
        handshake.send_message(MessageType::Finished, &client_vd)?;
        Ok(())
    }

    /// Full handshake from after ServerHello: server flight, client flight,
    /// Finished exchange.
    fn finish_full(
        &mut self,
        handshake: &mut ReliableHandshake,
        client_random: &Random,
        server_hello: &ServerHello,
        ems: bool,
        expect_ticket: bool,
    ) -> Result<DtlsSession, Error> {
        let suite = server_hello.cipher_suite;
        let mut kx = self
            .policy
            .key_exchange(suite, client_random, &server_hello.random)?;

        // Server flight up to ServerHelloDone, with optional messages.
        let mut msg = handshake.receive_message()?;

        if msg.msg_type == MessageType::SupplementalData {
            // Carried for the policy layers above; nothing in it concerns
            // the engine.
            debug!("ignoring {} byte SupplementalData", msg.body.len());
            msg = handshake.receive_message()?;
        }

        if msg.msg_type == MessageType::Certificate {
            let chain = parse_full(&msg.body, CertificateChain::parse)?;
            if chain.is_empty() {
                return Err(Error::fatal(AlertDescription::BadCertificate));
            }
            self.policy.verify_server_certificate(&chain)?;
            msg = handshake.receive_message()?;

            // A stapled status is only valid directly after the certificate
            // it covers.
            if msg.msg_type == MessageType::CertificateStatus {
                self.policy.certificate_status(&msg.body)?;
                msg = handshake.receive_message()?;
            }
        }

        if msg.msg_type == MessageType::ServerKeyExchange {
            if !kx.requires_server_key_exchange() {
                return Err(Error::fatal(AlertDescription::UnexpectedMessage));
            }
            kx.process_server_key_exchange(&msg.body)?;
            msg = handshake.receive_message()?;
        } else if kx.requires_server_key_exchange() {
            return Err(Error::fatal(AlertDescription::HandshakeFailure));
        }

        let mut certificate_request = None;
        if msg.msg_type == MessageType::CertificateRequest {
            certificate_request = Some(parse_full(&msg.body, CertificateRequest::parse)?);
            msg = handshake.receive_message()?;
        }

        if msg.msg_type != MessageType::ServerHelloDone || !msg.body.is_empty() {
            return Err(Error::fatal(AlertDescription::UnexpectedMessage));
        }

        // Client flight.
        if let Some(data) = self.policy.supplemental_data() {
            handshake.send_message(MessageType::SupplementalData, &data)?;
        }

        let mut credentials = None;
        if let Some(request) = &certificate_request {
            credentials = self.policy.credentials(request);
            let chain = credentials
                .as_ref()
                .map(|c| c.certificate_chain())
                .unwrap_or_default();
            let mut body = Vec::new();
            chain.serialize(&mut body);
            handshake.send_message(MessageType::Certificate, &body)?;
            if chain.is_empty() {
                credentials = None;
            }
        }

        let cke_body = kx.generate_client_key_exchange()?;
        handshake.send_message(MessageType::ClientKeyExchange, &cke_body)?;

        // The session hash for the extended master secret covers everything
        // up to and including ClientKeyExchange.
        let session_hash = handshake.transcript_hash();
        let premaster = kx.premaster_secret()?;
        let master = derive_master_secret(
            &premaster,
            &client_random.0,
            &server_hello.random.0,
            ems.then_some(session_hash.as_slice()),
        );

        if let Some(credentials) = &mut credentials {
            let raw = handshake
                .transcript_messages()
                .ok_or_else(|| Error::Config("transcript sealed before CertificateVerify".into()))?
                .to_vec();
            let signed = credentials.sign_transcript(&raw)?;
            let mut body = Vec::new();
            signed.serialize(&mut body);
            handshake.send_message(MessageType::CertificateVerify, &body)?;
        }
        handshake.seal_transcript();

        let provider = self.config.crypto_provider().clone();
        let (key_len, iv_len) = provider.key_lengths(suite)?;
        let keys = derive_key_block(
            &master,
            &client_random.0,
            &server_hello.random.0,
            key_len,
            iv_len,
        );
        let cipher = provider.new_cipher(suite, &keys, true)?;
        let secure_epoch = handshake.records().init_pending_epoch(cipher)?;

        let client_vd = verify_data(&master, true, &handshake.transcript_hash());
        handshake.send_message(MessageType::Finished, &client_vd)?;

        // Server answers with an optional ticket, then its Finished.
        let mut seen_ticket = false;
        loop {
            let expected = verify_data(&master, false, &handshake.transcript_hash());
            let msg = handshake.receive_message()?;
            match msg.msg_type {
                MessageType::NewSessionTicket if expect_ticket && !seen_ticket => {
                    seen_ticket = true;
                    self.deliver_ticket(&msg)?;
                }
                MessageType::Finished => {
                    check_finished(&msg, &expected, secure_epoch)?;
                    break;
                }
                _ => return Err(Error::fatal(AlertDescription::UnexpectedMessage)),
            }
        }

        Ok(DtlsSession::new(
            server_hello.session_id.clone(),
            ProtocolVersion::DTLS1_2,
            suite,
            master,
            ems,
        ))
    }

    /// NewSessionTicket body: u32 lifetime hint, u16-length opaque ticket.
    fn deliver_ticket(&mut self, msg: &HandshakeMessage) -> Result<(), Error> {
        if msg.body.len() < 6 {
            return Err(Error::fatal(AlertDescription::DecodeError));
        }
        let len = u16::from_be_bytes([msg.body[4], msg.body[5]]) as usize;
        if msg.body.len() != 6 + len {
            return Err(Error::fatal(AlertDescription::DecodeError));
        }
        self.policy.new_session_ticket(&msg.body[6..]);
        Ok(())
    }
}
