//! Record layer over an unreliable datagram transport.
//!
//! Owns the epoch arena, sequence allocation, replay protection, record
//! protection and the routing of non-data content (alerts, ChangeCipherSpec,
//! heartbeats, post-handshake retransmits). Everything above it deals in
//! plaintext payloads.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use log::{debug, trace, warn};

use crate::buffer::ByteQueue;
use crate::crypto::{Cipher, NullCipher};
use crate::epoch::Epoch;
use crate::heartbeat::{Heartbeat, HeartbeatEvent};
use crate::message::{
    Alert, AlertDescription, AlertLevel, ContentType, HeartbeatMessage, HeartbeatMessageType,
    MessageType, ProtocolVersion, Record, MAX_CIPHER_EXPANSION, MAX_FRAGMENT_LEN,
    RECORD_HEADER_LEN,
};
use crate::timer::Deadline;
use crate::transport::DatagramTransport;
use crate::Error;

/// How long after handshake completion a duplicated final flight from the
/// peer is still answered with a retransmission (twice the maximum segment
/// lifetime).
const RETRANSMIT_RETAIN: Duration = Duration::from_secs(240);

/// Post-handshake responder for the peer's duplicated final flight.
///
/// Built by the handshake when our side sent the last flight. Receives the
/// decrypted handshake fragments the peer re-sends and decides when the
/// whole flight has been seen again, at which point it hands back the
/// records to retransmit.
pub(crate) trait HandshakeRetransmit: Send {
    fn received_handshake_record(
        &mut self,
        epoch: u16,
        body: &[u8],
    ) -> Result<Vec<RetransmitRecord>, Error>;
}

/// One record the retransmit responder wants sent.
pub(crate) struct RetransmitRecord {
    pub content_type: ContentType,
    pub epoch: u16,
    pub payload: Vec<u8>,
}

struct Retransmit {
    /// The peer's previous epoch; duplicated flights start arriving there.
    epoch: u16,
    expiry: Instant,
    handler: Box<dyn HandshakeRetransmit>,
}

enum Disposition {
    Consumed,
    Deliver(Vec<u8>, u16),
}

pub(crate) struct DatagramRecordLayer {
    transport: Box<dyn DatagramTransport>,
    /// Unprocessed tail of the most recent datagram. A datagram can carry
    /// several records but `receive` surfaces one payload at a time.
    queue: ByteQueue,
    /// All epochs seen so far, indexed by epoch number. Old epochs are kept
    /// so flight resends and duplicated peer flights still decode.
    epochs: Vec<Epoch>,
    read_epoch: u16,
    write_epoch: u16,
    pending_epoch: Option<u16>,
    write_version: ProtocolVersion,
    in_handshake: bool,
    closed: bool,
    heartbeat: Option<Heartbeat>,
    retransmit: Option<Retransmit>,
    /// Sequence allocation and the datagram write are one atomic step, so a
    /// resend triggered from the receive path cannot interleave with a send.
    send_lock: Mutex<()>,
}

impl DatagramRecordLayer {
    pub fn new(transport: Box<dyn DatagramTransport>) -> Self {
        DatagramRecordLayer {
            transport,
            queue: ByteQueue::new(),
            epochs: vec![Epoch::new(0, Box::new(NullCipher))],
            read_epoch: 0,
            write_epoch: 0,
            pending_epoch: None,
            // Initial flights go out with the DTLS 1.0 record version per
            // RFC 6347; bumped once a version is negotiated.
            write_version: ProtocolVersion::DTLS1_0,
            in_handshake: true,
            closed: false,
            heartbeat: None,
            retransmit: None,
            send_lock: Mutex::new(()),
        }
    }

    pub fn read_epoch(&self) -> u16 {
        self.read_epoch
    }

    pub fn write_epoch(&self) -> u16 {
        self.write_epoch
    }

    pub fn set_version(&mut self, version: ProtocolVersion) {
        self.write_version = version;
    }

    pub fn set_heartbeat(&mut self, heartbeat: Heartbeat) {
        self.heartbeat = Some(heartbeat);
    }

    /// Install the cipher for the next epoch. The write side pivots when we
    /// send Finished, the read side when the peer's ChangeCipherSpec arrives.
    pub fn init_pending_epoch(&mut self, cipher: Box<dyn Cipher>) -> Result<u16, Error> {
        if self.pending_epoch.is_some() {
            return Err(Error::Config("pending epoch already initialized".into()));
        }
        let number = self.epochs.len() as u16;
        self.epochs.push(Epoch::new(number, cipher));
        self.pending_epoch = Some(number);
        Ok(number)
    }

    /// Leave the handshake phase. If `handler` is set, the peer's duplicated
    /// final flight keeps being answered for a grace period.
    pub fn handshake_successful(&mut self, handler: Option<Box<dyn HandshakeRetransmit>>) {
        self.in_handshake = false;
        self.pending_epoch = None;
        self.retransmit = handler.map(|handler| Retransmit {
            epoch: self.read_epoch.saturating_sub(1),
            expiry: Instant::now() + RETRANSMIT_RETAIN,
            handler,
        });
    }

    /// Largest plaintext payload `send` accepts.
    pub fn send_limit(&self) -> usize {
        let wire = self.transport.send_limit().saturating_sub(RECORD_HEADER_LEN);
        // The pending cipher is the more constrained one once keys exist.
        let epoch = self.pending_epoch.unwrap_or(self.write_epoch);
        let cipher = self.epochs[epoch as usize].cipher_ref();
        cipher.plaintext_limit(wire).min(MAX_FRAGMENT_LEN)
    }

    /// Largest plaintext payload `receive` can deliver.
    pub fn receive_limit(&self) -> usize {
        let wire = self
            .transport
            .receive_limit()
            .saturating_sub(RECORD_HEADER_LEN);
        let cipher = self.epochs[self.read_epoch as usize].cipher_ref();
        cipher.plaintext_limit(wire).min(MAX_FRAGMENT_LEN)
    }

    /// Protect and send one payload in the current write epoch.
    ///
    /// Sending a Finished message pivots the write side to the pending
    /// epoch, preceded by a ChangeCipherSpec record in the old epoch.
    pub fn send(&mut self, content_type: ContentType, payload: &[u8]) -> Result<(), Error> {
        if self.closed {
            return Err(Error::Closed);
        }
        if content_type == ContentType::ApplicationData && self.in_handshake {
            return Err(Error::Config(
                "application data before handshake completion".into(),
            ));
        }

        if content_type == ContentType::Handshake {
            if let Some(pending) = self.pending_epoch {
                let is_finished = payload.first().copied().map(MessageType::from_u8)
                    == Some(MessageType::Finished);
                if is_finished && self.write_epoch != pending {
                    self.send_record(ContentType::ChangeCipherSpec, &[1], self.write_epoch)?;
                    self.write_epoch = pending;
                }
            }
        }

        self.send_record(content_type, payload, self.write_epoch)
    }

    /// Send in an explicit epoch without any pivoting. Used for flight
    /// resends, which must reuse the epoch each record originally went
    /// out in.
    pub fn send_with_epoch(
        &mut self,
        content_type: ContentType,
        payload: &[u8],
        epoch: u16,
    ) -> Result<(), Error> {
        if self.closed {
            return Err(Error::Closed);
        }
        if (epoch as usize) >= self.epochs.len() {
            return Err(Error::Config(format!("no such epoch {epoch}")));
        }
        self.send_record(content_type, payload, epoch)
    }

    fn send_record(
        &mut self,
        content_type: ContentType,
        payload: &[u8],
        epoch_number: u16,
    ) -> Result<(), Error> {
        let version = self.write_version;
        let _guard = self.send_lock.lock().unwrap_or_else(|e| e.into_inner());

        let epoch = &mut self.epochs[epoch_number as usize];
        let seq = epoch.allocate_sequence()?;
        let seq_with_epoch = (epoch_number as u64) << 48 | seq;
        let fragment = epoch
            .cipher()
            .encode_plaintext(seq_with_epoch, content_type, version, payload)?;

        let record = Record {
            content_type,
            version,
            epoch: epoch_number,
            sequence_number: seq,
            fragment: &fragment,
        };
        let mut datagram = Vec::with_capacity(RECORD_HEADER_LEN + fragment.len());
        record.serialize(&mut datagram);

        trace!(
            "send {} record, epoch {} seq {} ({} bytes)",
            content_type,
            epoch_number,
            seq,
            payload.len()
        );
        self.transport.send(&datagram)
    }

    /// Receive the next deliverable payload, waiting at most `wait` (zero
    /// waits forever). During the handshake that is handshake content, after
    /// it application data; everything else is routed internally. Returns
    /// the payload length and the epoch it arrived in.
    pub fn receive(
        &mut self,
        buf: &mut [u8],
        wait: Duration,
    ) -> Result<Option<(usize, u16)>, Error> {
        match self.receive_inner(buf, wait) {
            Ok(out) => Ok(out),
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    fn receive_inner(
        &mut self,
        buf: &mut [u8],
        wait: Duration,
    ) -> Result<Option<(usize, u16)>, Error> {
        if self.closed {
            return Err(Error::Closed);
        }

        let deadline = Deadline::after(wait);
        let mut datagram = vec![0u8; self.transport.receive_limit().max(RECORD_HEADER_LEN)];

        loop {
            // Records staged from an earlier datagram come first.
            if let Some(out) = self.next_staged_record(buf)? {
                return Ok(Some(out));
            }

            let now = Instant::now();
            if deadline.expired(now) {
                return Ok(None);
            }

            let heartbeat_deadline = self.heartbeat.as_ref().and_then(|h| h.next_deadline());
            if let Some(at) = heartbeat_deadline {
                if now >= at {
                    self.heartbeat_deadline()?;
                    continue;
                }
            }

            let bound = [
                deadline.remaining(now),
                heartbeat_deadline.map(|at| at.saturating_duration_since(now)),
            ]
            .into_iter()
            .flatten()
            .min();
            // Zero means forever to the transport, so a bounded wait must
            // stay non-zero.
            let chunk = match bound {
                None => Duration::ZERO,
                Some(d) => d.max(Duration::from_millis(1)),
            };

            match self.transport.receive(&mut datagram, chunk)? {
                Some(n) => {
                    self.queue.add_data(&datagram[..n]);
                }
                None => {
                    // Chunk timeout; the loop re-evaluates the deadlines.
                }
            }
        }
    }

    /// Drain complete records from the staging queue, one at a time, until
    /// one is deliverable or the queue runs dry.
    fn next_staged_record(&mut self, out: &mut [u8]) -> Result<Option<(usize, u16)>, Error> {
        while self.queue.available() >= RECORD_HEADER_LEN {
            let fragment_len = self.queue.read_u16(RECORD_HEADER_LEN - 2) as usize;
            let total = RECORD_HEADER_LEN + fragment_len;
            if self.queue.available() < total {
                // Framing is lost, the rest of the datagram is garbage.
                debug!(
                    "dropping truncated record tail ({} bytes)",
                    self.queue.available()
                );
                self.queue.clear();
                return Ok(None);
            }

            let mut raw = vec![0u8; total];
            self.queue.read(0, &mut raw);
            self.queue.remove_data(total);

            let record = match Record::parse(&raw) {
                Ok((_, record)) => record,
                Err(_) => {
                    debug!("dropping malformed record ({} bytes)", raw.len());
                    continue;
                }
            };

            match self.process_record(&record)? {
                Disposition::Consumed => {}
                Disposition::Deliver(plaintext, epoch) => {
                    if plaintext.len() > out.len() {
                        warn!(
                            "dropping {} byte record exceeding receive buffer",
                            plaintext.len()
                        );
                        continue;
                    }
                    out[..plaintext.len()].copy_from_slice(&plaintext);
                    return Ok(Some((plaintext.len(), epoch)));
                }
            }
        }
        if !self.queue.is_empty() {
            // A leftover shorter than a record header is garbage.
            debug!(
                "dropping {} byte datagram remainder",
                self.queue.available()
            );
            self.queue.clear();
        }
        Ok(None)
    }

    fn process_record(&mut self, record: &Record) -> Result<Disposition, Error> {
        if !record.version.is_dtls() {
            trace!("dropping record with non-DTLS version {}", record.version);
            return Ok(Disposition::Consumed);
        }

        if record.fragment.len() > MAX_FRAGMENT_LEN + MAX_CIPHER_EXPANSION {
            return Err(Error::fatal(AlertDescription::RecordOverflow));
        }

        // Epoch routing. Only the current read epoch is live; after the
        // handshake, the peer's previous epoch is still accepted for
        // duplicated final flights.
        let retransmit_epoch = self.retransmit.as_ref().map(|r| r.epoch);
        let acceptable = record.epoch == self.read_epoch
            || (!self.in_handshake
                && retransmit_epoch == Some(record.epoch)
                && matches!(
                    record.content_type,
                    ContentType::Handshake | ContentType::ChangeCipherSpec
                ));
        if !acceptable {
            trace!(
                "dropping {} record for epoch {} (read epoch {})",
                record.content_type,
                record.epoch,
                self.read_epoch
            );
            return Ok(Disposition::Consumed);
        }

        let epoch = &self.epochs[record.epoch as usize];
        if !epoch.replay_check(record.sequence_number) {
            trace!(
                "dropping replayed record, epoch {} seq {}",
                record.epoch,
                record.sequence_number
            );
            return Ok(Disposition::Consumed);
        }

        let seq = record.seq_with_epoch();
        let plaintext = match self.epochs[record.epoch as usize].cipher().decode_ciphertext(
            seq,
            record.content_type,
            record.version,
            record.fragment,
        ) {
            Ok(p) => p,
            Err(e) => {
                // Records failing authentication are discarded, not fatal;
                // an attacker must not be able to kill the connection with
                // garbage.
                debug!("dropping undecodable record: {}", e);
                return Ok(Disposition::Consumed);
            }
        };
        if plaintext.len() > MAX_FRAGMENT_LEN {
            return Err(Error::fatal(AlertDescription::RecordOverflow));
        }
        self.epochs[record.epoch as usize].replay_commit(record.sequence_number);

        match record.content_type {
            ContentType::ChangeCipherSpec => {
                if plaintext.as_slice() != [1] {
                    debug!("dropping malformed ChangeCipherSpec");
                } else if record.epoch == self.read_epoch {
                    if let Some(pending) = self.pending_epoch {
                        debug!("read epoch {} -> {}", self.read_epoch, pending);
                        self.read_epoch = pending;
                    }
                }
                // A duplicate CCS after the pivot is just ignored.
                Ok(Disposition::Consumed)
            }

            ContentType::Alert => self.process_alert(&plaintext),

            ContentType::Heartbeat => {
                self.process_heartbeat(&plaintext)?;
                Ok(Disposition::Consumed)
            }

            ContentType::Handshake => {
                if self.in_handshake {
                    Ok(Disposition::Deliver(plaintext, record.epoch))
                } else {
                    self.process_post_handshake(record.epoch, &plaintext)?;
                    Ok(Disposition::Consumed)
                }
            }

            ContentType::ApplicationData => {
                if self.in_handshake {
                    trace!("dropping application data during handshake");
                    Ok(Disposition::Consumed)
                } else {
                    Ok(Disposition::Deliver(plaintext, record.epoch))
                }
            }

            ContentType::Unknown(v) => {
                trace!("dropping record with unknown content type {}", v);
                Ok(Disposition::Consumed)
            }
        }
    }

    fn process_alert(&mut self, plaintext: &[u8]) -> Result<Disposition, Error> {
        let alert = match Alert::parse(plaintext) {
            Ok((_, alert)) => alert,
            Err(_) => {
                debug!("dropping malformed alert");
                return Ok(Disposition::Consumed);
            }
        };

        if alert.description == AlertDescription::CloseNotify {
            return Err(Error::Closed);
        }
        if alert.level == AlertLevel::Fatal {
            return Err(Error::PeerAlert(alert.description));
        }
        debug!("ignoring warning alert: {}", alert.description);
        Ok(Disposition::Consumed)
    }

    fn process_heartbeat(&mut self, plaintext: &[u8]) -> Result<(), Error> {
        let message = match HeartbeatMessage::parse(plaintext) {
            Ok((_, m)) => m,
            Err(_) => {
                debug!("dropping malformed heartbeat");
                return Ok(());
            }
        };

        match message.message_type {
            HeartbeatMessageType::Request => {
                let respond = self
                    .heartbeat
                    .as_ref()
                    .map(|h| h.responds_to_requests())
                    .unwrap_or(false);
                if respond && !self.in_handshake {
                    let mut body = Vec::new();
                    HeartbeatMessage::response(message.payload).serialize(&mut body);
                    self.send(ContentType::Heartbeat, &body)?;
                }
            }
            HeartbeatMessageType::Response => {
                if let Some(hb) = self.heartbeat.as_mut() {
                    hb.on_response(&message.payload, Instant::now());
                }
            }
            HeartbeatMessageType::Unknown(v) => {
                debug!("dropping heartbeat with unknown type {}", v);
            }
        }
        Ok(())
    }

    /// Handshake content after the handshake: the peer did not get our
    /// final flight and is re-sending theirs.
    fn process_post_handshake(&mut self, epoch: u16, plaintext: &[u8]) -> Result<(), Error> {
        let mut rt = match self.retransmit.take() {
            Some(rt) => rt,
            None => {
                trace!("dropping post-handshake handshake record");
                return Ok(());
            }
        };
        if Instant::now() >= rt.expiry {
            debug!("retransmit window expired, dropping responder");
            return Ok(());
        }

        let replies = rt.handler.received_handshake_record(epoch, plaintext)?;
        self.retransmit = Some(rt);

        for reply in replies {
            self.send_with_epoch(reply.content_type, &reply.payload, reply.epoch)?;
        }
        Ok(())
    }

    fn heartbeat_deadline(&mut self) -> Result<(), Error> {
        let event = match self.heartbeat.as_mut() {
            Some(hb) => hb.on_deadline(Instant::now()),
            None => return Ok(()),
        };
        match event {
            HeartbeatEvent::SendRequest(payload) => {
                debug!("sending heartbeat request");
                let mut body = Vec::new();
                HeartbeatMessage::request(payload).serialize(&mut body);
                self.send(ContentType::Heartbeat, &body)
            }
            HeartbeatEvent::PeerDead => Err(Error::HeartbeatTimeout),
        }
    }

    /// Tear down after a fatal error, sending the matching alert when the
    /// error calls for one.
    pub fn fail(&mut self, error: &Error) {
        if self.closed {
            return;
        }
        let alert = match error {
            // The peer's close_notify is answered with our own.
            Error::Closed => Some(Alert {
                level: AlertLevel::Warning,
                description: AlertDescription::CloseNotify,
            }),
            e => e.alert_to_send().map(|description| Alert {
                level: AlertLevel::Fatal,
                description,
            }),
        };
        if let Some(alert) = alert {
            let mut body = Vec::new();
            alert.serialize(&mut body);
            // Best effort; the connection is going away either way.
            let _ = self.send_record(ContentType::Alert, &body, self.write_epoch);
        }
        self.closed = true;
        let _ = self.transport.close();
    }

    /// Graceful close: send close_notify and close the transport.
    pub fn close(&mut self) -> Result<(), Error> {
        if self.closed {
            return Ok(());
        }
        let mut body = Vec::new();
        Alert {
            level: AlertLevel::Warning,
            description: AlertDescription::CloseNotify,
        }
        .serialize(&mut body);
        let _ = self.send_record(ContentType::Alert, &body, self.write_epoch);
        self.closed = true;
        self.transport.close()
    }
}
