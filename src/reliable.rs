//! Reliable handshake message exchange over the record layer.
//!
//! Handshake messages are fragmented to the datagram limit, reassembled out
//! of order within a bounded look-ahead window and retransmitted flight by
//! flight with exponential backoff. The transcript hash is maintained here
//! so both sides hash messages in delivery order, not arrival order.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use log::{debug, trace};
use sha2::{Digest, Sha256};

use crate::message::{ContentType, FragmentHeader, MessageType, HANDSHAKE_HEADER_LEN};
use crate::reassembly::Reassembler;
use crate::record_layer::{DatagramRecordLayer, HandshakeRetransmit, RetransmitRecord};
use crate::timer::{Backoff, Deadline};
use crate::Error;

/// How many message sequence numbers past the next expected one we are
/// willing to buffer. Anything further ahead is ignored and must be
/// retransmitted by the peer.
const MAX_RECEIVE_AHEAD: u16 = 16;

/// Upper bound on a single handshake message body. Certificate chains are
/// the largest real messages and stay well under this.
const MAX_HANDSHAKE_LEN: usize = 1 << 18;

/// One fully reassembled handshake message.
#[derive(Debug)]
pub(crate) struct HandshakeMessage {
    pub msg_type: MessageType,
    pub body: Vec<u8>,
    /// Epoch the first fragment of the message arrived in. Lets the
    /// protocol check that Finished came in under the new keys.
    pub epoch: u16,
}

/// One message of the current outbound flight, kept in its on-the-wire
/// fragment form so a resend is byte-identical to the original send.
struct FlightEntry {
    fragments: Vec<Vec<u8>>,
    epoch: u16,
    /// Sending this message pivoted the write epoch, so a resend must be
    /// preceded by a ChangeCipherSpec in the prior epoch.
    pivoted: bool,
}

struct InboundEntry {
    reassembler: Reassembler,
    /// Epoch the first fragment arrived in.
    epoch: u16,
}

pub(crate) struct ReliableHandshake<'a> {
    records: &'a mut DatagramRecordLayer,
    transcript: Transcript,
    outbound_flight: Vec<FlightEntry>,
    /// True while we are in the receiving half of the flight rhythm. The
    /// edge back to sending is a flight boundary.
    receiving: bool,
    resend: Deadline,
    backoff: Backoff,
    next_send_seq: u16,
    next_receive_seq: u16,
    /// The flight currently being received, keyed by message sequence.
    /// Entries below `next_receive_seq` are delivered but kept for the
    /// boundary capture.
    current_inbound: BTreeMap<u16, InboundEntry>,
    /// The previously completed inbound flight, re-armed for duplicate
    /// detection. Seeing it complete again means the peer lost our reply.
    previous_inbound: BTreeMap<u16, InboundEntry>,
    handshake_deadline: Deadline,
}

impl<'a> ReliableHandshake<'a> {
    pub fn new(records: &'a mut DatagramRecordLayer, timeout: Duration) -> Self {
        ReliableHandshake {
            records,
            transcript: Transcript::new(),
            outbound_flight: Vec::new(),
            receiving: false,
            resend: Deadline::never(),
            backoff: Backoff::new(),
            next_send_seq: 0,
            next_receive_seq: 0,
            current_inbound: BTreeMap::new(),
            previous_inbound: BTreeMap::new(),
            handshake_deadline: Deadline::after(timeout),
        }
    }

    pub fn records(&mut self) -> &mut DatagramRecordLayer {
        self.records
    }

    /// Append one handshake message to the current outbound flight and send
    /// its fragments.
    pub fn send_message(&mut self, msg_type: MessageType, body: &[u8]) -> Result<(), Error> {
        if body.len() > MAX_HANDSHAKE_LEN {
            return Err(Error::Config(format!(
                "handshake message of {} bytes is too large",
                body.len()
            )));
        }

        if self.receiving {
            self.flight_boundary();
        }

        let message_seq = self.next_send_seq;
        self.next_send_seq = self.next_send_seq.checked_add(1).ok_or_else(|| {
            Error::Config("handshake message sequence space exhausted".into())
        })?;

        if msg_type.in_transcript() {
            self.transcript.add(msg_type, message_seq, body);
        }

        let limit = self
            .records
            .send_limit()
            .saturating_sub(HANDSHAKE_HEADER_LEN)
            .max(1);
        let fragments = encode_fragments(msg_type, message_seq, body, limit);

        let epoch_before = self.records.write_epoch();
        for fragment in &fragments {
            self.records.send(ContentType::Handshake, fragment)?;
        }
        let epoch_after = self.records.write_epoch();

        debug!(
            "sent {} (seq {}, {} bytes, {} fragments)",
            msg_type,
            message_seq,
            body.len(),
            fragments.len()
        );

        self.outbound_flight.push(FlightEntry {
            fragments,
            epoch: epoch_after,
            pivoted: epoch_after != epoch_before,
        });
        self.resend = Deadline::at(Instant::now() + self.backoff.current());
        Ok(())
    }

    /// Block until the next expected handshake message is complete,
    /// resending the outbound flight on timeout.
    pub fn receive_message(&mut self) -> Result<HandshakeMessage, Error> {
        self.receiving = true;
        let mut buf = vec![0u8; self.records.receive_limit().max(HANDSHAKE_HEADER_LEN)];

        loop {
            if let Some(message) = self.take_next_complete() {
                return Ok(message);
            }

            let now = Instant::now();
            if self.handshake_deadline.expired(now) {
                return Err(Error::HandshakeTimeout);
            }
            if !self.outbound_flight.is_empty() && self.resend.expired(now) {
                debug!("resend timeout, retransmitting flight");
                self.resend_flight()?;
                self.backoff.advance();
                self.resend = Deadline::at(Instant::now() + self.backoff.current());
            }

            let now = Instant::now();
            let bound = [
                self.handshake_deadline.remaining(now),
                if self.outbound_flight.is_empty() {
                    None
                } else {
                    self.resend.remaining(now)
                },
            ]
            .into_iter()
            .flatten()
            .min();
            let wait = match bound {
                None => Duration::ZERO,
                Some(d) => d.max(Duration::from_millis(1)),
            };

            if let Some((n, epoch)) = self.records.receive(&mut buf, wait)? {
                let data = buf[..n].to_vec();
                self.process_record(&data, epoch)?;
            }
        }
    }

    fn take_next_complete(&mut self) -> Option<HandshakeMessage> {
        let entry = self.current_inbound.get(&self.next_receive_seq)?;
        let body = entry.reassembler.body_if_complete()?.to_vec();
        let msg_type = entry.reassembler.msg_type();
        let epoch = entry.epoch;

        if msg_type.in_transcript() {
            self.transcript.add(msg_type, self.next_receive_seq, &body);
        }

        trace!(
            "delivering {} (seq {}, {} bytes)",
            msg_type,
            self.next_receive_seq,
            body.len()
        );
        // The entry stays behind for the flight boundary capture.
        self.next_receive_seq += 1;
        Some(HandshakeMessage {
            msg_type,
            body,
            epoch,
        })
    }

    /// Split one received record into handshake fragments and route them.
    fn process_record(&mut self, data: &[u8], epoch: u16) -> Result<(), Error> {
        let mut input = data;
        while !input.is_empty() {
            let (rest, header) = match FragmentHeader::parse(input) {
                Ok(parsed) => parsed,
                Err(_) => {
                    trace!("dropping malformed handshake fragment");
                    return Ok(());
                }
            };
            let fragment_len = header.fragment_length as usize;
            if rest.len() < fragment_len {
                trace!("dropping truncated handshake fragment");
                return Ok(());
            }
            let (fragment, rest) = rest.split_at(fragment_len);
            input = rest;

            if header.fragment_offset as usize + fragment_len > header.length as usize
                || header.length as usize > MAX_HANDSHAKE_LEN
            {
                trace!("dropping inconsistent handshake fragment");
                continue;
            }

            self.route_fragment(&header, fragment, epoch)?;
        }
        Ok(())
    }

    fn route_fragment(
        &mut self,
        header: &FragmentHeader,
        fragment: &[u8],
        epoch: u16,
    ) -> Result<(), Error> {
        let seq = header.message_seq;

        if let Some(entry) = self.current_inbound.get_mut(&seq) {
            entry.reassembler.contribute(
                header.msg_type,
                header.length as usize,
                header.fragment_offset as usize,
                fragment,
            );
            return Ok(());
        }

        if seq < self.next_receive_seq {
            return self.previous_flight_fragment(header, fragment, epoch);
        }

        if seq >= self.next_receive_seq.saturating_add(MAX_RECEIVE_AHEAD) {
            trace!(
                "ignoring fragment {} ahead of window (next {})",
                seq,
                self.next_receive_seq
            );
            return Ok(());
        }

        let mut entry = InboundEntry {
            reassembler: Reassembler::new(header.msg_type, header.length as usize),
            epoch,
        };
        entry.reassembler.contribute(
            header.msg_type,
            header.length as usize,
            header.fragment_offset as usize,
            fragment,
        );
        self.current_inbound.insert(seq, entry);
        Ok(())
    }

    /// A fragment of a flight we already answered. When the peer manages to
    /// re-deliver that entire flight, our reply was lost; resend it.
    fn previous_flight_fragment(
        &mut self,
        header: &FragmentHeader,
        fragment: &[u8],
        epoch: u16,
    ) -> Result<(), Error> {
        let Some(entry) = self.previous_inbound.get_mut(&header.message_seq) else {
            return Ok(());
        };
        if entry.epoch != epoch {
            return Ok(());
        }
        entry.reassembler.contribute(
            header.msg_type,
            header.length as usize,
            header.fragment_offset as usize,
            fragment,
        );

        let complete = !self.previous_inbound.is_empty()
            && self
                .previous_inbound
                .values()
                .all(|e| e.reassembler.is_complete());
        if complete {
            debug!("peer re-sent its previous flight, retransmitting ours");
            self.resend_flight()?;
            self.resend = Deadline::at(Instant::now() + self.backoff.current());
            for entry in self.previous_inbound.values_mut() {
                entry.reassembler.reset();
            }
        }
        Ok(())
    }

    /// Resend the outbound flight verbatim, re-emitting ChangeCipherSpec
    /// wherever the flight pivoted epochs.
    fn resend_flight(&mut self) -> Result<(), Error> {
        for entry in &self.outbound_flight {
            if entry.pivoted {
                self.records.send_with_epoch(
                    ContentType::ChangeCipherSpec,
                    &[1],
                    entry.epoch.saturating_sub(1),
                )?;
            }
            for fragment in &entry.fragments {
                self.records
                    .send_with_epoch(ContentType::Handshake, fragment, entry.epoch)?;
            }
        }
        Ok(())
    }

    /// Transition from receiving to sending: capture the completed inbound
    /// flight for duplicate detection and start a fresh outbound flight.
    fn flight_boundary(&mut self) {
        self.receiving = false;
        let mut captured = std::mem::take(&mut self.current_inbound);
        for entry in captured.values_mut() {
            entry.reassembler.reset();
        }
        self.previous_inbound = captured;
        self.outbound_flight.clear();
        self.backoff = Backoff::new();
        self.resend = Deadline::never();
    }

    /// Drop transcript state accumulated before a HelloVerifyRequest round
    /// trip; the replayed ClientHello starts the hash over.
    pub fn reset_transcript(&mut self) {
        self.transcript = Transcript::new();
    }

    /// SHA-256 over all transcript messages so far.
    pub fn transcript_hash(&self) -> Vec<u8> {
        self.transcript.current_hash()
    }

    /// The raw concatenated transcript messages, as long as they are
    /// retained for signing.
    pub fn transcript_messages(&self) -> Option<&[u8]> {
        self.transcript.raw_messages()
    }

    /// Stop retaining raw transcript messages; only the running hash is
    /// needed from here on.
    pub fn seal_transcript(&mut self) {
        self.transcript.seal();
    }

    /// End the handshake. If our side sent the final flight, returns the
    /// responder that answers the peer's duplicated last flight.
    pub fn finish(self) -> Option<Box<dyn HandshakeRetransmit>> {
        if self.receiving {
            // The peer sent last; it re-arms its own responder.
            return None;
        }
        let mut previous = self.previous_inbound;
        for entry in previous.values_mut() {
            entry.reassembler.reset();
        }
        Some(Box::new(RetransmitResponder {
            previous,
            flight: self.outbound_flight,
        }))
    }
}

/// Parse a complete handshake body, rejecting trailing bytes.
pub(crate) fn parse_full<'a, T, F>(body: &'a [u8], parser: F) -> Result<T, Error>
where
    F: Fn(&'a [u8]) -> nom::IResult<&'a [u8], T>,
{
    match parser(body) {
        Ok((rest, value)) if rest.is_empty() => Ok(value),
        _ => Err(Error::fatal(crate::message::AlertDescription::DecodeError)),
    }
}

/// The peer's Finished must carry the expected verify_data and arrive under
/// the new epoch.
pub(crate) fn check_finished(
    msg: &HandshakeMessage,
    expected: &[u8],
    secure_epoch: u16,
) -> Result<(), Error> {
    use crate::message::AlertDescription;
    if msg.epoch != secure_epoch {
        return Err(Error::fatal(AlertDescription::UnexpectedMessage));
    }
    if msg.body != expected {
        return Err(Error::fatal(AlertDescription::DecryptError));
    }
    Ok(())
}

/// Splits a handshake message into on-the-wire fragments of at most `limit`
/// body bytes each. An empty body still yields one empty fragment.
fn encode_fragments(
    msg_type: MessageType,
    message_seq: u16,
    body: &[u8],
    limit: usize,
) -> Vec<Vec<u8>> {
    let mut fragments = Vec::new();
    let mut offset = 0;

    loop {
        let chunk = limit.min(body.len() - offset);
        let header = FragmentHeader {
            msg_type,
            length: body.len() as u32,
            message_seq,
            fragment_offset: offset as u32,
            fragment_length: chunk as u32,
        };

        let mut fragment = Vec::with_capacity(HANDSHAKE_HEADER_LEN + chunk);
        header.serialize(&mut fragment);
        fragment.extend_from_slice(&body[offset..offset + chunk]);
        fragments.push(fragment);

        offset += chunk;
        if offset >= body.len() {
            break;
        }
    }

    fragments
}

/// Post-handshake duplicate-flight responder for the side that sent the
/// final flight. Lives inside the record layer once the handshake object is
/// gone.
struct RetransmitResponder {
    previous: BTreeMap<u16, InboundEntry>,
    flight: Vec<FlightEntry>,
}

impl HandshakeRetransmit for RetransmitResponder {
    fn received_handshake_record(
        &mut self,
        epoch: u16,
        body: &[u8],
    ) -> Result<Vec<RetransmitRecord>, Error> {
        let mut input = body;
        while !input.is_empty() {
            let (rest, header) = match FragmentHeader::parse(input) {
                Ok(parsed) => parsed,
                Err(_) => return Ok(Vec::new()),
            };
            let fragment_len = header.fragment_length as usize;
            if rest.len() < fragment_len {
                return Ok(Vec::new());
            }
            let (fragment, rest) = rest.split_at(fragment_len);
            input = rest;

            let Some(entry) = self.previous.get_mut(&header.message_seq) else {
                continue;
            };
            if entry.epoch != epoch {
                continue;
            }
            entry.reassembler.contribute(
                header.msg_type,
                header.length as usize,
                header.fragment_offset as usize,
                fragment,
            );
        }

        let complete = !self.previous.is_empty()
            && self.previous.values().all(|e| e.reassembler.is_complete());
        if !complete {
            return Ok(Vec::new());
        }

        debug!("peer re-sent its final flight, answering with ours");
        for entry in self.previous.values_mut() {
            entry.reassembler.reset();
        }

        let mut replies = Vec::new();
        for entry in &self.flight {
            if entry.pivoted {
                replies.push(RetransmitRecord {
                    content_type: ContentType::ChangeCipherSpec,
                    epoch: entry.epoch.saturating_sub(1),
                    payload: vec![1],
                });
            }
            for fragment in &entry.fragments {
                replies.push(RetransmitRecord {
                    content_type: ContentType::Handshake,
                    epoch: entry.epoch,
                    payload: fragment.clone(),
                });
            }
        }
        Ok(replies)
    }
}

/// Running transcript hash plus, until sealed, the raw message bytes for
/// signature payloads. Messages are hashed with a reconstructed header as
/// if sent unfragmented.
struct Transcript {
    hash: Sha256,
    raw: Option<Vec<u8>>,
}

impl Transcript {
    fn new() -> Self {
        Transcript {
            hash: Sha256::new(),
            raw: Some(Vec::new()),
        }
    }

    fn add(&mut self, msg_type: MessageType, message_seq: u16, body: &[u8]) {
        let header = FragmentHeader {
            msg_type,
            length: body.len() as u32,
            message_seq,
            fragment_offset: 0,
            fragment_length: body.len() as u32,
        };
        let mut buf = Vec::with_capacity(HANDSHAKE_HEADER_LEN + body.len());
        header.serialize(&mut buf);
        buf.extend_from_slice(body);

        self.hash.update(&buf);
        if let Some(raw) = &mut self.raw {
            raw.extend_from_slice(&buf);
        }
    }

    fn current_hash(&self) -> Vec<u8> {
        self.hash.clone().finalize().to_vec()
    }

    fn raw_messages(&self) -> Option<&[u8]> {
        self.raw.as_deref()
    }

    fn seal(&mut self) {
        self.raw = None;
    }
}
