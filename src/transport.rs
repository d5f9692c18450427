use std::io;
use std::net::UdpSocket;
use std::time::Duration;

use crate::record_layer::DatagramRecordLayer;
use crate::session::DtlsSession;
use crate::Error;

/// Raw unreliable datagram I/O supplied by the caller.
///
/// `receive` must report timeouts distinctly from data by returning
/// `Ok(None)`. A `wait` of zero means block indefinitely.
pub trait DatagramTransport: Send {
    fn receive(&mut self, buf: &mut [u8], wait: Duration) -> Result<Option<usize>, Error>;

    fn send(&mut self, datagram: &[u8]) -> Result<(), Error>;

    /// Largest datagram this transport can receive.
    fn receive_limit(&self) -> usize;

    /// Largest datagram this transport will send.
    fn send_limit(&self) -> usize;

    fn close(&mut self) -> Result<(), Error>;
}

/// [`DatagramTransport`] over a connected UDP socket.
pub struct UdpTransport {
    socket: UdpSocket,
    mtu: usize,
}

impl UdpTransport {
    /// The socket must already be connected to the peer.
    pub fn new(socket: UdpSocket, mtu: usize) -> Self {
        UdpTransport { socket, mtu }
    }
}

impl DatagramTransport for UdpTransport {
    fn receive(&mut self, buf: &mut [u8], wait: Duration) -> Result<Option<usize>, Error> {
        let timeout = if wait.is_zero() { None } else { Some(wait) };
        self.socket.set_read_timeout(timeout)?;

        match self.socket.recv(buf) {
            Ok(n) => Ok(Some(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn send(&mut self, datagram: &[u8]) -> Result<(), Error> {
        self.socket.send(datagram)?;
        Ok(())
    }

    fn receive_limit(&self) -> usize {
        self.mtu
    }

    fn send_limit(&self) -> usize {
        self.mtu
    }

    fn close(&mut self) -> Result<(), Error> {
        // UDP sockets close on drop.
        Ok(())
    }
}

/// A connected DTLS endpoint: the record layer after a completed handshake.
///
/// Callers observe either this object or an error from `connect`/`accept`,
/// never a partially established state.
pub struct DtlsTransport {
    records: DatagramRecordLayer,
    session: DtlsSession,
}

impl DtlsTransport {
    pub(crate) fn new(records: DatagramRecordLayer, session: DtlsSession) -> Self {
        DtlsTransport { records, session }
    }

    /// The negotiated session, usable for later resumption.
    pub fn session(&self) -> &DtlsSession {
        &self.session
    }

    /// Largest application datagram `send` accepts.
    pub fn send_limit(&self) -> usize {
        self.records.send_limit()
    }

    pub fn receive_limit(&self) -> usize {
        self.records.receive_limit()
    }

    /// Protect and send one application datagram.
    pub fn send(&mut self, data: &[u8]) -> Result<(), Error> {
        if data.len() > self.records.send_limit() {
            return Err(Error::Config(format!(
                "application datagram of {} bytes exceeds send limit {}",
                data.len(),
                self.records.send_limit()
            )));
        }
        self.records
            .send(crate::message::ContentType::ApplicationData, data)
    }

    /// Receive one application datagram, waiting at most `wait`
    /// (zero = wait forever). `Ok(None)` is a timeout.
    pub fn receive(&mut self, buf: &mut [u8], wait: Duration) -> Result<Option<usize>, Error> {
        Ok(self.records.receive(buf, wait)?.map(|(n, _)| n))
    }

    /// Graceful close: sends close_notify and closes the transport.
    pub fn close(&mut self) -> Result<(), Error> {
        self.records.close()
    }
}
