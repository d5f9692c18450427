#![allow(dead_code)]

use std::collections::HashMap;
use std::io;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use zeroize::Zeroizing;

use drtls::crypto::KeyExchange;
use drtls::{
    CertificateChain, CipherSuite, ClientPolicy, DatagramTransport, DtlsSession, Error, Random,
    ServerPolicy,
};

pub fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// One end of an in-memory datagram link built on channels.
pub struct PipeTransport {
    tx: mpsc::Sender<Vec<u8>>,
    rx: mpsc::Receiver<Vec<u8>>,
    mtu: usize,
}

pub fn pipe(mtu: usize) -> (PipeTransport, PipeTransport) {
    let (a_tx, a_rx) = mpsc::channel();
    let (b_tx, b_rx) = mpsc::channel();
    (
        PipeTransport {
            tx: a_tx,
            rx: b_rx,
            mtu,
        },
        PipeTransport {
            tx: b_tx,
            rx: a_rx,
            mtu,
        },
    )
}

fn peer_gone() -> Error {
    Error::Transport(io::Error::new(io::ErrorKind::BrokenPipe, "peer gone"))
}

impl DatagramTransport for PipeTransport {
    fn receive(&mut self, buf: &mut [u8], wait: Duration) -> Result<Option<usize>, Error> {
        let datagram = if wait.is_zero() {
            self.rx.recv().map_err(|_| peer_gone())?
        } else {
            match self.rx.recv_timeout(wait) {
                Ok(d) => d,
                Err(mpsc::RecvTimeoutError::Timeout) => return Ok(None),
                Err(mpsc::RecvTimeoutError::Disconnected) => return Err(peer_gone()),
            }
        };
        let n = datagram.len().min(buf.len());
        buf[..n].copy_from_slice(&datagram[..n]);
        Ok(Some(n))
    }

    fn send(&mut self, datagram: &[u8]) -> Result<(), Error> {
        self.tx.send(datagram.to_vec()).map_err(|_| peer_gone())
    }

    fn receive_limit(&self) -> usize {
        self.mtu
    }

    fn send_limit(&self) -> usize {
        self.mtu
    }

    fn close(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

/// Drops the outgoing datagrams whose 1-based send index is listed.
pub struct DropSends<T> {
    inner: T,
    drop: Vec<usize>,
    count: usize,
}

impl<T> DropSends<T> {
    pub fn new(inner: T, drop: Vec<usize>) -> Self {
        DropSends {
            inner,
            drop,
            count: 0,
        }
    }
}

impl<T: DatagramTransport> DatagramTransport for DropSends<T> {
    fn receive(&mut self, buf: &mut [u8], wait: Duration) -> Result<Option<usize>, Error> {
        self.inner.receive(buf, wait)
    }

    fn send(&mut self, datagram: &[u8]) -> Result<(), Error> {
        self.count += 1;
        if self.drop.contains(&self.count) {
            return Ok(());
        }
        self.inner.send(datagram)
    }

    fn receive_limit(&self) -> usize {
        self.inner.receive_limit()
    }

    fn send_limit(&self) -> usize {
        self.inner.send_limit()
    }

    fn close(&mut self) -> Result<(), Error> {
        self.inner.close()
    }
}

/// Sends every outgoing datagram twice.
pub struct Duplicate<T> {
    inner: T,
}

impl<T> Duplicate<T> {
    pub fn new(inner: T) -> Self {
        Duplicate { inner }
    }
}

impl<T: DatagramTransport> DatagramTransport for Duplicate<T> {
    fn receive(&mut self, buf: &mut [u8], wait: Duration) -> Result<Option<usize>, Error> {
        self.inner.receive(buf, wait)
    }

    fn send(&mut self, datagram: &[u8]) -> Result<(), Error> {
        self.inner.send(datagram)?;
        self.inner.send(datagram)
    }

    fn receive_limit(&self) -> usize {
        self.inner.receive_limit()
    }

    fn send_limit(&self) -> usize {
        self.inner.send_limit()
    }

    fn close(&mut self) -> Result<(), Error> {
        self.inner.close()
    }
}

/// Key exchange for tests: both sides already hold the premaster secret,
/// the exchange messages carry nothing of value.
struct SharedSecretExchange {
    secret: Vec<u8>,
}

impl KeyExchange for SharedSecretExchange {
    fn requires_server_key_exchange(&self) -> bool {
        false
    }

    fn process_server_key_exchange(&mut self, _body: &[u8]) -> Result<(), Error> {
        Ok(())
    }

    fn generate_client_key_exchange(&mut self) -> Result<Vec<u8>, Error> {
        Ok(vec![0])
    }

    fn process_client_key_exchange(&mut self, _body: &[u8]) -> Result<(), Error> {
        Ok(())
    }

    fn premaster_secret(&mut self) -> Result<Zeroizing<Vec<u8>>, Error> {
        Ok(Zeroizing::new(self.secret.clone()))
    }
}

pub const TEST_SUITE: CipherSuite = CipherSuite::PSK_AES128_GCM_SHA256;

pub struct TestClientPolicy {
    pub secret: Vec<u8>,
    pub resume: Option<DtlsSession>,
    pub tickets: Arc<Mutex<Vec<Vec<u8>>>>,
    pub supplemental: Option<Vec<u8>>,
    pub statuses: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl TestClientPolicy {
    pub fn new(secret: &[u8]) -> Self {
        TestClientPolicy {
            secret: secret.to_vec(),
            resume: None,
            tickets: Arc::new(Mutex::new(Vec::new())),
            supplemental: None,
            statuses: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl ClientPolicy for TestClientPolicy {
    fn cipher_suites(&self) -> Vec<CipherSuite> {
        vec![TEST_SUITE]
    }

    fn session_to_resume(&mut self) -> Option<DtlsSession> {
        self.resume.clone()
    }

    fn verify_server_certificate(
        &mut self,
        _chain: &drtls::CertificateChain,
    ) -> Result<(), Error> {
        Ok(())
    }

    fn key_exchange(
        &mut self,
        _suite: CipherSuite,
        _client_random: &Random,
        _server_random: &Random,
    ) -> Result<Box<dyn KeyExchange>, Error> {
        Ok(Box::new(SharedSecretExchange {
            secret: self.secret.clone(),
        }))
    }

    fn new_session_ticket(&mut self, ticket: &[u8]) {
        self.tickets.lock().unwrap().push(ticket.to_vec());
    }

    fn certificate_status(&mut self, status: &[u8]) -> Result<(), Error> {
        self.statuses.lock().unwrap().push(status.to_vec());
        Ok(())
    }

    fn supplemental_data(&mut self) -> Option<Vec<u8>> {
        self.supplemental.clone()
    }
}

pub type SessionCache = Arc<Mutex<HashMap<Vec<u8>, DtlsSession>>>;

pub struct TestServerPolicy {
    pub secret: Vec<u8>,
    pub sessions: SessionCache,
    pub ticket: Option<Vec<u8>>,
    pub chain: Option<CertificateChain>,
    pub status: Option<Vec<u8>>,
    pub supplemental: Option<Vec<u8>>,
}

impl TestServerPolicy {
    pub fn new(secret: &[u8]) -> Self {
        TestServerPolicy {
            secret: secret.to_vec(),
            sessions: Arc::new(Mutex::new(HashMap::new())),
            ticket: None,
            chain: None,
            status: None,
            supplemental: None,
        }
    }

    pub fn with_sessions(secret: &[u8], sessions: SessionCache) -> Self {
        TestServerPolicy {
            sessions,
            ..TestServerPolicy::new(secret)
        }
    }
}

impl ServerPolicy for TestServerPolicy {
    fn select_cipher_suite(&mut self, offered: &[CipherSuite]) -> Option<CipherSuite> {
        offered.contains(&TEST_SUITE).then_some(TEST_SUITE)
    }

    fn key_exchange(
        &mut self,
        _suite: CipherSuite,
        _client_random: &Random,
        _server_random: &Random,
    ) -> Result<Box<dyn KeyExchange>, Error> {
        Ok(Box::new(SharedSecretExchange {
            secret: self.secret.clone(),
        }))
    }

    fn certificate_chain(&mut self, _suite: CipherSuite) -> Option<CertificateChain> {
        self.chain.clone()
    }

    fn certificate_status(&mut self) -> Option<Vec<u8>> {
        self.status.clone()
    }

    fn supplemental_data(&mut self) -> Option<Vec<u8>> {
        self.supplemental.clone()
    }

    fn accept_resumption(&mut self, session_id: &[u8]) -> Option<DtlsSession> {
        self.sessions.lock().unwrap().get(session_id).cloned()
    }

    fn session_ticket(&mut self) -> Option<Vec<u8>> {
        self.ticket.clone()
    }

    fn store_session(&mut self, session: &DtlsSession) {
        self.sessions
            .lock()
            .unwrap()
            .insert(session.id().to_vec(), session.clone());
    }
}
