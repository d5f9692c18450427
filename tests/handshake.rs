mod common;

use std::thread;
use std::time::Duration;

use drtls::{CertificateChain, ClientProtocol, Config, DtlsTransport, Error, ServerProtocol};

use common::{pipe, PipeTransport, TestClientPolicy, TestServerPolicy, TEST_SUITE};

fn run_pair(
    client_config: Config,
    client_policy: TestClientPolicy,
    server_config: Config,
    server_policy: TestServerPolicy,
) -> (
    Result<DtlsTransport, Error>,
    Result<DtlsTransport, Error>,
) {
    let (client_end, server_end) = pipe(1500);
    run_pair_on(
        client_config,
        client_policy,
        client_end,
        server_config,
        server_policy,
        server_end,
    )
}

fn run_pair_on(
    client_config: Config,
    client_policy: TestClientPolicy,
    client_end: PipeTransport,
    server_config: Config,
    server_policy: TestServerPolicy,
    server_end: PipeTransport,
) -> (
    Result<DtlsTransport, Error>,
    Result<DtlsTransport, Error>,
) {
    let server = thread::spawn(move || {
        ServerProtocol::new(server_config, Box::new(server_policy)).accept(Box::new(server_end))
    });

    let client = ClientProtocol::new(client_config, Box::new(client_policy))
        .connect(Box::new(client_end));
    let server = server.join().unwrap();

    (client, server)
}

#[test]
fn full_handshake_with_cookie() {
    common::init_log();

    let (client, server) = run_pair(
        Config::default(),
        TestClientPolicy::new(b"both sides know this"),
        Config::default(),
        TestServerPolicy::new(b"both sides know this"),
    );

    let mut client = client.unwrap();
    let mut server = server.unwrap();

    assert_eq!(client.session().id(), server.session().id());
    assert_eq!(client.session().cipher_suite(), TEST_SUITE);
    assert!(client.session().is_extended_master_secret());
    assert!(client.session().is_resumable());

    // Application data both ways.
    client.send(b"ping").unwrap();
    let mut buf = [0u8; 1500];
    let n = server
        .receive(&mut buf, Duration::from_secs(5))
        .unwrap()
        .unwrap();
    assert_eq!(&buf[..n], b"ping");

    server.send(b"pong").unwrap();
    let n = client
        .receive(&mut buf, Duration::from_secs(5))
        .unwrap()
        .unwrap();
    assert_eq!(&buf[..n], b"pong");

    // Graceful close is answered with Closed on the other side.
    client.close().unwrap();
    let got = server.receive(&mut buf, Duration::from_secs(5));
    assert!(matches!(got, Err(Error::Closed)));
}

#[test]
fn full_handshake_without_cookie() {
    common::init_log();

    let server_config = Config::builder().require_cookie(false).build();
    let (client, server) = run_pair(
        Config::default(),
        TestClientPolicy::new(b"secret"),
        server_config,
        TestServerPolicy::new(b"secret"),
    );

    let mut client = client.unwrap();
    let mut server = server.unwrap();

    server.send(b"hello").unwrap();
    let mut buf = [0u8; 1500];
    let n = client
        .receive(&mut buf, Duration::from_secs(5))
        .unwrap()
        .unwrap();
    assert_eq!(&buf[..n], b"hello");
}

#[test]
fn session_ticket_is_delivered() {
    common::init_log();

    let client_policy = TestClientPolicy::new(b"secret");
    let tickets = client_policy.tickets.clone();

    let mut server_policy = TestServerPolicy::new(b"secret");
    server_policy.ticket = Some(b"opaque ticket bytes".to_vec());

    let (client, server) = run_pair(
        Config::default(),
        client_policy,
        Config::default(),
        server_policy,
    );

    client.unwrap();
    server.unwrap();

    let tickets = tickets.lock().unwrap();
    assert_eq!(tickets.as_slice(), &[b"opaque ticket bytes".to_vec()]);
}

#[test]
fn optional_flight_messages_are_tolerated() {
    common::init_log();

    // Both flights carry SupplementalData, and the server staples a status
    // message behind its certificate.
    let mut client_policy = TestClientPolicy::new(b"secret");
    client_policy.supplemental = Some(b"client supplement".to_vec());
    let statuses = client_policy.statuses.clone();

    let mut server_policy = TestServerPolicy::new(b"secret");
    server_policy.supplemental = Some(b"server supplement".to_vec());
    server_policy.chain = Some(CertificateChain {
        certificates: vec![vec![0x30; 64]],
    });
    server_policy.status = Some(b"stapled ocsp response".to_vec());

    let (client, server) = run_pair(
        Config::default(),
        client_policy,
        Config::default(),
        server_policy,
    );

    let mut client = client.unwrap();
    let mut server = server.unwrap();

    assert_eq!(
        statuses.lock().unwrap().as_slice(),
        &[b"stapled ocsp response".to_vec()]
    );

    client.send(b"still talking").unwrap();
    let mut buf = [0u8; 1500];
    let n = server
        .receive(&mut buf, Duration::from_secs(5))
        .unwrap()
        .unwrap();
    assert_eq!(&buf[..n], b"still talking");
}

#[test]
fn mismatched_secrets_never_complete() {
    common::init_log();

    // The Finished records cannot be authenticated by the peer, so they
    // are silently dropped and both sides run into the handshake timeout.
    let short = Config::builder()
        .handshake_timeout(Duration::from_millis(1500))
        .build();

    let (client, server) = run_pair(
        short.clone(),
        TestClientPolicy::new(b"client side secret"),
        short,
        TestServerPolicy::new(b"server side secret"),
    );

    // Whichever side expires first tears down its end of the pipe, which
    // the other side may observe as a transport error instead.
    let client = client.err().unwrap();
    let server = server.err().unwrap();
    assert!(matches!(client, Error::HandshakeTimeout | Error::Transport(_)));
    assert!(matches!(server, Error::HandshakeTimeout | Error::Transport(_)));
    assert!(
        matches!(client, Error::HandshakeTimeout) || matches!(server, Error::HandshakeTimeout)
    );
}

#[test]
fn oversized_application_datagram_is_refused() {
    common::init_log();

    let (client, server) = run_pair(
        Config::default(),
        TestClientPolicy::new(b"secret"),
        Config::default(),
        TestServerPolicy::new(b"secret"),
    );

    let mut client = client.unwrap();
    let _server = server.unwrap();

    let too_big = vec![0u8; client.send_limit() + 1];
    assert!(matches!(client.send(&too_big), Err(Error::Config(_))));
}
