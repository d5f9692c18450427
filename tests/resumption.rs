mod common;

use std::thread;
use std::time::Duration;

use drtls::{ClientProtocol, Config, DtlsSession, ServerProtocol};

use common::{pipe, SessionCache, TestClientPolicy, TestServerPolicy};

fn handshake(
    client_policy: TestClientPolicy,
    server_policy: TestServerPolicy,
) -> (drtls::DtlsTransport, drtls::DtlsTransport) {
    let (client_end, server_end) = pipe(1500);
    let server = thread::spawn(move || {
        ServerProtocol::new(Config::default(), Box::new(server_policy))
            .accept(Box::new(server_end))
    });
    let client = ClientProtocol::new(Config::default(), Box::new(client_policy))
        .connect(Box::new(client_end));
    (client.unwrap(), server.join().unwrap().unwrap())
}

fn full_handshake_session(cache: &SessionCache) -> DtlsSession {
    let (client, _server) = handshake(
        TestClientPolicy::new(b"secret"),
        TestServerPolicy::with_sessions(b"secret", cache.clone()),
    );
    client.session().clone()
}

#[test]
fn abbreviated_handshake_resumes_the_session() {
    common::init_log();

    let cache: SessionCache = Default::default();
    let session = full_handshake_session(&cache);
    assert!(session.is_resumable());
    assert!(cache.lock().unwrap().contains_key(session.id()));

    let mut client_policy = TestClientPolicy::new(b"secret");
    client_policy.resume = Some(session.clone());
    let server_policy = TestServerPolicy::with_sessions(b"secret", cache);

    let (mut client, mut server) = handshake(client_policy, server_policy);

    // Same session on both sides, no new id minted.
    assert_eq!(client.session().id(), session.id());
    assert_eq!(server.session().id(), session.id());

    client.send(b"resumed").unwrap();
    let mut buf = [0u8; 1500];
    let n = server
        .receive(&mut buf, Duration::from_secs(5))
        .unwrap()
        .unwrap();
    assert_eq!(&buf[..n], b"resumed");

    server.send(b"indeed").unwrap();
    let n = client
        .receive(&mut buf, Duration::from_secs(5))
        .unwrap()
        .unwrap();
    assert_eq!(&buf[..n], b"indeed");
}

#[test]
fn unknown_session_id_falls_back_to_full_handshake() {
    common::init_log();

    let cache: SessionCache = Default::default();
    let session = full_handshake_session(&cache);

    let mut client_policy = TestClientPolicy::new(b"secret");
    client_policy.resume = Some(session.clone());
    // Empty cache: the server does not recognize the offered id.
    let server_policy = TestServerPolicy::new(b"secret");

    let (client, server) = handshake(client_policy, server_policy);

    assert_ne!(client.session().id(), session.id());
    assert_eq!(client.session().id(), server.session().id());
}

#[test]
fn invalidated_session_is_not_offered() {
    common::init_log();

    let cache: SessionCache = Default::default();
    let mut session = full_handshake_session(&cache);
    session.invalidate();

    let mut client_policy = TestClientPolicy::new(b"secret");
    client_policy.resume = Some(session);
    let server_policy = TestServerPolicy::with_sessions(b"secret", cache);

    let (client, server) = handshake(client_policy, server_policy);

    // A fresh full handshake with a fresh id.
    assert!(!client.session().id().is_empty());
    assert_eq!(client.session().id(), server.session().id());
}
