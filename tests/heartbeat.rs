mod common;

use std::thread;
use std::time::Duration;

use drtls::{ClientProtocol, Config, Error, HeartbeatConfig, ServerProtocol};

use common::{pipe, TestClientPolicy, TestServerPolicy};

fn client_config(idle: Duration, timeout: Duration) -> Config {
    Config::builder()
        .heartbeat(HeartbeatConfig {
            idle,
            timeout,
            allow_peer_requests: true,
        })
        .build()
}

fn server_config() -> Config {
    // Long idle: the server answers requests but sends none of its own
    // within the test window.
    Config::builder()
        .heartbeat(HeartbeatConfig {
            idle: Duration::from_secs(60),
            timeout: Duration::from_secs(60),
            allow_peer_requests: true,
        })
        .build()
}

#[test]
fn answered_heartbeats_keep_the_connection_alive() {
    common::init_log();

    let (client_end, server_end) = pipe(1500);

    let server = thread::spawn(move || {
        let mut transport = ServerProtocol::new(
            server_config(),
            Box::new(TestServerPolicy::new(b"secret")),
        )
        .accept(Box::new(server_end))?;

        // Requests are answered from inside receive.
        let mut buf = [0u8; 1500];
        let got = transport.receive(&mut buf, Duration::from_millis(900))?;
        assert!(got.is_none());
        Ok::<_, Error>(())
    });

    let client = ClientProtocol::new(
        client_config(Duration::from_millis(100), Duration::from_millis(400)),
        Box::new(TestClientPolicy::new(b"secret")),
    )
    .connect(Box::new(client_end));

    let mut client = client.unwrap();

    // Several idle periods pass; every request gets its response, so this
    // is a plain timeout, not a heartbeat failure.
    let mut buf = [0u8; 1500];
    let got = client.receive(&mut buf, Duration::from_millis(700)).unwrap();
    assert!(got.is_none());

    server.join().unwrap().unwrap();
}

#[test]
fn unanswered_heartbeats_kill_the_connection() {
    common::init_log();

    let (client_end, server_end) = pipe(1500);

    let server = thread::spawn(move || {
        let transport = ServerProtocol::new(
            server_config(),
            Box::new(TestServerPolicy::new(b"secret")),
        )
        .accept(Box::new(server_end))?;

        // Hold the connection open without ever receiving, so no request
        // is answered.
        thread::sleep(Duration::from_millis(1500));
        drop(transport);
        Ok::<_, Error>(())
    });

    let client = ClientProtocol::new(
        client_config(Duration::from_millis(100), Duration::from_millis(300)),
        Box::new(TestClientPolicy::new(b"secret")),
    )
    .connect(Box::new(client_end));

    let mut client = client.unwrap();

    let mut buf = [0u8; 1500];
    let got = client.receive(&mut buf, Duration::from_secs(5));
    assert!(matches!(got, Err(Error::HeartbeatTimeout)));

    server.join().unwrap().unwrap();
}
