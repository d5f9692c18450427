mod common;

use std::thread;
use std::time::{Duration, Instant};

use drtls::{ClientProtocol, Config, ServerProtocol};

use common::{pipe, DropSends, Duplicate, TestClientPolicy, TestServerPolicy};

fn no_cookie() -> Config {
    Config::builder().require_cookie(false).build()
}

// Without a cookie exchange the server's datagrams are, in order:
// ServerHello (1), ServerHelloDone (2), ChangeCipherSpec (3), Finished (4).

#[test]
fn lost_server_flight_is_retransmitted() {
    common::init_log();

    let (client_end, server_end) = pipe(1500);
    // The server's first flight disappears; the client's ClientHello resend
    // makes the server send it again.
    let server_end = DropSends::new(server_end, vec![1, 2]);

    let start = Instant::now();

    let server = thread::spawn(move || {
        ServerProtocol::new(no_cookie(), Box::new(TestServerPolicy::new(b"secret")))
            .accept(Box::new(server_end))
    });
    let client = ClientProtocol::new(Config::default(), Box::new(TestClientPolicy::new(b"secret")))
        .connect(Box::new(client_end));

    let mut client = client.unwrap();
    let mut server = server.join().unwrap().unwrap();

    // Completion required at least one resend interval.
    assert!(start.elapsed() >= Duration::from_millis(900));

    client.send(b"after loss").unwrap();
    let mut buf = [0u8; 1500];
    let n = server
        .receive(&mut buf, Duration::from_secs(5))
        .unwrap()
        .unwrap();
    assert_eq!(&buf[..n], b"after loss");
}

#[test]
fn lost_final_server_flight_answered_after_completion() {
    common::init_log();

    let (client_end, server_end) = pipe(1500);
    // The server believes the handshake is done but its CCS and Finished
    // never arrive. The client's re-sent final flight must be answered from
    // the established connection.
    let server_end = DropSends::new(server_end, vec![3, 4]);

    let server = thread::spawn(move || {
        let mut transport = ServerProtocol::new(
            no_cookie(),
            Box::new(TestServerPolicy::new(b"secret")),
        )
        .accept(Box::new(server_end))?;

        // Sit in receive; the duplicated client flight is handled here.
        let mut buf = [0u8; 1500];
        let n = transport.receive(&mut buf, Duration::from_secs(5))?.unwrap();
        assert_eq!(&buf[..n], b"after retransmit");
        Ok::<_, drtls::Error>(())
    });

    let client = ClientProtocol::new(Config::default(), Box::new(TestClientPolicy::new(b"secret")))
        .connect(Box::new(client_end));

    let mut client = client.unwrap();
    client.send(b"after retransmit").unwrap();

    server.join().unwrap().unwrap();
}

#[test]
fn duplicated_datagrams_do_not_disturb_the_handshake() {
    common::init_log();

    let (client_end, server_end) = pipe(1500);
    let client_end = Duplicate::new(client_end);
    let server_end = Duplicate::new(server_end);

    let server = thread::spawn(move || {
        ServerProtocol::new(Config::default(), Box::new(TestServerPolicy::new(b"secret")))
            .accept(Box::new(server_end))
    });
    let client = ClientProtocol::new(Config::default(), Box::new(TestClientPolicy::new(b"secret")))
        .connect(Box::new(client_end));

    let mut client = client.unwrap();
    let mut server = server.join().unwrap().unwrap();

    client.send(b"once").unwrap();
    let mut buf = [0u8; 1500];
    let n = server
        .receive(&mut buf, Duration::from_secs(5))
        .unwrap()
        .unwrap();
    assert_eq!(&buf[..n], b"once");

    // The duplicate of the data record is replay-dropped, not delivered.
    let again = server.receive(&mut buf, Duration::from_millis(200)).unwrap();
    assert!(again.is_none());
}
