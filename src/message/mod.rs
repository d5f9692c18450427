//! Wire format types for records, handshake messages and the small set of
//! bodies the engine itself must understand. Parsing is nom-based, writing
//! is manual serialization into `Vec<u8>`.

mod alert;
mod certificate;
mod client_hello;
mod extension;
mod handshake;
mod heartbeat;
mod hello_verify_request;
mod random;
mod record;
mod server_hello;
pub(crate) mod util;

pub use alert::{Alert, AlertDescription, AlertLevel};
pub use certificate::{CertificateChain, CertificateRequest, DigitallySigned};
pub use client_hello::{patch_cookie, ClientHello};
pub use extension::{
    find_extension, parse_extensions, serialize_extensions, Extension, EXT_EXTENDED_MASTER_SECRET,
    EXT_HEARTBEAT, EXT_SESSION_TICKET,
};
pub use handshake::{FragmentHeader, MessageType, HANDSHAKE_HEADER_LEN};
pub use heartbeat::{
    HeartbeatMessage, HeartbeatMessageType, HeartbeatMode, HEARTBEAT_PADDING,
};
pub use hello_verify_request::HelloVerifyRequest;
pub use random::Random;
pub use record::{
    CipherSuite, ContentType, ProtocolVersion, Record, MAX_CIPHER_EXPANSION, MAX_FRAGMENT_LEN,
    RECORD_HEADER_LEN,
};
pub use server_hello::ServerHello;
