#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod crypto;
pub(crate) mod message;

mod buffer;
mod client;
mod config;
mod epoch;
mod error;
mod heartbeat;
mod peer;
mod reassembly;
mod record_layer;
mod reliable;
mod server;
mod session;
mod timer;
mod transport;

pub use client::ClientProtocol;
pub use config::{Config, ConfigBuilder, ExtendedMasterSecretMode, HeartbeatConfig};
pub use error::Error;
pub use peer::{ClientCredentials, ClientPolicy, ServerPolicy};
pub use server::ServerProtocol;
pub use session::DtlsSession;
pub use transport::{DatagramTransport, DtlsTransport, UdpTransport};

pub use message::{
    Alert, AlertDescription, AlertLevel, CertificateChain, CertificateRequest, CipherSuite,
    ContentType, DigitallySigned, ProtocolVersion, Random,
};
