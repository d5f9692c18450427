use std::io;

use thiserror::Error;

use crate::message::{AlertDescription, AlertLevel};

/// Errors surfaced by the handshake and record layer.
///
/// Alert-carrying variants follow the TLS alert taxonomy: anything fatal
/// aborts the handshake/connection, warnings are handled internally and only
/// `close_notify` becomes visible as [`Error::Closed`].
#[derive(Debug, Error)]
pub enum Error {
    /// A local protocol violation that maps to a fatal alert we send to the peer.
    #[error("fatal alert: {description}")]
    Alert {
        level: AlertLevel,
        description: AlertDescription,
    },

    /// The peer sent us a fatal alert.
    #[error("peer alert: {0}")]
    PeerAlert(AlertDescription),

    /// The peer closed the connection with close_notify.
    #[error("connection closed by peer")]
    Closed,

    /// The overall handshake deadline was exceeded.
    #[error("handshake timed out")]
    HandshakeTimeout,

    /// The peer stopped answering heartbeat requests.
    #[error("heartbeat timed out")]
    HeartbeatTimeout,

    /// 48-bit record sequence space exhausted for an epoch.
    #[error("record sequence number space exhausted")]
    SequenceExhausted,

    /// Error from the underlying datagram transport.
    #[error("transport: {0}")]
    Transport(#[from] io::Error),

    /// Failure in a crypto collaborator (cipher, key exchange, provider).
    #[error("crypto: {0}")]
    Crypto(String),

    /// Invalid configuration.
    #[error("config: {0}")]
    Config(String),
}

impl Error {
    /// Shorthand for a fatal alert error.
    pub fn fatal(description: AlertDescription) -> Self {
        Error::Alert {
            level: AlertLevel::Fatal,
            description,
        }
    }

    /// The alert we should send to the peer before tearing down, if any.
    pub(crate) fn alert_to_send(&self) -> Option<AlertDescription> {
        match self {
            Error::Alert { description, .. } => Some(*description),
            Error::HandshakeTimeout | Error::HeartbeatTimeout => None,
            Error::SequenceExhausted | Error::Crypto(_) => Some(AlertDescription::InternalError),
            _ => None,
        }
    }
}
