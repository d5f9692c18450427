use std::sync::Arc;
use std::time::Duration;

use crate::crypto::{default_provider, CryptoProvider};

/// Extended master secret policy (RFC 7627).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtendedMasterSecretMode {
    /// Offer the extension and abort if the peer does not support it.
    Required,
    /// Offer the extension, fall back to the legacy derivation if absent.
    Allowed,
    /// Do not offer the extension; legacy derivation only.
    Disabled,
}

/// Heartbeat keep-alive settings (RFC 6520 shape).
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatConfig {
    /// Idle time before a heartbeat request is emitted.
    pub idle: Duration,
    /// How long to wait for the matching response before the connection
    /// is considered dead.
    pub timeout: Duration,
    /// Whether the peer is allowed to send us heartbeat requests
    /// (advertised in the extension; we answer only if true).
    pub allow_peer_requests: bool,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        HeartbeatConfig {
            idle: Duration::from_secs(15),
            timeout: Duration::from_secs(5),
            allow_peer_requests: true,
        }
    }
}

/// DTLS engine configuration.
#[derive(Clone)]
pub struct Config {
    handshake_timeout: Duration,
    extended_master_secret: ExtendedMasterSecretMode,
    require_cookie: bool,
    heartbeat: Option<HeartbeatConfig>,
    crypto_provider: Arc<dyn CryptoProvider>,
}

impl Config {
    /// Create a new configuration builder.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder {
            handshake_timeout: Duration::from_secs(40),
            extended_master_secret: ExtendedMasterSecretMode::Required,
            require_cookie: true,
            heartbeat: None,
            crypto_provider: None,
        }
    }

    /// Timeout for the entire handshake, regardless of flights.
    ///
    /// Zero means wait forever.
    #[inline(always)]
    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    /// Extended master secret policy.
    #[inline(always)]
    pub fn extended_master_secret(&self) -> ExtendedMasterSecretMode {
        self.extended_master_secret
    }

    /// For a server, demand a stateless cookie exchange before committing
    /// handshake state.
    #[inline(always)]
    pub fn require_cookie(&self) -> bool {
        self.require_cookie
    }

    /// Heartbeat keep-alive, if enabled.
    #[inline(always)]
    pub fn heartbeat(&self) -> Option<HeartbeatConfig> {
        self.heartbeat
    }

    /// Cryptographic provider for record protection.
    #[inline(always)]
    pub fn crypto_provider(&self) -> &Arc<dyn CryptoProvider> {
        &self.crypto_provider
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::builder().build()
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("handshake_timeout", &self.handshake_timeout)
            .field("extended_master_secret", &self.extended_master_secret)
            .field("require_cookie", &self.require_cookie)
            .field("heartbeat", &self.heartbeat)
            .finish()
    }
}

/// Builder for [`Config`].
pub struct ConfigBuilder {
    handshake_timeout: Duration,
    extended_master_secret: ExtendedMasterSecretMode,
    require_cookie: bool,
    heartbeat: Option<HeartbeatConfig>,
    crypto_provider: Option<Arc<dyn CryptoProvider>>,
}

impl ConfigBuilder {
    /// Set the timeout for the entire handshake. Zero waits forever.
    ///
    /// Defaults to 40 seconds.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the extended master secret policy.
    ///
    /// Defaults to `Required`.
    pub fn extended_master_secret(mut self, mode: ExtendedMasterSecretMode) -> Self {
        self.extended_master_secret = mode;
        self
    }

    /// Set whether a server demands a HelloVerifyRequest cookie round trip.
    ///
    /// Defaults to true.
    pub fn require_cookie(mut self, require: bool) -> Self {
        self.require_cookie = require;
        self
    }

    /// Enable the heartbeat keep-alive.
    ///
    /// Disabled by default.
    pub fn heartbeat(mut self, heartbeat: HeartbeatConfig) -> Self {
        self.heartbeat = Some(heartbeat);
        self
    }

    /// Set a custom crypto provider.
    ///
    /// If not set, the process default (or the built-in RustCrypto
    /// provider) is used.
    pub fn crypto_provider(mut self, provider: Arc<dyn CryptoProvider>) -> Self {
        self.crypto_provider = Some(provider);
        self
    }

    pub fn build(self) -> Config {
        Config {
            handshake_timeout: self.handshake_timeout,
            extended_master_secret: self.extended_master_secret,
            require_cookie: self.require_cookie,
            heartbeat: self.heartbeat,
            crypto_provider: self.crypto_provider.unwrap_or_else(default_provider),
        }
    }
}
