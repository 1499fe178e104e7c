//! TLS Configuration
//!
//! Pass-through TLS settings for the transport. The download core never
//! interprets these; they are pinned onto every request of a run.

/// TLS relaxations forwarded to the transport.
///
/// The default configuration verifies peers normally. Both switches weaken
/// verification and should only be used against origins the consumer
/// already trusts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsConfig {
    /// Accept certificates that fail verification.
    pub accept_invalid_certs: bool,
    /// Accept certificates whose hostname does not match the request URL.
    pub accept_invalid_hostnames: bool,
}
