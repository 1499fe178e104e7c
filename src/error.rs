//! Error Kinds
//!
//! This module defines the semantic error vocabulary shared by the
//! transport layer and the downloader. A kind reported by any connection
//! is stored sticky on the downloader for the rest of the run and is
//! cleared only by the next `start()`.

use serde::Serialize;
use thiserror::Error;

/// Semantic classification of a failed connection or run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Error)]
pub enum ErrorKind {
    /// The run was canceled by `abort()`, or torn down after another
    /// connection failed.
    #[error("operation canceled")]
    OperationCanceled,
    /// The transport gave up waiting for the origin.
    #[error("operation timed out")]
    Timeout,
    /// The connection could not be established.
    #[error("connection failed")]
    ConnectionFailed,
    /// Name resolution failed for the request URL.
    #[error("host not found")]
    HostNotFound,
    /// The origin closed the connection before the response completed.
    #[error("remote host closed the connection")]
    RemoteHostClosed,
    /// TLS peer verification or handshake failure.
    #[error("TLS handshake failed")]
    TlsHandshake,
    /// The origin answered with an error status.
    #[error("server returned HTTP status {0}")]
    HttpStatus(u16),
    /// The response violated the protocol the request relied on, such as
    /// a ranged request answered with a full-body `200 OK`.
    #[error("protocol violation")]
    Protocol,
    /// Any other transport-reported failure.
    #[error("transport failure")]
    Transport,
}
