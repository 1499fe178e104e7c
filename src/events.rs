//! Consumer Events
//!
//! This module defines the typed events a [`Downloader`](crate::Downloader)
//! emits while a run is in progress. Events are pulled with
//! [`Downloader::next_event`](crate::Downloader::next_event); the ordering
//! guarantees documented on each variant hold within one run.

use serde::Serialize;
use url::Url;

use crate::error::ErrorKind;

/// An observable event of a running download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Event {
    /// The probe response has been inspected: the effective URL is known
    /// and parallel eligibility has been decided. Emitted exactly once per
    /// run, before any `ReadyRead`.
    Resolved {
        /// Effective URL after redirects.
        url: Url,
    },
    /// A redirect was followed while probing. After resolution no further
    /// redirect is legal and one would abort the run instead.
    Redirected {
        /// The URL the probe was redirected to.
        url: Url,
    },
    /// New bytes were appended to a connection's buffer and can be drained
    /// through the reader API.
    ReadyRead {
        /// Connection the bytes arrived on.
        id: u32,
    },
    /// Per-connection progress snapshot.
    ConnectionProgress {
        /// Connection the progress belongs to.
        id: u32,
        /// Bytes delivered into this connection so far.
        bytes_received: i64,
        /// Expected window size; -1 when unknown.
        bytes_total: i64,
    },
    /// Aggregate progress across all connections of the run. Suppressed
    /// while the emitting connection carries an error, so the sequence is
    /// not necessarily monotonic in the presence of failures.
    Progress {
        /// Bytes received across all connections.
        bytes_received: i64,
        /// Declared content length; -1 when the origin did not declare it.
        content_length: i64,
    },
    /// A connection reported a transport error. The kind is also stored
    /// sticky on the downloader.
    ConnectionError {
        /// Connection the error occurred on.
        id: u32,
        /// Classified failure.
        kind: ErrorKind,
    },
    /// TLS peer verification problems were reported before the body. The
    /// consumer may acknowledge them with
    /// [`ignore_tls_errors`](crate::Downloader::ignore_tls_errors).
    TlsErrors {
        /// Connection the problems occurred on.
        id: u32,
        /// Human-readable descriptions of the verification problems.
        errors: Vec<String>,
    },
    /// A connection terminated. Emitted exactly once per connection that
    /// ever existed in the run.
    ConnectionFinished {
        /// Connection that terminated.
        id: u32,
    },
    /// The whole run terminated, after every per-connection
    /// `ConnectionFinished`. Success and failure are distinguished through
    /// [`error`](crate::Downloader::error).
    Finished,
}
