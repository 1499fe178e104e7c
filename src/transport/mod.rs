//! Transport Contract
//!
//! This module defines the thin contract the downloader requires from an
//! HTTP client: issue one GET with an optional `Range` header and deliver
//! the response as an ordered event stream. The built-in reqwest-backed
//! implementation lives in [`http`]; tests substitute a scripted transport
//! through the same trait.
//!
//! Per response the adapter must guarantee:
//! - `Headers` precedes the first `Body` event,
//! - `Finished` is delivered exactly once and strictly last,
//! - an `Error` is followed by a terminal `Finished` all the same.

pub mod http;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::ErrorKind;
use crate::tls::TlsConfig;

/// A single GET request handed to the transport.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    /// Absolute request URL.
    pub url: Url,
    /// Inclusive byte window for a ranged request, rendered as
    /// `Range: bytes=B-E`. `None` for the probe.
    pub range: Option<(i64, i64)>,
    /// Whether redirects may be followed. Only the probe sets this.
    pub follow_redirects: bool,
    /// Redirect budget when following is enabled.
    pub max_redirects: u32,
    /// Scheduling hint for transports that support request priorities.
    pub high_priority: bool,
    /// Read-ahead cap in bytes; 0 leaves the transport default in place.
    pub read_buffer_size: i64,
    /// User-Agent header value.
    pub user_agent: String,
    /// TLS configuration, passed through opaquely.
    pub tls: TlsConfig,
}

impl TransportRequest {
    /// Renders the `Range` header value, if this is a ranged request.
    pub fn range_header(&self) -> Option<String> {
        self.range.map(|(begin, end)| format!("bytes={begin}-{end}"))
    }
}

/// One event of a response's observable stream.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Status line and headers are available. Always first.
    Headers {
        /// Effective URL of the response, after any redirects.
        url: Url,
        /// HTTP status code.
        status: u16,
        /// Raw response headers in arrival order.
        headers: Vec<(String, String)>,
    },
    /// A redirect has been followed. Only possible when the request
    /// enabled redirect following.
    Redirected {
        /// The new URL.
        url: Url,
    },
    /// TLS peer verification problems, reported before any body bytes.
    TlsErrors {
        /// Human-readable descriptions.
        errors: Vec<String>,
    },
    /// A slice of body bytes.
    Body {
        /// The received bytes.
        chunk: Bytes,
    },
    /// Periodic progress report with monotonic `bytes_received`.
    Progress {
        /// Bytes the transport has delivered so far.
        bytes_received: i64,
        /// Total size hint; -1 when unknown.
        bytes_total: i64,
    },
    /// A failure was recorded. Non-terminal; `Finished` still follows.
    Error {
        /// Classified failure.
        kind: ErrorKind,
        /// Transport-specific description.
        message: String,
    },
    /// Terminal event. No further event follows.
    Finished,
}

/// Delivers a response's events into the orchestrator, tagged with the
/// owning connection id.
#[derive(Clone)]
pub struct EventSink {
    id: u32,
    tx: mpsc::Sender<(u32, TransportEvent)>,
}

impl EventSink {
    pub(crate) fn new(id: u32, tx: mpsc::Sender<(u32, TransportEvent)>) -> Self {
        EventSink { id, tx }
    }

    /// Connection id this sink is bound to.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Sends one event, awaiting channel capacity. Returns `false` when
    /// the receiving downloader is gone and the driver should stop.
    pub async fn emit(&self, event: TransportEvent) -> bool {
        self.tx.send((self.id, event)).await.is_ok()
    }
}

/// Handle over a response in flight.
pub struct TransportHandle {
    cancel: CancellationToken,
    tls_ignored: Arc<AtomicBool>,
}

impl TransportHandle {
    pub fn new() -> Self {
        TransportHandle {
            cancel: CancellationToken::new(),
            tls_ignored: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Token the response driver should obey; cancelled by [`abort`].
    ///
    /// [`abort`]: TransportHandle::abort
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Requests the response be aborted. Idempotent; the driver still
    /// terminates its stream with `Finished`.
    pub fn abort(&self) {
        self.cancel.cancel();
    }

    /// Acknowledges reported TLS verification problems so a transport that
    /// supports mid-handshake continuation may proceed.
    pub fn ignore_tls_errors(&self) {
        self.tls_ignored.store(true, Ordering::Relaxed);
    }

    /// Whether TLS problems have been acknowledged on this response.
    pub fn tls_errors_ignored(&self) -> bool {
        self.tls_ignored.load(Ordering::Relaxed)
    }
}

impl Default for TransportHandle {
    fn default() -> Self {
        TransportHandle::new()
    }
}

/// The request/response abstraction the downloader runs on.
///
/// `start` must not block: it launches whatever background work the
/// response needs and returns a handle immediately. All failures are
/// reported through the event stream, never by panicking.
pub trait Transport {
    /// Issues the request and streams its response into `sink`.
    fn start(&self, request: TransportRequest, sink: EventSink) -> TransportHandle;
}
