//! Download Orchestration
//!
//! This module hosts [`Downloader`], the state machine coordinating one
//! logical download: it probes the origin over a redirect-following
//! connection, decides parallel eligibility, partitions the content into
//! ranged connections, funnels every transport event into consumer events,
//! and exposes each connection as a positionally-accounted streaming
//! reader.
//!
//! All mutation happens on the task that polls [`Downloader::next_event`];
//! transport drivers only feed a channel. That keeps the orchestrator a
//! single-threaded cooperative loop with no locking, while the parallelism
//! stays where it belongs: in the I/O.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use bytes::Bytes;
use log::warn;
use tokio::sync::mpsc;
use url::Url;

use crate::connection::Connection;
use crate::constants::{
    EVENT_CHANNEL_CAPACITY, MAX_SIMULTANEOUS_CONNECTIONS, MIN_CHUNK_SIZE,
    MIN_SIMULTANEOUS_CONTENT_SIZE, USER_AGENT,
};
use crate::error::ErrorKind;
use crate::events::Event;
use crate::partition;
use crate::tls::TlsConfig;
use crate::transport::http::HttpTransport;
use crate::transport::{EventSink, Transport, TransportEvent, TransportRequest};

/// Accelerates retrieval of a single HTTP(S) resource by fetching disjoint
/// byte windows over several concurrent range connections.
///
/// A `Downloader` is constructed idle, configured through its setters, and
/// armed with [`start`](Downloader::start). Afterwards the consumer pulls
/// [`Event`]s with [`next_event`](Downloader::next_event) and drains body
/// bytes through the reader API whenever a connection reports `ReadyRead`.
/// The run ends with an aggregate [`Event::Finished`]; success and failure
/// are distinguished through [`error`](Downloader::error).
///
/// Configuration is read-only while a download is in progress; setter
/// calls during a run log a warning and are ignored. Dropping a running
/// downloader aborts it.
pub struct Downloader {
    url: Option<Url>,
    parallelism: u32,
    max_redirects: u32,
    chunk_size_limit: i64,
    read_buffer_size: i64,
    tls: TlsConfig,
    transport: Arc<dyn Transport + Send + Sync>,

    running: bool,
    resolved: bool,
    parallel_eligible: bool,
    resolved_url: Option<Url>,
    content_length: i64,
    bytes_received_total: i64,
    error: Option<ErrorKind>,
    connections: Vec<Connection>,
    used_ids: HashSet<u32>,
    pending: VecDeque<Event>,
    events_tx: mpsc::Sender<(u32, TransportEvent)>,
    events_rx: mpsc::Receiver<(u32, TransportEvent)>,
}

impl Downloader {
    /// Downloader over the built-in reqwest transport.
    pub fn new(url: Url) -> Self {
        Downloader::with_transport(url, Arc::new(HttpTransport::new()))
    }

    /// Downloader over a custom transport.
    pub fn with_transport(url: Url, transport: Arc<dyn Transport + Send + Sync>) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        Downloader {
            url: Some(url),
            parallelism: 5,
            max_redirects: 5,
            chunk_size_limit: 0,
            read_buffer_size: 0,
            tls: TlsConfig::default(),
            transport,
            running: false,
            resolved: false,
            parallel_eligible: false,
            resolved_url: None,
            content_length: 0,
            bytes_received_total: 0,
            error: None,
            connections: Vec::new(),
            used_ids: HashSet::new(),
            pending: VecDeque::new(),
            events_tx,
            events_rx,
        }
    }

    // ---- configuration surface ----

    pub fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    pub fn set_url(&mut self, url: Url) {
        if self.running {
            warn!("Downloader::set_url: cannot set, a download is already in progress");
            return;
        }
        self.url = Some(url);
    }

    pub fn parallelism(&self) -> u32 {
        self.parallelism
    }

    /// Number of simultaneous connections to open once the origin proves
    /// range-capable; capped at [`MAX_SIMULTANEOUS_CONNECTIONS`].
    pub fn set_parallelism(&mut self, parallelism: u32) {
        if self.running {
            warn!("Downloader::set_parallelism: cannot set, a download is already in progress");
            return;
        }
        self.parallelism = parallelism;
    }

    pub fn max_redirects(&self) -> u32 {
        self.max_redirects
    }

    /// Redirect budget of the probe. Ranged connections never follow
    /// redirects.
    pub fn set_max_redirects(&mut self, max_redirects: u32) {
        if self.running {
            warn!("Downloader::set_max_redirects: cannot set, a download is already in progress");
            return;
        }
        self.max_redirects = max_redirects;
    }

    pub fn chunk_size_limit(&self) -> i64 {
        self.chunk_size_limit
    }

    /// Caps every connection's byte window; 0 means no limit. Values
    /// below [`MIN_CHUNK_SIZE`] (other than 0) are rejected at start.
    pub fn set_chunk_size_limit(&mut self, chunk_size_limit: i64) {
        if self.running {
            warn!("Downloader::set_chunk_size_limit: cannot set, a download is already in progress");
            return;
        }
        self.chunk_size_limit = chunk_size_limit;
    }

    pub fn read_buffer_size(&self) -> i64 {
        self.read_buffer_size
    }

    /// Per-connection read-ahead hint forwarded to the transport; 0 keeps
    /// the transport default.
    pub fn set_read_buffer_size(&mut self, read_buffer_size: i64) {
        if self.running {
            warn!("Downloader::set_read_buffer_size: cannot set, a download is already in progress");
            return;
        }
        self.read_buffer_size = read_buffer_size;
    }

    pub fn tls_config(&self) -> &TlsConfig {
        &self.tls
    }

    pub fn set_tls_config(&mut self, tls: TlsConfig) {
        if self.running {
            warn!("Downloader::set_tls_config: cannot set, a download is already in progress");
            return;
        }
        self.tls = tls;
    }

    /// The transport this downloader issues requests through.
    pub fn transport(&self) -> &Arc<dyn Transport + Send + Sync> {
        &self.transport
    }

    // ---- run state ----

    /// Effective URL after the probe's redirects; `None` until resolved.
    pub fn resolved_url(&self) -> Option<&Url> {
        self.resolved_url.as_ref()
    }

    /// Declared content length; -1 when the origin did not declare one, 0
    /// before resolution.
    pub fn content_length(&self) -> i64 {
        self.content_length
    }

    /// Bytes received across all connections of the current run.
    pub fn bytes_received(&self) -> i64 {
        self.bytes_received_total
    }

    /// Sticky error of the current run; cleared by the next `start()`.
    pub fn error(&self) -> Option<ErrorKind> {
        self.error
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_finished(&self) -> bool {
        !self.running
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    /// Whether the probe found the origin eligible for parallel ranges.
    pub fn is_parallel_eligible(&self) -> bool {
        self.parallel_eligible
    }

    // ---- run control ----

    /// Validates the configuration and launches the probe connection.
    ///
    /// Returns `false` without touching any state when a download is
    /// already in progress, the parallelism is outside `1..=6`, the chunk
    /// size limit is non-zero but below [`MIN_CHUNK_SIZE`], or no URL is
    /// set. On success the per-run state is reset, the sticky error is
    /// cleared and the downloader is running.
    pub fn start(&mut self) -> bool {
        if self.running {
            warn!("Downloader::start: a download is already in progress");
            return false;
        }
        if self.parallelism < 1 || self.parallelism > MAX_SIMULTANEOUS_CONNECTIONS {
            warn!("Downloader::start: number of simultaneous connections is out of range");
            return false;
        }
        if self.chunk_size_limit != 0 && self.chunk_size_limit < MIN_CHUNK_SIZE {
            warn!("Downloader::start: chunk size limit is too small");
            return false;
        }
        let Some(url) = self.url.clone() else {
            warn!("Downloader::start: url is invalid");
            return false;
        };

        self.reset();
        self.create_connection(url, None);
        true
    }

    /// Aborts the run and tears every connection down.
    ///
    /// Synchronous: on return the downloader is no longer running and all
    /// connections are freed. For every connection that was still active a
    /// closing triple is queued, in order: `ConnectionError` with
    /// [`ErrorKind::OperationCanceled`], a `ConnectionProgress` snapshot,
    /// `ConnectionFinished`. An aggregate `Progress` with the counters
    /// frozen at abort time and the aggregate `Finished` follow.
    pub fn abort(&mut self) {
        if !self.running {
            warn!("Downloader::abort: no download is in progress to abort");
            return;
        }

        // Immutable snapshot: free() discards the records below.
        let snapshots: Vec<(u32, i64, i64)> = self
            .connections
            .iter()
            .filter(|c| c.running)
            .map(|c| (c.id, c.bytes_received, c.bytes_total))
            .collect();
        let bytes_received_total = self.bytes_received_total;
        let content_length = self.content_length;

        self.error = Some(ErrorKind::OperationCanceled);
        self.running = false;
        self.free();

        for (id, bytes_received, bytes_total) in snapshots {
            self.pending.push_back(Event::ConnectionError {
                id,
                kind: ErrorKind::OperationCanceled,
            });
            self.pending.push_back(Event::ConnectionProgress {
                id,
                bytes_received,
                bytes_total,
            });
            self.pending.push_back(Event::ConnectionFinished { id });
        }
        self.pending.push_back(Event::Progress {
            bytes_received: bytes_received_total,
            content_length,
        });
        self.pending.push_back(Event::Finished);
    }

    /// Pulls the next observable event of the run.
    ///
    /// Drains already-queued consumer events first, otherwise awaits one
    /// transport event, routes it through the state machine and loops.
    /// Returns `None` once the run is over and every event has been
    /// delivered, and immediately when no run is in progress.
    pub async fn next_event(&mut self) -> Option<Event> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }
            if !self.running {
                return None;
            }
            let (id, event) = self.events_rx.recv().await?;
            self.dispatch(id, event);
        }
    }

    // ---- reader API ----

    /// Whether connection `id` has drained its buffered bytes. `true` on
    /// misuse.
    pub fn at_end(&self, id: u32) -> bool {
        self.guarded(id, "at_end").map_or(true, Connection::at_end)
    }

    /// Absolute offset of the connection's first byte; -1 on misuse.
    pub fn head(&self, id: u32) -> i64 {
        self.guarded(id, "head").map_or(-1, |c| c.head)
    }

    /// Bytes the consumer has already drained from this connection; -1 on
    /// misuse.
    pub fn pos(&self, id: u32) -> i64 {
        self.guarded(id, "pos").map_or(-1, |c| c.pos)
    }

    /// Bytes buffered and ready to read; -1 on misuse.
    pub fn bytes_available(&self, id: u32) -> i64 {
        self.guarded(id, "bytes_available")
            .map_or(-1, Connection::bytes_available)
    }

    /// Copies up to `max` buffered bytes without consuming them.
    pub fn peek(&self, id: u32, max: i64) -> Bytes {
        self.guarded(id, "peek")
            .map_or_else(Bytes::new, |c| c.peek(max))
    }

    /// Drains up to `max` bytes, advancing the connection's position.
    pub fn read(&mut self, id: u32, max: i64) -> Bytes {
        self.guarded_mut(id, "read")
            .map_or_else(Bytes::new, |c| c.read(max))
    }

    /// Drains everything currently buffered on the connection.
    pub fn read_all(&mut self, id: u32) -> Bytes {
        self.guarded_mut(id, "read_all")
            .map_or_else(Bytes::new, Connection::read_all)
    }

    /// Drains up to and including the next newline; `max <= 0` means no
    /// limit. Without a buffered newline this returns what is available.
    pub fn read_line(&mut self, id: u32, max: i64) -> Bytes {
        self.guarded_mut(id, "read_line")
            .map_or_else(Bytes::new, |c| c.read_line(max))
    }

    /// Discards up to `max` buffered bytes; returns the count, -1 on
    /// misuse.
    pub fn skip(&mut self, id: u32, max: i64) -> i64 {
        self.guarded_mut(id, "skip").map_or(-1, |c| c.skip(max))
    }

    /// Transport description of the connection's most recent error.
    pub fn error_string(&self, id: u32) -> String {
        self.guarded(id, "error_string")
            .map_or_else(String::new, |c| c.error_string.clone())
    }

    /// Acknowledges reported TLS verification problems on the connection,
    /// for transports that support continuing past them.
    pub fn ignore_tls_errors(&self, id: u32) {
        if let Some(connection) = self.guarded(id, "ignore_tls_errors") {
            connection.handle.ignore_tls_errors();
        }
    }

    // ---- event routing ----

    fn dispatch(&mut self, id: u32, event: TransportEvent) {
        // Late events from a torn-down connection; its id is never reused
        // within the run, so lookup failure is the detach.
        if self.connection_index(id).is_none() {
            return;
        }
        match event {
            TransportEvent::Headers {
                url,
                status: _,
                headers,
            } => {
                if let Some(idx) = self.connection_index(id) {
                    let connection = &mut self.connections[idx];
                    connection.url = Some(url);
                    connection.headers = headers;
                }
            }
            TransportEvent::Redirected { url } => self.handle_redirected(url),
            TransportEvent::TlsErrors { errors } => {
                self.pending.push_back(Event::TlsErrors { id, errors });
            }
            TransportEvent::Body { chunk } => self.handle_ready_read(id, chunk),
            TransportEvent::Progress { .. } => self.handle_progress(id),
            TransportEvent::Error { kind, message } => self.handle_error(id, kind, message),
            TransportEvent::Finished => self.handle_finished(id),
        }
    }

    fn handle_ready_read(&mut self, id: u32, chunk: Bytes) {
        let Some(idx) = self.connection_index(id) else {
            return;
        };
        {
            let connection = &mut self.connections[idx];
            connection.append(&chunk);
            let previous = connection.bytes_received;
            connection.bytes_received = connection.pos + connection.bytes_available();
            self.bytes_received_total += connection.bytes_received - previous;
        }

        if self.resolved {
            self.pending.push_back(Event::ReadyRead { id });
            return;
        }

        // First body bytes of the probe: resolve.
        self.resolved = true;
        let (resolved_url, content_length, parallel_eligible, probe_running) = {
            let connection = &self.connections[idx];
            let resolved_url = match connection.url.clone().or_else(|| self.url.clone()) {
                Some(url) => url,
                // Unreachable: start() validated the URL.
                None => return,
            };
            let content_length = connection
                .raw_header("Content-Length")
                .and_then(|value| value.trim().parse::<i64>().ok())
                .unwrap_or(-1);
            let parallel_eligible = connection.raw_header("Accept-Ranges") == Some("bytes")
                && content_length > connection.bytes_available()
                && content_length >= MIN_SIMULTANEOUS_CONTENT_SIZE;
            (
                resolved_url,
                content_length,
                parallel_eligible,
                connection.running,
            )
        };
        self.resolved_url = Some(resolved_url.clone());
        self.content_length = content_length;
        self.parallel_eligible = parallel_eligible;
        self.pending.push_back(Event::Resolved { url: resolved_url });

        if probe_running && parallel_eligible && self.parallelism > 1 {
            // The short probe prefix is discarded along with the probe;
            // the aggregate only counts what the ranged connections fetch.
            self.bytes_received_total = 0;
            self.delete_connection(id);
            self.start_parallel_downloading();
        } else {
            self.connections[idx].bytes_total = content_length;
            self.pending.push_back(Event::ReadyRead { id });
        }
    }

    fn handle_progress(&mut self, id: u32) {
        let Some(idx) = self.connection_index(id) else {
            return;
        };
        let (bytes_received, bytes_total, has_error) = {
            let connection = &self.connections[idx];
            (
                connection.bytes_received,
                connection.bytes_total,
                connection.error.is_some(),
            )
        };
        self.pending.push_back(Event::ConnectionProgress {
            id,
            bytes_received,
            bytes_total,
        });
        if !has_error {
            self.pending.push_back(Event::Progress {
                bytes_received: self.bytes_received_total,
                content_length: self.content_length,
            });
        }
    }

    fn handle_redirected(&mut self, url: Url) {
        if self.resolved {
            // Ranged connections must not move; a redirect here would
            // desynchronize the byte windows.
            warn!("Downloader: suspicious redirection rejected");
            self.abort();
            return;
        }
        self.pending.push_back(Event::Redirected { url });
    }

    fn handle_error(&mut self, id: u32, kind: ErrorKind, message: String) {
        let Some(idx) = self.connection_index(id) else {
            return;
        };
        let connection = &mut self.connections[idx];
        connection.error = Some(kind);
        connection.error_string = message;
        self.error = Some(kind);
        self.pending.push_back(Event::ConnectionError { id, kind });
    }

    fn handle_finished(&mut self, id: u32) {
        let Some(idx) = self.connection_index(id) else {
            return;
        };
        self.connections[idx].running = false;
        let error = self.connections[idx].error;
        let completed = self.download_completed();

        if completed && error.is_none() {
            self.running = false;
            self.free();
        }
        self.pending.push_back(Event::ConnectionFinished { id });

        if error.is_some() {
            // Tear the rest of the run down; this connection's finished
            // event was already queued and is not repeated by the cascade.
            self.abort();
            return;
        }
        if completed {
            self.pending.push_back(Event::Finished);
            return;
        }

        let next_pos = self.next_portion_position();
        if next_pos > 0 {
            let mut next_size = self.untargeted_data_size();
            if next_size >= 2 * self.chunk_size_limit {
                next_size = self.chunk_size_limit;
            }
            if next_size > 0 {
                if let Some(url) = self.resolved_url.clone() {
                    self.create_connection(url, Some((next_pos, next_pos + next_size - 1)));
                }
            }
        }
    }

    // ---- connection lifecycle ----

    fn start_parallel_downloading(&mut self) {
        if !self.running || !self.resolved || !self.parallel_eligible || self.parallelism < 2 {
            return;
        }
        let Some(url) = self.resolved_url.clone() else {
            return;
        };
        for (begin, end) in partition::plan(
            self.content_length,
            self.parallelism,
            self.chunk_size_limit,
        ) {
            self.create_connection(url.clone(), Some((begin, end)));
        }
    }

    fn create_connection(&mut self, url: Url, range: Option<(i64, i64)>) {
        let id = self.generate_unique_id();
        let is_probe = range.is_none();
        let request = TransportRequest {
            url,
            range,
            follow_redirects: is_probe,
            max_redirects: if is_probe { self.max_redirects } else { 0 },
            high_priority: true,
            read_buffer_size: self.read_buffer_size,
            user_agent: USER_AGENT.to_string(),
            tls: self.tls.clone(),
        };
        let sink = EventSink::new(id, self.events_tx.clone());
        let handle = self.transport.start(request, sink);

        let mut connection = Connection::new(id, handle);
        if let Some((begin, end)) = range {
            connection.head = begin;
            connection.bytes_total = end - begin + 1;
        }
        self.connections.push(connection);
    }

    fn delete_connection(&mut self, id: u32) {
        if let Some(idx) = self.connection_index(id) {
            let connection = self.connections.remove(idx);
            connection.handle.abort();
        }
    }

    fn free(&mut self) {
        for connection in self.connections.drain(..) {
            connection.handle.abort();
        }
        self.resolved_url = None;
        self.content_length = 0;
        self.bytes_received_total = 0;
        self.parallel_eligible = false;
        self.resolved = false;
        self.running = false;
    }

    fn reset(&mut self) {
        self.running = true;
        self.resolved = false;
        self.parallel_eligible = false;
        self.resolved_url = None;
        self.content_length = 0;
        self.bytes_received_total = 0;
        self.error = None;
        self.used_ids.clear();
        self.pending.clear();
        // Fresh channel so a previous run's in-flight events cannot leak
        // into this one.
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        self.events_tx = events_tx;
        self.events_rx = events_rx;
    }

    fn generate_unique_id(&mut self) -> u32 {
        let mut id = rand::random::<u32>();
        while !self.used_ids.insert(id) {
            id = rand::random();
        }
        id
    }

    // ---- bookkeeping queries ----

    fn connection_index(&self, id: u32) -> Option<usize> {
        self.connections.iter().position(|c| c.id == id)
    }

    fn download_completed(&self) -> bool {
        if self.next_portion_available() {
            return false;
        }
        self.connections.iter().all(|c| !c.running)
    }

    fn next_portion_available(&self) -> bool {
        self.parallel_eligible
            && self.chunk_size_limit > 0
            && self.parallelism > 1
            && self.targeted_data_size() < self.content_length
    }

    /// Position right after the furthest targeted byte, or -1 when no
    /// untargeted tail remains to schedule.
    fn next_portion_position(&self) -> i64 {
        if !self.next_portion_available() {
            return -1;
        }
        self.connections
            .iter()
            .map(|c| c.head + c.bytes_total)
            .max()
            .unwrap_or(0)
    }

    fn targeted_data_size(&self) -> i64 {
        self.connections.iter().map(|c| c.bytes_total).sum()
    }

    fn untargeted_data_size(&self) -> i64 {
        self.content_length - self.targeted_data_size()
    }

    fn guarded(&self, id: u32, what: &str) -> Option<&Connection> {
        if !self.running {
            warn!("Downloader::{what}: no download in progress");
            return None;
        }
        let connection = self.connections.iter().find(|c| c.id == id);
        if connection.is_none() {
            warn!("Downloader::{what}: no connection matches the id provided");
        }
        connection
    }

    fn guarded_mut(&mut self, id: u32, what: &str) -> Option<&mut Connection> {
        if !self.running {
            warn!("Downloader::{what}: no download in progress");
            return None;
        }
        let connection = self.connections.iter_mut().find(|c| c.id == id);
        if connection.is_none() {
            warn!("Downloader::{what}: no connection matches the id provided");
        }
        connection
    }
}

impl Drop for Downloader {
    fn drop(&mut self) {
        if self.running {
            self.abort();
        }
    }
}
