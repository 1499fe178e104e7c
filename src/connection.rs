//! Connection Bookkeeping
//!
//! One [`Connection`] record per transport request: identity, the assigned
//! byte window, the response buffer the reader API drains, and the counters
//! the orchestrator aggregates.

use bytes::{Buf, Bytes, BytesMut};
use url::Url;

use crate::error::ErrorKind;
use crate::transport::TransportHandle;

/// Per-request bookkeeping owned by the orchestrator.
pub(crate) struct Connection {
    /// Opaque id handed to the consumer. Unique for the whole run.
    pub id: u32,
    /// Absolute offset of this connection's first byte; 0 for the probe.
    pub head: i64,
    /// Bytes the consumer has drained through the reader API.
    pub pos: i64,
    /// Bytes the transport has delivered into the buffer since start.
    pub bytes_received: i64,
    /// Expected window size; -1 when unknown, 0 before known.
    pub bytes_total: i64,
    /// Cleared when the transport delivers its terminal event.
    pub running: bool,
    pub error: Option<ErrorKind>,
    pub error_string: String,
    /// Effective response URL, once headers arrived.
    pub url: Option<Url>,
    pub headers: Vec<(String, String)>,
    buffer: BytesMut,
    pub handle: TransportHandle,
}

impl Connection {
    pub fn new(id: u32, handle: TransportHandle) -> Self {
        Connection {
            id,
            head: 0,
            pos: 0,
            bytes_received: 0,
            bytes_total: 0,
            running: true,
            error: None,
            error_string: String::new(),
            url: None,
            headers: Vec::new(),
            buffer: BytesMut::new(),
            handle,
        }
    }

    /// Case-insensitive raw header lookup.
    pub fn raw_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn append(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    pub fn bytes_available(&self) -> i64 {
        self.buffer.len() as i64
    }

    pub fn at_end(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Copies up to `max` buffered bytes without consuming them.
    pub fn peek(&self, max: i64) -> Bytes {
        let n = self.clamp(max);
        Bytes::copy_from_slice(&self.buffer[..n])
    }

    /// Drains up to `max` bytes, advancing `pos`.
    pub fn read(&mut self, max: i64) -> Bytes {
        let n = self.clamp(max);
        self.take(n)
    }

    /// Drains the whole buffer, advancing `pos`.
    pub fn read_all(&mut self) -> Bytes {
        let n = self.buffer.len();
        self.take(n)
    }

    /// Drains up to and including the next newline. Without a buffered
    /// newline this returns what is available; `max <= 0` means no limit.
    pub fn read_line(&mut self, max: i64) -> Bytes {
        let limit = if max > 0 {
            self.clamp(max)
        } else {
            self.buffer.len()
        };
        let n = match self.buffer[..limit].iter().position(|&b| b == b'\n') {
            Some(at) => at + 1,
            None => limit,
        };
        self.take(n)
    }

    /// Discards up to `max` bytes, advancing `pos`. Returns the count.
    pub fn skip(&mut self, max: i64) -> i64 {
        let n = self.clamp(max);
        self.buffer.advance(n);
        self.pos += n as i64;
        n as i64
    }

    fn take(&mut self, n: usize) -> Bytes {
        let out = self.buffer.split_to(n).freeze();
        self.pos += out.len() as i64;
        out
    }

    fn clamp(&self, max: i64) -> usize {
        max.max(0).min(self.buffer.len() as i64) as usize
    }
}
