//! reqwest-backed Transport
//!
//! The default [`Transport`] implementation. Every request gets its own
//! client so the redirect policy, TLS relaxations and timeout can be pinned
//! per request; the response body is drained chunk by chunk into the event
//! stream the way the downloader expects it.
//!
//! Limitations of the backend: reqwest exposes no request priority, so the
//! `high_priority` hint is ignored, and there is no mid-handshake hook for
//! TLS acknowledgment, so TLS relaxation is applied up front from
//! [`TlsConfig`](crate::TlsConfig) at client build time.

use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use reqwest::{header, redirect, Client};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::ErrorKind;
use crate::transport::{EventSink, Transport, TransportEvent, TransportHandle, TransportRequest};

/// Issues requests through reqwest.
pub struct HttpTransport {
    timeout: Option<Duration>,
}

impl HttpTransport {
    /// Transport without a request timeout; the origin's pace rules.
    pub fn new() -> Self {
        HttpTransport { timeout: None }
    }

    /// Transport that fails a response with [`ErrorKind::Timeout`] when it
    /// stalls past `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        HttpTransport {
            timeout: Some(timeout),
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        HttpTransport::new()
    }
}

impl Transport for HttpTransport {
    fn start(&self, request: TransportRequest, sink: EventSink) -> TransportHandle {
        let handle = TransportHandle::new();
        let timeout = self.timeout;
        tokio::spawn(drive(request, sink, handle.cancellation_token(), timeout));
        handle
    }
}

/// Runs one response to completion and terminates its stream with exactly
/// one `Finished`, on every path including cancellation.
async fn drive(
    request: TransportRequest,
    sink: EventSink,
    cancel: CancellationToken,
    timeout: Option<Duration>,
) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        outcome = run(&request, &sink, timeout) => {
            if let Err((kind, message)) = outcome {
                log::debug!("transport: request to {} failed: {message}", request.url);
                sink.emit(TransportEvent::Error { kind, message }).await;
            }
        }
    }
    sink.emit(TransportEvent::Finished).await;
}

async fn run(
    request: &TransportRequest,
    sink: &EventSink,
    timeout: Option<Duration>,
) -> Result<(), (ErrorKind, String)> {
    // Redirect hops observed by the client's policy, relayed in order
    // before the headers.
    let (redirect_tx, mut redirect_rx) = mpsc::unbounded_channel();
    let client = build_client(request, timeout, redirect_tx)
        .map_err(|e| (ErrorKind::Transport, format!("{e:#}")))?;

    let mut builder = client
        .get(request.url.clone())
        .header(header::USER_AGENT, &request.user_agent);
    if let Some(range) = request.range_header() {
        builder = builder.header(header::RANGE, range);
    }

    let response = match builder.send().await {
        Ok(response) => response,
        Err(error) => {
            let (kind, message) = classify(&error);
            if kind == ErrorKind::TlsHandshake {
                sink.emit(TransportEvent::TlsErrors {
                    errors: vec![message.clone()],
                })
                .await;
            }
            return Err((kind, message));
        }
    };

    while let Ok(url) = redirect_rx.try_recv() {
        sink.emit(TransportEvent::Redirected { url }).await;
    }

    let status = response.status();
    let headers = response
        .headers()
        .iter()
        .map(|(key, value)| {
            (
                key.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect();
    sink.emit(TransportEvent::Headers {
        url: response.url().clone(),
        status: status.as_u16(),
        headers,
    })
    .await;

    // A ranged request answered with the full body means the origin
    // ignored the Range header; the windows would overlap.
    if request.range.is_some() && status.as_u16() == 200 {
        return Err((
            ErrorKind::Protocol,
            "ranged request answered with a full response".to_string(),
        ));
    }
    if status.is_client_error() || status.is_server_error() {
        return Err((
            ErrorKind::HttpStatus(status.as_u16()),
            format!("server answered {status}"),
        ));
    }

    let bytes_total = response.content_length().map_or(-1, |n| n as i64);
    let mut bytes_received: i64 = 0;
    let mut response = response;
    loop {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                for piece in split_chunk(chunk, request.read_buffer_size) {
                    bytes_received += piece.len() as i64;
                    if !sink.emit(TransportEvent::Body { chunk: piece }).await {
                        return Ok(());
                    }
                    if !sink
                        .emit(TransportEvent::Progress {
                            bytes_received,
                            bytes_total,
                        })
                        .await
                    {
                        return Ok(());
                    }
                }
            }
            Ok(None) => return Ok(()),
            Err(error) => return Err(classify(&error)),
        }
    }
}

fn build_client(
    request: &TransportRequest,
    timeout: Option<Duration>,
    redirect_tx: mpsc::UnboundedSender<Url>,
) -> anyhow::Result<Client> {
    let policy = if request.follow_redirects && request.max_redirects > 0 {
        let max_redirects = request.max_redirects as usize;
        redirect::Policy::custom(move |attempt| {
            if attempt.previous().len() > max_redirects {
                attempt.error("too many redirects")
            } else {
                let _ = redirect_tx.send(attempt.url().clone());
                attempt.follow()
            }
        })
    } else {
        redirect::Policy::none()
    };

    let mut builder = Client::builder()
        .redirect(policy)
        .danger_accept_invalid_certs(request.tls.accept_invalid_certs)
        .danger_accept_invalid_hostnames(request.tls.accept_invalid_hostnames);
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder.build().context("failed to build HTTP client")
}

/// Caps the size of a single `Body` event at the requested read-ahead.
fn split_chunk(mut chunk: Bytes, read_buffer_size: i64) -> Vec<Bytes> {
    if read_buffer_size <= 0 || (chunk.len() as i64) <= read_buffer_size {
        return vec![chunk];
    }
    let cap = read_buffer_size as usize;
    let mut pieces = Vec::with_capacity(chunk.len().div_ceil(cap));
    while chunk.len() > cap {
        pieces.push(chunk.split_to(cap));
    }
    pieces.push(chunk);
    pieces
}

fn classify(error: &reqwest::Error) -> (ErrorKind, String) {
    let message = describe(error);
    let lowered = message.to_ascii_lowercase();
    let kind = if error.is_timeout() {
        ErrorKind::Timeout
    } else if lowered.contains("certificate") || lowered.contains("tls") || lowered.contains("ssl")
    {
        ErrorKind::TlsHandshake
    } else if error.is_connect() {
        if lowered.contains("dns") || lowered.contains("lookup") {
            ErrorKind::HostNotFound
        } else {
            ErrorKind::ConnectionFailed
        }
    } else if error.is_body() || error.is_decode() {
        ErrorKind::RemoteHostClosed
    } else if error.is_redirect() {
        ErrorKind::Protocol
    } else {
        ErrorKind::Transport
    };
    (kind, message)
}

/// Flattens an error and its source chain into one line.
fn describe(error: &(dyn std::error::Error + 'static)) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_chunk_respects_cap() {
        let pieces = split_chunk(Bytes::from(vec![0u8; 10]), 4);
        let sizes: Vec<usize> = pieces.iter().map(Bytes::len).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
    }

    #[test]
    fn test_split_chunk_without_cap_is_identity() {
        let pieces = split_chunk(Bytes::from_static(b"abc"), 0);
        assert_eq!(pieces.len(), 1);
        assert_eq!(&pieces[0][..], b"abc");
    }
}
