//! fastdl - Accelerated HTTP(S) Downloads
//!
//! This crate speeds up retrieval of a single HTTP(S) resource by opening
//! multiple concurrent range-based connections, each fetching a disjoint
//! byte window, and exposing per-connection streaming reads to the
//! consumer. Applications such as media players and downloaders can begin
//! consuming bytes before the full payload arrives while spreading
//! head-of-line latency across several TCP flows.
//!
//! A download starts with a redirect-following probe request. Once the
//! probe's first bytes arrive the origin's capabilities are inspected:
//! when it advertises `Accept-Ranges: bytes` and declares a large enough
//! `Content-Length`, the probe is discarded and the content is partitioned
//! across ranged connections; otherwise the probe carries the whole
//! payload alone. Progress, errors and completion of every connection are
//! funneled into one typed event stream the consumer pulls from.
//!
//! ## Example
//!
//! ```no_run
//! use fastdl::{Downloader, Event};
//! use url::Url;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let url = Url::parse("https://example.com/large-file.bin")?;
//! let mut downloader = Downloader::new(url);
//! downloader.set_parallelism(4);
//! assert!(downloader.start());
//!
//! while let Some(event) = downloader.next_event().await {
//!     match event {
//!         Event::ReadyRead { id } => {
//!             let offset = downloader.head(id) + downloader.pos(id);
//!             let bytes = downloader.read_all(id);
//!             // place `bytes` at `offset` in the target
//!             let _ = (offset, bytes);
//!         }
//!         Event::Finished => break,
//!         _ => {}
//!     }
//! }
//! assert!(!downloader.is_error());
//! # Ok(())
//! # }
//! ```
//!
//! The chunks are surfaced with their starting offsets; assembling them
//! into a file or a single ordered stream is up to the consumer.

mod connection;
mod downloader;
mod partition;
mod tls;

pub mod constants;
pub mod error;
pub mod events;
pub mod transport;

pub use downloader::Downloader;
pub use error::ErrorKind;
pub use events::Event;
pub use tls::TlsConfig;
pub use transport::http::HttpTransport;
