//! # ftpkit — FTP/FTPS protocol engine
//!
//! Implementation of the FTP client protocol (RFC 959) with the
//! extensions a remote-file provider actually needs:
//! - **RFC 2228 / 4217** — AUTH TLS / FTPS (Explicit & Implicit)
//! - **RFC 3659** — MLSD/MLST facts, SIZE, MDTM, REST STREAM
//! - **RFC 2428** — EPSV (with transparent PASV fallback)
//!
//! Architecture:
//! - `types` — configuration, entries, progress, reply types
//! - `error` — categorised error type
//! - `status` — reply-code constants and class predicates
//! - `stream` — timeout-bounded byte transport with in-place TLS upgrade
//! - `protocol` — control-channel command/reply codec
//! - `tls` — rustls connector construction
//! - `client` — stateful session (login state machine, CWD, QUIT)
//! - `transfer` — data-channel negotiation (PASV/EPSV/PORT)
//! - `file_ops` — download/upload engine (serial and parted strategies)
//! - `parser` — Unix/DOS/MLSD listing grammars
//! - `directory` — listing, recursive walk, directory mutations
//! - `queue` — transfer queue with concurrency, retry and progress

pub mod client;
pub mod directory;
pub mod error;
pub mod file_ops;
pub mod parser;
pub mod protocol;
pub mod queue;
pub mod status;
pub mod stream;
pub mod tls;
pub mod transfer;
pub mod types;

pub use client::FtpClient;
pub use error::{FtpError, FtpErrorKind, FtpResult};
pub use file_ops::ContentCache;
pub use queue::TransferQueue;
pub use stream::StreamTransport;
pub use types::*;
