//! ftpkit — async FTP/FTPS client engine.
//!
//! The crate implements the FTP backend of a multi-provider remote-file
//! stack: a persistent control channel with strictly serialized commands,
//! passive/extended-passive/active data-channel negotiation, explicit and
//! implicit TLS, chunked resumable transfers, and a directory-listing
//! parser covering the Unix, DOS and MLSD grammars.

pub mod ftp;

pub use ftp::client::FtpClient;
pub use ftp::error::{FtpError, FtpErrorKind, FtpResult};
pub use ftp::types::*;
