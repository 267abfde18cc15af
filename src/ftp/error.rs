//! FTP-specific error type.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Categorised FTP error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FtpError {
    pub kind: FtpErrorKind,
    pub message: String,
    /// FTP reply code that triggered the error, if any.
    pub code: Option<u16>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FtpErrorKind {
    /// TCP connect / DNS resolution failure.
    ConnectionFailed,
    /// Transport read failure (including peer reset and early EOF).
    ReadFailed,
    /// Transport write failure.
    WriteFailed,
    /// An I/O operation exceeded its deadline.
    TimedOut,
    /// Operation aborted through the transport's cancel handle.
    Cancelled,
    /// TLS handshake / upgrade failure.
    TlsFailed,
    /// Wrong username/password.
    AuthFailed,
    /// A 4xx/5xx reply, or a reply that cannot be parsed.
    Protocol,
    /// Feature not offered by the server (machine listing latch).
    Unsupported,
    /// Local source/sink read-write failure.
    Resource,
    /// Config / parameter validation error.
    InvalidConfig,
}

pub type FtpResult<T> = Result<T, FtpError>;

// ── Construction helpers ─────────────────────────────────────────────

impl FtpError {
    pub fn new(kind: FtpErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            message: msg.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: u16) -> Self {
        self.code = Some(code);
        self
    }

    // ── Convenience constructors ─────────────────────────────────

    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::ConnectionFailed, msg)
    }

    pub fn read_failed(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::ReadFailed, msg)
    }

    pub fn write_failed(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::WriteFailed, msg)
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::TimedOut, msg)
    }

    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::Cancelled, msg)
    }

    pub fn tls_failed(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::TlsFailed, msg)
    }

    pub fn auth_failed(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::AuthFailed, msg)
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::Protocol, msg)
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::Unsupported, msg)
    }

    pub fn resource(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::Resource, msg)
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::InvalidConfig, msg)
    }

    /// Classify an FTP reply code into the most appropriate error kind.
    pub fn from_reply(code: u16, text: &str) -> Self {
        let kind = match code {
            430 | 530 => FtpErrorKind::AuthFailed,
            _ => FtpErrorKind::Protocol,
        };
        Self {
            kind,
            message: text.to_string(),
            code: Some(code),
        }
    }

    /// Whether the error came from the transport layer (as opposed to a
    /// server reply or local resource).
    pub fn is_transport(&self) -> bool {
        matches!(
            self.kind,
            FtpErrorKind::ConnectionFailed
                | FtpErrorKind::ReadFailed
                | FtpErrorKind::WriteFailed
                | FtpErrorKind::TimedOut
                | FtpErrorKind::Cancelled
        )
    }

    /// Whether the server rejected the command as not implemented (50x).
    pub fn is_not_implemented(&self) -> bool {
        matches!(self.code, Some(c) if (500..510).contains(&c))
    }
}

impl fmt::Display for FtpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(code) = self.code {
            write!(f, "[FTP {:?} {}] {}", self.kind, code, self.message)
        } else {
            write!(f, "[FTP {:?}] {}", self.kind, self.message)
        }
    }
}

impl std::error::Error for FtpError {}

impl From<std::io::Error> for FtpError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::TimedOut {
            Self::timeout(format!("I/O timeout: {}", e))
        } else {
            Self::resource(e.to_string())
        }
    }
}
