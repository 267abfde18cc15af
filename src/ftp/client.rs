//! Stateful FTP client — owns the control channel and issues commands.
//!
//! Lifecycle: connect → greeting → [TLS negotiation] → authenticate →
//! ready. Once ready the session alternates between idle and exactly
//! one in-flight command: every helper takes `&mut self`, so a second
//! command cannot start until the previous reply has been fully read
//! (the protocol is inherently half-duplex).
//!
//! The client exposes the low-level command helpers used by
//! `directory.rs` and `file_ops.rs` for the higher-level operations.

use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::file_ops::ContentCache;
use crate::ftp::protocol::ControlChannel;
use crate::ftp::stream::StreamTransport;
use crate::ftp::tls;
use crate::ftp::types::*;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use log::{debug, warn};
use rustls_pki_types::ServerName;
use std::sync::Arc;
use tokio_rustls::TlsConnector;
use uuid::Uuid;

/// A connected FTP session.
pub struct FtpClient {
    pub id: String,
    pub(crate) ctrl: ControlChannel,
    pub config: SessionConfig,
    /// Whether the control channel is TLS-wrapped.
    pub(crate) secured: bool,
    /// One connector per session; data channels reuse it (and with it
    /// the TLS session cache).
    pub(crate) tls: Option<(TlsConnector, ServerName<'static>)>,
    machine_listing: MachineListing,
    /// Optional content cache consulted before RETR.
    pub(crate) cache: Option<Arc<dyn ContentCache>>,
    connected: bool,
}

impl std::fmt::Debug for FtpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FtpClient")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("secured", &self.secured)
            .field("connected", &self.connected)
            .finish_non_exhaustive()
    }
}

impl FtpClient {
    /// Establish a new FTP session: TCP connect, greeting, TLS
    /// negotiation per scheme, login, TYPE, optional initial CWD.
    pub async fn connect(config: SessionConfig) -> FtpResult<Self> {
        if config.host.is_empty() {
            return Err(FtpError::invalid_config("Host must not be empty"));
        }

        let transport =
            StreamTransport::connect(&config.host, config.port, config.connect_timeout()).await?;
        let mut ctrl = ControlChannel::new(
            transport,
            config.read_timeout(),
            config.write_timeout(),
        );

        let tls = if config.uses_tls() {
            Some((
                tls::build_tls_connector(config.accept_invalid_certs)?,
                tls::server_name(&config.host)?,
            ))
        } else {
            None
        };

        // ── Implicit FTPS: TLS before any byte of protocol ───────
        let mut secured = false;
        if config.is_implicit_tls() {
            let (connector, name) = tls
                .as_ref()
                .ok_or_else(|| FtpError::tls_failed("implicit TLS requires a connector"))?;
            ctrl.transport_mut()
                .start_secure_connection(connector, name.clone(), config.connect_timeout())
                .await?;
            secured = true;
        }

        // ── Greeting must be 22x ─────────────────────────────────
        let greeting = ctrl.read_reply().await?;
        if greeting.code / 10 != 22 {
            return Err(FtpError::protocol(format!(
                "unexpected greeting: {}",
                greeting.text()
            ))
            .with_code(greeting.code));
        }
        debug!("server greeting: {}", greeting.text());

        // ── Explicit FTPS: AUTH TLS, then upgrade in place ───────
        if config.scheme == Scheme::Ftpes && !secured {
            let reply = ctrl.execute("AUTH TLS").await?;
            if reply.code / 10 != 23 {
                return Err(FtpError::tls_failed(format!(
                    "AUTH TLS rejected: {}",
                    reply.text()
                ))
                .with_code(reply.code));
            }
            let (connector, name) = tls
                .as_ref()
                .ok_or_else(|| FtpError::tls_failed("explicit TLS requires a connector"))?;
            ctrl.transport_mut()
                .start_secure_connection(connector, name.clone(), config.connect_timeout())
                .await?;
            secured = true;
        }

        // ── Data-connection protection level ─────────────────────
        if secured {
            ctrl.expect_ok("PBSZ 0").await?;
            let prot = if config.secure_data_connection {
                "PROT P"
            } else {
                "PROT C"
            };
            ctrl.expect_ok(prot).await?;
        }

        // ── Authenticate ─────────────────────────────────────────
        let user_reply = ctrl.execute(&format!("USER {}", config.username)).await?;
        match user_reply.code / 10 {
            23 => {}
            33 => {
                let pass_reply = ctrl.execute(&format!("PASS {}", config.password)).await?;
                if pass_reply.code / 10 != 23 {
                    return Err(FtpError::auth_failed(format!(
                        "login failed: {}",
                        pass_reply.text()
                    ))
                    .with_code(pass_reply.code));
                }
            }
            _ => {
                return Err(FtpError::auth_failed(format!(
                    "USER rejected: {}",
                    user_reply.text()
                ))
                .with_code(user_reply.code));
            }
        }

        // ── TYPE ─────────────────────────────────────────────────
        let type_cmd = match config.transfer_type {
            TransferType::Ascii => "TYPE A",
            TransferType::Binary => "TYPE I",
        };
        ctrl.expect_ok(type_cmd).await?;

        let mut client = Self {
            id: Uuid::new_v4().to_string(),
            ctrl,
            config,
            secured,
            tls,
            machine_listing: MachineListing::Unknown,
            cache: None,
            connected: true,
        };

        // ── Initial CWD ──────────────────────────────────────────
        if let Some(dir) = client.config.initial_directory.clone() {
            client.cwd(&dir).await?;
        }

        Ok(client)
    }

    // ─── CWD / NOOP / QUIT ──────────────────────────────────────

    /// Change the working directory. 25x means success; anything else
    /// (usually 55x) is a protocol error.
    pub async fn cwd(&mut self, path: &str) -> FtpResult<()> {
        let reply = self.ctrl.execute(&format!("CWD {}", path)).await?;
        if reply.code / 10 != 25 {
            return Err(FtpError::from_reply(reply.code, &reply.text()));
        }
        Ok(())
    }

    /// Keep the control connection alive.
    pub async fn noop(&mut self) -> FtpResult<()> {
        self.ctrl.expect_ok("NOOP").await?;
        Ok(())
    }

    /// Gracefully close the session. Best-effort: a server that has
    /// already dropped the connection must not turn QUIT into an error.
    pub async fn quit(&mut self) -> FtpResult<()> {
        let _ = self.ctrl.execute("QUIT").await;
        let _ = self
            .ctrl
            .transport_mut()
            .close_write(self.config.write_timeout())
            .await;
        self.connected = false;
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    // ─── SIZE / MDTM ────────────────────────────────────────────

    /// Size of a remote file in bytes (RFC 3659 SIZE).
    pub async fn size(&mut self, path: &str) -> FtpResult<i64> {
        let reply = self.ctrl.expect_ok(&format!("SIZE {}", path)).await?;
        let text = reply.text();
        // "213 12345"
        text.split_whitespace()
            .nth(1)
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or_else(|| FtpError::protocol(format!("cannot parse SIZE reply: {}", text)))
    }

    /// Modification time of a remote file (RFC 3659 MDTM).
    pub async fn mdtm(&mut self, path: &str) -> FtpResult<Option<DateTime<Utc>>> {
        let reply = self.ctrl.expect_ok(&format!("MDTM {}", path)).await?;
        let text = reply.text();
        // "213 20260101120000"
        let stamp = match text.split_whitespace().nth(1) {
            Some(s) if s.len() >= 14 => &s[..14],
            _ => return Ok(None),
        };
        Ok(NaiveDateTime::parse_from_str(stamp, "%Y%m%d%H%M%S")
            .ok()
            .map(|dt| Utc.from_utc_datetime(&dt)))
    }

    // ─── Capability latch ───────────────────────────────────────

    /// Whether MLSD/MLST should be attempted for this session.
    pub fn machine_listing(&self) -> MachineListing {
        self.machine_listing
    }

    /// Record that the server honoured a machine listing.
    pub(crate) fn confirm_machine_listing(&mut self) {
        if self.machine_listing == MachineListing::Unknown {
            self.machine_listing = MachineListing::Supported;
        }
    }

    /// Latch machine listings off for the rest of the session. Never
    /// reverts.
    pub(crate) fn disable_machine_listing(&mut self) {
        if self.machine_listing != MachineListing::Unsupported {
            warn!("machine listing unsupported by server, using LIST for the rest of the session");
            self.machine_listing = MachineListing::Unsupported;
        }
    }

    /// Install a content cache, consulted before RETR and populated
    /// after complete downloads.
    pub fn set_content_cache(&mut self, cache: Arc<dyn ContentCache>) {
        self.cache = Some(cache);
    }

    // ─── Utility ─────────────────────────────────────────────────

    /// Whether data channels must be TLS-wrapped (PROT P in effect).
    pub(crate) fn data_channel_secured(&self) -> bool {
        self.secured && self.config.secure_data_connection
    }

    /// Cache key for a remote path, unique per host/port/path.
    pub(crate) fn resource_key(&self, remote_path: &str) -> String {
        let scheme = match self.config.scheme {
            Scheme::Ftp => "ftp",
            Scheme::Ftps => "ftps",
            Scheme::Ftpes => "ftpes",
        };
        let sep = if remote_path.starts_with('/') { "" } else { "/" };
        format!(
            "{}://{}:{}{}{}",
            scheme, self.config.host, self.config.port, sep, remote_path
        )
    }
}
