//! Data-channel negotiation for FTP transfers.
//!
//! Supports three modes (RFC 959 + RFC 2428):
//! - **PASV** — server opens a port, client connects
//! - **EPSV** — extended passive; falls back to PASV when the server
//!   does not implement it
//! - **PORT** — client opens a port, server connects
//!
//! The `Default` policy picks extended passive on secured sessions (or
//! port 990) and plain passive otherwise. The negotiated transport is
//! TLS-wrapped when PROT P is in effect, reusing the control channel's
//! TLS session through the shared connector.

use crate::ftp::client::FtpClient;
use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::status;
use crate::ftp::stream::StreamTransport;
use crate::ftp::types::TransferMode;
use lazy_static::lazy_static;
use log::{debug, warn};
use regex::Regex;
use rustls_pki_types::ServerName;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_rustls::TlsConnector;

lazy_static! {
    // (h1,h2,h3,h4,p1,p2) in a 227 reply
    static ref PASV_RE: Regex = Regex::new(r"\((\d+),(\d+),(\d+),(\d+),(\d+),(\d+)\)").unwrap();
    // (|||port|) in a 229 reply
    static ref EPSV_RE: Regex = Regex::new(r"\|\|\|(\d+)\|").unwrap();
}

/// Mode after policy resolution; `Default` no longer appears.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NegotiatedMode {
    Passive,
    ExtendedPassive,
    Active,
}

fn resolve_mode(policy: TransferMode, secured: bool, port: u16) -> NegotiatedMode {
    match policy {
        TransferMode::Passive => NegotiatedMode::Passive,
        TransferMode::ExtendedPassive => NegotiatedMode::ExtendedPassive,
        TransferMode::Active => NegotiatedMode::Active,
        TransferMode::Default => {
            if secured || port == 990 {
                NegotiatedMode::ExtendedPassive
            } else {
                NegotiatedMode::Passive
            }
        }
    }
}

/// A negotiated data channel, not yet ready for payload I/O.
///
/// In passive modes the outbound connection already exists; in active
/// mode the server connects only once the transfer command is on the
/// wire, so the accept must wait. [`DataChannel::resolve`] is called
/// after the command is sent and performs the accept (active) and the
/// TLS wrap (PROT P sessions).
pub struct DataChannel {
    inner: Inner,
    tls: Option<(TlsConnector, ServerName<'static>)>,
    timeout: Duration,
}

enum Inner {
    Connected(StreamTransport),
    Pending(TcpListener),
}

impl DataChannel {
    /// Complete the channel: accept the inbound leg when the server
    /// dials us, and secure the transport when the session requires it.
    pub async fn resolve(self) -> FtpResult<StreamTransport> {
        let mut transport = match self.inner {
            Inner::Connected(t) => t,
            Inner::Pending(listener) => {
                StreamTransport::connect_to_pending_listener(&listener, self.timeout).await?
            }
        };
        if let Some((connector, name)) = self.tls {
            transport
                .start_secure_connection(&connector, name, self.timeout)
                .await?;
        }
        Ok(transport)
    }
}

/// Negotiate a data channel according to the session's policy.
pub async fn open_data_channel(client: &mut FtpClient) -> FtpResult<DataChannel> {
    let mode = resolve_mode(
        client.config.transfer_mode,
        client.secured,
        client.config.port,
    );
    debug!("opening data channel ({:?})", mode);

    let inner = match mode {
        NegotiatedMode::Passive => Inner::Connected(open_passive(client).await?),
        NegotiatedMode::ExtendedPassive => Inner::Connected(open_extended_passive(client).await?),
        NegotiatedMode::Active => Inner::Pending(open_active(client).await?),
    };

    let tls = if client.data_channel_secured() {
        Some(
            client
                .tls
                .clone()
                .ok_or_else(|| FtpError::tls_failed("secured data channel without a connector"))?,
        )
    } else {
        None
    };

    Ok(DataChannel {
        inner,
        tls,
        timeout: client.config.connect_timeout(),
    })
}

// ─── PASV ────────────────────────────────────────────────────────────

/// Issue `PASV`, parse the reply, connect to the advertised endpoint.
///
/// Reply format: `227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)`
async fn open_passive(client: &mut FtpClient) -> FtpResult<StreamTransport> {
    let reply = client.ctrl.expect_ok("PASV").await?;
    let (host, port) = parse_pasv_reply(&reply.text(), &client.config.host)?;
    StreamTransport::connect(&host, port, client.config.connect_timeout()).await
}

/// Parse the endpoint from the last whitespace-delimited token of a
/// 227 reply. Servers behind NAT sometimes advertise a loopback or
/// unspecified host; the control connection's host is substituted then.
fn parse_pasv_reply(text: &str, control_host: &str) -> FtpResult<(String, u16)> {
    let token = text
        .split_whitespace()
        .last()
        .ok_or_else(|| FtpError::protocol(format!("empty PASV reply: {}", text)))?;
    let caps = PASV_RE
        .captures(token)
        .ok_or_else(|| FtpError::protocol(format!("cannot parse PASV reply: {}", text)))?;

    let mut nums = [0u8; 6];
    for (i, slot) in nums.iter_mut().enumerate() {
        *slot = caps[i + 1]
            .parse::<u8>()
            .map_err(|_| FtpError::protocol(format!("PASV number out of range: {}", text)))?;
    }

    let ip = Ipv4Addr::new(nums[0], nums[1], nums[2], nums[3]);
    let port = (nums[4] as u16) * 256 + nums[5] as u16;
    let host = if ip.is_loopback() || ip.is_unspecified() {
        control_host.to_string()
    } else {
        ip.to_string()
    };
    Ok((host, port))
}

// ─── EPSV ────────────────────────────────────────────────────────────

/// Issue `EPSV`, parse the port, connect to the control host on it.
/// A 50x reply means the server does not implement EPSV; fall back to
/// PASV transparently.
///
/// Reply format: `229 Entering Extended Passive Mode (|||port|)`
async fn open_extended_passive(client: &mut FtpClient) -> FtpResult<StreamTransport> {
    let reply = client.ctrl.execute("EPSV").await?;
    if status::is_permanent_error(reply.code) {
        warn!("EPSV rejected with {}, falling back to PASV", reply.code);
        return open_passive(client).await;
    }
    if !reply.is_completion() {
        return Err(FtpError::from_reply(reply.code, &reply.text()));
    }
    let port = parse_epsv_reply(&reply.text())?;
    StreamTransport::connect(&client.config.host, port, client.config.connect_timeout()).await
}

fn parse_epsv_reply(text: &str) -> FtpResult<u16> {
    let caps = EPSV_RE
        .captures(text)
        .ok_or_else(|| FtpError::protocol(format!("cannot parse EPSV reply: {}", text)))?;
    caps[1]
        .parse::<u16>()
        .map_err(|_| FtpError::protocol(format!("EPSV port out of range: {}", text)))
}

// ─── PORT (active) ───────────────────────────────────────────────────

/// Bind a local listener and announce it via `PORT`. The accept
/// happens at resolve time, after the transfer command is sent. Any
/// 5xx reply cancels the listener and fails.
async fn open_active(client: &mut FtpClient) -> FtpResult<TcpListener> {
    let bind = client
        .config
        .active_bind_address
        .clone()
        .unwrap_or_else(|| "0.0.0.0".into());
    let listener = tokio::time::timeout(
        client.config.connect_timeout(),
        TcpListener::bind(format!("{}:0", bind)),
    )
    .await
    .map_err(|_| FtpError::timeout("active listener bind timed out"))?
    .map_err(|e| FtpError::connection_failed(format!("active bind on {}: {}", bind, e)))?;

    let port = listener
        .local_addr()
        .map_err(|e| FtpError::connection_failed(e.to_string()))?
        .port();

    // Advertise the interface the control connection runs on.
    let ip = match client.ctrl.transport().local_addr()?.ip() {
        IpAddr::V4(v4) => v4,
        IpAddr::V6(_) => return Err(FtpError::invalid_config("PORT requires IPv4")),
    };
    let o = ip.octets();
    let cmd = format!(
        "PORT {},{},{},{},{},{}",
        o[0],
        o[1],
        o[2],
        o[3],
        port / 256,
        port % 256
    );
    let reply = client.ctrl.execute(&cmd).await?;
    if status::is_permanent_error(reply.code) {
        drop(listener);
        return Err(FtpError::from_reply(reply.code, &reply.text()));
    }

    Ok(listener)
}
