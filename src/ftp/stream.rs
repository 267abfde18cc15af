//! Timeout-bounded bidirectional byte transport.
//!
//! `StreamTransport` is what both the control and data channels run on:
//! a plain or TLS-wrapped TCP stream behind one interface, with a
//! deadline on every read and write, half-close, in-place TLS
//! upgrade/downgrade, and immediate cancellation through a shared
//! handle. The TLS variant keeps the session's `rustls` client config,
//! so a data channel opened with the same config resumes the control
//! channel's TLS session instead of running a full handshake.

use crate::ftp::error::{FtpError, FtpErrorKind, FtpResult};
use log::debug;
use rustls_pki_types::ServerName;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::time::{timeout_at, Instant};
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

/// Plain or TLS-wrapped socket behind the transport.
enum Socket {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

/// Cancels every pending and future operation of one transport.
#[derive(Clone)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancelHandle {
    fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Abort all pending transport operations with `Cancelled`.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Bidirectional byte stream with timeout-bounded operations.
pub struct StreamTransport {
    socket: Option<Socket>,
    buffer: Vec<u8>,
    eof: bool,
    cancel: CancelHandle,
}

impl StreamTransport {
    fn from_tcp(tcp: TcpStream) -> Self {
        Self {
            socket: Some(Socket::Plain(tcp)),
            buffer: Vec::new(),
            eof: false,
            cancel: CancelHandle::new(),
        }
    }

    /// Open an outbound connection to `host:port`.
    pub async fn connect(host: &str, port: u16, timeout: Duration) -> FtpResult<Self> {
        let addr = format!("{}:{}", host, port);
        let tcp = tokio::time::timeout(timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| FtpError::timeout(format!("TCP connect to {} timed out", addr)))?
            .map_err(|e| FtpError::connection_failed(format!("TCP connect to {}: {}", addr, e)))?;
        tcp.set_nodelay(true).ok();
        debug!("transport connected to {}", addr);
        Ok(Self::from_tcp(tcp))
    }

    /// Accept the inbound leg of an active-mode data connection.
    pub async fn connect_to_pending_listener(
        listener: &TcpListener,
        timeout: Duration,
    ) -> FtpResult<Self> {
        let (tcp, peer) = tokio::time::timeout(timeout, listener.accept())
            .await
            .map_err(|_| FtpError::timeout("data connection accept timed out"))?
            .map_err(|e| FtpError::connection_failed(format!("data connection accept: {}", e)))?;
        tcp.set_nodelay(true).ok();
        debug!("transport accepted data connection from {}", peer);
        Ok(Self::from_tcp(tcp))
    }

    /// Handle for aborting this transport's operations from elsewhere.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn is_secure(&self) -> bool {
        matches!(self.socket, Some(Socket::Tls(_)))
    }

    pub fn local_addr(&self) -> FtpResult<SocketAddr> {
        self.tcp_ref()?
            .local_addr()
            .map_err(|e| FtpError::connection_failed(e.to_string()))
    }

    pub fn peer_addr(&self) -> FtpResult<SocketAddr> {
        self.tcp_ref()?
            .peer_addr()
            .map_err(|e| FtpError::connection_failed(e.to_string()))
    }

    fn tcp_ref(&self) -> FtpResult<&TcpStream> {
        match &self.socket {
            Some(Socket::Plain(s)) => Ok(s),
            Some(Socket::Tls(s)) => Ok(s.get_ref().0),
            None => Err(FtpError::connection_failed("transport closed")),
        }
    }

    // ─── Reading ─────────────────────────────────────────────────

    /// Read between `min` and `max` bytes within `timeout`.
    ///
    /// Waits until at least `min` bytes are buffered, the deadline
    /// passes, or the peer closes the stream. Returns up to `max`
    /// bytes and an end-of-stream flag. A timeout with nothing
    /// buffered is an error; a timeout with partial data returns the
    /// partial data.
    pub async fn read(
        &mut self,
        min: usize,
        max: usize,
        timeout: Duration,
    ) -> FtpResult<(Vec<u8>, bool)> {
        let deadline = Instant::now() + timeout;
        while self.buffer.len() < min && !self.eof {
            match self.fill(deadline).await {
                Ok(0) => self.eof = true,
                Ok(_) => {}
                Err(e) if e.kind == FtpErrorKind::TimedOut => {
                    if self.buffer.is_empty() {
                        return Err(e);
                    }
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        let take = self.buffer.len().min(max);
        let out: Vec<u8> = self.buffer.drain(..take).collect();
        Ok((out, self.eof && self.buffer.is_empty()))
    }

    /// Read one line, stripping the trailing CRLF.
    pub async fn read_line(&mut self, timeout: Duration) -> FtpResult<String> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
                let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
                while matches!(line.last(), Some(&b'\r') | Some(&b'\n')) {
                    line.pop();
                }
                return String::from_utf8(line)
                    .map_err(|e| FtpError::protocol(format!("reply is not UTF-8: {}", e)));
            }
            if self.eof {
                return Err(FtpError::read_failed("connection closed mid-line"));
            }
            if self.fill(deadline).await? == 0 {
                self.eof = true;
            }
        }
    }

    /// Pull one chunk from the socket into the buffer, bounded by
    /// `deadline` and the cancel handle. Returns the byte count (0 on
    /// end of stream).
    async fn fill(&mut self, deadline: Instant) -> FtpResult<usize> {
        if self.cancel.is_cancelled() {
            return Err(FtpError::cancelled("transport cancelled"));
        }
        let socket = self
            .socket
            .as_mut()
            .ok_or_else(|| FtpError::read_failed("transport closed"))?;
        let notify = self.cancel.notify.clone();
        let mut tmp = [0u8; 8192];
        let n = tokio::select! {
            _ = notify.notified() => {
                return Err(FtpError::cancelled("transport cancelled"));
            }
            r = timeout_at(deadline, async {
                match socket {
                    Socket::Plain(s) => s.read(&mut tmp).await,
                    Socket::Tls(s) => s.read(&mut tmp).await,
                }
            }) => match r {
                Err(_) => return Err(FtpError::timeout("read deadline exceeded")),
                Ok(Err(e)) => return Err(FtpError::read_failed(e.to_string())),
                Ok(Ok(n)) => n,
            },
        };
        self.buffer.extend_from_slice(&tmp[..n]);
        Ok(n)
    }

    // ─── Writing ─────────────────────────────────────────────────

    /// Write and flush the whole buffer within `timeout`.
    ///
    /// Completion means the bytes reached the kernel send queue, not
    /// the remote peer.
    pub async fn write(&mut self, data: &[u8], timeout: Duration) -> FtpResult<()> {
        if self.cancel.is_cancelled() {
            return Err(FtpError::cancelled("transport cancelled"));
        }
        let socket = self
            .socket
            .as_mut()
            .ok_or_else(|| FtpError::write_failed("transport closed"))?;
        let notify = self.cancel.notify.clone();
        let deadline = Instant::now() + timeout;
        tokio::select! {
            _ = notify.notified() => Err(FtpError::cancelled("transport cancelled")),
            r = timeout_at(deadline, async {
                match socket {
                    Socket::Plain(s) => {
                        s.write_all(data).await?;
                        s.flush().await
                    }
                    Socket::Tls(s) => {
                        s.write_all(data).await?;
                        s.flush().await
                    }
                }
            }) => match r {
                Err(_) => Err(FtpError::timeout("write deadline exceeded")),
                Ok(Err(e)) => Err(FtpError::write_failed(e.to_string())),
                Ok(Ok(())) => Ok(()),
            },
        }
    }

    // ─── Half-close ──────────────────────────────────────────────

    /// Stop reading; buffered but unconsumed bytes are dropped.
    pub fn close_read(&mut self) {
        self.buffer.clear();
        self.eof = true;
    }

    /// Flush and send FIN on the write side.
    pub async fn close_write(&mut self, timeout: Duration) -> FtpResult<()> {
        let socket = match self.socket.as_mut() {
            Some(s) => s,
            None => return Ok(()),
        };
        let deadline = Instant::now() + timeout;
        match timeout_at(deadline, async {
            match socket {
                Socket::Plain(s) => s.shutdown().await,
                Socket::Tls(s) => s.shutdown().await,
            }
        })
        .await
        {
            Err(_) => Err(FtpError::timeout("close deadline exceeded")),
            Ok(Err(e)) => Err(FtpError::write_failed(e.to_string())),
            Ok(Ok(())) => Ok(()),
        }
    }

    // ─── TLS upgrade / downgrade ─────────────────────────────────

    /// Upgrade the transport to TLS in place. A no-op when already
    /// secure.
    pub async fn start_secure_connection(
        &mut self,
        connector: &TlsConnector,
        server_name: ServerName<'static>,
        timeout: Duration,
    ) -> FtpResult<()> {
        match self.socket.take() {
            Some(Socket::Plain(tcp)) => {
                let deadline = Instant::now() + timeout;
                let tls = timeout_at(deadline, connector.connect(server_name, tcp))
                    .await
                    .map_err(|_| FtpError::timeout("TLS handshake timed out"))?
                    .map_err(|e| FtpError::tls_failed(format!("TLS handshake: {}", e)))?;
                debug!("transport upgraded to TLS");
                self.socket = Some(Socket::Tls(Box::new(tls)));
                Ok(())
            }
            Some(secure @ Socket::Tls(_)) => {
                self.socket = Some(secure);
                Ok(())
            }
            None => Err(FtpError::connection_failed("transport closed")),
        }
    }

    /// Drop back to the plain socket. A no-op when already plain.
    pub fn stop_secure_connection(&mut self) -> FtpResult<()> {
        match self.socket.take() {
            Some(Socket::Tls(tls)) => {
                let (tcp, _) = tls.into_inner();
                self.socket = Some(Socket::Plain(tcp));
                debug!("transport downgraded to plain TCP");
                Ok(())
            }
            Some(plain) => {
                self.socket = Some(plain);
                Ok(())
            }
            None => Err(FtpError::connection_failed("transport closed")),
        }
    }
}
