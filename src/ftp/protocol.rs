//! Control-channel command/reply codec (RFC 959 §4).
//!
//! Handles:
//! - Sending FTP commands terminated with `\r\n` (single or pipelined)
//! - Reading single-line and multi-line replies
//! - Parsing the 3-digit reply code
//!
//! The channel is strictly half-duplex: every method takes `&mut self`,
//! so a caller must await the full reply of one command before issuing
//! the next. Pipelining unrelated commands would interleave two reply
//! streams.

use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::stream::StreamTransport;
use crate::ftp::types::ControlReply;
use log::trace;
use std::time::Duration;

/// The command/reply codec owning the control transport.
pub struct ControlChannel {
    transport: StreamTransport,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl ControlChannel {
    pub fn new(
        transport: StreamTransport,
        read_timeout: Duration,
        write_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            read_timeout,
            write_timeout,
        }
    }

    pub fn transport(&self) -> &StreamTransport {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut StreamTransport {
        &mut self.transport
    }

    /// Send a raw FTP command (without trailing CRLF — we add it).
    pub async fn send_command(&mut self, cmd: &str) -> FtpResult<()> {
        let line = format!("{}\r\n", cmd);
        self.transport
            .write(line.as_bytes(), self.write_timeout)
            .await?;
        trace!(">>> {}", mask(cmd));
        Ok(())
    }

    /// Send several commands as one kernel write. The server processes
    /// them in order on the one control connection; the caller reads
    /// the replies in the same order.
    pub async fn send_pipelined(&mut self, cmds: &[String]) -> FtpResult<()> {
        let mut buf = String::new();
        for cmd in cmds {
            buf.push_str(cmd);
            buf.push_str("\r\n");
        }
        self.transport
            .write(buf.as_bytes(), self.write_timeout)
            .await?;
        for cmd in cmds {
            trace!(">>> {}", mask(cmd));
        }
        Ok(())
    }

    /// Read a complete FTP reply (possibly multi-line).
    ///
    /// Multi-line replies look like:
    /// ```text
    /// 220-Welcome to my FTP server
    /// 220-This is line 2
    /// 220 End of greeting
    /// ```
    /// The reply is complete at the first line carrying the initial
    /// code followed by a space.
    pub async fn read_reply(&mut self) -> FtpResult<ControlReply> {
        let first = self.transport.read_line(self.read_timeout).await?;
        if first.len() < 3 {
            return Err(FtpError::protocol(format!("reply too short: '{}'", first)));
        }

        let code = parse_code(&first)?;
        let mut lines = vec![first.clone()];

        // "NNN-" means more lines follow until "NNN " is seen.
        let is_multi = first.len() >= 4 && first.as_bytes()[3] == b'-';
        if is_multi {
            let terminator = format!("{} ", code);
            loop {
                let next = self.transport.read_line(self.read_timeout).await?;
                let done = next.starts_with(&terminator);
                lines.push(next);
                if done {
                    break;
                }
            }
        }

        let reply = ControlReply { code, lines };
        trace!("<<< {} {}", reply.code, reply.lines.last().map(String::as_str).unwrap_or(""));
        Ok(reply)
    }

    /// Send a command and return its reply.
    pub async fn execute(&mut self, cmd: &str) -> FtpResult<ControlReply> {
        self.send_command(cmd).await?;
        self.read_reply().await
    }

    /// Send a command, expect a specific reply-code class.
    pub async fn expect(&mut self, cmd: &str, expected_class: u16) -> FtpResult<ControlReply> {
        let reply = self.execute(cmd).await?;
        if reply.code / 100 != expected_class {
            return Err(FtpError::from_reply(reply.code, &reply.text()));
        }
        Ok(reply)
    }

    /// Expect a 2xx reply.
    pub async fn expect_ok(&mut self, cmd: &str) -> FtpResult<ControlReply> {
        self.expect(cmd, 2).await
    }

    /// Await the terminal reply of a transfer: interim 1xx lines
    /// ("opening data connection") are skipped, and the first
    /// non-preliminary reply must be 2xx.
    pub async fn read_transfer_result(&mut self) -> FtpResult<ControlReply> {
        loop {
            let reply = self.read_reply().await?;
            if reply.is_preliminary() {
                continue;
            }
            if reply.is_completion() {
                return Ok(reply);
            }
            return Err(FtpError::from_reply(reply.code, &reply.text()));
        }
    }
}

/// Parse the 3-digit reply code from the start of a line.
fn parse_code(line: &str) -> FtpResult<u16> {
    if line.len() < 3 {
        return Err(FtpError::protocol("reply too short to contain a code"));
    }
    line[..3]
        .parse::<u16>()
        .map_err(|_| FtpError::protocol(format!("invalid reply code in: '{}'", line)))
}

/// Keep credentials out of the logs.
fn mask(cmd: &str) -> &str {
    if cmd.starts_with("PASS ") {
        "PASS ****"
    } else {
        cmd
    }
}
