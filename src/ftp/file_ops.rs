//! File transfer engine — chunked download, serial and parted upload,
//! REST-based resume, per-chunk progress, and content-cache hooks.
//!
//! Downloads pipeline `TYPE I` (+ `REST`) + `RETR` into one control
//! write, then drain the data channel concurrently with the terminal
//! status read: one future streams the payload while the other awaits
//! the reply stream, and the transfer completes only when both have.
//!
//! Uploads come in two strategies, selected by the session's
//! `resumable_upload` flag:
//! - *serial*: a single `STOR` covering the whole stream; any failure
//!   aborts the transfer;
//! - *parted*: independent `REST <offset>` + `STOR` rounds per chunk,
//!   each retried up to [`CHUNK_RETRIES`] times before the transfer is
//!   declared failed.

use crate::ftp::client::FtpClient;
use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::transfer;
use crate::ftp::types::TransferProgress;
use log::{debug, warn};
use std::path::Path;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt};

/// Fixed chunk size for streaming reads/writes (64 KiB).
const SERIAL_CHUNK: usize = 65_536;

/// Bound on immediate retries of one parted-upload chunk.
const CHUNK_RETRIES: u32 = 3;

/// Chunk size for the parted upload strategy, scaled to the total
/// transfer size.
pub(crate) fn parted_chunk_size(total: u64) -> usize {
    const KIB: u64 = 1024;
    match total {
        t if t < 256 * KIB => 32 * 1024,
        t if t < 1024 * KIB => 64 * 1024,
        t if t < 10 * 1024 * KIB => 128 * 1024,
        t if t < 32 * 1024 * KIB => 256 * 1024,
        _ => 512 * 1024,
    }
}

/// Content cache collaborator, keyed by resolved resource identifier.
/// Consulted before `RETR` and populated after a complete download.
pub trait ContentCache: Send + Sync {
    fn lookup(&self, key: &str) -> Option<Vec<u8>>;
    fn store(&self, key: &str, data: &[u8]);
}

impl FtpClient {
    // ─── Download (RETR) ─────────────────────────────────────────

    /// Download a remote file into a fresh local file.
    pub async fn download(
        &mut self,
        remote_path: &str,
        local_path: &str,
        mut progress: impl FnMut(TransferProgress),
    ) -> FtpResult<u64> {
        if let Some(parent) = Path::new(local_path).parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| FtpError::resource(e.to_string()))?;
        }
        let mut file = fs::File::create(local_path)
            .await
            .map_err(|e| FtpError::resource(e.to_string()))?;
        self.download_to(remote_path, 0, -1, &mut file, &mut progress)
            .await
    }

    /// Resume a download, appending from the local file's current size.
    pub async fn resume_download(
        &mut self,
        remote_path: &str,
        local_path: &str,
        mut progress: impl FnMut(TransferProgress),
    ) -> FtpResult<u64> {
        let offset = match fs::metadata(local_path).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };
        if offset == 0 {
            return self.download(remote_path, local_path, progress).await;
        }
        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(local_path)
            .await
            .map_err(|e| FtpError::resource(e.to_string()))?;
        self.download_to(remote_path, offset, -1, &mut file, &mut progress)
            .await
    }

    /// Download a whole remote file into memory.
    pub async fn download_bytes(&mut self, remote_path: &str) -> FtpResult<Vec<u8>> {
        let mut out = Vec::new();
        self.download_to(remote_path, 0, -1, &mut out, &mut |_| {})
            .await?;
        Ok(out)
    }

    /// Engine entry point: stream `remote_path` starting at `offset`,
    /// at most `length` bytes (`-1` = to end of file), into `sink`.
    /// Returns the number of payload bytes received.
    pub async fn download_to(
        &mut self,
        remote_path: &str,
        offset: u64,
        length: i64,
        sink: &mut (impl AsyncWrite + Unpin + ?Sized),
        progress: &mut (impl FnMut(TransferProgress) + ?Sized),
    ) -> FtpResult<u64> {
        // Expected total for progress reporting; advisory only.
        let expected = self.size(remote_path).await.unwrap_or(-1);

        let whole_file = offset == 0 && length < 0;
        let key = self.resource_key(remote_path);
        let cache = if whole_file { self.cache.clone() } else { None };

        if let Some(cache) = cache.as_ref() {
            if let Some(bytes) = cache.lookup(&key) {
                debug!("cache hit for {}", key);
                sink.write_all(&bytes)
                    .await
                    .map_err(|e| FtpError::resource(e.to_string()))?;
                progress(TransferProgress {
                    chunk_bytes: bytes.len() as u64,
                    transferred_bytes: bytes.len() as u64,
                    expected_bytes: expected,
                });
                return Ok(bytes.len() as u64);
            }
        }

        let channel = transfer::open_data_channel(self).await?;

        // TYPE I (+ REST) + RETR go out as one write; the server
        // processes them in order on the one control connection.
        let mut cmds = vec!["TYPE I".to_string()];
        if offset > 0 {
            cmds.push(format!("REST {}", offset));
        }
        cmds.push(format!("RETR {}", remote_path));
        self.ctrl.send_pipelined(&cmds).await?;

        let type_reply = self.ctrl.read_reply().await?;
        if !type_reply.is_completion() {
            return Err(FtpError::from_reply(type_reply.code, &type_reply.text()));
        }
        if offset > 0 {
            let rest_reply = self.ctrl.read_reply().await?;
            if !rest_reply.is_intermediate() {
                return Err(FtpError::from_reply(rest_reply.code, &rest_reply.text()));
            }
        }
        let mut data = channel.resolve().await?;

        let read_timeout = self.config.read_timeout();
        let ctrl = &mut self.ctrl;

        // Payload drain and terminal-status read run concurrently; the
        // transfer is complete only when both are.
        let drain = async {
            let mut received: u64 = 0;
            let mut tee: Option<Vec<u8>> = cache.as_ref().map(|_| Vec::new());
            loop {
                let want = if length >= 0 {
                    let remaining = length as u64 - received;
                    if remaining == 0 {
                        break;
                    }
                    remaining.min(SERIAL_CHUNK as u64) as usize
                } else {
                    SERIAL_CHUNK
                };
                let (chunk, eof) = data.read(1, want, read_timeout).await?;
                if !chunk.is_empty() {
                    sink.write_all(&chunk)
                        .await
                        .map_err(|e| FtpError::resource(e.to_string()))?;
                    if let Some(buf) = tee.as_mut() {
                        buf.extend_from_slice(&chunk);
                    }
                    received += chunk.len() as u64;
                    progress(TransferProgress {
                        chunk_bytes: chunk.len() as u64,
                        transferred_bytes: received,
                        expected_bytes: expected,
                    });
                }
                if eof {
                    break;
                }
            }
            sink.flush()
                .await
                .map_err(|e| FtpError::resource(e.to_string()))?;
            data.close_read();
            Ok::<_, FtpError>((received, tee))
        };
        let status = ctrl.read_transfer_result();

        let (drained, status_reply) = tokio::join!(drain, status);
        let (received, tee) = drained?;
        status_reply?;

        if let (Some(cache), Some(bytes)) = (cache.as_ref(), tee.as_ref()) {
            cache.store(&key, bytes);
        }
        Ok(received)
    }

    // ─── Upload (STOR / APPE) ────────────────────────────────────

    /// Upload a local file, using the strategy the session is
    /// configured for.
    pub async fn upload(
        &mut self,
        local_path: &str,
        remote_path: &str,
        mut progress: impl FnMut(TransferProgress),
    ) -> FtpResult<u64> {
        if self.config.resumable_upload {
            self.upload_parted(local_path, remote_path, &mut progress)
                .await
        } else {
            self.upload_serial(local_path, remote_path, "STOR", 0, &mut progress)
                .await
        }
    }

    /// Resume an upload from the remote file's current size (serial
    /// strategy with one REST).
    pub async fn resume_upload(
        &mut self,
        local_path: &str,
        remote_path: &str,
        mut progress: impl FnMut(TransferProgress),
    ) -> FtpResult<u64> {
        let offset = self.size(remote_path).await.unwrap_or(0).max(0) as u64;
        self.upload_serial(local_path, remote_path, "STOR", offset, &mut progress)
            .await
    }

    /// Append a local file to a remote one (APPE).
    pub async fn append(
        &mut self,
        local_path: &str,
        remote_path: &str,
        mut progress: impl FnMut(TransferProgress),
    ) -> FtpResult<u64> {
        self.upload_serial(local_path, remote_path, "APPE", 0, &mut progress)
            .await
    }

    /// One command, one data connection, sequential chunk writes. A
    /// single write or timeout failure aborts the whole transfer.
    async fn upload_serial(
        &mut self,
        local_path: &str,
        remote_path: &str,
        command: &str,
        offset: u64,
        progress: &mut (impl FnMut(TransferProgress) + ?Sized),
    ) -> FtpResult<u64> {
        let meta = fs::metadata(local_path)
            .await
            .map_err(|e| FtpError::resource(e.to_string()))?;
        let total = meta.len();
        let mut file = fs::File::open(local_path)
            .await
            .map_err(|e| FtpError::resource(e.to_string()))?;
        if offset > 0 {
            file.seek(std::io::SeekFrom::Start(offset))
                .await
                .map_err(|e| FtpError::resource(e.to_string()))?;
        }

        let channel = transfer::open_data_channel(self).await?;

        let mut cmds = vec!["TYPE I".to_string()];
        if offset > 0 {
            cmds.push(format!("REST {}", offset));
        }
        cmds.push(format!("{} {}", command, remote_path));
        self.ctrl.send_pipelined(&cmds).await?;

        let type_reply = self.ctrl.read_reply().await?;
        if !type_reply.is_completion() {
            return Err(FtpError::from_reply(type_reply.code, &type_reply.text()));
        }
        if offset > 0 {
            let rest_reply = self.ctrl.read_reply().await?;
            if !rest_reply.is_intermediate() {
                return Err(FtpError::from_reply(rest_reply.code, &rest_reply.text()));
            }
        }
        let open_reply = self.ctrl.read_reply().await?;
        if !open_reply.is_preliminary() && !open_reply.is_completion() {
            return Err(FtpError::from_reply(open_reply.code, &open_reply.text()));
        }
        let mut data = channel.resolve().await?;

        let write_timeout = self.config.write_timeout();
        let mut sent: u64 = 0;
        let mut buf = vec![0u8; SERIAL_CHUNK];
        loop {
            let n = file
                .read(&mut buf)
                .await
                .map_err(|e| FtpError::resource(e.to_string()))?;
            if n == 0 {
                break;
            }
            data.write(&buf[..n], write_timeout).await?;
            sent += n as u64;
            progress(TransferProgress {
                chunk_bytes: n as u64,
                transferred_bytes: offset + sent,
                expected_bytes: total as i64,
            });
        }
        data.close_write(write_timeout).await?;
        drop(data);

        self.ctrl.read_transfer_result().await?;
        Ok(sent)
    }

    /// Parted strategy: each chunk travels in its own `REST <offset>` +
    /// `STOR` round on a fresh data connection, so a failed chunk can
    /// be retried without restarting the stream. No in-flight
    /// pipelining: chunk *n+1* is not sent until chunk *n*'s
    /// write-and-reply round trip completes.
    async fn upload_parted(
        &mut self,
        local_path: &str,
        remote_path: &str,
        progress: &mut (impl FnMut(TransferProgress) + ?Sized),
    ) -> FtpResult<u64> {
        let meta = fs::metadata(local_path)
            .await
            .map_err(|e| FtpError::resource(e.to_string()))?;
        let total = meta.len();
        let chunk_size = parted_chunk_size(total);
        let mut file = fs::File::open(local_path)
            .await
            .map_err(|e| FtpError::resource(e.to_string()))?;

        self.ctrl.expect_ok("TYPE I").await?;

        let mut sent: u64 = 0;
        let mut buf = vec![0u8; chunk_size];
        loop {
            let want = ((total - sent).min(chunk_size as u64)) as usize;
            let mut n = 0;
            while n < want {
                let m = file
                    .read(&mut buf[n..want])
                    .await
                    .map_err(|e| FtpError::resource(e.to_string()))?;
                if m == 0 {
                    break;
                }
                n += m;
            }

            let offset = sent;
            let mut failures = 0u32;
            loop {
                match self.send_chunk(remote_path, offset, &buf[..n]).await {
                    Ok(()) => break,
                    Err(e) => {
                        failures += 1;
                        if failures > CHUNK_RETRIES {
                            return Err(e);
                        }
                        warn!(
                            "chunk at offset {} failed (attempt {}), retrying: {}",
                            offset, failures, e
                        );
                    }
                }
            }

            sent += n as u64;
            progress(TransferProgress {
                chunk_bytes: n as u64,
                transferred_bytes: sent,
                expected_bytes: total as i64,
            });
            if sent >= total {
                break;
            }
            if n == 0 {
                return Err(FtpError::resource(format!(
                    "{} shrank during upload",
                    local_path
                )));
            }
        }
        Ok(sent)
    }

    /// Send one parted chunk: REST to its offset, STOR, write the
    /// bytes, and await the terminal reply.
    async fn send_chunk(&mut self, remote_path: &str, offset: u64, chunk: &[u8]) -> FtpResult<()> {
        let channel = transfer::open_data_channel(self).await?;

        let mut cmds = Vec::new();
        if offset > 0 {
            cmds.push(format!("REST {}", offset));
        }
        cmds.push(format!("STOR {}", remote_path));
        self.ctrl.send_pipelined(&cmds).await?;

        if offset > 0 {
            let rest_reply = self.ctrl.read_reply().await?;
            if !rest_reply.is_intermediate() {
                return Err(FtpError::from_reply(rest_reply.code, &rest_reply.text()));
            }
        }
        let open_reply = self.ctrl.read_reply().await?;
        if !open_reply.is_preliminary() && !open_reply.is_completion() {
            return Err(FtpError::from_reply(open_reply.code, &open_reply.text()));
        }
        let mut data = channel.resolve().await?;

        let write_timeout = self.config.write_timeout();
        data.write(chunk, write_timeout).await?;
        data.close_write(write_timeout).await?;
        drop(data);

        self.ctrl.read_transfer_result().await?;
        Ok(())
    }
}
