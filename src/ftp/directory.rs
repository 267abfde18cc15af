//! Directory operations — listing with the machine-listing latch,
//! recursive walking, mkdir, rmdir, rename, delete.

use crate::ftp::client::FtpClient;
use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::parser;
use crate::ftp::stream::StreamTransport;
use crate::ftp::transfer;
use crate::ftp::types::*;
use glob::Pattern;
use log::debug;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinSet;

impl FtpClient {
    // ─── Listing ─────────────────────────────────────────────────

    /// List a directory.
    ///
    /// MLSD is assumed supported until the first 50x reply; from then
    /// on the session is latched to LIST (Unix/DOS grammar) and never
    /// probes again.
    pub async fn list(&mut self, path: &str) -> FtpResult<Vec<FileEntry>> {
        if self.machine_listing().assume_supported() {
            match self.list_with_command("MLSD", path).await {
                Ok(entries) => {
                    self.confirm_machine_listing();
                    return Ok(entries);
                }
                Err(e) if e.is_not_implemented() => {
                    self.disable_machine_listing();
                }
                Err(e) => return Err(e),
            }
        }
        self.list_with_command("LIST", path).await
    }

    /// List with client-side filtering and sorting applied.
    pub async fn list_with_options(
        &mut self,
        path: &str,
        options: &ListOptions,
    ) -> FtpResult<Vec<FileEntry>> {
        let mut entries = self.list(path).await?;
        if !options.show_hidden {
            entries.retain(|e| !e.name.starts_with('.'));
        }
        if let Some(raw) = &options.filter {
            let pattern = Pattern::new(raw)
                .map_err(|e| FtpError::invalid_config(format!("bad filter pattern: {}", e)))?;
            entries.retain(|e| pattern.matches(&e.name));
        }
        if let Some(field) = &options.sort_by {
            let descending = options.sort_order == Some(SortOrder::Desc);
            entries.sort_by(|a, b| {
                let ord = match field {
                    SortField::Name => a.name.cmp(&b.name),
                    SortField::Size => a.size.cmp(&b.size),
                    SortField::Modified => a.modified.cmp(&b.modified),
                    SortField::Kind => kind_rank(a.kind).cmp(&kind_rank(b.kind)),
                };
                if descending {
                    ord.reverse()
                } else {
                    ord
                }
            });
        }
        Ok(entries)
    }

    /// Open a data channel, issue the listing command, drain the body,
    /// and parse it into entries.
    async fn list_with_command(&mut self, command: &str, path: &str) -> FtpResult<Vec<FileEntry>> {
        let channel = transfer::open_data_channel(self).await?;
        let cmd = if path.is_empty() {
            command.to_string()
        } else {
            format!("{} {}", command, path)
        };
        let reply = self.ctrl.execute(&cmd).await?;
        if !reply.is_preliminary() && !reply.is_completion() {
            return Err(FtpError::from_reply(reply.code, &reply.text()));
        }

        let mut data = channel.resolve().await?;
        let raw = read_channel_to_string(&mut data, self.config.read_timeout()).await?;
        drop(data);
        self.ctrl.read_transfer_result().await?;

        debug!("{} {} returned {} bytes", command, path, raw.len());
        let base = self.config.initial_directory.clone().unwrap_or_default();
        let mut entries = parser::parse_listing(&raw);
        for entry in &mut entries {
            entry.path = parser::entry_path(&base, path, &entry.name);
        }
        Ok(entries)
    }

    // ─── MLST (single entry) ─────────────────────────────────────

    /// Facts about a single file or directory via MLST. The reply
    /// travels on the control channel:
    /// ```text
    /// 250-Listing /foo
    ///  type=file;size=1234;modify=20260101120000; foo.txt
    /// 250 End
    /// ```
    pub async fn stat_entry(&mut self, path: &str) -> FtpResult<FileEntry> {
        if !self.machine_listing().assume_supported() {
            return Err(FtpError::unsupported(
                "machine listing disabled for this session",
            ));
        }
        let reply = match self.ctrl.expect_ok(&format!("MLST {}", path)).await {
            Ok(r) => {
                self.confirm_machine_listing();
                r
            }
            Err(e) => {
                if e.is_not_implemented() {
                    self.disable_machine_listing();
                }
                return Err(e);
            }
        };

        let line = reply
            .lines
            .iter()
            .find(|l| l.contains('=') && l.contains(';'))
            .ok_or_else(|| FtpError::protocol("MLST reply has no fact line"))?;
        parser::parse_listing(line.trim())
            .into_iter()
            .next()
            .ok_or_else(|| FtpError::protocol("MLST fact line did not parse"))
    }

    // ─── Mutations ───────────────────────────────────────────────

    /// Create a directory; returns the path the server reports.
    pub async fn mkdir(&mut self, path: &str) -> FtpResult<String> {
        let reply = self.ctrl.expect_ok(&format!("MKD {}", path)).await?;
        // `257 "/new/dir" created`
        let text = reply.text();
        if let Some(start) = text.find('"') {
            if let Some(end) = text[start + 1..].find('"') {
                return Ok(text[start + 1..start + 1 + end].to_string());
            }
        }
        Ok(path.to_string())
    }

    /// Remove an empty directory.
    pub async fn rmdir(&mut self, path: &str) -> FtpResult<()> {
        self.ctrl.expect_ok(&format!("RMD {}", path)).await?;
        Ok(())
    }

    /// Rename (or move) a file or directory.
    pub async fn rename(&mut self, from: &str, to: &str) -> FtpResult<()> {
        let rnfr = self.ctrl.execute(&format!("RNFR {}", from)).await?;
        if !rnfr.is_intermediate() && !rnfr.is_completion() {
            return Err(FtpError::from_reply(rnfr.code, &rnfr.text()));
        }
        self.ctrl.expect_ok(&format!("RNTO {}", to)).await?;
        Ok(())
    }

    /// Delete a remote file.
    pub async fn delete(&mut self, path: &str) -> FtpResult<()> {
        self.ctrl.expect_ok(&format!("DELE {}", path)).await?;
        Ok(())
    }
}

fn kind_rank(kind: EntryKind) -> u8 {
    match kind {
        EntryKind::Directory => 0,
        EntryKind::Regular => 1,
        EntryKind::Symlink => 2,
        EntryKind::Special => 3,
        EntryKind::Unknown => 4,
    }
}

/// Drain a listing data channel into a UTF-8 string.
async fn read_channel_to_string(
    data: &mut StreamTransport,
    timeout: Duration,
) -> FtpResult<String> {
    let mut raw = Vec::new();
    loop {
        let (chunk, eof) = data.read(1, 64 * 1024, timeout).await?;
        raw.extend_from_slice(&chunk);
        if eof {
            break;
        }
    }
    String::from_utf8(raw).map_err(|e| FtpError::protocol(format!("listing is not UTF-8: {}", e)))
}

// ─── Recursive listing ───────────────────────────────────────────────

/// Callback receiving entries as they are discovered.
pub type EntrySink = Arc<dyn Fn(&FileEntry) + Send + Sync>;

/// Walk `path` recursively.
///
/// Entries stream through `on_entry` as soon as their page is parsed.
/// Subdirectory branches recurse concurrently (the shared session
/// serialises the actual commands); each branch is sequential within
/// itself. Returns the flat aggregate of every discovered entry. The
/// first error in any branch aborts the remaining aggregation and is
/// surfaced exactly once.
pub async fn list_recursive(
    client: Arc<Mutex<FtpClient>>,
    path: &str,
    on_entry: EntrySink,
) -> FtpResult<Vec<FileEntry>> {
    walk(client, path.to_string(), on_entry).await
}

fn walk(
    client: Arc<Mutex<FtpClient>>,
    path: String,
    on_entry: EntrySink,
) -> Pin<Box<dyn Future<Output = FtpResult<Vec<FileEntry>>> + Send>> {
    Box::pin(async move {
        let entries = { client.lock().await.list(&path).await? };
        for entry in &entries {
            on_entry(entry);
        }

        let mut branches: JoinSet<FtpResult<Vec<FileEntry>>> = JoinSet::new();
        for dir in entries.iter().filter(|e| e.is_directory()) {
            let sub = join_remote(&path, &dir.name);
            branches.spawn(walk(client.clone(), sub, on_entry.clone()));
        }

        let mut all = entries;
        while let Some(joined) = branches.join_next().await {
            match joined {
                Ok(Ok(sub)) => all.extend(sub),
                Ok(Err(e)) => {
                    branches.abort_all();
                    return Err(e);
                }
                Err(e) => {
                    branches.abort_all();
                    return Err(FtpError::resource(format!("listing branch failed: {}", e)));
                }
            }
        }
        Ok(all)
    })
}

fn join_remote(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir.trim_end_matches('/'), name)
    }
}
