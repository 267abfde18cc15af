//! Integration tests driving the engine against a scripted loopback
//! FTP server (plain TCP, passive and active data channels).

use ftpkit::ftp::directory;
use ftpkit::ftp::queue::{self, TransferQueue};
use ftpkit::ftp::status;
use ftpkit::ftp::ContentCache;
use ftpkit::{
    EntryKind, FtpClient, FtpErrorKind, MachineListing, SessionConfig, TransferDirection,
    TransferMode, TransferProgress, TransferQueueConfig,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

// ─── Scripted server ─────────────────────────────────────────────────

#[derive(Default, Clone)]
struct ServerOptions {
    /// Greeting line; defaults to `220 mock ready`.
    greeting: Option<String>,
    /// Whether MLSD/EPSV are implemented (otherwise they get a 500).
    mlsd_enabled: bool,
    epsv_enabled: bool,
    /// Number of STOR rounds to fail with 451 before accepting.
    stor_failures: u32,
    /// Listing bodies served for MLSD, keyed by path ("" = root).
    mlsd_tree: HashMap<String, String>,
    /// Listing bodies served for LIST, keyed by path.
    list_tree: HashMap<String, String>,
    /// Files served by RETR / SIZE.
    serve: HashMap<String, Vec<u8>>,
}

#[derive(Default)]
struct ServerState {
    /// Files received via STOR, assembled at their REST offsets.
    files: HashMap<String, Vec<u8>>,
    mlsd_calls: u32,
    retr_calls: u32,
    stor_attempts: u32,
    stor_failures_remaining: u32,
}

struct MockServer {
    addr: SocketAddr,
    state: Arc<StdMutex<ServerState>>,
}

impl MockServer {
    async fn start(opts: ServerOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(StdMutex::new(ServerState {
            stor_failures_remaining: opts.stor_failures,
            ..ServerState::default()
        }));
        let opts = Arc::new(opts);
        let conn_state = state.clone();
        tokio::spawn(async move {
            loop {
                let (ctrl, _) = match listener.accept().await {
                    Ok(c) => c,
                    Err(_) => return,
                };
                let opts = opts.clone();
                let state = conn_state.clone();
                tokio::spawn(async move {
                    let _ = handle_control(ctrl, opts, state).await;
                });
            }
        });
        Self { addr, state }
    }

    fn config(&self) -> SessionConfig {
        SessionConfig {
            host: "127.0.0.1".into(),
            port: self.addr.port(),
            username: "tester".into(),
            password: "hunter2".into(),
            connect_timeout_sec: 5,
            read_timeout_sec: 5,
            write_timeout_sec: 5,
            ..SessionConfig::default()
        }
    }

    fn stored(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().files.get(path).cloned()
    }

    fn mlsd_calls(&self) -> u32 {
        self.state.lock().unwrap().mlsd_calls
    }

    fn retr_calls(&self) -> u32 {
        self.state.lock().unwrap().retr_calls
    }

    fn stor_attempts(&self) -> u32 {
        self.state.lock().unwrap().stor_attempts
    }
}

enum PendingData {
    Passive(TcpListener),
    Active(SocketAddr),
}

async fn open_data(pending: &mut Option<PendingData>) -> std::io::Result<TcpStream> {
    match pending.take() {
        Some(PendingData::Passive(listener)) => Ok(listener.accept().await?.0),
        Some(PendingData::Active(addr)) => TcpStream::connect(addr).await,
        None => Err(std::io::Error::new(
            std::io::ErrorKind::Other,
            "no data channel negotiated",
        )),
    }
}

async fn handle_control(
    ctrl: TcpStream,
    opts: Arc<ServerOptions>,
    state: Arc<StdMutex<ServerState>>,
) -> std::io::Result<()> {
    let (rd, mut wr) = ctrl.into_split();
    let mut lines = BufReader::new(rd).lines();

    let greeting = opts.greeting.clone().unwrap_or_else(|| "220 mock ready".into());
    wr.write_all(format!("{}\r\n", greeting).as_bytes()).await?;

    let mut pending: Option<PendingData> = None;
    let mut rest_offset: u64 = 0;

    while let Some(line) = lines.next_line().await? {
        let (cmd, arg) = match line.split_once(' ') {
            Some((c, a)) => (c.to_ascii_uppercase(), a.trim().to_string()),
            None => (line.trim().to_ascii_uppercase(), String::new()),
        };
        match cmd.as_str() {
            "USER" => wr.write_all(b"331 need password\r\n").await?,
            "PASS" => wr.write_all(b"230 logged in\r\n").await?,
            "TYPE" => wr.write_all(b"200 type set\r\n").await?,
            "NOOP" => wr.write_all(b"200 ok\r\n").await?,
            "CWD" => {
                if arg == "/missing" {
                    wr.write_all(b"550 no such directory\r\n").await?;
                } else {
                    wr.write_all(b"250 directory changed\r\n").await?;
                }
            }
            "PASV" => {
                let listener = TcpListener::bind("127.0.0.1:0").await?;
                let port = listener.local_addr()?.port();
                pending = Some(PendingData::Passive(listener));
                let reply = format!(
                    "227 Entering Passive Mode (127,0,0,1,{},{}).\r\n",
                    port >> 8,
                    port & 0xff
                );
                wr.write_all(reply.as_bytes()).await?;
            }
            "EPSV" => {
                if opts.epsv_enabled {
                    let listener = TcpListener::bind("127.0.0.1:0").await?;
                    let port = listener.local_addr()?.port();
                    pending = Some(PendingData::Passive(listener));
                    let reply =
                        format!("229 Entering Extended Passive Mode (|||{}|)\r\n", port);
                    wr.write_all(reply.as_bytes()).await?;
                } else {
                    wr.write_all(b"500 'EPSV' not understood\r\n").await?;
                }
            }
            "PORT" => {
                let nums: Vec<u16> = arg.split(',').filter_map(|t| t.parse().ok()).collect();
                if nums.len() == 6 {
                    let addr: SocketAddr = format!(
                        "{}.{}.{}.{}:{}",
                        nums[0],
                        nums[1],
                        nums[2],
                        nums[3],
                        nums[4] * 256 + nums[5]
                    )
                    .parse()
                    .unwrap();
                    pending = Some(PendingData::Active(addr));
                    wr.write_all(b"200 PORT command successful\r\n").await?;
                } else {
                    wr.write_all(b"501 bad PORT\r\n").await?;
                }
            }
            "REST" => {
                rest_offset = arg.parse().unwrap_or(0);
                wr.write_all(format!("350 Restarting at {}\r\n", rest_offset).as_bytes())
                    .await?;
            }
            "SIZE" => match opts.serve.get(&arg) {
                Some(bytes) => {
                    wr.write_all(format!("213 {}\r\n", bytes.len()).as_bytes())
                        .await?
                }
                None => wr.write_all(b"550 not found\r\n").await?,
            },
            "RETR" => {
                state.lock().unwrap().retr_calls += 1;
                match opts.serve.get(&arg) {
                    Some(bytes) => {
                        wr.write_all(b"150 Opening data connection\r\n").await?;
                        let mut data = open_data(&mut pending).await?;
                        let start = (rest_offset as usize).min(bytes.len());
                        // the client may stop reading early on bounded downloads
                        let _ = data.write_all(&bytes[start..]).await;
                        let _ = data.shutdown().await;
                        drop(data);
                        wr.write_all(b"226 Transfer complete\r\n").await?;
                    }
                    None => wr.write_all(b"550 not found\r\n").await?,
                }
                rest_offset = 0;
            }
            "STOR" => {
                wr.write_all(b"150 Opening data connection\r\n").await?;
                let mut data = open_data(&mut pending).await?;
                let mut body = Vec::new();
                data.read_to_end(&mut body).await?;
                drop(data);

                let stor_failed = {
                    let mut st = state.lock().unwrap();
                    st.stor_attempts += 1;
                    if st.stor_failures_remaining > 0 {
                        st.stor_failures_remaining -= 1;
                        true
                    } else {
                        let off = rest_offset as usize;
                        let entry = st.files.entry(arg.clone()).or_default();
                        if entry.len() < off + body.len() {
                            entry.resize(off + body.len(), 0);
                        }
                        entry[off..off + body.len()].copy_from_slice(&body);
                        false
                    }
                };
                if stor_failed {
                    wr.write_all(b"451 transfer failed, try again\r\n").await?;
                } else {
                    wr.write_all(b"226 Transfer complete\r\n").await?;
                }
                rest_offset = 0;
            }
            "MLSD" => {
                state.lock().unwrap().mlsd_calls += 1;
                if !opts.mlsd_enabled {
                    wr.write_all(b"500 'MLSD' not understood\r\n").await?;
                } else {
                    match opts.mlsd_tree.get(&arg) {
                        Some(body) => {
                            wr.write_all(b"150 Here comes the listing\r\n").await?;
                            let mut data = open_data(&mut pending).await?;
                            data.write_all(body.as_bytes()).await?;
                            data.shutdown().await?;
                            drop(data);
                            wr.write_all(b"226 Listing complete\r\n").await?;
                        }
                        None => wr.write_all(b"550 no such directory\r\n").await?,
                    }
                }
            }
            "LIST" => match opts.list_tree.get(&arg) {
                Some(body) => {
                    wr.write_all(b"150 Here comes the listing\r\n").await?;
                    let mut data = open_data(&mut pending).await?;
                    data.write_all(body.as_bytes()).await?;
                    data.shutdown().await?;
                    drop(data);
                    wr.write_all(b"226 Listing complete\r\n").await?;
                }
                None => wr.write_all(b"550 no such directory\r\n").await?,
            },
            "QUIT" => {
                wr.write_all(b"221 Bye\r\n").await?;
                break;
            }
            _ => wr.write_all(b"502 not implemented\r\n").await?,
        }
    }
    Ok(())
}

// ─── Helpers ─────────────────────────────────────────────────────────

fn temp_path(tag: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("ftpkit-test-{}-{}", tag, uuid::Uuid::new_v4()))
}

fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

// ─── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn login_download_and_progress() {
    let payload = b"hello from the mock server".to_vec();
    let mut opts = ServerOptions::default();
    opts.serve.insert("greeting.txt".into(), payload.clone());
    let server = MockServer::start(opts).await;

    let mut client = FtpClient::connect(server.config()).await.unwrap();

    let reports: Arc<StdMutex<Vec<TransferProgress>>> = Arc::default();
    let sink = reports.clone();
    let mut out = Vec::new();
    let n = client
        .download_to("greeting.txt", 0, -1, &mut out, &mut move |p| {
            sink.lock().unwrap().push(p)
        })
        .await
        .unwrap();

    assert_eq!(n, payload.len() as u64);
    assert_eq!(out, payload);

    let reports = reports.lock().unwrap();
    assert!(!reports.is_empty());
    let last = reports.last().unwrap();
    assert_eq!(last.transferred_bytes, payload.len() as u64);
    assert_eq!(last.expected_bytes, payload.len() as i64);
    let chunk_sum: u64 = reports.iter().map(|p| p.chunk_bytes).sum();
    assert_eq!(chunk_sum, payload.len() as u64);

    client.quit().await.unwrap();
}

#[tokio::test]
async fn download_resume_appends_from_offset() {
    let payload = patterned(10_000);
    let mut opts = ServerOptions::default();
    opts.serve.insert("data.bin".into(), payload.clone());
    let server = MockServer::start(opts).await;

    let local = temp_path("resume");
    tokio::fs::write(&local, &payload[..4_000]).await.unwrap();

    let mut client = FtpClient::connect(server.config()).await.unwrap();
    client
        .resume_download("data.bin", local.to_str().unwrap(), |_| {})
        .await
        .unwrap();

    let result = tokio::fs::read(&local).await.unwrap();
    assert_eq!(result, payload);
    let _ = tokio::fs::remove_file(&local).await;
}

#[tokio::test]
async fn bounded_download_caps_final_chunk() {
    let payload = patterned(64_000);
    let mut opts = ServerOptions::default();
    opts.serve.insert("big.bin".into(), payload.clone());
    let server = MockServer::start(opts).await;

    let mut client = FtpClient::connect(server.config()).await.unwrap();
    let mut out = Vec::new();
    let n = client
        .download_to("big.bin", 0, 50_000, &mut out, &mut |_| {})
        .await
        .unwrap();
    assert_eq!(n, 50_000);
    assert_eq!(out, &payload[..50_000]);
}

#[tokio::test]
async fn content_cache_short_circuits_second_download() {
    #[derive(Default)]
    struct MemoryCache {
        map: StdMutex<HashMap<String, Vec<u8>>>,
        stores: AtomicUsize,
    }
    impl ContentCache for MemoryCache {
        fn lookup(&self, key: &str) -> Option<Vec<u8>> {
            self.map.lock().unwrap().get(key).cloned()
        }
        fn store(&self, key: &str, data: &[u8]) {
            self.stores.fetch_add(1, Ordering::SeqCst);
            self.map.lock().unwrap().insert(key.into(), data.to_vec());
        }
    }

    let payload = b"cacheable bytes".to_vec();
    let mut opts = ServerOptions::default();
    opts.serve.insert("cached.txt".into(), payload.clone());
    let server = MockServer::start(opts).await;

    let cache = Arc::new(MemoryCache::default());
    let mut client = FtpClient::connect(server.config()).await.unwrap();
    client.set_content_cache(cache.clone());

    assert_eq!(client.download_bytes("cached.txt").await.unwrap(), payload);
    assert_eq!(client.download_bytes("cached.txt").await.unwrap(), payload);

    assert_eq!(server.retr_calls(), 1);
    assert_eq!(cache.stores.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn serial_upload_stores_file() {
    let payload = patterned(150_000);
    let server = MockServer::start(ServerOptions::default()).await;

    let local = temp_path("serial-up");
    tokio::fs::write(&local, &payload).await.unwrap();

    let mut client = FtpClient::connect(server.config()).await.unwrap();
    let reports: Arc<StdMutex<Vec<TransferProgress>>> = Arc::default();
    let sink = reports.clone();
    let sent = client
        .upload(local.to_str().unwrap(), "upload.bin", move |p| {
            sink.lock().unwrap().push(p)
        })
        .await
        .unwrap();

    assert_eq!(sent, payload.len() as u64);
    assert_eq!(server.stored("upload.bin").unwrap(), payload);
    assert_eq!(
        reports.lock().unwrap().last().unwrap().expected_bytes,
        payload.len() as i64
    );
    let _ = tokio::fs::remove_file(&local).await;
}

#[tokio::test]
async fn parted_upload_reassembles_from_chunks() {
    let payload = patterned(100_000);
    let server = MockServer::start(ServerOptions::default()).await;

    let local = temp_path("parted-up");
    tokio::fs::write(&local, &payload).await.unwrap();

    let mut config = server.config();
    config.resumable_upload = true;
    let mut client = FtpClient::connect(config).await.unwrap();
    let sent = client
        .upload(local.to_str().unwrap(), "parted.bin", |_| {})
        .await
        .unwrap();

    assert_eq!(sent, payload.len() as u64);
    assert_eq!(server.stored("parted.bin").unwrap(), payload);
    // 100_000 bytes at the 32 KiB rung = 4 chunks
    assert_eq!(server.stor_attempts(), 4);
    let _ = tokio::fs::remove_file(&local).await;
}

#[tokio::test]
async fn parted_upload_retries_transient_chunk_failures() {
    let payload = patterned(50_000);
    let mut opts = ServerOptions::default();
    opts.stor_failures = 2;
    let server = MockServer::start(opts).await;

    let local = temp_path("retry-up");
    tokio::fs::write(&local, &payload).await.unwrap();

    let mut config = server.config();
    config.resumable_upload = true;
    let mut client = FtpClient::connect(config).await.unwrap();
    let sent = client
        .upload(local.to_str().unwrap(), "retry.bin", |_| {})
        .await
        .unwrap();

    assert_eq!(sent, payload.len() as u64);
    assert_eq!(server.stored("retry.bin").unwrap(), payload);
    // 2 chunks + 2 failed rounds
    assert_eq!(server.stor_attempts(), 4);
    let _ = tokio::fs::remove_file(&local).await;
}

#[tokio::test]
async fn parted_upload_fails_after_retry_bound() {
    let payload = patterned(10_000);
    let mut opts = ServerOptions::default();
    opts.stor_failures = 100;
    let server = MockServer::start(opts).await;

    let local = temp_path("give-up");
    tokio::fs::write(&local, &payload).await.unwrap();

    let mut config = server.config();
    config.resumable_upload = true;
    let mut client = FtpClient::connect(config).await.unwrap();
    let err = client
        .upload(local.to_str().unwrap(), "never.bin", |_| {})
        .await
        .unwrap_err();

    assert_eq!(err.code, Some(451));
    // first attempt + 3 retries, then the last error surfaces
    assert_eq!(server.stor_attempts(), 4);
    let _ = tokio::fs::remove_file(&local).await;
}

#[tokio::test]
async fn mlsd_listing_parses_entries() {
    let mut opts = ServerOptions::default();
    opts.mlsd_enabled = true;
    opts.mlsd_tree.insert(
        "".into(),
        "type=cdir;modify=20260101000000; .\r\n\
         type=file;size=42;modify=20260101120000; report.txt\r\n\
         type=dir;modify=20260101120000; archive\r\n"
            .into(),
    );
    let server = MockServer::start(opts).await;

    let mut client = FtpClient::connect(server.config()).await.unwrap();
    let entries = client.list("").await.unwrap();

    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].name, "report.txt");
    assert_eq!(entries[0].kind, EntryKind::Regular);
    assert_eq!(entries[0].size, 42);
    assert_eq!(entries[1].kind, EntryKind::Directory);
    assert_eq!(entries[1].size, -1);
    assert_eq!(client.machine_listing(), MachineListing::Supported);
}

#[tokio::test]
async fn mlsd_rejection_latches_to_list_permanently() {
    let mut opts = ServerOptions::default();
    opts.mlsd_enabled = false;
    let listing = "-rw-r--r-- 1 o g 1234 Jan 05 12:00 file.txt\r\n\
                   drwxr-xr-x 2 o g 4096 Mar 01 2023 folder\r\n";
    opts.list_tree.insert("".into(), listing.into());
    let server = MockServer::start(opts).await;

    let mut client = FtpClient::connect(server.config()).await.unwrap();

    let first = client.list("").await.unwrap();
    assert_eq!(first.len(), 2);
    assert_eq!(client.machine_listing(), MachineListing::Unsupported);

    let second = client.list("").await.unwrap();
    assert_eq!(second.len(), 2);
    // the second listing went straight to LIST without re-probing
    assert_eq!(server.mlsd_calls(), 1);
}

#[tokio::test]
async fn epsv_rejection_falls_back_to_pasv() {
    let mut opts = ServerOptions::default();
    opts.mlsd_enabled = true;
    opts.epsv_enabled = false;
    opts.mlsd_tree
        .insert("".into(), "type=file;size=1; x.txt\r\n".into());
    let server = MockServer::start(opts).await;

    let mut config = server.config();
    config.transfer_mode = TransferMode::ExtendedPassive;
    let mut client = FtpClient::connect(config).await.unwrap();
    let entries = client.list("").await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, "x.txt");
}

#[tokio::test]
async fn active_mode_download_works() {
    let payload = b"active mode payload".to_vec();
    let mut opts = ServerOptions::default();
    opts.serve.insert("active.txt".into(), payload.clone());
    let server = MockServer::start(opts).await;

    let mut config = server.config();
    config.transfer_mode = TransferMode::Active;
    let mut client = FtpClient::connect(config).await.unwrap();
    assert_eq!(client.download_bytes("active.txt").await.unwrap(), payload);
}

#[tokio::test]
async fn recursive_listing_streams_every_entry() {
    let mut opts = ServerOptions::default();
    opts.mlsd_enabled = true;
    opts.mlsd_tree.insert(
        "".into(),
        "type=file;size=1; a.txt\r\ntype=dir; sub1\r\ntype=dir; sub2\r\n".into(),
    );
    opts.mlsd_tree.insert(
        "sub1".into(),
        "type=file;size=2; b.txt\r\ntype=dir; inner\r\n".into(),
    );
    opts.mlsd_tree
        .insert("sub1/inner".into(), "type=file;size=3; c.txt\r\n".into());
    opts.mlsd_tree
        .insert("sub2".into(), "type=file;size=4; d.txt\r\n".into());
    let server = MockServer::start(opts).await;

    let client = Arc::new(Mutex::new(FtpClient::connect(server.config()).await.unwrap()));
    let streamed = Arc::new(AtomicUsize::new(0));
    let counter = streamed.clone();
    let all = directory::list_recursive(
        client,
        "",
        Arc::new(move |_entry| {
            counter.fetch_add(1, Ordering::SeqCst);
        }),
    )
    .await
    .unwrap();

    // 4 files + 3 directories, independent of traversal order
    assert_eq!(all.len(), 7);
    assert_eq!(streamed.load(Ordering::SeqCst), 7);
    let files = all.iter().filter(|e| e.kind == EntryKind::Regular).count();
    assert_eq!(files, 4);
}

#[tokio::test]
async fn recursive_listing_surfaces_first_branch_error() {
    let mut opts = ServerOptions::default();
    opts.mlsd_enabled = true;
    opts.mlsd_tree.insert(
        "".into(),
        "type=file;size=1; a.txt\r\ntype=dir; ghost\r\n".into(),
    );
    // no body for "ghost": the branch gets a 550
    let server = MockServer::start(opts).await;

    let client = Arc::new(Mutex::new(FtpClient::connect(server.config()).await.unwrap()));
    let err = directory::list_recursive(client, "", Arc::new(|_| {}))
        .await
        .unwrap_err();
    assert_eq!(err.code, Some(550));
}

#[tokio::test]
async fn cwd_reports_protocol_errors() {
    let server = MockServer::start(ServerOptions::default()).await;
    let mut client = FtpClient::connect(server.config()).await.unwrap();

    client.cwd("/pub").await.unwrap();
    let err = client.cwd("/missing").await.unwrap_err();
    assert_eq!(err.code, Some(status::FILE_UNAVAILABLE));
    assert_eq!(err.kind, FtpErrorKind::Protocol);
}

#[tokio::test]
async fn bad_greeting_fails_the_connect() {
    let mut opts = ServerOptions::default();
    opts.greeting = Some("500 no service".into());
    let server = MockServer::start(opts).await;

    let err = FtpClient::connect(server.config()).await.unwrap_err();
    assert_eq!(err.kind, FtpErrorKind::Protocol);
    assert_eq!(err.code, Some(status::BAD_COMMAND));
}

#[tokio::test]
async fn queue_drains_uploads_and_downloads() {
    let payload = patterned(20_000);
    let mut opts = ServerOptions::default();
    opts.serve.insert("down.bin".into(), payload.clone());
    let server = MockServer::start(opts).await;

    let up_local = temp_path("queue-up");
    let down_local = temp_path("queue-down");
    tokio::fs::write(&up_local, &payload).await.unwrap();

    let client = Arc::new(Mutex::new(FtpClient::connect(server.config()).await.unwrap()));
    let queue = Arc::new(Mutex::new(TransferQueue::new(TransferQueueConfig::default())));

    let (up_id, down_id) = {
        let mut q = queue.lock().await;
        (
            q.enqueue(
                TransferDirection::Upload,
                up_local.to_str().unwrap(),
                "queued.bin",
            ),
            q.enqueue(
                TransferDirection::Download,
                down_local.to_str().unwrap(),
                "down.bin",
            ),
        )
    };

    queue::drain_queue(queue.clone(), client.clone()).await;

    let q = queue.lock().await;
    assert_eq!(
        q.get(up_id).unwrap().state,
        ftpkit::TransferState::Completed
    );
    assert_eq!(
        q.get(down_id).unwrap().state,
        ftpkit::TransferState::Completed
    );
    assert_eq!(q.get(down_id).unwrap().transferred_bytes, payload.len() as u64);
    assert_eq!(server.stored("queued.bin").unwrap(), payload);
    assert_eq!(tokio::fs::read(&down_local).await.unwrap(), payload);

    let _ = tokio::fs::remove_file(&up_local).await;
    let _ = tokio::fs::remove_file(&down_local).await;
}
