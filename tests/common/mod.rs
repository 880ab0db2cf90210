//! Common test utilities for convert-relay integration tests

#![allow(dead_code)]

use convert_relay::{CliMediaTool, Config};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Metadata stage printing a valid document
pub const METADATA_OK: &str = r#"echo '{"title":"Relay Test: Part 1","id":"xyz"}'"#;

/// Fetch stage reporting progress, merging and writing the artifact
pub const FETCH_OK: &str = r#"
printf '[download]  10.0%% of 2.00MiB\n'
printf '[download]  55.5%% of 2.00MiB\n'
printf '[download] 100.0%% of 2.00MiB\n'
printf '[Merger] Merging formats into "%s"\n' "$out"
printf 'relay-output' > "$out"
"#;

/// Fetch stage that records its pid and then hangs
pub const FETCH_HANG: &str = r#"echo $$ > "$work/fetch.pid"; exec sleep 30"#;

/// A work directory holding the fake tool and the temp root
pub struct Workspace {
    pub dir: TempDir,
    pub temp_root: PathBuf,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let temp_root = dir.path().join("temp");
        std::fs::create_dir_all(&temp_root).unwrap();
        Self { dir, temp_root }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Write a fake yt-dlp script into the workspace
    ///
    /// `metadata` runs for `--dump-json` invocations, `fetch` otherwise, with
    /// `$work` and `$out` set.
    pub fn tool(&self, metadata: &str, fetch: &str) -> CliMediaTool {
        let script = self.path("fake-yt-dlp.sh");
        let body = format!(
            "work='{work}'\nif [ \"$1\" = \"--dump-json\" ]; then\n{metadata}\nelse\nout=\"$7\"\n{fetch}\nfi\n",
            work = self.dir.path().display(),
        );
        std::fs::write(&script, body).unwrap();
        CliMediaTool::new("sh").with_leading_args([script])
    }

    /// Configuration bound to a free local port, storing artifacts here
    pub fn config(&self) -> Config {
        let mut config = Config::default();
        config.api.bind_address = free_local_addr();
        config.storage.temp_dir = self.temp_root.clone();
        config
    }

    pub fn temp_entries(&self) -> Vec<PathBuf> {
        std::fs::read_dir(&self.temp_root)
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect()
    }
}

/// A loopback address nothing is listening on
pub fn free_local_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

/// Poll until the server accepts connections
pub async fn wait_for_listener(addr: SocketAddr) {
    wait_until_async(|| async move { TcpStream::connect(addr).await.is_ok() }).await;
}

/// Open a connection and send a `GET` for `path_and_query`
pub async fn send_get(addr: SocketAddr, path_and_query: &str) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "GET {path_and_query} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n"
    );
    stream.write_all(request.as_bytes()).await.unwrap();
    stream
}

/// Read a response until the server closes the connection
pub async fn read_response(mut stream: TcpStream) -> String {
    let mut raw = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), stream.read_to_end(&mut raw))
        .await
        .expect("timed out reading response")
        .unwrap();
    String::from_utf8_lossy(&raw).into_owned()
}

/// `GET` and return the raw response text
pub async fn http_get(addr: SocketAddr, path_and_query: &str) -> String {
    read_response(send_get(addr, path_and_query).await).await
}

/// Read from `stream` until the accumulated text contains `needle`
pub async fn read_until(stream: &mut TcpStream, needle: &str) -> String {
    let mut text = String::new();
    let mut buf = [0u8; 4096];
    while !text.contains(needle) {
        let n = tokio::time::timeout(Duration::from_secs(10), stream.read(&mut buf))
            .await
            .expect("timed out waiting for response data")
            .unwrap();
        assert!(n > 0, "connection closed before {needle:?} arrived: {text}");
        text.push_str(&String::from_utf8_lossy(&buf[..n]));
    }
    text
}

/// Status code of a raw HTTP response
pub fn status_of(response: &str) -> u16 {
    response
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .unwrap_or_else(|| panic!("not an HTTP response: {response}"))
}

pub async fn wait_until(condition: impl Fn() -> bool) {
    wait_until_async(|| {
        let ready = condition();
        async move { ready }
    })
    .await;
}

async fn wait_until_async<F, Fut>(condition: F)
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(10), async {
        while !condition().await {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Backdate a file's modification time
pub fn age_file(path: &Path, age: Duration) {
    let file = std::fs::File::options().write(true).open(path).unwrap();
    file.set_modified(std::time::SystemTime::now() - age).unwrap();
}

/// The pid written to `pid_file`, once it is complete
pub fn recorded_pid(pid_file: &Path) -> Option<i32> {
    std::fs::read_to_string(pid_file)
        .ok()
        .and_then(|s| s.trim().parse().ok())
}

/// Whether the pid recorded in `pid_file` still names a live process
pub fn recorded_process_alive(pid_file: &Path) -> bool {
    let pid = recorded_pid(pid_file).unwrap();
    unsafe { libc::kill(pid, 0) == 0 }
}
