//! Shared test helpers: a scripted stand-in for the external tool and an
//! orchestrator wired to it.

use crate::config::Config;
use crate::orchestrator::JobOrchestrator;
use crate::registry::{ChannelHandle, ClientChannelRegistry};
use crate::storage::TempArtifactStore;
use crate::tool::CliMediaTool;
use crate::types::Event;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Metadata stage printing a valid document
pub(crate) const METADATA_OK: &str =
    r#"echo '{"title":"My Clip!","id":"abc123","duration":12.0,"uploader":"someone"}'"#;

/// Fetch stage reporting progress on both streams, splitting one percentage
/// across two writes, then merging and writing the artifact
pub(crate) const FETCH_OK: &str = r#"
printf '[youtube] abc123: Downloading webpage\n'
printf '[download]   0.0%% of 1.00MiB\r[download]  4'
sleep 0.1
printf '2.5%% of 1.00MiB\n'
sleep 0.1
printf '[download] 100.0%% of 1.00MiB\n' >&2
sleep 0.1
printf '[Merger] Merging formats into "%s"\n' "$out"
printf 'converted-bytes' > "$out"
"#;

/// Test environment; keep it alive for the duration of the test
pub(crate) struct Harness {
    pub dir: TempDir,
    pub temp_root: PathBuf,
    pub registry: Arc<ClientChannelRegistry>,
    pub orchestrator: Arc<JobOrchestrator>,
}

impl Harness {
    /// Absolute path inside the harness work directory
    pub fn work_path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Entries currently under the temp root
    pub fn temp_entries(&self) -> Vec<PathBuf> {
        temp_entries(&self.temp_root)
    }
}

/// Write a fake yt-dlp script
///
/// `metadata` runs for `--dump-json` invocations, `fetch` otherwise. Both
/// bodies may use `$work` (the directory holding the script); `fetch` may
/// use `$out` (the artifact path) and `$8` (the source reference).
pub(crate) fn fake_tool(dir: &Path, metadata: &str, fetch: &str) -> CliMediaTool {
    let script = dir.join("fake-yt-dlp.sh");
    let body = format!(
        "work='{work}'\nif [ \"$1\" = \"--dump-json\" ]; then\n{metadata}\nelse\nout=\"$7\"\n{fetch}\nfi\n",
        work = dir.display(),
    );
    std::fs::write(&script, body).unwrap();
    CliMediaTool::new("sh").with_leading_args([script])
}

/// Orchestrator over a fake tool with default configuration
pub(crate) fn harness(metadata: &str, fetch: &str) -> Harness {
    harness_with_config(metadata, fetch, |_| {})
}

/// Orchestrator over a fake tool, letting the test adjust the configuration
pub(crate) fn harness_with_config(
    metadata: &str,
    fetch: &str,
    configure: impl FnOnce(&mut Config),
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let temp_root = dir.path().join("temp");
    std::fs::create_dir_all(&temp_root).unwrap();

    let mut config = Config::default();
    config.storage.temp_dir = temp_root.clone();
    configure(&mut config);

    let tool = fake_tool(dir.path(), metadata, fetch);
    let registry = Arc::new(ClientChannelRegistry::new());
    let store = Arc::new(TempArtifactStore::new(&temp_root));
    let orchestrator = Arc::new(JobOrchestrator::new(
        &config,
        registry.clone(),
        store,
        Arc::new(tool),
    ));

    Harness {
        dir,
        temp_root,
        registry,
        orchestrator,
    }
}

/// Receive events until a terminal one (`completed` or `error`) arrives
pub(crate) async fn collect_until_terminal(handle: &mut ChannelHandle) -> Vec<Event> {
    let mut events = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(10), handle.recv())
            .await
            .expect("timed out waiting for events")
            .expect("channel closed before a terminal event");
        let terminal = matches!(event, Event::Completed { .. } | Event::Error { .. });
        events.push(event);
        if terminal {
            return events;
        }
    }
}

/// Receive events until `predicate` matches one
pub(crate) async fn wait_for_event(
    handle: &mut ChannelHandle,
    predicate: impl Fn(&Event) -> bool,
) -> Event {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(10), handle.recv())
            .await
            .expect("timed out waiting for event")
            .expect("channel closed");
        if predicate(&event) {
            return event;
        }
    }
}

/// Entries under `root`
pub(crate) fn temp_entries(root: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(root)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect()
}

/// Whether `pid` still names a live (or unreaped) process
pub(crate) fn process_alive(pid: i32) -> bool {
    unsafe { libc::kill(pid, 0) == 0 }
}
