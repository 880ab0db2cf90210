//! yt-dlp compatible command-line tool

use super::process::{OutputStream, StageProcess};
use super::traits::MediaTool;
use crate::config::ToolsConfig;
use crate::error::{Error, Result};
use crate::types::{MediaMetadata, StageKind};
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Default binary name searched on PATH
pub const DEFAULT_BINARY: &str = "yt-dlp";

/// Media tool backed by an external yt-dlp compatible binary
///
/// # Examples
///
/// ```no_run
/// use convert_relay::tool::{CliMediaTool, MediaTool};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let tool = CliMediaTool::from_path().expect("yt-dlp not found in PATH");
/// let metadata = tool.fetch_metadata("https://example.com/watch?v=abc").await?;
/// println!("{}", metadata.title);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct CliMediaTool {
    binary_path: PathBuf,
    leading_args: Vec<OsString>,
    cookies_file: Option<PathBuf>,
    format: String,
    merge_output_format: String,
}

impl CliMediaTool {
    /// Create a tool with an explicit binary path and default settings
    pub fn new(binary_path: impl Into<PathBuf>) -> Self {
        let defaults = ToolsConfig::default();
        Self {
            binary_path: binary_path.into(),
            leading_args: Vec::new(),
            cookies_file: None,
            format: defaults.format,
            merge_output_format: defaults.merge_output_format,
        }
    }

    /// Attempt to find yt-dlp in PATH
    pub fn from_path() -> Option<Self> {
        which::which(DEFAULT_BINARY).ok().map(Self::new)
    }

    /// Build from configuration, falling back to PATH discovery
    pub fn from_config(config: &ToolsConfig) -> Result<Self> {
        let binary_path = match &config.tool_path {
            Some(path) => path.clone(),
            None => which::which(DEFAULT_BINARY).map_err(|e| {
                Error::ExternalTool(format!("{} not found in PATH: {}", DEFAULT_BINARY, e))
            })?,
        };

        Ok(Self {
            binary_path,
            leading_args: Vec::new(),
            cookies_file: config.cookies_file.clone(),
            format: config.format.clone(),
            merge_output_format: config.merge_output_format.clone(),
        })
    }

    /// Arguments placed before the tool's own arguments
    ///
    /// Lets an interpreter run a wrapper script, e.g. `sh wrapper.sh`.
    pub fn with_leading_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.leading_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Cookie jar passed to both stages when the file exists
    pub fn with_cookies_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.cookies_file = Some(path.into());
        self
    }

    /// Path of the binary this tool runs
    pub fn binary_path(&self) -> &Path {
        &self.binary_path
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.binary_path);
        command.args(&self.leading_args);
        if let Some(cookies) = self.cookies_file.as_ref().filter(|p| p.is_file()) {
            command.arg("--cookies").arg(cookies);
        }
        command
    }

    fn metadata_args(source: &str) -> Vec<OsString> {
        ["--dump-json", "--no-playlist", source]
            .into_iter()
            .map(OsString::from)
            .collect()
    }

    fn fetch_args(&self, source: &str, output: &Path) -> Vec<OsString> {
        vec![
            "-f".into(),
            self.format.as_str().into(),
            "--merge-output-format".into(),
            self.merge_output_format.as_str().into(),
            "--no-playlist".into(),
            "-o".into(),
            output.as_os_str().to_owned(),
            source.into(),
        ]
    }
}

#[async_trait]
impl MediaTool for CliMediaTool {
    async fn fetch_metadata(&self, source: &str) -> Result<MediaMetadata> {
        let mut command = self.command();
        command.args(Self::metadata_args(source));
        let mut process = StageProcess::spawn(StageKind::Metadata, &mut command)?;

        let mut stdout = Vec::new();
        while let Some(chunk) = process.next_output().await {
            if chunk.stream == OutputStream::Stdout {
                stdout.extend_from_slice(&chunk.bytes);
            }
        }
        let status = process.wait().await?;

        if !status.success() {
            return Err(Error::UpstreamTool {
                stage: StageKind::Metadata,
                exit_code: status.code(),
                message: process.stderr_tail(),
            });
        }

        serde_json::from_slice(&stdout).map_err(|e| Error::MetadataParse(e.to_string()))
    }

    async fn start_fetch(&self, source: &str, output: &Path) -> Result<StageProcess> {
        let mut command = self.command();
        command.args(self.fetch_args(source, output));
        StageProcess::spawn(StageKind::FetchMux, &mut command)
    }

    fn name(&self) -> &str {
        "yt-dlp"
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_args_carry_format_and_output() {
        let tool = CliMediaTool::new("yt-dlp");
        let args = tool.fetch_args("https://v.example/x", Path::new("/tmp/temp/a_1.mp4"));
        let args: Vec<_> = args.iter().map(|a| a.to_str().unwrap()).collect();
        assert_eq!(
            args,
            vec![
                "-f",
                "bestvideo+bestaudio/best",
                "--merge-output-format",
                "mp4",
                "--no-playlist",
                "-o",
                "/tmp/temp/a_1.mp4",
                "https://v.example/x",
            ]
        );
    }

    #[test]
    fn metadata_args_dump_json() {
        let args = CliMediaTool::metadata_args("u");
        assert_eq!(args, vec!["--dump-json", "--no-playlist", "u"]);
    }

    #[test]
    fn cookies_only_passed_when_file_exists() {
        let dir = tempfile::tempdir().unwrap();
        let jar = dir.path().join("cookies.txt");

        let tool = CliMediaTool::new("yt-dlp").with_cookies_file(&jar);
        let args: Vec<_> = tool.command().as_std().get_args().map(|a| a.to_owned()).collect();
        assert!(args.is_empty());

        std::fs::write(&jar, "# Netscape HTTP Cookie File\n").unwrap();
        let args: Vec<_> = tool.command().as_std().get_args().map(|a| a.to_owned()).collect();
        assert_eq!(args, vec![OsString::from("--cookies"), jar.into_os_string()]);
    }

    #[test]
    fn from_config_prefers_explicit_path() {
        let config = ToolsConfig {
            tool_path: Some(PathBuf::from("/opt/bin/yt-dlp")),
            merge_output_format: "mkv".into(),
            ..Default::default()
        };
        let tool = CliMediaTool::from_config(&config).unwrap();
        assert_eq!(tool.binary_path(), Path::new("/opt/bin/yt-dlp"));
        assert_eq!(tool.merge_output_format, "mkv");
    }

    #[cfg(unix)]
    mod process {
        use super::*;

        fn script_tool(body: &str) -> (tempfile::TempDir, CliMediaTool) {
            let dir = tempfile::tempdir().unwrap();
            let script = dir.path().join("fake-tool.sh");
            std::fs::write(&script, body).unwrap();
            let tool = CliMediaTool::new("sh").with_leading_args([script]);
            (dir, tool)
        }

        #[tokio::test]
        async fn metadata_success_decodes_json() {
            let (_dir, tool) = script_tool(r#"echo '{"title":"My Clip","id":"abc","duration":3.0}'"#);
            let meta = tool.fetch_metadata("u").await.unwrap();
            assert_eq!(meta.title, "My Clip");
            assert_eq!(meta.id.as_deref(), Some("abc"));
        }

        #[tokio::test]
        async fn metadata_nonzero_exit_is_upstream_error() {
            let (_dir, tool) = script_tool("echo 'ERROR: Unsupported URL' >&2; exit 1");
            match tool.fetch_metadata("u").await {
                Err(Error::UpstreamTool {
                    stage,
                    exit_code,
                    message,
                }) => {
                    assert_eq!(stage, StageKind::Metadata);
                    assert_eq!(exit_code, Some(1));
                    assert!(message.contains("Unsupported URL"));
                }
                other => panic!("expected upstream error, got {other:?}"),
            }
        }

        #[tokio::test]
        async fn metadata_garbage_is_parse_error() {
            let (_dir, tool) = script_tool("echo 'not json'");
            assert!(matches!(
                tool.fetch_metadata("u").await,
                Err(Error::MetadataParse(_))
            ));
        }

        #[tokio::test]
        async fn fetch_receives_output_path_argument() {
            // "$7" is the path following "-o"
            let (dir, tool) = script_tool(r#"printf data > "$7""#);
            let output = dir.path().join("out.mp4");
            let mut process = tool.start_fetch("u", &output).await.unwrap();
            while process.next_output().await.is_some() {}
            assert!(process.wait().await.unwrap().success());
            assert_eq!(std::fs::read(&output).unwrap(), b"data");
        }
    }
}
