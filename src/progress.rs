//! Progress extraction from fetch+mux tool output
//!
//! The tool writes its progress as text on stdout and/or stderr, redrawing
//! the current line with `\r` while a download runs. Pipe reads hand us that
//! text in arbitrary fragments, so a marker such as `[download]  42.5%` can
//! arrive split across two reads. [`ProgressParser`] therefore keeps the
//! trailing partial line of each fragment and only inspects complete lines.
//!
//! Use one parser per stream: a partial line on stdout must never be glued to
//! the next fragment of stderr.

use regex::Regex;
use std::sync::OnceLock;

/// Marker that announces the mux/merge phase
pub const MERGE_MARKER: &str = "[Merger]";

/// Upper bound for a buffered partial line; longer runs are parsed as-is
const MAX_PENDING_BYTES: usize = 64 * 1024;

/// A single progress signal recognized in the output
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Observation {
    /// Download percentage (0.0 to 100.0, as printed by the tool)
    Percent(f32),
    /// The merge phase started
    MergeStarted,
}

#[allow(clippy::expect_used)]
fn percent_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"download\]\s+(\d+(?:\.\d+)?)%").expect("progress pattern is a valid regex")
    })
}

/// Line-buffering progress parser
#[derive(Debug, Default)]
pub struct ProgressParser {
    pending: Vec<u8>,
}

impl ProgressParser {
    /// Create an empty parser
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one raw output fragment
    ///
    /// Returns the observations found in every line completed by this
    /// fragment, in output order. An incomplete trailing line is kept until a
    /// later fragment (or [`finish`](Self::finish)) completes it.
    pub fn feed(&mut self, fragment: &[u8]) -> Vec<Observation> {
        let mut observations = Vec::new();

        for &byte in fragment {
            if byte == b'\n' || byte == b'\r' {
                self.flush_pending(&mut observations);
            } else {
                self.pending.push(byte);
            }
        }

        if self.pending.len() > MAX_PENDING_BYTES {
            self.flush_pending(&mut observations);
        }

        observations
    }

    /// Convenience wrapper around [`feed`](Self::feed) for text
    pub fn feed_str(&mut self, fragment: &str) -> Vec<Observation> {
        self.feed(fragment.as_bytes())
    }

    /// Parse whatever partial line is still buffered
    ///
    /// Call once when the underlying stream reaches end-of-file.
    pub fn finish(&mut self) -> Vec<Observation> {
        let mut observations = Vec::new();
        self.flush_pending(&mut observations);
        observations
    }

    /// Whether a partial line is currently buffered
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    fn flush_pending(&mut self, out: &mut Vec<Observation>) {
        if self.pending.is_empty() {
            return;
        }
        let line = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        parse_line(&line, out);
    }
}

/// Extract observations from one complete line
pub fn parse_line(line: &str, out: &mut Vec<Observation>) {
    for caps in percent_pattern().captures_iter(line) {
        if let Some(value) = caps.get(1).and_then(|m| m.as_str().parse::<f32>().ok()) {
            out.push(Observation::Percent(value));
        }
    }

    if line.contains(MERGE_MARKER) {
        out.push(Observation::MergeStarted);
    }
}
