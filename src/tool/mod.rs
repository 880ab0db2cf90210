//! External media tool integration
//!
//! The relay never fetches or muxes media itself. It drives an external
//! yt-dlp compatible binary in two stages:
//!
//! 1. **Metadata**: `--dump-json` for the source, decoded into
//!    [`MediaMetadata`](crate::types::MediaMetadata)
//! 2. **Fetch+mux**: download the best streams and merge them into the
//!    artifact path, streaming progress text on stdout/stderr
//!
//! [`MediaTool`] is the seam the orchestrator depends on; [`CliMediaTool`]
//! is the production implementation. Stage 2 hands back a [`StageProcess`]
//! so the caller can consume output incrementally and terminate early.

mod cli;
mod process;
mod traits;

pub use cli::{CliMediaTool, DEFAULT_BINARY};
pub use process::{OutputChunk, OutputStream, StageProcess, TERMINATE_GRACE};
pub use traits::MediaTool;
