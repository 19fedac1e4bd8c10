//! Constructor-level configuration.
//!
//! This is a plain data struct, not a CLI or config-file loader -- loading
//! configuration from the environment or a file is an external collaborator
//! left to the host binary.

use std::path::PathBuf;

/// Default chunk ring size in bounded mode.
pub const DEFAULT_CHUNK_COUNT: u32 = 10;

/// Queue length at which `OnEvent` posts a `Flush` task.
pub const DEFAULT_FLUSH_THRESHOLD: usize = 15;

/// Verbosity the observer registers with the event bus at.
///
/// The observer only remembers and exposes the selected mode; filtering
/// events by verbosity is the event bus's responsibility, not this crate's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureMode {
    /// Baseline capture: no sensitive payloads, no raw byte dumps.
    #[default]
    Default,
    /// Includes fields the bus normally redacts (cookies, auth headers, ...).
    IncludeSensitive,
    /// Includes everything, including raw socket bytes.
    Everything,
}

/// Constructor-level configuration for an [`crate::Observer`].
#[derive(Debug, Clone)]
pub struct Config {
    /// Final log file path.
    pub final_log_path: PathBuf,
    /// Total disk budget for event chunks in bounded mode. `None` selects
    /// unbounded mode.
    pub max_total_size: Option<u64>,
    /// Number of chunks in the ring. Only meaningful in bounded mode.
    pub chunk_count: u32,
    /// Queue length at which a flush task is posted.
    pub flush_threshold: usize,
}

impl Config {
    /// Construct a config for the given final log path, defaulting
    /// `chunk_count` and `flush_threshold`.
    pub fn new(final_log_path: impl Into<PathBuf>, max_total_size: Option<u64>) -> Self {
        Self {
            final_log_path: final_log_path.into(),
            max_total_size,
            chunk_count: DEFAULT_CHUNK_COUNT,
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
        }
    }

    /// Whether this config selects bounded (ring-of-chunks) mode.
    pub fn is_bounded(&self) -> bool {
        self.max_total_size.is_some()
    }

    /// Sibling in-progress directory for bounded mode.
    pub fn in_progress_dir(&self) -> PathBuf {
        let mut name = self
            .final_log_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".inprogress");
        match self.final_log_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.join(name),
            _ => PathBuf::from(name),
        }
    }

    /// Soft per-chunk byte limit: `max_total_size / chunk_count`, or `None`
    /// when unbounded.
    ///
    /// A `max_total_size` smaller than `chunk_count` yields
    /// `max_chunk_bytes == 0`, which causes every event to trigger
    /// rotation; this is intentionally left unguarded (see DESIGN.md).
    pub fn max_chunk_bytes(&self) -> Option<u64> {
        self.max_total_size
            .map(|total| total / u64::from(self.chunk_count.max(1)))
    }

    /// Hard cap on the write queue's byte budget: `2 * max_total_size`, or
    /// `None` when unbounded.
    pub fn queue_cap(&self) -> Option<usize> {
        self.max_total_size.map(|total| (total.saturating_mul(2)) as usize)
    }
}
