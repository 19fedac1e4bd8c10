//! The file writer: owns all file handles and the rotation state machine.
//! Every method here runs exclusively on the file executor thread -- nothing
//! in this module is `Sync`-guarded because nothing needs to be; the
//! executor is the only caller.

use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde_json::Value as Json;

use crate::error::WriterError;

/// Two-byte separator written after every event record.
const EVENT_SEP: &[u8] = b",\n";
/// Read buffer size used while stitching chunk files together.
const STITCH_BUF_SIZE: usize = 64 * 1024;

fn prologue_bytes(constants: &Json) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"{\"constants\":");
    out.extend_from_slice(constants.to_string().as_bytes());
    out.extend_from_slice(b",\n\"events\": [\n");
    out
}

fn epilogue_bytes(polled_data: Option<&Json>) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"]");
    if let Some(data) = polled_data {
        out.extend_from_slice(b",\n\"polledData\": ");
        out.extend_from_slice(data.to_string().as_bytes());
        out.push(b'\n');
    }
    out.extend_from_slice(b"}\n");
    out
}

const PLACEHOLDER: &[u8] = b"Log data is being written to the .inprogress directory";

/// Opens `path` for write, truncating any existing content. Wraps the
/// underlying `io::Error` in [`WriterError::Open`] and attaches a path
/// context via `anyhow::Context` so warnings log the full cause chain.
fn open_for_write(path: &Path) -> anyhow::Result<File> {
    OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .map_err(|e| WriterError::open(path, e))
        .with_context(|| format!("opening {} for write", path.display()))
}

/// All mutable state owned by the file writer, plus the rotation/stitch
/// algorithms.
pub struct FileWriterState {
    final_log_path: PathBuf,
    in_progress_dir: PathBuf,
    bounded: bool,
    chunk_count: u32,
    max_chunk_bytes: Option<u64>,

    final_handle: Option<File>,
    current_chunk_handle: Option<File>,
    current_chunk_bytes: u64,
    /// Monotonic file number; 0 means "no chunk yet".
    file_number: u64,
    wrote_event_bytes: bool,
    /// Set when bounded-mode directory creation failed at `Initialize`.
    dir_create_failed: bool,
}

impl FileWriterState {
    pub fn new(
        final_log_path: PathBuf,
        in_progress_dir: PathBuf,
        bounded: bool,
        chunk_count: u32,
        max_chunk_bytes: Option<u64>,
    ) -> Self {
        Self {
            final_log_path,
            in_progress_dir,
            bounded,
            chunk_count: chunk_count.max(1),
            max_chunk_bytes,
            final_handle: None,
            current_chunk_handle: None,
            current_chunk_bytes: 0,
            file_number: 0,
            wrote_event_bytes: false,
            dir_create_failed: false,
        }
    }

    fn chunk_path(&self, index: u32) -> PathBuf {
        self.in_progress_dir.join(format!("event_file_{index}.json"))
    }

    fn constants_path(&self) -> PathBuf {
        self.in_progress_dir.join("constants.json")
    }

    fn end_netlog_path(&self) -> PathBuf {
        self.in_progress_dir.join("end_netlog.json")
    }

    /// Opens the final log file and, in bounded mode, the staging
    /// directory and `constants.json`.
    pub fn initialize(&mut self, constants: &Json) {
        match open_for_write(&self.final_log_path) {
            Ok(mut f) => {
                let prologue_result = if self.bounded {
                    f.write_all(PLACEHOLDER)
                        .with_context(|| format!("writing placeholder to {}", self.final_log_path.display()))
                } else {
                    f.write_all(&prologue_bytes(constants))
                        .with_context(|| format!("writing prologue to {}", self.final_log_path.display()))
                };
                if let Err(e) = prologue_result {
                    log::warn!("{e:#}");
                }
                let _ = f.flush();
                self.final_handle = Some(f);
            }
            Err(e) => {
                log::error!("{e:#}");
                self.final_handle = None;
            }
        }

        if self.bounded {
            self.initialize_bounded(constants);
        }
    }

    fn initialize_bounded(&mut self, constants: &Json) {
        if let Err(e) = fs::create_dir_all(&self.in_progress_dir)
            .map_err(|e| WriterError::dir_create(self.in_progress_dir.clone(), e))
            .context("final file will contain only the placeholder")
        {
            log::warn!("{e:#}");
            self.dir_create_failed = true;
            return;
        }

        let result = open_for_write(&self.constants_path()).and_then(|mut f| {
            f.write_all(&prologue_bytes(constants))
                .with_context(|| format!("writing constants prologue to {}", self.constants_path().display()))
        });
        if let Err(e) = result {
            log::warn!("{e:#}");
        }
    }

    fn rotate(&mut self) {
        self.file_number += 1;
        let index = ((self.file_number - 1) % u64::from(self.chunk_count)) as u32;
        self.current_chunk_handle = None; // closes previous handle, if any
        let path = self.chunk_path(index);
        match open_for_write(&path) {
            Ok(f) => self.current_chunk_handle = Some(f),
            Err(e) => {
                log::warn!("{e:#}");
                self.current_chunk_handle = None;
            }
        }
        self.current_chunk_bytes = 0;
    }

    /// Drains `records` into chunk(s) or the final file.
    pub fn flush(&mut self, records: VecDeque<String>) {
        for record in records {
            if self.bounded {
                self.write_bounded_record(&record);
            } else {
                self.write_unbounded_record(&record);
            }
        }
    }

    fn write_bounded_record(&mut self, record: &str) {
        let max = self.max_chunk_bytes.unwrap_or(u64::MAX);
        if self.current_chunk_handle.is_none() || self.current_chunk_bytes >= max {
            self.rotate();
        }

        let Some(handle) = self.current_chunk_handle.as_mut() else {
            // Chunk file failed to open; the event in this interval is
            // lost, but the writer otherwise continues.
            return;
        };

        if write_record(handle, record) {
            self.current_chunk_bytes += record.len() as u64 + EVENT_SEP.len() as u64;
            self.wrote_event_bytes = true;
        }
    }

    fn write_unbounded_record(&mut self, record: &str) {
        let Some(handle) = self.final_handle.as_mut() else {
            return;
        };
        if write_record(handle, record) {
            self.wrote_event_bytes = true;
        }
    }

    /// Finalizes the log: closes out the current mode's representation and
    /// appends the epilogue (or, in bounded mode, stitches chunks together).
    pub fn stop(&mut self, polled_data: Option<Json>) {
        if self.bounded {
            self.stop_bounded(polled_data);
        } else {
            self.stop_unbounded(polled_data);
        }
        self.final_handle = None; // closed last, in both modes
    }

    fn stop_unbounded(&mut self, polled_data: Option<Json>) {
        let Some(handle) = self.final_handle.as_mut() else {
            return;
        };

        if self.wrote_event_bytes {
            if let Err(e) = trim_trailing_separator(handle) {
                log::warn!("failed to seek back past trailing separator: {e}");
            }
        }

        if let Err(e) = handle.write_all(&epilogue_bytes(polled_data.as_ref())) {
            log::warn!("failed writing epilogue: {e}");
        }
        let _ = handle.flush();
    }

    fn stop_bounded(&mut self, polled_data: Option<Json>) {
        if self.dir_create_failed || !self.in_progress_dir.is_dir() {
            log::warn!(
                "in-progress directory {} missing at stop; final file retains only the placeholder",
                self.in_progress_dir.display()
            );
            return;
        }

        if let Err(e) = self.write_end_netlog(polled_data.as_ref()) {
            log::warn!("{e:#}");
        }

        if let Err(e) = self.stitch() {
            log::error!("stitching final log file failed: {e:#}");
        }
    }

    fn write_end_netlog(&self, polled_data: Option<&Json>) -> anyhow::Result<()> {
        let path = self.end_netlog_path();
        let mut f = open_for_write(&path)?;
        f.write_all(&epilogue_bytes(polled_data))
            .map_err(|e| WriterError::io(&path, e))
            .with_context(|| format!("writing {}", path.display()))?;
        f.flush().map_err(|e| WriterError::io(&path, e).into())
    }

    /// Rebuilds the final log from the constants file, the live chunk
    /// window, and the end-of-log marker, then removes the staging
    /// directory.
    fn stitch(&mut self) -> anyhow::Result<()> {
        self.current_chunk_handle = None; // step 1: close current chunk handle

        let mut buf = vec![0u8; STITCH_BUF_SIZE];

        // step 3: re-open the final file for write, truncating the placeholder.
        self.final_handle = None;
        let mut out = open_for_write(&self.final_log_path)?;

        // step 4: constants.json -> final file, then delete.
        copy_and_remove(&self.constants_path(), &mut out, &mut buf);

        // step 5: live chunk window, oldest to newest.
        let end = self.file_number + 1;
        let begin = if self.file_number <= u64::from(self.chunk_count) {
            1
        } else {
            end - u64::from(self.chunk_count)
        };

        // step 6: copy each live chunk in ring-age order, then delete.
        for fnum in begin..end {
            let index = ((fnum - 1) % u64::from(self.chunk_count)) as u32;
            copy_and_remove(&self.chunk_path(index), &mut out, &mut buf);
        }

        // step 7: drop the trailing ",\n" left by the last copied event.
        if self.wrote_event_bytes {
            if let Err(e) = trim_trailing_separator(&mut out) {
                log::warn!("failed to seek back past trailing separator while stitching: {e}");
            }
        }

        // step 8: end_netlog.json -> final file, then delete.
        copy_and_remove(&self.end_netlog_path(), &mut out, &mut buf);
        out.flush()?;
        self.final_handle = Some(out);

        // step 9: remove the in-progress directory recursively.
        if let Err(e) = fs::remove_dir_all(&self.in_progress_dir) {
            log::warn!(
                "failed to remove in-progress directory {}: {e}",
                self.in_progress_dir.display()
            );
        }

        Ok(())
    }

    /// Removes the final log file and, in bounded mode, the staging
    /// directory, discarding all on-disk state.
    pub fn delete_all_files(&mut self) {
        self.current_chunk_handle = None;
        self.final_handle = None;
        if let Err(e) = fs::remove_file(&self.final_log_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!("failed to delete final log file {}: {e}", self.final_log_path.display());
            }
        }
        if self.bounded {
            if let Err(e) = fs::remove_dir_all(&self.in_progress_dir) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    log::warn!(
                        "failed to delete in-progress directory {}: {e}",
                        self.in_progress_dir.display()
                    );
                }
            }
        }
    }

    #[cfg(test)]
    pub fn file_number(&self) -> u64 {
        self.file_number
    }

    #[cfg(test)]
    pub fn wrote_event_bytes(&self) -> bool {
        self.wrote_event_bytes
    }
}

/// Writes `record` followed by the `,\n` separator. Returns `true` if the
/// write succeeded (used to set `wrote_event_bytes`).
fn write_record(handle: &mut File, record: &str) -> bool {
    let ok = handle.write_all(record.as_bytes()).is_ok() && handle.write_all(EVENT_SEP).is_ok();
    if !ok {
        log::warn!("failed writing event record; event dropped");
    }
    ok
}

/// Seeks back two bytes from the end of `handle` and truncates there, so
/// the next write overwrites the trailing `,\n` in place. Requires the file
/// was opened in binary mode with no newline translation, which
/// `std::fs::File` always is.
fn trim_trailing_separator(handle: &mut File) -> std::io::Result<()> {
    let len = handle.metadata()?.len();
    let new_len = len.saturating_sub(EVENT_SEP.len() as u64);
    handle.set_len(new_len)?;
    handle.seek(SeekFrom::End(0))?;
    Ok(())
}

/// Copies `src` into `dest` using a `buf`-sized read loop, then deletes
/// `src`. A missing `src` is a no-op: earlier failures leave gaps in the
/// log rather than aborting the stitch.
fn copy_and_remove(src: &Path, dest: &mut File, buf: &mut [u8]) {
    match File::open(src) {
        Ok(mut f) => {
            loop {
                let n = match f.read(buf) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) => {
                        log::warn!("failed reading {}: {e}", src.display());
                        break;
                    }
                };
                if let Err(e) = dest.write_all(&buf[..n]) {
                    log::warn!("failed copying {} into final file: {e}", src.display());
                    break;
                }
            }
            drop(f);
            let _ = fs::remove_file(src);
        }
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!("failed to open {} for stitching: {e}", src.display());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn state(dir: &Path, bounded: bool, chunk_count: u32, max_chunk_bytes: Option<u64>) -> FileWriterState {
        let final_path = dir.join("net.json");
        let in_progress = dir.join("net.json.inprogress");
        FileWriterState::new(final_path, in_progress, bounded, chunk_count, max_chunk_bytes)
    }

    #[test]
    fn unbounded_three_events_matches_exact_bytes() {
        let dir = tempdir().unwrap();
        let mut w = state(dir.path(), false, 10, None);
        w.initialize(&serde_json::json!({}));
        w.flush(VecDeque::from([
            r#"{"a":1}"#.to_string(),
            r#"{"a":2}"#.to_string(),
            r#"{"a":3}"#.to_string(),
        ]));
        w.stop(None);

        let text = fs::read_to_string(dir.path().join("net.json")).unwrap();
        assert_eq!(
            text,
            "{\"constants\":{},\n\"events\": [\n{\"a\":1},\n{\"a\":2},\n{\"a\":3}]\n}\n"
        );
        let parsed: Json = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["events"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn zero_events_then_stop_gives_empty_array() {
        let dir = tempdir().unwrap();
        let mut w = state(dir.path(), false, 10, None);
        w.initialize(&serde_json::json!({}));
        w.stop(None);

        let text = fs::read_to_string(dir.path().join("net.json")).unwrap();
        let parsed: Json = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["events"].as_array().unwrap().len(), 0);
        assert!(!w.wrote_event_bytes());
    }

    #[test]
    fn polled_data_present_adds_key() {
        let dir = tempdir().unwrap();
        let mut w = state(dir.path(), false, 10, None);
        w.initialize(&serde_json::json!({}));
        w.stop(Some(serde_json::json!({"k": "v"})));

        let text = fs::read_to_string(dir.path().join("net.json")).unwrap();
        let parsed: Json = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["polledData"], serde_json::json!({"k": "v"}));
    }

    #[test]
    fn polled_data_absent_omits_key() {
        let dir = tempdir().unwrap();
        let mut w = state(dir.path(), false, 10, None);
        w.initialize(&serde_json::json!({}));
        w.stop(None);

        let text = fs::read_to_string(dir.path().join("net.json")).unwrap();
        let parsed: Json = serde_json::from_str(&text).unwrap();
        assert!(parsed.get("polledData").is_none());
    }

    #[test]
    fn bounded_chunk_count_one_window_is_single_slot() {
        let dir = tempdir().unwrap();
        let mut w = state(dir.path(), true, 1, Some(1000));
        w.initialize(&serde_json::json!({}));
        w.flush(VecDeque::from([
            r#"{"a":1}"#.to_string(),
            r#"{"a":2}"#.to_string(),
        ]));
        w.stop(None);

        let text = fs::read_to_string(dir.path().join("net.json")).unwrap();
        let parsed: Json = serde_json::from_str(&text).unwrap();
        let events = parsed["events"].as_array().unwrap();
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn wrapped_ring_keeps_last_n_file_numbers() {
        let dir = tempdir().unwrap();
        // Force rotation every event: tiny max_chunk_bytes.
        let mut w = state(dir.path(), true, 3, Some(1));
        w.initialize(&serde_json::json!({}));
        for i in 1..=7 {
            w.flush(VecDeque::from([format!(r#"{{"n":{i}}}"#)]));
        }
        assert_eq!(w.file_number(), 7);
        w.stop(None);

        let text = fs::read_to_string(dir.path().join("net.json")).unwrap();
        let parsed: Json = serde_json::from_str(&text).unwrap();
        let events = parsed["events"].as_array().unwrap();
        let ns: Vec<i64> = events.iter().map(|e| e["n"].as_i64().unwrap()).collect();
        assert_eq!(ns, vec![5, 6, 7]);
    }

    #[test]
    fn in_progress_directory_cleaned_up_after_stitch() {
        let dir = tempdir().unwrap();
        let mut w = state(dir.path(), true, 2, Some(1000));
        w.initialize(&serde_json::json!({}));
        w.flush(VecDeque::from([r#"{"a":1}"#.to_string()]));
        w.stop(None);

        assert!(!dir.path().join("net.json.inprogress").exists());
    }

    #[test]
    fn directory_create_failure_leaves_only_placeholder() {
        // This path logs a warning on the in-progress directory failure and
        // an error from the stitch step; run with `RUST_LOG=warn` to see them.
        let _ = env_logger::builder().is_test(true).try_init();

        let dir = tempdir().unwrap();
        // Make the in-progress directory path collide with a plain file so
        // create_dir_all fails.
        let blocker = dir.path().join("net.json.inprogress");
        fs::write(&blocker, b"not a directory").unwrap();

        let mut w = state(dir.path(), true, 2, Some(1000));
        w.initialize(&serde_json::json!({}));
        w.flush(VecDeque::from([r#"{"a":1}"#.to_string()]));
        w.stop(None);

        let text = fs::read_to_string(dir.path().join("net.json")).unwrap();
        assert_eq!(text, String::from_utf8(PLACEHOLDER.to_vec()).unwrap());
    }

    #[test]
    fn delete_all_files_removes_final_and_in_progress() {
        let dir = tempdir().unwrap();
        let mut w = state(dir.path(), true, 2, Some(1000));
        w.initialize(&serde_json::json!({}));
        w.flush(VecDeque::from([r#"{"a":1}"#.to_string()]));
        w.delete_all_files();

        assert!(!dir.path().join("net.json").exists());
        assert!(!dir.path().join("net.json.inprogress").exists());
    }

    #[test]
    fn one_event_larger_than_soft_limit_written_in_full() {
        let dir = tempdir().unwrap();
        let mut w = state(dir.path(), true, 2, Some(4));
        w.initialize(&serde_json::json!({}));
        let big = format!(r#"{{"pad":"{}"}}"#, "x".repeat(100));
        w.flush(VecDeque::from([big.clone()]));
        // Rotation happens before the *next* write, not mid-write.
        assert_eq!(w.file_number(), 1);
        w.stop(None);

        let text = fs::read_to_string(dir.path().join("net.json")).unwrap();
        let parsed: Json = serde_json::from_str(&text).unwrap();
        let events = parsed["events"].as_array().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["pad"].as_str().unwrap().len(), 100);
    }
}
