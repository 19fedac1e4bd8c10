//! The file executor: a single serialized task queue running on a
//! dedicated thread, driving a background worker off a
//! `crossbeam_channel::Receiver` fed by senders held by the hot-path
//! callers.
//!
//! Every [`FileWriterState`] method is only ever called from the thread
//! spawned here, giving single-writer discipline over all on-disk state
//! without any lock on the writer itself.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Sender, unbounded};
use serde_json::Value as Json;

use crate::queue::WriteQueue;
use crate::writer::FileWriterState;

pub(crate) enum Task {
    Initialize(Json),
    Flush,
    FlushThenStop { polled_data: Option<Json>, done: Option<Sender<()>> },
    DeleteAllFiles,
}

/// Handle to the dedicated file-writer thread.
///
/// Dropping the last `Sender` clone disconnects the channel; the worker
/// thread drains whatever is left in the queue and exits. `Observer`'s
/// `Drop` impl joins this handle so the process does not exit while
/// buffered events are still being written.
pub struct FileExecutor {
    tx: Option<Sender<Task>>,
    handle: Option<JoinHandle<()>>,
}

impl FileExecutor {
    pub fn spawn(
        final_log_path: PathBuf,
        in_progress_dir: PathBuf,
        bounded: bool,
        chunk_count: u32,
        max_chunk_bytes: Option<u64>,
        queue: Arc<WriteQueue>,
    ) -> Self {
        // Unbounded: the task queue only ever carries a handful of control
        // messages (Initialize/Flush/FlushThenStop/DeleteAllFiles), never
        // the events themselves -- those live in `WriteQueue`, which is the
        // component with the hard memory budget.
        let (tx, rx) = unbounded::<Task>();

        let handle = std::thread::Builder::new()
            .name("netlog-file-writer".into())
            .spawn(move || {
                let mut state = FileWriterState::new(
                    final_log_path,
                    in_progress_dir,
                    bounded,
                    chunk_count,
                    max_chunk_bytes,
                );

                for task in rx.iter() {
                    match task {
                        Task::Initialize(constants) => state.initialize(&constants),
                        Task::Flush => {
                            let mut drained = VecDeque::new();
                            queue.swap_into(&mut drained);
                            state.flush(drained);
                        }
                        Task::FlushThenStop { polled_data, done } => {
                            let mut drained = VecDeque::new();
                            queue.swap_into(&mut drained);
                            state.flush(drained);
                            state.stop(polled_data);
                            if let Some(done) = done {
                                let _ = done.send(());
                            }
                        }
                        Task::DeleteAllFiles => state.delete_all_files(),
                    }
                }
            })
            .expect("failed to spawn file writer thread");

        Self { tx: Some(tx), handle: Some(handle) }
    }

    pub fn post(&self, task: Task) {
        // The receiver only disconnects once every sender is dropped,
        // which happens only from `Drop` below, so this send cannot fail
        // during normal operation; a failure here means the worker thread
        // panicked, which we can only log.
        let sent = self.tx.as_ref().map(|tx| tx.send(task).is_ok()).unwrap_or(false);
        if !sent {
            log::error!("file executor thread is gone; task dropped");
        }
    }
}

impl Drop for FileExecutor {
    fn drop(&mut self) {
        // Drop the sender first so the worker thread's `for task in
        // rx.iter()` loop observes disconnection, finishes draining
        // whatever was already posted, and returns -- only then can
        // `join` below return without blocking forever.
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
