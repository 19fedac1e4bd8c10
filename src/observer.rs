//! Observer front-end: producer-side API.
//!
//! Receives individual events on arbitrary threads, encodes each to a
//! compact JSON string via the caller-supplied encoder, and enqueues it
//! into the write queue. Owns the observer's lifecycle (construction,
//! start/stop observing, destruction).

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value as Json;

use crate::config::{CaptureMode, Config};
use crate::constants::{ConstantsProvider, DefaultConstantsProvider};
use crate::executor::{FileExecutor, Task};
use crate::queue::WriteQueue;

/// Callback contract for the event bus this observer subscribes to. An
/// external collaborator: this crate only specifies the shape a real bus
/// adapter must satisfy to drive `OnEvent`. `Send + Sync` because a handle
/// to it is retained past the call that registers it, for the destructor's
/// own unsubscribe.
pub trait EventSource: Send + Sync {
    /// Registers `callback` to be invoked for every event at or below
    /// `mode`'s verbosity. Idempotency is not required.
    fn subscribe(&self, mode: CaptureMode, callback: Box<dyn Fn(&Json) + Send + Sync>);
    /// Synchronously unsubscribes so no further callback invocations race
    /// with the caller of `unsubscribe` returning.
    fn unsubscribe(&self);
}

/// Producer-side front-end of the event-log observer.
///
/// Cheaply cloneable: internally a handle over `Arc`-shared state, so
/// `OnEvent` can be called from as many threads as the event bus uses.
pub struct Observer {
    queue: Arc<WriteQueue>,
    executor: Arc<FileExecutor>,
    flush_threshold: usize,
    capture_mode: std::sync::Mutex<CaptureMode>,
    stopped: Arc<AtomicBool>,
    /// Set by `start_observing`; lets `Drop` unsubscribe from the bus
    /// without needing the caller to hand the bus back in at drop time.
    unsubscribe: std::sync::Mutex<Option<Arc<dyn Fn() + Send + Sync>>>,
}

impl Observer {
    /// Constructs the observer: computes `max_chunk_bytes` and the queue's
    /// hard cap, allocates the write queue, spawns the file executor, and
    /// posts `Initialize(constants)`.
    pub fn new(config: Config, constants: impl ConstantsProvider) -> Self {
        Self::with_constants(config, constants.constants())
    }

    /// Like [`Observer::new`], but filling in constants from
    /// [`DefaultConstantsProvider`] when the caller has none of its own.
    pub fn with_default_constants(config: Config) -> Self {
        Self::with_constants(config, DefaultConstantsProvider.constants())
    }

    fn with_constants(config: Config, constants: Json) -> Self {
        let queue = Arc::new(WriteQueue::new(config.queue_cap()));
        let executor = Arc::new(FileExecutor::spawn(
            config.final_log_path.clone(),
            config.in_progress_dir(),
            config.is_bounded(),
            config.chunk_count,
            config.max_chunk_bytes(),
            Arc::clone(&queue),
        ));
        executor.post(Task::Initialize(constants));

        Self {
            queue,
            executor,
            flush_threshold: config.flush_threshold,
            capture_mode: std::sync::Mutex::new(CaptureMode::default()),
            stopped: Arc::new(AtomicBool::new(false)),
            unsubscribe: std::sync::Mutex::new(None),
        }
    }

    /// Registers with the event bus at `capture_mode`. The observer itself
    /// performs no filtering; it only records the mode so it can be
    /// surfaced via [`Observer::capture_mode`].
    ///
    /// `bus` is shared ownership (not a borrow) because the observer keeps
    /// its own handle to it, so `Drop` can unsubscribe even if the caller
    /// never calls `stop_observing`.
    pub fn start_observing<B: EventSource + 'static>(&self, bus: &Arc<B>, capture_mode: CaptureMode) {
        *self.capture_mode.lock().unwrap() = capture_mode;
        let queue = Arc::clone(&self.queue);
        let executor = Arc::clone(&self.executor);
        let threshold = self.flush_threshold;
        bus.subscribe(
            capture_mode,
            Box::new(move |entry| Self::on_event_value(&queue, &executor, threshold, entry.clone())),
        );

        let bus_for_drop = Arc::clone(bus);
        *self.unsubscribe.lock().unwrap() = Some(Arc::new(move || bus_for_drop.unsubscribe()));
    }

    /// The capture mode passed to the most recent `start_observing` call.
    pub fn capture_mode(&self) -> CaptureMode {
        *self.capture_mode.lock().unwrap()
    }

    /// Unsubscribes from `bus` synchronously, then posts a terminal
    /// drain-then-close task. If `on_done` is given, it runs (on a short-
    /// lived dedicated thread standing in for a caller-supplied executor)
    /// once the stop task completes; otherwise this is fire-and-forget.
    pub fn stop_observing<B: EventSource + 'static>(
        &self,
        bus: &Arc<B>,
        polled_data: Option<Json>,
        on_done: Option<Box<dyn FnOnce() + Send + 'static>>,
    ) {
        bus.unsubscribe();
        // The explicit unsubscribe above already happened; drop the stored
        // closure so a later `Drop` (guarded by `stopped` below too) never
        // holds a dangling reason to call it again.
        *self.unsubscribe.lock().unwrap() = None;
        self.stopped.store(true, Ordering::SeqCst);

        let done_tx = on_done.as_ref().map(|_| crossbeam_channel::bounded::<()>(1));
        self.executor.post(Task::FlushThenStop {
            polled_data,
            done: done_tx.as_ref().map(|(tx, _)| tx.clone()),
        });

        if let Some(on_done) = on_done {
            // `done_tx` is `Some` whenever `on_done` is; the receiver half
            // is moved into this dedicated thread, standing in for a
            // caller-supplied executor since this crate has no general
            // executor abstraction to post back onto.
            let (_, done_rx) = done_tx.expect("done channel created alongside on_done");
            std::thread::spawn(move || {
                let _ = done_rx.recv();
                on_done();
            });
        }
    }

    /// Hot path: encodes `entry` via `encode` and pushes it to the write
    /// queue. If encoding fails the event is silently dropped. If the
    /// post-push queue length equals `flush_threshold` exactly, posts a
    /// single `Flush` task (edge-triggered, so a burst past the threshold
    /// only posts once).
    pub fn on_event(&self, entry: &Json, encode: impl FnOnce(&Json) -> Option<String>) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }
        let Some(record) = encode(entry) else {
            return;
        };
        let len = self.queue.push(record);
        if len == self.flush_threshold {
            self.executor.post(Task::Flush);
        }
    }

    fn on_event_value(
        queue: &Arc<WriteQueue>,
        executor: &Arc<FileExecutor>,
        threshold: usize,
        entry: Json,
    ) {
        let Ok(record) = serde_json::to_string(&entry) else {
            return;
        };
        let len = queue.push(record);
        if len == threshold {
            executor.post(Task::Flush);
        }
    }
}

impl Drop for Observer {
    /// If `stop_observing` was not called, unsubscribes from the bus
    /// (via the closure `start_observing` stashed away), then posts
    /// `DeleteAllFiles` so no partial log is left on disk. The file worker
    /// itself is then destroyed when the last `Arc<FileExecutor>` drops,
    /// which joins the file executor thread so destruction happens on its
    /// owner thread.
    fn drop(&mut self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            if let Some(unsubscribe) = self.unsubscribe.lock().unwrap().take() {
                unsubscribe();
            }
            self.executor.post(Task::DeleteAllFiles);
        }
    }
}

/// Convenience re-export of the path helper used by tests and callers that
/// want to know where bounded mode will stage its chunk ring without
/// constructing a full [`Config`].
pub fn in_progress_dir_for(final_log_path: &Path) -> std::path::PathBuf {
    Config::new(final_log_path, None).in_progress_dir()
}
