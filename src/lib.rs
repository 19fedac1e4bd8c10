//! A bounded/unbounded rotating event-log observer.
//!
//! Consumes a high-frequency stream of structured diagnostic events from an
//! external event bus and persists them to disk as a single, well-formed
//! JSON document, even across truncation, crash-free shutdown, or
//! disqualified termination.
//!
//! Three collaborating pieces (see each module for detail):
//!
//! - [`observer`] -- the producer-side front-end: `OnEvent`, `StartObserving`,
//!   `StopObserving`.
//! - [`queue`] -- the bounded, oldest-drop write queue shared between
//!   producer threads and the file executor.
//! - [`writer`] (driven by [`executor`]) -- the consumer-side file writer:
//!   unbounded streaming, or a bounded ring of chunk files stitched into the
//!   final log on stop.
//!
//! The event bus itself, the per-event JSON encoder, and any CLI/config
//! loader are external collaborators this crate does not implement.

pub mod config;
pub mod constants;
pub mod error;
mod executor;
pub mod observer;
pub mod queue;
mod writer;

pub use config::{CaptureMode, Config};
pub use constants::{ConstantsProvider, DefaultConstantsProvider, FixedConstants};
pub use error::WriterError;
pub use observer::{EventSource, Observer};
pub use queue::WriteQueue;
