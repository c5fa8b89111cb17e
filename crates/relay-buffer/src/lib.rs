//! Bounded, expiring per-run event buffer.
//!
//! Every event a durable run emits is stored here under the run id before it
//! is written to the wire, so a reconnecting client can ask for exactly the
//! events it missed. This crate provides:
//! - Sequential event ids of the form `{run_id}:{n}`
//! - A sliding window of at most `max_events_per_run` events per run
//! - TTL expiry on inactivity with an optional background sweep
//! - Change notification so a replay can follow a run that is still live
//!
//! Nothing is persisted; a process restart loses every buffered run.
//!
//! # Example
//!
//! ```rust,ignore
//! use relay_buffer::{BufferConfig, RunEventBuffer};
//!
//! let buffer = RunEventBuffer::new(BufferConfig::default());
//! let first = buffer.store("run_1", "text-delta", r#"{"text":"Hel"}"#);
//! buffer.store("run_1", "text-delta", r#"{"text":"lo"}"#);
//!
//! let missed = buffer.get_events_after("run_1", &first);
//! assert_eq!(missed.len(), 1);
//! ```

mod buffer;
mod config;
mod error;
mod event;

pub use buffer::{BufferStats, RunEventBuffer};
pub use config::{BufferConfig, MIN_CLEANUP_INTERVAL};
pub use error::{BufferError, Result};
pub use event::{BufferedEvent, format_event_id, parse_event_id};
