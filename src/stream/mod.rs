//! Streamed intake chat delivery

pub mod event;
pub mod transport;

pub use event::{StreamEvent, GENERIC_STREAM_ERROR};
pub use transport::{IntakeStreamer, StreamLimits, StreamOutcome, StreamingError};
