//! Per-subscription streaming
//!
//! A [`MessageStreamer`] keeps one streaming-pull session alive and runs the
//! per-message pipeline:
//!
//! ```text
//!   broker ──► PullStream::next() ──► decode ──► MessageBuffer::append
//!                                                     │
//!                                                     ▼
//!                                     EventSink ◄── MessageReceived
//!                                                     │
//!                                                     ▼
//!                                     Acknowledger::evaluate ──► ack
//! ```
//!
//! Transient failures move the monitor through `Error → Reconnecting` and
//! back to `Streaming` with exponential backoff. Permanent failures end the
//! monitor in `Failed`.

pub mod backoff;
pub mod session;
pub mod state;
mod worker;

pub use backoff::ReconnectPolicy;
pub use session::{MessageStreamer, StreamerSettings};
pub use state::{MonitorState, MonitorStatus};
