//! Per-stream pollers.
//!
//! Each enabled stream gets a dedicated poller task that owns the stream's
//! cursor store and processes its pages serially. Streams run concurrently
//! and independently; nothing orders events across streams.
//!
//! # Module Structure
//!
//! - [`poller`]: the tick/drain loop
//! - [`message`]: failure reports sent to the supervisor
//! - [`poll`]: tick scheduling
//! - [`status`]: shared per-stream progress for the status server

mod message;
mod poll;
pub mod poller;
mod status;

pub use message::StreamFailure;
pub use poll::PollSchedule;
pub use poller::{PollerError, StreamPoller};
pub use status::{PollState, StatusBoard, StreamStatus};
