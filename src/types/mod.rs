//! Core domain types shared by the poller, the cursor store and the supervisor.

pub mod ids;

pub use ids::{Cursor, StreamKind};
