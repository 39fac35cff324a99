//! Turns radio-stack callbacks into values an async caller can wait on.
//!
//! Callbacks never run caller logic; they only resolve a registration held
//! here, and the caller picks the value up on its own task.

pub mod channel;
pub mod observe;
pub mod oneshot;

pub use channel::ResponseChannel;
pub use observe::watch_stream;
pub use oneshot::{OneShot, Waiter};
