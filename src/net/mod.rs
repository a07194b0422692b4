//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! config.listen
//!     → listener.rs (TCP address, else Unix socket path)
//!     → Hand off to HTTP layer (http/server.rs)
//! ```

pub mod listener;

pub use listener::{bind, BoundListener, ListenerError};
