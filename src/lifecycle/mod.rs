//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (main.rs):
//!     Load config → Validate → Load extensions → Build pipeline → Bind listener
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     Trigger → Listener stops accepting → In-flight requests drain
//!     → Extensions unloaded → Exit
//! ```
//!
//! # Design Decisions
//! - Any startup error is fatal
//! - Extensions unload only after the listener has stopped

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
