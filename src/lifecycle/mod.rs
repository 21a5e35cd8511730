//! Application lifecycle.
//!
//! ```text
//! 1. Configuration loading
//!    ↓
//! 2. Service construction (configured factories, then direct registrations)
//!    ↓
//! 3. Route table validation
//!    ↓
//! 4. start_all: periodic tasks, bus consumers, start hooks
//!    ↓
//! 5. Serving, one dispatcher per worker
//!    ↓
//! 6. Shutdown signal (SIGTERM/SIGINT)
//!    ↓
//! 7. stop_all: timers and consumers cancelled, stop hooks
//! ```

mod application;
mod shutdown;

pub use application::{Application, ApplicationBuilder};
pub use shutdown::shutdown_signal;
