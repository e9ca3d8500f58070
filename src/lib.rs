//! Tagged zone allocator and double-ended hunk allocator for engine
//! core memory management.
//!
//! Two cooperating allocators, reserved straight from the OS rather
//! than layered on the global Rust allocator:
//!
//! - [`zone`]: a tagged, segregated-free-list general-purpose
//!   allocator, instantiated once as a large main zone and once as a
//!   small fixed zone for short-lived strings.
//! - [`hunk`]: a single pre-reserved region split into a permanent
//!   side and a temp side that can swap.
//!
//! [`init::Runtime`] owns one instance of each and is the entry point
//! most callers want; `zone`/`hunk` are exposed directly for callers
//! that need finer control over which zone an allocation lands in.
//!
//! This crate assumes single-threaded use throughout — see the module
//! docs on [`init::Runtime`] for what that does and doesn't guarantee.

pub mod config;
pub mod error;
pub mod hunk;
pub mod init;
pub mod os;
pub mod stats;
pub mod zone;

pub use config::Config;
pub use error::{DropError, ErrorSink, LoggingErrorSink, PanicErrorSink};
pub use hunk::{Hunk, Preference};
pub use init::Runtime;
pub use zone::tag::Tag;
pub use zone::Zone;
