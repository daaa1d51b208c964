//! Platform abstraction layer.
//!
//! All `#[cfg]` blocks for OS-specific behavior live here:
//! - `paths` - user identity and scratch/config locations
//! - `permissions` - read/write access checks
//! - `signal` - SIGTERM handling while the worker pool runs

pub mod paths;
pub mod permissions;
pub mod signal;

pub use paths::{current_user, scratch_cache_path};
pub use permissions::{can_read, can_write, nearest_existing_ancestor};
pub use signal::TerminationGuard;
