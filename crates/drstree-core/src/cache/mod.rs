//! Persistence helpers and the per-user scratch cache.

mod atomic;
pub mod scratch;

pub use atomic::{atomic_read_json, atomic_write_json};
pub use scratch::{CachedRun, ScratchCache};
