//! SIGTERM handling while the worker pool is active.
//!
//! While a [`TerminationGuard`] is alive, SIGTERM ends the process at once
//! with status 1; no worker is drained. Dropping the guard reinstates the
//! handler that was in place before.

#![allow(unsafe_code)]

use tracing::debug;

/// Exit status used when the pool is terminated by a signal.
pub const TERMINATED_EXIT_CODE: i32 = 1;

#[cfg(unix)]
extern "C" fn on_sigterm(_signal: libc::c_int) {
    // SAFETY: `_exit` is async-signal-safe and never returns.
    unsafe { libc::_exit(TERMINATED_EXIT_CODE) }
}

/// Installs the termination handler for its lifetime.
pub struct TerminationGuard {
    #[cfg(unix)]
    previous: Option<nix::sys::signal::SigAction>,
}

impl TerminationGuard {
    /// Install the immediate-exit SIGTERM handler.
    pub fn install() -> Self {
        #[cfg(unix)]
        {
            use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

            let action = SigAction::new(
                SigHandler::Handler(on_sigterm),
                SaFlags::empty(),
                SigSet::empty(),
            );
            // SAFETY: the handler only calls an async-signal-safe function.
            let previous = match unsafe { sigaction(Signal::SIGTERM, &action) } {
                Ok(previous) => Some(previous),
                Err(e) => {
                    debug!("Could not install SIGTERM handler: {}", e);
                    None
                }
            };
            TerminationGuard { previous }
        }

        #[cfg(not(unix))]
        {
            debug!("SIGTERM handling is not available on this platform");
            TerminationGuard {}
        }
    }
}

impl Drop for TerminationGuard {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use nix::sys::signal::{sigaction, Signal};

            if let Some(previous) = self.previous.take() {
                // SAFETY: restores a disposition previously returned by the kernel.
                if let Err(e) = unsafe { sigaction(Signal::SIGTERM, &previous) } {
                    debug!("Could not restore SIGTERM handler: {}", e);
                }
            }
        }
    }
}
