use anyhow::Result;
use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

// Signal handlers communicate with the main loop through these flags and
// nothing else: no job-table access, no allocation, no structural mutation
// from signal context. The main loop drains them at well-defined points
// (the wait protocol's retry loop and the per-prompt reconciliation pass).
static PENDING_SIGINT: AtomicBool = AtomicBool::new(false);
static PENDING_SIGTSTP: AtomicBool = AtomicBool::new(false);
static PENDING_SIGCHLD: AtomicBool = AtomicBool::new(false);

pub(crate) extern "C" fn handle_sigint(_: i32) {
    PENDING_SIGINT.store(true, Ordering::SeqCst);
}

pub(crate) extern "C" fn handle_sigtstp(_: i32) {
    PENDING_SIGTSTP.store(true, Ordering::SeqCst);
}

extern "C" fn handle_sigchld(_: i32) {
    PENDING_SIGCHLD.store(true, Ordering::SeqCst);
}

// The flags are process-wide; tests that latch, drain, or forward them
// (including anything that forks and waits) serialize on this lock.
#[cfg(test)]
pub(crate) static SIGNAL_TEST_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

fn install(signal: Signal, handler: SigHandler) -> Result<()> {
    // No SA_RESTART: the blocking foreground waitpid must come back with
    // EINTR so the wait loop can forward the signal to the job's group.
    let action = SigAction::new(handler, SaFlags::empty(), SigSet::empty());
    unsafe {
        sigaction(signal, &action)?;
    }
    Ok(())
}

/// Installs the shell's signal dispositions. SIGINT/SIGTSTP/SIGCHLD get
/// flag-setting handlers; SIGQUIT/SIGTTIN/SIGTTOU are ignored so the
/// shell survives terminal-control handoffs (refer
/// https://www.gnu.org/software/libc/manual/html_node/Launching-Jobs.html).
/// The shell never carries a default-terminating disposition for any of
/// these; only its descendants do.
pub fn install_handlers() -> Result<()> {
    debug!("📡 SIGNAL: installing shell signal handlers");
    install(Signal::SIGINT, SigHandler::Handler(handle_sigint))?;
    install(Signal::SIGTSTP, SigHandler::Handler(handle_sigtstp))?;
    install(Signal::SIGCHLD, SigHandler::Handler(handle_sigchld))?;
    install(Signal::SIGQUIT, SigHandler::SigIgn)?;
    install(Signal::SIGTTIN, SigHandler::SigIgn)?;
    install(Signal::SIGTTOU, SigHandler::SigIgn)?;
    Ok(())
}

/// Restores default dispositions in a forked child before exec. The
/// shell's handlers must not leak into descendants: children stop and die
/// from terminal signals the normal way.
pub fn restore_default_handlers() -> Result<()> {
    let action = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    for signal in [
        Signal::SIGINT,
        Signal::SIGQUIT,
        Signal::SIGTSTP,
        Signal::SIGTTIN,
        Signal::SIGTTOU,
        Signal::SIGCHLD,
    ] {
        unsafe {
            sigaction(signal, &action)?;
        }
    }
    Ok(())
}

pub fn take_pending_sigint() -> bool {
    PENDING_SIGINT.swap(false, Ordering::SeqCst)
}

pub fn take_pending_sigtstp() -> bool {
    PENDING_SIGTSTP.swap(false, Ordering::SeqCst)
}

pub fn take_pending_sigchld() -> bool {
    PENDING_SIGCHLD.swap(false, Ordering::SeqCst)
}

/// Discards interactive signals typed at the prompt so a stale Ctrl-C or
/// Ctrl-Z is not forwarded to the next job the moment it starts.
pub fn clear_interactive_pending() {
    PENDING_SIGINT.store(false, Ordering::SeqCst);
    PENDING_SIGTSTP.store(false, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_are_taken_once_and_clearable() {
        let _guard = SIGNAL_TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        handle_sigint(0);
        assert!(take_pending_sigint());
        assert!(!take_pending_sigint());

        handle_sigchld(0);
        assert!(take_pending_sigchld());
        assert!(!take_pending_sigchld());

        handle_sigint(0);
        handle_sigtstp(0);
        clear_interactive_pending();
        assert!(!take_pending_sigint());
        assert!(!take_pending_sigtstp());
    }

    #[test]
    fn handlers_install_without_error() {
        let _guard = SIGNAL_TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        install_handlers().unwrap();
        // Dispositions are process-global; put them back so children
        // forked by later tests inherit the defaults again.
        restore_default_handlers().unwrap();
    }
}
