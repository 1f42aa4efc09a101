use anyhow::{Context as _, Result};
use nix::errno::Errno;
use nix::sys::signal::{Signal, killpg};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::{Pid, isatty, tcsetpgrp};
use tracing::{debug, error};

use super::job::{Job, JobTable};
use super::signal;
use super::state::JobState;
use crate::shell::SHELL_TERMINAL;

/// Translates a waitpid result into the job-state transition it implies.
/// Continued / still-alive reports carry no transition.
pub fn map_wait_status(status: WaitStatus) -> Option<(Pid, JobState)> {
    match status {
        WaitStatus::Exited(pid, code) => {
            debug!("⏳ WAIT: pid {} exited with status {}", pid, code);
            Some((pid, JobState::Done))
        }
        WaitStatus::Signaled(pid, sig, _core) => {
            debug!("⏳ WAIT: pid {} killed by {:?}", pid, sig);
            Some((pid, JobState::Killed))
        }
        WaitStatus::Stopped(pid, sig) => {
            debug!("⏳ WAIT: pid {} stopped by {:?}", pid, sig);
            Some((pid, JobState::Stopped))
        }
        WaitStatus::StillAlive | WaitStatus::Continued(_) => None,
        other => {
            error!("⏳ WAIT: unexpected waitpid event: {:?}", other);
            None
        }
    }
}

/// Non-blocking sweep reaping every terminated or stopped child and
/// advancing the owning job's state. This is the SIGCHLD handler's work,
/// deferred to the main loop: the handler itself only raises a flag, so
/// this sweep never runs concurrently with anything. It waits on -1 and
/// therefore visits all pipeline members, not only group leaders;
/// members of already-removed jobs reap to no table entry and are dropped.
pub fn reap_children(table: &mut JobTable) {
    loop {
        match waitpid(None, Some(WaitPidFlag::WNOHANG | WaitPidFlag::WUNTRACED)) {
            Ok(WaitStatus::StillAlive) | Err(Errno::ECHILD) => break,
            Err(Errno::EINTR) => continue,
            Ok(status) => {
                if let Some((pid, state)) = map_wait_status(status) {
                    let job_id = table.find_by_pid_mut(pid).map(|j| j.job_id);
                    match job_id {
                        Some(job_id) => table.set_state(job_id, state),
                        None => debug!("reaped pid {} belongs to no live job", pid),
                    }
                }
            }
            Err(err) => {
                error!("⏳ WAIT: waitpid sweep failed: {}", err);
                break;
            }
        }
    }
}

/// Blocks until the job's leader exits, is signaled, or stops (WUNTRACED).
/// EINTR means a signal handler ran while we were waiting; any pending
/// SIGINT/SIGTSTP is forwarded to the job's process group and the wait is
/// retried, never surfaced as an error. The shell itself is untouched.
pub fn wait_foreground(job: &mut Job) -> Result<JobState> {
    let Some(leader) = job.leader_pid else {
        // Nothing was forked; treat as already finished.
        return Ok(JobState::Done);
    };
    let pgid = job.pgid.unwrap_or(leader);

    debug!(
        "⏳ WAIT: waiting on job {} leader {} pgid {}",
        job.job_id, leader, pgid
    );

    loop {
        forward_pending_signals(pgid);

        match waitpid(leader, Some(WaitPidFlag::WUNTRACED)) {
            Err(Errno::EINTR) => {
                debug!("⏳ WAIT: waitpid interrupted, forwarding and retrying");
                continue;
            }
            Err(Errno::ECHILD) => {
                // Leader already reaped by an earlier sweep.
                debug!("⏳ WAIT: leader {} already reaped", leader);
                job.state = JobState::Done;
                return Ok(JobState::Done);
            }
            Err(err) => return Err(err).context("waitpid failed"),
            Ok(status) => {
                if let Some((_pid, state)) = map_wait_status(status) {
                    job.state = state;
                    return Ok(state);
                }
                // Continued or still-alive; keep waiting.
            }
        }
    }
}

/// Routes interactive signals to the foreground group. Called from the
/// wait loop after EINTR and before each blocking wait, so a Ctrl-C typed
/// while the shell sleeps in waitpid lands on the job, never on the shell.
fn forward_pending_signals(pgid: Pid) {
    if signal::take_pending_sigint() {
        debug!("📡 SIGNAL: forwarding SIGINT to pgid {}", pgid);
        let _ = killpg(pgid, Signal::SIGINT);
    }
    if signal::take_pending_sigtstp() {
        debug!("📡 SIGNAL: forwarding SIGTSTP to pgid {}", pgid);
        let _ = killpg(pgid, Signal::SIGTSTP);
    }
}

/// Gives the terminal to the job, optionally resumes it with SIGCONT,
/// waits for it to finish or stop, and takes the terminal back. Outside a
/// tty the terminal handoff is skipped and this is just the blocking wait.
pub fn put_in_foreground(job: &mut Job, shell_pgid: Pid, cont: bool) -> Result<JobState> {
    let on_terminal = isatty(SHELL_TERMINAL).unwrap_or(false);

    if on_terminal {
        if let Some(pgid) = job.pgid {
            if let Err(err) = tcsetpgrp(SHELL_TERMINAL, pgid) {
                debug!("tcsetpgrp {} failed: {}, continuing", pgid, err);
            }
        }
    }

    if cont {
        if let Some(pgid) = job.pgid {
            debug!("📡 SIGNAL: sending SIGCONT to pgid {}", pgid);
            killpg(pgid, Signal::SIGCONT).context("failed to send SIGCONT")?;
        }
    }

    let state = wait_foreground(job)?;

    if on_terminal {
        if let Err(err) = tcsetpgrp(SHELL_TERMINAL, shell_pgid) {
            debug!("tcsetpgrp shell_pgid failed: {}, continuing", err);
        }
    }

    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_maps_to_done() {
        let pid = Pid::from_raw(42);
        assert_eq!(
            map_wait_status(WaitStatus::Exited(pid, 0)),
            Some((pid, JobState::Done))
        );
        // Nonzero exits are still Done; liveness is the contract here.
        assert_eq!(
            map_wait_status(WaitStatus::Exited(pid, 1)),
            Some((pid, JobState::Done))
        );
    }

    #[test]
    fn signal_death_maps_to_killed() {
        let pid = Pid::from_raw(42);
        assert_eq!(
            map_wait_status(WaitStatus::Signaled(pid, Signal::SIGINT, false)),
            Some((pid, JobState::Killed))
        );
        assert_eq!(
            map_wait_status(WaitStatus::Signaled(pid, Signal::SIGKILL, true)),
            Some((pid, JobState::Killed))
        );
    }

    #[test]
    fn stop_maps_to_stopped() {
        let pid = Pid::from_raw(42);
        assert_eq!(
            map_wait_status(WaitStatus::Stopped(pid, Signal::SIGTSTP)),
            Some((pid, JobState::Stopped))
        );
    }

    #[test]
    fn non_transitions_map_to_none() {
        assert_eq!(map_wait_status(WaitStatus::StillAlive), None);
        assert_eq!(
            map_wait_status(WaitStatus::Continued(Pid::from_raw(42))),
            None
        );
    }

    #[test]
    fn wait_foreground_without_leader_is_done() {
        let mut job = Job::new(1, "noop".to_string());
        assert_eq!(wait_foreground(&mut job).unwrap(), JobState::Done);
    }
}
