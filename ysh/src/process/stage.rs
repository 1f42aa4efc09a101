use anyhow::{Context as _, Result};
use libc::{STDERR_FILENO, STDIN_FILENO, STDOUT_FILENO};
use nix::unistd::{Pid, close, dup2, execvp, getpid, setpgid, tcsetpgrp};
use std::ffi::CString;
use std::os::unix::io::RawFd;
use tracing::{debug, error};

use super::redirect::{IoBindings, resolve_redirects};
use super::signal;
use crate::shell::SHELL_TERMINAL;
use ysh_types::{Context, YshError};

/// One pipeline segment: the program, its argv (redirection tokens still
/// embedded until just before exec), the descriptor bindings it will run
/// with, and its pid once forked. Built by the parser, consumed once by
/// the launcher, discarded after the fork loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    pub cmd: String,
    pub argv: Vec<String>,
    pub stdin: RawFd,
    pub stdout: RawFd,
    pub stderr: RawFd,
    pub pid: Option<Pid>,
}

impl Stage {
    pub fn new(argv: Vec<String>) -> Self {
        let cmd = argv.first().cloned().unwrap_or_default();
        Stage {
            cmd,
            argv,
            stdin: STDIN_FILENO,
            stdout: STDOUT_FILENO,
            stderr: STDERR_FILENO,
            pid: None,
        }
    }

    /// Child-side continuation after fork. Joins the pipeline's process
    /// group, takes the terminal when foreground, restores default signal
    /// dispositions, wires pipes and redirections onto 0/1/2, and execs.
    /// Never returns to parent code: on any failure the child exits 1.
    pub fn exec(&self, ctx: &Context, pgid: Option<Pid>, other_pipe_fds: &[RawFd]) -> ! {
        let pid = getpid();
        let pgid = pgid.unwrap_or(pid);

        if ctx.interactive {
            // Also done in the parent; whoever runs first wins, which
            // narrows the window before forwarded signals can land.
            if let Err(err) = setpgid(pid, pgid) {
                error!("🍴 FORK: child setpgid {} failed: {}", pgid, err);
            }
            if ctx.foreground {
                if let Err(err) = tcsetpgrp(SHELL_TERMINAL, pgid) {
                    debug!("child tcsetpgrp failed: {}, continuing", err);
                }
            }
        }

        if let Err(err) = signal::restore_default_handlers() {
            error!("failed to restore signal handlers: {}", err);
        }

        // Every pipe fd from other stages must go away here, or readers
        // upstream never see EOF.
        for fd in other_pipe_fds {
            let _ = close(*fd);
        }

        if let Err(err) = self.wire_and_exec() {
            eprintln!("ysh: {err}");
            std::process::exit(1);
        }
        // execvp replaces the image on success and wire_and_exec errors on
        // failure, so this point is unreachable; exit anyway.
        std::process::exit(1);
    }

    fn wire_and_exec(&self) -> Result<()> {
        let io = IoBindings {
            stdin: self.stdin,
            stdout: self.stdout,
            stderr: self.stderr,
        };

        // Redirections are interpreted here, after the pipe bindings
        // exist, because they may override them (e.g. `a | b > f`).
        let resolved = resolve_redirects(&self.argv, io)?;
        let visible = &self.argv[..resolved.visible_argc];
        if visible.is_empty() {
            return Err(YshError::Syntax.into());
        }

        debug!(
            "🍴 FORK: exec cmd:{:?} argv:{:?} io:{:?}",
            self.cmd, visible, resolved.bindings
        );

        let bindings = resolved.bindings;
        copy_fd(bindings.stdin, STDIN_FILENO)?;
        if bindings.stdout == bindings.stderr {
            dup2(bindings.stdout, STDOUT_FILENO).context("dup2 stdout failed")?;
            dup2(bindings.stderr, STDERR_FILENO).context("dup2 stderr failed")?;
            if bindings.stdout != STDOUT_FILENO && bindings.stdout != STDERR_FILENO {
                close(bindings.stdout).context("close stdout failed")?;
            }
        } else {
            copy_fd(bindings.stdout, STDOUT_FILENO)?;
            copy_fd(bindings.stderr, STDERR_FILENO)?;
        }

        let cmd = CString::new(self.cmd.clone()).context("failed new CString")?;
        let argv: Result<Vec<CString>> = visible
            .iter()
            .map(|a| CString::new(a.clone()).context("failed new CString"))
            .collect();
        let argv = argv?;

        match execvp(&cmd, &argv) {
            Ok(_) => unreachable!(),
            Err(err) => {
                debug!("🍴 FORK: execvp {:?} failed: {}", cmd, err);
                Err(YshError::CommandNotFound(self.cmd.clone()).into())
            }
        }
    }
}

fn copy_fd(src: RawFd, dst: RawFd) -> Result<()> {
    if src != dst {
        dup2(src, dst).context("failed dup2")?;
        close(src).context("failed close")?;
    }
    Ok(())
}
