use anyhow::Result;
use libc::{STDERR_FILENO, STDIN_FILENO, STDOUT_FILENO};
use nix::unistd::Pid;
use std::fs::File;
use std::io::Write;
use std::mem;
use std::os::unix::io::FromRawFd;
use std::os::unix::io::RawFd;
use thiserror::Error;

/// ysh error taxonomy. Syntax and redirection problems abort one command
/// line; launch failures abort one pipeline; the shell itself keeps going.
#[derive(Error, Debug)]
pub enum YshError {
    #[error("syntax error")]
    Syntax,

    #[error("{0}: {1}")]
    Redirect(String, nix::errno::Errno),

    #[error("{0}: command not found")]
    CommandNotFound(String),

    #[error("failed to launch pipeline: {0}")]
    Launch(String),

    #[error("system call failed: {0}")]
    Sys(#[from] nix::errno::Errno),

    #[error("IO operation failed: {0}")]
    Io(#[from] std::io::Error),
}

pub type YshResult<T> = std::result::Result<T, YshError>;

/// Per-evaluation execution context handed to builtins and the launcher.
///
/// Holds the descriptor bindings a command runs with plus the
/// foreground/interactive flags the job-control paths consult.
#[derive(Debug, Clone)]
pub struct Context {
    pub shell_pid: Pid,
    pub shell_pgid: Pid,
    pub foreground: bool,
    pub interactive: bool,
    pub infile: RawFd,
    pub outfile: RawFd,
    pub errfile: RawFd,
}

impl Context {
    pub fn new(shell_pid: Pid, shell_pgid: Pid, interactive: bool) -> Self {
        Context {
            shell_pid,
            shell_pgid,
            foreground: true,
            interactive,
            infile: STDIN_FILENO,
            outfile: STDOUT_FILENO,
            errfile: STDERR_FILENO,
        }
    }

    pub fn write_stdout(&self, msg: &str) -> Result<()> {
        let mut file = unsafe { File::from_raw_fd(self.outfile) };
        writeln!(&mut file, "{msg}")?;
        mem::forget(file);
        Ok(())
    }

    pub fn write_stderr(&self, msg: &str) -> Result<()> {
        let mut file = unsafe { File::from_raw_fd(self.errfile) };
        writeln!(&mut file, "{msg}")?;
        mem::forget(file);
        Ok(())
    }

    pub fn reset(&mut self) {
        self.infile = STDIN_FILENO;
        self.outfile = STDOUT_FILENO;
        self.errfile = STDERR_FILENO;
        self.foreground = true;
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ExitStatus {
    ExitedWith(i32),
}
