use anyhow::{Result, anyhow};
use libc::{STDIN_FILENO, c_int};
use nix::sys::signal::{Signal, killpg};
use nix::unistd::{Pid, getpgrp};
use tracing::debug;

use crate::input;
use crate::parser::{parse_line, tokenize};
use crate::process::launch::launch_pipeline;
use crate::process::signal;
use crate::process::wait::{put_in_foreground, reap_children};
use crate::process::{JobState, JobTable};
use ysh_builtin::ShellProxy;
use ysh_types::Context;

pub const SHELL_TERMINAL: c_int = STDIN_FILENO;

/// The shell proper: owns the job table (exclusively — signal handlers
/// communicate through flags, never through this structure) and drives
/// the prompt cycle of reconcile, read, evaluate.
pub struct Shell {
    jobs: JobTable,
    shell_pgid: Pid,
    exited: Option<i32>,
}

impl Default for Shell {
    fn default() -> Self {
        Self::new()
    }
}

impl Shell {
    pub fn new() -> Self {
        Shell {
            jobs: JobTable::new(),
            shell_pgid: getpgrp(),
            exited: None,
        }
    }

    /// Prompt loop: reconcile finished jobs, read a line, evaluate.
    /// Ends on EOF or `exit`; individual command failures never end it.
    pub fn run_interactive(&mut self, ctx: &mut Context) -> Result<i32> {
        loop {
            self.check_jobs(ctx);
            if let Some(code) = self.exited {
                return Ok(code);
            }
            match input::read_line(ctx.interactive)? {
                None => {
                    debug!("end of input, exiting");
                    return Ok(0);
                }
                Some(line) => self.eval_line(ctx, &line)?,
            }
            if let Some(code) = self.exited {
                return Ok(code);
            }
        }
    }

    /// `-c` batch mode: one line, one reconciliation pass, done.
    pub fn run_command(&mut self, ctx: &mut Context, command: &str) -> Result<i32> {
        self.eval_line(ctx, command)?;
        self.check_jobs(ctx);
        Ok(self.exited.unwrap_or(0))
    }

    /// Evaluates one command line: builtins dispatch in-process before any
    /// fork; everything else becomes a job. The job record is registered
    /// before the first fork so pid lookups always find it, and is removed
    /// again if the launch fails or the foreground wait sees it finish.
    pub fn eval_line(&mut self, ctx: &mut Context, line: &str) -> Result<()> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(());
        }
        debug!("eval: '{}'", line);

        let tokens = tokenize(line);
        let Some(first) = tokens.first() else {
            return Ok(());
        };

        if let Some(builtin) = ysh_builtin::get_command(first) {
            let first = first.clone();
            let status = builtin(ctx, tokens, self);
            debug!("builtin '{}' -> {:?}", first, status);
            return Ok(());
        }

        let parsed = match parse_line(tokens) {
            Ok(parsed) => parsed,
            Err(err) => {
                ctx.write_stderr(&format!("ysh: {err}")).ok();
                return Ok(());
            }
        };
        if parsed.is_empty() {
            return Ok(());
        }

        let job_id = self.jobs.create(line);
        ctx.foreground = !parsed.background;
        // A Ctrl-C typed at the prompt must not kill the job we are about
        // to start.
        signal::clear_interactive_pending();

        let mut stages = parsed.stages;
        let launched = {
            let job = self
                .jobs
                .get_mut(job_id)
                .ok_or_else(|| anyhow!("job {} missing right after create", job_id))?;
            launch_pipeline(ctx, &mut stages, job)
        };

        if let Err(err) = launched {
            ctx.write_stderr(&format!("ysh: {err}")).ok();
            self.jobs.remove(job_id);
            ctx.reset();
            return Ok(());
        }

        if parsed.background {
            self.jobs.set_state(job_id, JobState::Background);
            debug!("job {} running in background", job_id);
        } else {
            self.foreground(ctx, job_id, false)?;
        }
        ctx.reset();
        Ok(())
    }

    /// Blocks on a job as the foreground job. A stop (Ctrl-Z) leaves it
    /// registered as Stopped and returns to the prompt; completion
    /// removes it before the prompt comes back.
    fn foreground(&mut self, ctx: &mut Context, job_id: usize, cont: bool) -> Result<()> {
        let shell_pgid = self.shell_pgid;
        let state = match self.jobs.get_mut(job_id) {
            Some(job) => put_in_foreground(job, shell_pgid, cont)?,
            None => return Ok(()),
        };

        match state {
            JobState::Stopped => {
                if let Some(job) = self.jobs.get(job_id) {
                    ctx.write_stdout(&format!(
                        "ysh: job {} '{}' has stopped",
                        job.job_id, job.cmd
                    ))
                    .ok();
                }
            }
            _ => {
                self.jobs.remove(job_id);
            }
        }
        Ok(())
    }

    /// Per-prompt reconciliation: drain the SIGCHLD wake flag, reap
    /// everything that is ready, report Done jobs once, and forget
    /// terminal entries. The only place background jobs leave the table.
    pub fn check_jobs(&mut self, ctx: &Context) {
        signal::take_pending_sigchld();
        if !self.jobs.is_empty() {
            reap_children(&mut self.jobs);
        }

        // The `+` recency marker belongs to the table head only; a
        // finished job further down keeps `-` in its report line.
        let head = self.jobs.iter().next().map(|j| j.job_id);
        for job in self.jobs.take_terminal() {
            if job.state == JobState::Done {
                let marker = if head == Some(job.job_id) { '+' } else { '-' };
                ctx.write_stdout(&format!("[{}] {} Done\t{}", job.job_id, marker, job.cmd))
                    .ok();
            }
            // Killed jobs die silently in the background; just drop them.
        }
    }

    fn jobs_cmd(&mut self, ctx: &Context) -> Result<()> {
        if self.jobs.is_empty() {
            ctx.write_stdout("jobs: there are no jobs")?;
            return Ok(());
        }
        let mut marker = '+';
        for job in self.jobs.iter() {
            ctx.write_stdout(&format!(
                "[{}] {} {}\t{}",
                job.job_id, marker, job.state, job.cmd
            ))?;
            marker = '-';
        }
        Ok(())
    }

    fn fg_cmd(&mut self, ctx: &mut Context) -> Result<()> {
        let target = self.jobs.find_recent(|j| {
            matches!(j.state, JobState::Stopped | JobState::Background)
        });
        let Some(job_id) = target else {
            ctx.write_stdout("fg: no current job")?;
            return Ok(());
        };

        if let Some(job) = self.jobs.get_mut(job_id) {
            ctx.write_stdout(&job.cmd.clone())?;
            job.state = JobState::Running;
        }
        ctx.foreground = true;
        // A Ctrl-C or Ctrl-Z typed at the prompt must not be forwarded
        // into the job being resumed, same as for a fresh launch.
        signal::clear_interactive_pending();
        // SIGCONT is sent inside put_in_foreground, after the terminal
        // handoff, so a stopped job resumes into the foreground.
        self.foreground(ctx, job_id, true)
    }

    fn bg_cmd(&mut self, ctx: &Context) -> Result<()> {
        let target = self.jobs.find_recent(|j| j.state == JobState::Stopped);
        let Some(job_id) = target else {
            ctx.write_stdout("bg: no stopped jobs")?;
            return Ok(());
        };

        if let Some(job) = self.jobs.get_mut(job_id) {
            if let Some(pgid) = job.pgid {
                debug!("📡 SIGNAL: sending SIGCONT to pgid {} (bg)", pgid);
                killpg(pgid, Signal::SIGCONT)?;
            }
            ctx.write_stdout(&job.cmd.clone())?;
            job.state = JobState::Background;
        }
        Ok(())
    }
}

impl ShellProxy for Shell {
    fn exit_shell(&mut self) {
        self.exited = Some(0);
    }

    fn dispatch(&mut self, ctx: &Context, cmd: &str, _argv: Vec<String>) -> Result<()> {
        // Job-control builtins operate purely through the job table's
        // contract; this is the only road in.
        let mut ctx = ctx.clone();
        match cmd {
            "jobs" => self.jobs_cmd(&ctx),
            "fg" => self.fg_cmd(&mut ctx),
            "bg" => self.bg_cmd(&ctx),
            _ => Err(anyhow!("unknown command: {}", cmd)),
        }
    }

    fn changepwd(&mut self, path: &str) -> Result<()> {
        std::env::set_current_dir(path)
            .map_err(|err| anyhow!("{}", err))
    }
}
