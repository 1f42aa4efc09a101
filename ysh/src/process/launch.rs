use anyhow::Result;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::{ForkResult, fork, pipe, setpgid};
use nix::unistd::close;
use std::os::unix::io::RawFd;
use tracing::{debug, error};

use super::job::Job;
use super::stage::Stage;
use ysh_types::{Context, YshError};

/// Forks and wires one pipeline. For N stages, N-1 pipe pairs are created
/// up front: stage i writes into pipe i, stage i+1 reads from it. The job
/// record must already be in the table (pid bookkeeping happens through
/// it); on any pipe/fork failure the whole launch is aborted and the
/// caller must drop the job, so a half-built pipeline is never left
/// Running.
pub fn launch_pipeline(ctx: &Context, stages: &mut [Stage], job: &mut Job) -> Result<()> {
    let n = stages.len();
    debug!("🍴 FORK: launching job {} with {} stage(s)", job.job_id, n);

    let mut pipes: Vec<(RawFd, RawFd)> = Vec::with_capacity(n.saturating_sub(1));
    for _ in 1..n {
        match pipe() {
            Ok(pair) => pipes.push(pair),
            Err(err) => {
                close_pipe_fds(&pipes);
                return Err(YshError::Launch(format!("pipe failed: {err}")).into());
            }
        }
    }

    // Pipe bindings first; per-stage redirections may override them later,
    // in the child, just before exec.
    for i in 0..n {
        stages[i].stdin = if i > 0 { pipes[i - 1].0 } else { ctx.infile };
        stages[i].stdout = if i < n - 1 { pipes[i].1 } else { ctx.outfile };
        stages[i].stderr = ctx.errfile;
    }

    for i in 0..n {
        match unsafe { fork() } {
            Err(err) => {
                error!("🍴 FORK: fork failed for stage {}: {}", i, err);
                abort_launch(job, &pipes);
                return Err(YshError::Launch(format!("fork failed: {err}")).into());
            }
            Ok(ForkResult::Child) => {
                // Keeps only this stage's pipe ends; everything else must
                // be closed or downstream readers hang waiting for EOF.
                let other_fds = other_pipe_fds(&pipes, i, n);
                stages[i].exec(ctx, job.pgid, &other_fds);
            }
            Ok(ForkResult::Parent { child }) => {
                debug!("🍴 FORK: stage {} '{}' pid {}", i, stages[i].cmd, child);
                stages[i].pid = Some(child);
                // First child becomes the group leader; pgid is fixed from
                // then on so the pipeline can be signaled as a unit.
                job.add_pid(child);

                if ctx.interactive {
                    let pgid = job.pgid.unwrap_or(child);
                    if let Err(err) = setpgid(child, pgid) {
                        // EACCES means the child already exec'd after
                        // joining the group itself; anything else is loud.
                        debug!("🔧 PGID: setpgid {} -> {} failed: {}", child, pgid, err);
                    }
                }
            }
        }
    }

    // Pipe accounting: the parent holds no pipe ends once forking is done.
    close_pipe_fds(&pipes);
    Ok(())
}

fn other_pipe_fds(pipes: &[(RawFd, RawFd)], stage_index: usize, stage_count: usize) -> Vec<RawFd> {
    let mut fds = Vec::with_capacity(pipes.len() * 2);
    for (j, (read_end, write_end)) in pipes.iter().enumerate() {
        let keeps_read = stage_index > 0 && j == stage_index - 1;
        let keeps_write = stage_index < stage_count - 1 && j == stage_index;
        if !keeps_read {
            fds.push(*read_end);
        }
        if !keeps_write {
            fds.push(*write_end);
        }
    }
    fds
}

fn close_pipe_fds(pipes: &[(RawFd, RawFd)]) {
    for (read_end, write_end) in pipes {
        let _ = close(*read_end);
        let _ = close(*write_end);
    }
}

/// Fork failure mid-pipeline: stop forking, sweep away anything already
/// running, and release the pipe fds. The caller unregisters the job.
fn abort_launch(job: &Job, pipes: &[(RawFd, RawFd)]) {
    if let Some(pgid) = job.pgid {
        debug!("🍴 FORK: aborting launch, killing pgid {}", pgid);
        let _ = killpg(pgid, Signal::SIGKILL);
    }
    close_pipe_fds(pipes);
}
