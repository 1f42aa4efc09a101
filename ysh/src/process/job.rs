use nix::unistd::Pid;
use tracing::debug;

use super::state::JobState;

/// One command line's execution unit: a pipeline tracked as a whole.
///
/// `pgid` is set to the first forked stage's pid (the group leader) and is
/// never changed afterwards. `leader_pid` is the pid whose exit or stop
/// defines the job's terminal state; `pids` holds every stage member so the
/// SIGCHLD sweep can resolve any of them back to this job.
#[derive(Debug)]
pub struct Job {
    pub job_id: usize,
    pub cmd: String,
    pub pgid: Option<Pid>,
    pub leader_pid: Option<Pid>,
    pub pids: Vec<Pid>,
    pub state: JobState,
}

impl Job {
    pub fn new(job_id: usize, cmd: String) -> Self {
        Job {
            job_id,
            cmd,
            pgid: None,
            leader_pid: None,
            pids: Vec::new(),
            state: JobState::Running,
        }
    }

    /// Records a freshly forked stage member. The first pid becomes both
    /// the group leader and the pid the foreground wait targets.
    pub fn add_pid(&mut self, pid: Pid) {
        if self.pgid.is_none() {
            self.pgid = Some(pid);
            self.leader_pid = Some(pid);
            debug!("job {} pgid set to {}", self.job_id, pid);
        }
        self.pids.push(pid);
    }

    pub fn owns_pid(&self, pid: Pid) -> bool {
        self.pids.contains(&pid)
    }
}

/// Registry of in-flight jobs, insertion-ordered most-recent first (the
/// order `jobs` displays). Owned exclusively by the main loop: signal
/// handlers never see this structure, so insert/remove never race a
/// handler (see process::signal).
#[derive(Debug, Default)]
pub struct JobTable {
    jobs: Vec<Job>,
    next_job_id: usize,
}

impl JobTable {
    pub fn new() -> Self {
        JobTable {
            jobs: Vec::new(),
            next_job_id: 1,
        }
    }

    /// Inserts a new Running job and returns its id. Called before any
    /// forking for the line, so pid lookups during the fork loop always
    /// find a record.
    pub fn create(&mut self, cmd: &str) -> usize {
        let job_id = self.next_job_id;
        self.next_job_id += 1;
        debug!("create job {} cmd: '{}'", job_id, cmd);
        self.jobs.insert(0, Job::new(job_id, cmd.to_string()));
        job_id
    }

    pub fn get(&self, job_id: usize) -> Option<&Job> {
        self.jobs.iter().find(|j| j.job_id == job_id)
    }

    pub fn get_mut(&mut self, job_id: usize) -> Option<&mut Job> {
        self.jobs.iter_mut().find(|j| j.job_id == job_id)
    }

    /// Resolves any pipeline member pid to its owning job.
    pub fn find_by_pid_mut(&mut self, pid: Pid) -> Option<&mut Job> {
        self.jobs.iter_mut().find(|j| j.owns_pid(pid))
    }

    /// Applies a state transition. Terminal states stick: a late stop or
    /// continue notification for an already-Done job is ignored.
    pub fn set_state(&mut self, job_id: usize, state: JobState) {
        if let Some(job) = self.get_mut(job_id) {
            if job.state.is_terminal() {
                debug!(
                    "job {} already {:?}, ignoring transition to {:?}",
                    job_id, job.state, state
                );
                return;
            }
            debug!("job {} state {:?} -> {:?}", job_id, job.state, state);
            job.state = state;
        }
    }

    /// Unlinks and releases a job. A no-op when the id is absent, so the
    /// reconciliation pass can call it unconditionally.
    pub fn remove(&mut self, job_id: usize) {
        if let Some(pos) = self.jobs.iter().position(|j| j.job_id == job_id) {
            debug!("remove job {}", job_id);
            self.jobs.remove(pos);
        }
    }

    /// Most-recent first, the `jobs` display order.
    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        self.jobs.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Drains every Done/Killed job, preserving display order. Used once
    /// per prompt cycle to report and forget finished background jobs.
    pub fn take_terminal(&mut self) -> Vec<Job> {
        let mut terminal = Vec::new();
        let mut i = 0;
        while i < self.jobs.len() {
            if self.jobs[i].state.is_terminal() {
                terminal.push(self.jobs.remove(i));
            } else {
                i += 1;
            }
        }
        terminal
    }

    /// Most recent job matching `pred`, for `fg`/`bg` target selection.
    pub fn find_recent(&self, pred: impl Fn(&Job) -> bool) -> Option<usize> {
        self.jobs.iter().find(|j| pred(j)).map(|j| j.job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_ids_are_monotone_and_unique_while_live() {
        let mut table = JobTable::new();
        let a = table.create("sleep 1");
        let b = table.create("sleep 2");
        assert!(b > a);
        table.remove(a);
        let c = table.create("sleep 3");
        assert!(c > b, "ids are never reused while later jobs exist");
    }

    #[test]
    fn create_before_fork_then_lookup_by_pid() {
        let mut table = JobTable::new();
        let id = table.create("cat | sort");
        // Simulates the fork loop filling in pids after insertion.
        let job = table.get_mut(id).unwrap();
        job.add_pid(Pid::from_raw(100));
        job.add_pid(Pid::from_raw(101));
        assert_eq!(job.pgid, Some(Pid::from_raw(100)));
        assert_eq!(job.leader_pid, Some(Pid::from_raw(100)));

        // Every pipeline member resolves to the job, not only the leader.
        assert_eq!(
            table.find_by_pid_mut(Pid::from_raw(101)).unwrap().job_id,
            id
        );
        assert!(table.find_by_pid_mut(Pid::from_raw(999)).is_none());
    }

    #[test]
    fn pgid_immutable_once_set() {
        let mut job = Job::new(1, "a | b | c".to_string());
        job.add_pid(Pid::from_raw(10));
        job.add_pid(Pid::from_raw(11));
        job.add_pid(Pid::from_raw(12));
        assert_eq!(job.pgid, Some(Pid::from_raw(10)));
        assert_eq!(job.pids.len(), 3);
    }

    #[test]
    fn remove_is_idempotent() {
        let mut table = JobTable::new();
        let id = table.create("true");
        table.remove(id);
        table.remove(id);
        assert!(table.get(id).is_none());
    }

    #[test]
    fn terminal_states_stick() {
        let mut table = JobTable::new();
        let id = table.create("sleep 5 &");
        table.set_state(id, JobState::Done);
        table.set_state(id, JobState::Running);
        assert_eq!(table.get(id).unwrap().state, JobState::Done);
    }

    #[test]
    fn display_order_is_most_recent_first() {
        let mut table = JobTable::new();
        table.create("first");
        table.create("second");
        let cmds: Vec<&str> = table.iter().map(|j| j.cmd.as_str()).collect();
        assert_eq!(cmds, vec!["second", "first"]);
    }

    #[test]
    fn take_terminal_drains_only_done_and_killed() {
        let mut table = JobTable::new();
        let a = table.create("sleep 9 &");
        let b = table.create("cat");
        let c = table.create("vi");
        table.set_state(a, JobState::Background);
        table.set_state(b, JobState::Done);
        table.set_state(c, JobState::Killed);

        let gone = table.take_terminal();
        let ids: Vec<usize> = gone.iter().map(|j| j.job_id).collect();
        assert_eq!(ids, vec![c, b]);
        assert!(table.get(a).is_some());
        assert!(table.take_terminal().is_empty());
    }

    #[test]
    fn find_recent_picks_newest_match() {
        let mut table = JobTable::new();
        let a = table.create("old");
        let b = table.create("new");
        table.set_state(a, JobState::Stopped);
        table.set_state(b, JobState::Stopped);
        let found = table.find_recent(|j| j.state == JobState::Stopped);
        assert_eq!(found, Some(b));
    }
}
