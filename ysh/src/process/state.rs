/// Lifecycle of one job. `Done` and `Killed` are terminal; the only
/// non-monotone transitions are `Stopped -> Running` (fg/bg + SIGCONT) and
/// `Running -> Stopped` (SIGTSTP).
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum JobState {
    Running,
    Stopped,
    Background,
    Done,
    Killed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Killed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            JobState::Running | JobState::Background => formatter.write_str("Running"),
            JobState::Stopped => formatter.write_str("Stopped"),
            JobState::Done => formatter.write_str("Done"),
            JobState::Killed => formatter.write_str("Killed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_jobs_output() {
        assert_eq!(JobState::Running.to_string(), "Running");
        assert_eq!(JobState::Background.to_string(), "Running");
        assert_eq!(JobState::Stopped.to_string(), "Stopped");
        assert_eq!(JobState::Done.to_string(), "Done");
    }

    #[test]
    fn terminal_states() {
        assert!(JobState::Done.is_terminal());
        assert!(JobState::Killed.is_terminal());
        assert!(!JobState::Running.is_terminal());
        assert!(!JobState::Stopped.is_terminal());
        assert!(!JobState::Background.is_terminal());
    }
}
