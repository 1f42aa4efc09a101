pub mod job;
pub mod launch;
pub mod redirect;
pub mod signal;
pub mod stage;
pub mod state;
pub mod wait;

pub use job::{Job, JobTable};
pub use stage::Stage;
pub use state::JobState;
