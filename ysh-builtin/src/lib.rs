use anyhow::Result;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;
use ysh_types::{Context, ExitStatus};

mod bg;
pub mod cd;
mod fg;
mod help;
mod jobs;

/// Interface builtin commands use to reach the shell without linking
/// against its internals. Job-control builtins go through `dispatch`;
/// the job table stays behind the shell's own contract.
pub trait ShellProxy {
    /// Initiates shell exit
    fn exit_shell(&mut self);

    /// Hands a command to the shell's own execution logic
    fn dispatch(&mut self, ctx: &Context, cmd: &str, argv: Vec<String>) -> Result<()>;

    /// Changes the current working directory and updates shell state
    fn changepwd(&mut self, path: &str) -> Result<()>;
}

/// All builtin commands conform to this signature
pub type BuiltinCommand =
    fn(ctx: &Context, argv: Vec<String>, proxy: &mut dyn ShellProxy) -> ExitStatus;

pub static BUILTIN_COMMAND: Lazy<Mutex<HashMap<&str, BuiltinCommand>>> = Lazy::new(|| {
    let mut builtin = HashMap::new();

    // Core shell commands
    builtin.insert("exit", exit as BuiltinCommand);
    builtin.insert("cd", cd::command as BuiltinCommand);
    builtin.insert("help", help::command as BuiltinCommand);

    // Job control commands
    builtin.insert("jobs", jobs::command as BuiltinCommand);
    builtin.insert("fg", fg::command as BuiltinCommand);
    builtin.insert("bg", bg::command as BuiltinCommand);

    Mutex::new(builtin)
});

/// Retrieves a builtin command function by name
pub fn get_command(name: &str) -> Option<BuiltinCommand> {
    if let Ok(builtin) = BUILTIN_COMMAND.lock() {
        builtin.get(name).copied()
    } else {
        None
    }
}

/// Names of all registered builtins, for `help` output
pub fn command_names() -> Vec<&'static str> {
    if let Ok(builtin) = BUILTIN_COMMAND.lock() {
        let mut names: Vec<&'static str> = builtin.keys().copied().collect();
        names.sort_unstable();
        names
    } else {
        Vec::new()
    }
}

pub fn exit(_ctx: &Context, _argv: Vec<String>, proxy: &mut dyn ShellProxy) -> ExitStatus {
    debug!("exit command called - initiating normal shell exit");
    proxy.exit_shell();
    ExitStatus::ExitedWith(0)
}
