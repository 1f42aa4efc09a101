use super::ShellProxy;
use ysh_types::{Context, ExitStatus};

pub fn command(ctx: &Context, _argv: Vec<String>, _proxy: &mut dyn ShellProxy) -> ExitStatus {
    ctx.write_stdout("ysh - a small job-control shell").ok();
    ctx.write_stdout("builtin commands:").ok();
    for name in super::command_names() {
        ctx.write_stdout(&format!("  {name}")).ok();
    }
    ctx.write_stdout("external commands run as pipelines: cmd [args] [| cmd ...] [< f] [> f] [2> f] [2>&1] [&]")
        .ok();
    ExitStatus::ExitedWith(0)
}
