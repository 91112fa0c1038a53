mod bindings;
mod cli;
mod run;

use anyhow::Result;
use cli::Command;

fn main() -> Result<()> {
    let cli = cli::parse();
    run::initialise_tracing();

    match cli.command {
        Command::Capture(args) => run::capture(args),
        Command::Config(args) => run::print_config(args),
    }
}
