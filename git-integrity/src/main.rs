use clap::Parser;
use git_integrity::commands;
use git_integrity_opts::{Command, Opts};

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let opts = Opts::parse();
    match opts.command {
        Command::SingleRepo(args) => commands::single_repo::command_main(args),
        Command::MultiRepo(args) => commands::multi_repo::command_main(args),
    }
}
