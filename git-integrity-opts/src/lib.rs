//! The command-line options for `git-integrity`.

#![warn(missing_docs)]
#![warn(
    clippy::all,
    clippy::as_conversions,
    clippy::clone_on_ref_ptr,
    clippy::dbg_macro
)]

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Audit the supply-chain integrity of hosted Git repositories: find the
/// commits which reached a branch without going through a merged pull
/// request, along with unsigned commits, force-push activity, and the branch
/// protection posture.
#[derive(Debug, Parser)]
#[clap(version, about)]
pub struct Opts {
    /// The subcommand to run.
    #[clap(subcommand)]
    pub command: Command,
}

/// The subcommands of `git-integrity`.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Analyze a single repository and write one result file.
    SingleRepo(SingleRepoArgs),

    /// Analyze every repository listed in a batch input file.
    MultiRepo(MultiRepoArgs),
}

/// Options for analyzing a single repository.
#[derive(Args, Debug)]
pub struct SingleRepoArgs {
    /// The repository to analyze, as `owner/repo`.
    #[clap(long = "ownerAndRepo")]
    pub owner_and_repo: String,

    /// The GitHub access token to use. Falls back to the `GH_TOKEN`
    /// environment variable.
    #[clap(long = "token", env = "GH_TOKEN", hide_env_values = true)]
    pub token: String,

    /// The branch to analyze. Defaults to the default branch of the
    /// repository.
    #[clap(long = "branch")]
    pub branch: Option<String>,

    /// The directory to clone into. Defaults to a directory under the system
    /// temporary directory. The directory is removed once the analysis
    /// finishes.
    #[clap(long = "cloneTarget")]
    pub clone_target: Option<PathBuf>,

    /// The directory to which the output is written. Defaults to the current
    /// working directory.
    #[clap(long = "out")]
    pub out: Option<PathBuf>,

    /// The log level: one of `error`, `warn`, `info`, `debug`, or `trace`.
    #[clap(long = "logLevel", default_value = "info")]
    pub log_level: String,
}

/// Options for analyzing a batch of repositories.
#[derive(Args, Debug)]
pub struct MultiRepoArgs {
    /// The batch input file listing the repositories to analyze.
    #[clap(long = "in")]
    pub input: PathBuf,

    /// The GitHub access token to use. Falls back to the `GH_TOKEN`
    /// environment variable.
    #[clap(long = "token", env = "GH_TOKEN", hide_env_values = true)]
    pub token: String,

    /// The directory to clone into. Defaults to a directory under the system
    /// temporary directory. Clones are removed once each analysis finishes.
    #[clap(long = "cloneTarget")]
    pub clone_target: Option<PathBuf>,

    /// The directory to which the result files are written. Defaults to the
    /// current working directory.
    #[clap(long = "out")]
    pub out: Option<PathBuf>,

    /// Ignore commits that predate the first merged pull request of the
    /// analyzed branch.
    #[clap(action, long = "ignore")]
    pub ignore: bool,

    /// The log level: one of `error`, `warn`, `info`, `debug`, or `trace`.
    #[clap(long = "logLevel", default_value = "info")]
    pub log_level: String,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_verify_command_structure() {
        Opts::command().debug_assert();
    }

    #[test]
    fn test_parse_single_repo_args() {
        let opts = Opts::parse_from([
            "git-integrity",
            "single-repo",
            "--ownerAndRepo",
            "octocat/example",
            "--token",
            "token123",
            "--branch",
            "main",
        ]);
        match opts.command {
            Command::SingleRepo(args) => {
                assert_eq!(args.owner_and_repo, "octocat/example");
                assert_eq!(args.token, "token123");
                assert_eq!(args.branch.as_deref(), Some("main"));
                assert_eq!(args.log_level, "info");
            }
            Command::MultiRepo(_) => panic!("expected single-repo"),
        }
    }

    #[test]
    fn test_parse_multi_repo_args() {
        let opts = Opts::parse_from([
            "git-integrity",
            "multi-repo",
            "--in",
            "repos.json",
            "--token",
            "token123",
            "--ignore",
        ]);
        match opts.command {
            Command::MultiRepo(args) => {
                assert_eq!(args.input, PathBuf::from("repos.json"));
                assert!(args.ignore);
                assert_eq!(args.out, None);
            }
            Command::SingleRepo(_) => panic!("expected multi-repo"),
        }
    }
}
