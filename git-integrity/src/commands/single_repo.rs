//! `single-repo` command.

use std::time::Instant;

use git_integrity_opts::SingleRepoArgs;
use lib::audit::report::store_report;
use lib::audit::{audit_repository, AuditOptions};
use lib::git::GitRunInfo;
use lib::github::GithubClient;
use tracing::{info, instrument};

use super::{install_tracing, parse_owner_and_repo};

/// Analyze a single repository and write its result to `result.json` in the
/// output directory.
#[instrument(skip(args))]
pub fn command_main(args: SingleRepoArgs) -> eyre::Result<()> {
    let SingleRepoArgs {
        owner_and_repo,
        token,
        branch,
        clone_target,
        out,
        log_level,
    } = args;
    install_tracing(&log_level)?;
    let start = Instant::now();

    let (owner, name) = parse_owner_and_repo(&owner_and_repo)?;
    let client = GithubClient::new(token);
    let git_run_info = GitRunInfo::from_environment();
    let options = AuditOptions {
        branch,
        clone_target,
        ..Default::default()
    };

    let report = audit_repository(
        &client,
        &git_run_info,
        &owner,
        &name,
        |branch| client.merged_pull_requests(&owner, &name, branch),
        &options,
    )?;

    let out_dir = match out {
        Some(out) => out,
        None => std::env::current_dir()?,
    };
    std::fs::create_dir_all(&out_dir)?;
    let out_path = out_dir.join("result.json");
    store_report(&out_path, &report)?;

    info!(elapsed = ?start.elapsed(), path = ?out_path, "execution finished");
    Ok(())
}
