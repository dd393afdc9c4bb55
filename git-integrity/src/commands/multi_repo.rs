//! `multi-repo` command.

use std::time::Instant;

use git_integrity_opts::MultiRepoArgs;
use lib::audit::report::{load_batch_input, result_file_name, store_report};
use lib::audit::{audit_repository, AuditOptions};
use lib::git::GitRunInfo;
use lib::github::GithubClient;
use tracing::{info, instrument, warn};

use super::{install_tracing, parse_owner_and_repo};

/// Analyze every repository listed in the batch input file, writing one
/// result file per successfully analyzed repository.
///
/// A repository that fails to analyze is counted and skipped; the batch as a
/// whole never aborts because of a single repository.
#[instrument(skip(args))]
pub fn command_main(args: MultiRepoArgs) -> eyre::Result<()> {
    let MultiRepoArgs {
        input,
        token,
        clone_target,
        out,
        ignore,
        log_level,
    } = args;
    install_tracing(&log_level)?;
    let start = Instant::now();

    let batch_input = load_batch_input(&input)?;
    let out_dir = match out {
        Some(out) => out,
        None => std::env::current_dir()?,
    };
    std::fs::create_dir_all(&out_dir)?;

    let client = GithubClient::new(token);
    let git_run_info = GitRunInfo::from_environment();

    let num_repos = batch_input.data.search.nodes.len();
    let mut num_failed = 0usize;
    for node in batch_input.data.search.nodes {
        let (owner, name) = match parse_owner_and_repo(&node.name_with_owner) {
            Ok((owner, name)) => (owner, name),
            Err(err) => {
                warn!(repo = %node.name_with_owner, %err, "skipping malformed batch entry");
                num_failed += 1;
                continue;
            }
        };

        let options = AuditOptions {
            clone_target: clone_target
                .as_ref()
                .map(|clone_target| clone_target.join(&name)),
            ignore_commits_before_first_pr: ignore,
            ..Default::default()
        };
        let report = match audit_repository(
            &client,
            &git_run_info,
            &owner,
            &name,
            |branch| client.merged_pull_requests(&owner, &name, branch),
            &options,
        ) {
            Ok(report) => report,
            Err(err) => {
                warn!(repo = %node.name_with_owner, %err, "repository analysis failed");
                num_failed += 1;
                continue;
            }
        };

        let out_path = out_dir.join(result_file_name(&owner, &name));
        match store_report(&out_path, &report) {
            Ok(()) => {
                info!(repo = %node.name_with_owner, path = ?out_path, "wrote result file");
            }
            Err(err) => {
                warn!(repo = %node.name_with_owner, %err, "could not write result file");
                num_failed += 1;
            }
        }
    }

    info!(
        num_repos,
        num_failed,
        elapsed = ?start.elapsed(),
        "execution finished"
    );
    Ok(())
}
