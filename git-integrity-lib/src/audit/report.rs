//! The per-repository result record written as a JSON artifact, and the batch
//! input format consumed by the multi-repo driver.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use eyre::Context;
use serde::{Deserialize, Serialize};

use crate::git::Commit;
use crate::github::BranchProtection;

/// The result of auditing one repository.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RepoReport {
    /// The branch that was analyzed.
    #[serde(rename = "Branch")]
    pub branch: String,

    /// Hash of the branch tip at analysis time.
    #[serde(rename = "Head")]
    pub head: String,

    /// URL the repository was cloned from.
    #[serde(rename = "Url")]
    pub url: String,

    /// Number of force-push events recorded on the branch by the forge.
    #[serde(rename = "NumberForcePushes")]
    pub number_force_pushes: usize,

    /// Summary statistics.
    #[serde(rename = "Stats")]
    pub stats: Stats,

    /// The branch protection posture, when the forge reported one.
    #[serde(
        rename = "BranchProtection",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub branch_protection: Option<BranchProtection>,

    /// Commits reachable on the branch which are not attributed to any merged
    /// pull request.
    #[serde(rename = "CommitsWithoutPR")]
    pub commits_without_pr: Vec<Commit>,

    /// Commits whose signature status is `N` (none) or `B` (bad).
    #[serde(rename = "UnsignedCommits")]
    pub unsigned_commits: Vec<Commit>,
}

/// Summary statistics for one audited repository.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Stats {
    /// Number of commits enumerated on the branch.
    #[serde(rename = "NumberCommits")]
    pub number_commits: usize,

    /// Number of merged pull requests processed.
    #[serde(rename = "NumberPRs")]
    pub number_prs: usize,

    /// Languages detected in the repository.
    #[serde(rename = "Languages")]
    pub languages: Vec<String>,

    /// Stargazer count.
    #[serde(rename = "Stars")]
    pub stars: u64,
}

/// The batch input file for the multi-repo driver. Extra fields are ignored.
#[derive(Debug, Deserialize)]
pub struct BatchInput {
    /// Top-level data envelope.
    pub data: BatchData,
}

/// The `data` envelope of the batch input file.
#[derive(Debug, Deserialize)]
pub struct BatchData {
    /// The search results listing repositories.
    pub search: BatchSearch,
}

/// The `search` envelope of the batch input file.
#[derive(Debug, Deserialize)]
pub struct BatchSearch {
    /// One node per repository to audit.
    pub nodes: Vec<BatchRepo>,
}

/// One repository listed in the batch input file.
#[derive(Debug, Deserialize)]
pub struct BatchRepo {
    /// The repository identified as `owner/repo`.
    #[serde(rename = "nameWithOwner")]
    pub name_with_owner: String,

    /// Stargazer count at the time the input file was produced.
    #[serde(rename = "stargazerCount", default)]
    pub stars: u64,

    /// The repository's home URL.
    #[serde(default)]
    pub url: String,
}

/// The file name under which a repository's result is stored.
pub fn result_file_name(owner: &str, name: &str) -> String {
    format!("{owner}{name}-result.json")
}

/// Write a report to the provided path as JSON.
pub fn store_report(path: &Path, report: &RepoReport) -> eyre::Result<()> {
    let file = File::create(path).wrap_err_with(|| format!("Creating result file {path:?}"))?;
    serde_json::to_writer(BufWriter::new(file), report)
        .wrap_err_with(|| format!("Writing result file {path:?}"))?;
    Ok(())
}

/// Read and decode a batch input file.
pub fn load_batch_input(path: &Path) -> eyre::Result<BatchInput> {
    let file = File::open(path).wrap_err_with(|| format!("Opening batch input file {path:?}"))?;
    let input = serde_json::from_reader(std::io::BufReader::new(file))
        .wrap_err_with(|| format!("Decoding batch input file {path:?}"))?;
    Ok(input)
}
