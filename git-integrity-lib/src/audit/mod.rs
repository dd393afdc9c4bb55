//! The attribution engine: reconciles the first-parent history of a branch
//! with the merged pull requests reported by the forge, producing the set of
//! commits which reached the branch without going through a pull request.
//!
//! Commits are matched across the branch and pull-request identity domains by
//! stable patch id, so that squash merges, rebase merges, and cherry-picks
//! are attributed even though they rewrite the commit hash. Commits with no
//! usable patch id (notably merge commits) are keyed by their own hash.

pub mod report;

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use eyre::Context;
use tracing::{debug, info, instrument, warn};

use crate::core::patch_id_cache::{PatchIdCache, DEFAULT_CACHE_CAPACITY};
use crate::core::task::{dispatch_batches, DispatchOptions};
use crate::git::{Commit, GitRunInfo, Repo};
use crate::github::{BranchProtection, GithubClient, PullRequest, RepoInfo};

use report::{RepoReport, Stats};

/// The forge-side lookups the audit consumes. Implemented by
/// [`GithubClient`]; test implementations substitute canned data.
pub trait Forge {
    /// Fetch the repository's clone URL, default branch, star count, and
    /// language list.
    fn get_repo_info(&self, owner: &str, name: &str) -> eyre::Result<RepoInfo>;

    /// Count the force-push events recorded on the branch.
    fn get_force_push_count(&self, owner: &str, name: &str, branch: &str) -> eyre::Result<usize>;

    /// Read the branch protection posture of the branch.
    fn get_branch_protection(
        &self,
        owner: &str,
        name: &str,
        branch: &str,
    ) -> eyre::Result<BranchProtection>;
}

impl Forge for GithubClient {
    fn get_repo_info(&self, owner: &str, name: &str) -> eyre::Result<RepoInfo> {
        self.get_repo_info(owner, name)
    }

    fn get_force_push_count(&self, owner: &str, name: &str, branch: &str) -> eyre::Result<usize> {
        self.get_force_push_count(owner, name, branch)
    }

    fn get_branch_protection(
        &self,
        owner: &str,
        name: &str,
        branch: &str,
    ) -> eyre::Result<BranchProtection> {
        self.get_branch_protection(owner, name, branch)
    }
}

/// Options for [`audit_repository`].
#[derive(Debug)]
pub struct AuditOptions {
    /// The branch to analyze. Defaults to the repository's default branch.
    pub branch: Option<String>,

    /// The directory to clone into. Defaults to a directory under the system
    /// temporary directory. The directory is removed when the audit finishes.
    pub clone_target: Option<PathBuf>,

    /// If set, commits whose date precedes the merge time of the earliest
    /// observed pull request are dropped from the result. The comparison is
    /// byte-lexicographic between the commit's ISO-8601 date (with zone) and
    /// the pull request's ISO-8601 UTC merge time, so commits with unusual
    /// timezone offsets may sort incorrectly near the boundary.
    pub ignore_commits_before_first_pr: bool,

    /// Maximum number of entries held by the patch id cache.
    pub cache_capacity: usize,

    /// Worker pool and batching configuration.
    pub dispatch: DispatchOptions,
}

impl Default for AuditOptions {
    fn default() -> Self {
        AuditOptions {
            branch: None,
            clone_target: None,
            ignore_commits_before_first_pr: false,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            dispatch: Default::default(),
        }
    }
}

/// The pull request number and merge timestamp used to find the earliest
/// merged pull request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PrStamp {
    /// The pull request number.
    pub number: u64,

    /// When the pull request was merged, in ISO-8601 UTC.
    pub merged_at: String,
}

/// The patch ids attributed to one batch of pull requests.
#[derive(Debug, Default)]
pub struct WorkerResult {
    /// One entry per commit found in a pull request range or merge commit,
    /// with the commit hash substituted for commits with no usable patch id.
    pub patch_ids: Vec<String>,

    /// Number of pull requests in the batch.
    pub pr_count: usize,

    /// The pull request in the batch with the smallest merge timestamp. Only
    /// tracked when the ignore-first mode is on.
    pub oldest_pr: Option<PrStamp>,
}

/// Resolve a commit's patch id through the cache, substituting the commit
/// hash itself when the computation fails or produces nothing.
fn patch_id_or_fallback(repo: &Repo, cache: &PatchIdCache, oid: &str) -> String {
    match cache.lookup_or_compute(repo, oid) {
        Ok(patch_id) if !patch_id.is_empty() => patch_id,
        Ok(_) => {
            debug!(%oid, "empty patch id; falling back to the commit hash");
            oid.to_string()
        }
        Err(err) => {
            warn!(%oid, %err, "patch id lookup failed; falling back to the commit hash");
            oid.to_string()
        }
    }
}

/// Transform a batch of pull requests into the patch ids attributed to them.
///
/// The refs of the whole batch are fetched in a single subprocess call, then
/// each pull request contributes the commits of its `base..head` range plus
/// its merge commit. Workers are stateless apart from the shared repository
/// and cache, so overlapping pull requests across batches are safe.
#[instrument(skip(repo, cache, batch), fields(num_prs = batch.len()))]
pub fn process_pr_batch(
    repo: &Repo,
    cache: &PatchIdCache,
    batch: &[PullRequest],
    track_oldest: bool,
) -> eyre::Result<WorkerResult> {
    if batch.is_empty() {
        return Ok(WorkerResult::default());
    }

    let pr_numbers: Vec<u64> = batch.iter().map(|pull_request| pull_request.number).collect();
    repo.fetch_pr_refs(&pr_numbers)?;

    let mut result = WorkerResult {
        pr_count: batch.len(),
        ..Default::default()
    };
    for pull_request in batch {
        debug!(
            number = pull_request.number,
            base = %pull_request.base_ref_oid,
            head = %pull_request.head_ref_oid,
            "processing pull request"
        );
        let mut oids =
            match repo.commits_between(&pull_request.base_ref_oid, &pull_request.head_ref_oid) {
                Ok(oids) => oids,
                Err(err) => {
                    warn!(
                        number = pull_request.number,
                        %err,
                        "could not list pull request range"
                    );
                    Vec::new()
                }
            };
        // The merge commit is attributed as well; a squash or rebase merge
        // produces a commit whose patch id matches no commit in the range.
        if let Some(merge_commit) = &pull_request.merge_commit {
            oids.push(merge_commit.oid.clone());
        }
        for oid in oids {
            result.patch_ids.push(patch_id_or_fallback(repo, cache, &oid));
        }

        if track_oldest && !pull_request.merged_at.is_empty() {
            let stamp = PrStamp {
                number: pull_request.number,
                merged_at: pull_request.merged_at.clone(),
            };
            result.oldest_pr = match result.oldest_pr.take() {
                Some(existing) if existing.merged_at <= stamp.merged_at => Some(existing),
                _ => Some(stamp),
            };
        }
    }
    Ok(result)
}

/// Removes the clone directory when the audit scope exits.
struct CloneDirGuard {
    path: PathBuf,
}

impl Drop for CloneDirGuard {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_dir_all(&self.path) {
            warn!(path = ?self.path, %err, "could not remove clone directory");
        }
    }
}

/// Audit one repository: clone it, enumerate the branch, attribute every
/// merged pull request, and report the remaining commits.
///
/// `pull_requests` is invoked once with the resolved branch name and must
/// return the sequence of merged pull requests for that branch.
///
/// Metadata lookup, cloning, and branch enumeration failures abort the audit;
/// every other failure degrades (see the individual operations).
#[instrument(skip(forge, git_run_info, pull_requests, options))]
pub fn audit_repository<I: Iterator<Item = PullRequest> + Send>(
    forge: &impl Forge,
    git_run_info: &GitRunInfo,
    owner: &str,
    name: &str,
    pull_requests: impl FnOnce(&str) -> I,
    options: &AuditOptions,
) -> eyre::Result<RepoReport> {
    let start = Instant::now();

    let repo_info = forge.get_repo_info(owner, name)?;
    let branch = options
        .branch
        .clone()
        .unwrap_or_else(|| repo_info.default_branch.clone());
    info!(owner, name, branch = %branch, "started repository audit");

    let clone_path = match &options.clone_target {
        Some(clone_target) => clone_target.clone(),
        None => std::env::temp_dir().join("git-integrity").join(name),
    };
    fs::create_dir_all(&clone_path)
        .wrap_err_with(|| format!("Creating clone directory {clone_path:?}"))?;
    let _clone_guard = CloneDirGuard {
        path: clone_path.clone(),
    };
    let repo = Repo::clone_bare(git_run_info.clone(), &repo_info.clone_url, &clone_path)?;

    let timer = Instant::now();
    let commits = repo.branch_commits(&branch)?;
    let number_commits = commits.len();
    let cache = PatchIdCache::new(options.cache_capacity);
    let mut patch_id_to_commit: HashMap<String, Commit> = HashMap::with_capacity(commits.len());
    let mut unsigned_commits = Vec::new();
    for commit in commits {
        if commit.sign_status.is_unsigned() {
            unsigned_commits.push(commit.clone());
        }
        let patch_id = patch_id_or_fallback(&repo, &cache, &commit.oid);
        patch_id_to_commit.insert(patch_id, commit);
    }
    info!(
        elapsed = ?timer.elapsed(),
        commits = number_commits,
        "enumerated branch commits"
    );

    let timer = Instant::now();
    let track_oldest = options.ignore_commits_before_first_pr;
    let mut number_prs = 0usize;
    let mut first_pr: Option<PrStamp> = None;
    dispatch_batches(
        pull_requests(&branch),
        |batch: &[PullRequest]| process_pr_batch(&repo, &cache, batch, track_oldest),
        |results: Vec<WorkerResult>| {
            for result in results {
                number_prs += result.pr_count;
                for patch_id in &result.patch_ids {
                    patch_id_to_commit.remove(patch_id);
                }
                if let Some(stamp) = result.oldest_pr {
                    first_pr = match first_pr.take() {
                        Some(existing) if existing.merged_at <= stamp.merged_at => Some(existing),
                        _ => Some(stamp),
                    };
                }
            }
            Ok(())
        },
        &options.dispatch,
    )?;
    info!(
        elapsed = ?timer.elapsed(),
        prs = number_prs,
        remaining_commits = patch_id_to_commit.len(),
        "attributed pull requests"
    );

    if options.ignore_commits_before_first_pr {
        if let Some(first_pr) = &first_pr {
            let num_before = patch_id_to_commit.len();
            patch_id_to_commit
                .retain(|_, commit| commit.date.as_str() >= first_pr.merged_at.as_str());
            info!(
                first_pr = first_pr.number,
                merged_at = %first_pr.merged_at,
                removed = num_before - patch_id_to_commit.len(),
                "dropped commits predating the first merged pull request"
            );
        }
    }

    let head = match repo.read_commits(&[branch.as_str()]) {
        Ok(commits) if !commits.is_empty() => commits[0].oid.clone(),
        Ok(_) => {
            warn!(branch = %branch, "could not resolve branch head");
            String::new()
        }
        Err(err) => {
            warn!(branch = %branch, %err, "could not resolve branch head");
            String::new()
        }
    };

    let number_force_pushes = match forge.get_force_push_count(owner, name, &branch) {
        Ok(count) => count,
        Err(err) => {
            warn!(%err, "force push lookup failed; recording zero");
            0
        }
    };
    let branch_protection = match forge.get_branch_protection(owner, name, &branch) {
        Ok(protection) => Some(protection),
        Err(err) => {
            debug!(%err, "branch protection unavailable; omitting");
            None
        }
    };

    let mut commits_without_pr: Vec<Commit> = patch_id_to_commit.into_values().collect();
    commits_without_pr.sort_by(|a, b| b.date.cmp(&a.date).then_with(|| a.oid.cmp(&b.oid)));

    info!(
        elapsed = ?start.elapsed(),
        commits_without_pr = commits_without_pr.len(),
        "finished repository audit"
    );
    Ok(RepoReport {
        branch,
        head,
        url: repo_info.clone_url,
        number_force_pushes,
        stats: Stats {
            number_commits,
            number_prs,
            languages: repo_info.languages,
            stars: repo_info.stars,
        },
        branch_protection,
        commits_without_pr,
        unsigned_commits,
    })
}
