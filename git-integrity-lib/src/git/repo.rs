//! Operations on a local Git clone, carried out via subprocess invocations.
//! This module exists for a few reasons:
//!
//! - To ensure that every Git operation the audit performs is enumerated in
//!   one place, with a typed error per operation.
//! - To keep the subprocess plumbing (`run.rs`) free of any knowledge about
//!   what the output means.
//! - To parse Git's machine-readable output tolerantly: a malformed record is
//!   never allowed to abort an entire enumeration.

use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::de::Error as _;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::git::run::GitRunInfo;

/// Field separator in the machine-readable commit format (`%x1f`).
const FIELD_SEP: char = '\x1f';

/// Record separator in the machine-readable commit format (`%x1e`).
const RECORD_SEP: char = '\x1e';

/// Pretty format carrying the commit hash, the full message, the committer
/// date in strict ISO-8601 with zone, and the signature status code.
const COMMIT_FORMAT_ARG: &str = "--format=%H%x1f%B%x1f%cI%x1f%G?%x1e";

#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum Error {
    #[error("could not clone {url} into {path:?}: {source}")]
    CloneRepo {
        source: eyre::Error,
        url: String,
        path: PathBuf,
    },

    #[error("could not fetch pull request refs: {0}")]
    FetchPrRefs(#[source] eyre::Error),

    #[error("could not enumerate commits on branch {branch}: {source}")]
    EnumerateBranchCommits {
        source: eyre::Error,
        branch: String,
    },

    #[error("could not list commits between {base} and {head}: {source}")]
    ListCommitRange {
        source: eyre::Error,
        base: String,
        head: String,
    },

    #[error("could not read commit records: {0}")]
    ReadCommits(#[source] eyre::Error),

    #[error("could not compute patch id for {oid}: {source}")]
    ComputePatchId { source: eyre::Error, oid: String },
}

/// The status of a commit's signature as reported by Git's `%G?` placeholder.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SignatureStatus {
    /// `G`: good (valid) signature.
    Good,
    /// `B`: bad signature.
    Bad,
    /// `U`: good signature with unknown validity.
    GoodUnknownValidity,
    /// `X`: good signature that has expired.
    ExpiredSignature,
    /// `Y`: good signature made by an expired key.
    ExpiredKey,
    /// `R`: good signature made by a revoked key.
    RevokedKey,
    /// `E`: signature cannot be checked (e.g. missing key).
    CannotCheck,
    /// `N`: no signature.
    NoSignature,
}

impl SignatureStatus {
    /// Parse a `%G?` status code.
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "G" => Some(Self::Good),
            "B" => Some(Self::Bad),
            "U" => Some(Self::GoodUnknownValidity),
            "X" => Some(Self::ExpiredSignature),
            "Y" => Some(Self::ExpiredKey),
            "R" => Some(Self::RevokedKey),
            "E" => Some(Self::CannotCheck),
            "N" => Some(Self::NoSignature),
            _ => None,
        }
    }

    /// The single-character code as emitted by Git.
    pub fn as_code(&self) -> &'static str {
        match self {
            Self::Good => "G",
            Self::Bad => "B",
            Self::GoodUnknownValidity => "U",
            Self::ExpiredSignature => "X",
            Self::ExpiredKey => "Y",
            Self::RevokedKey => "R",
            Self::CannotCheck => "E",
            Self::NoSignature => "N",
        }
    }

    /// Whether the commit should be reported as unsigned: either it carries no
    /// signature at all, or the signature it carries is bad.
    pub fn is_unsigned(&self) -> bool {
        matches!(self, Self::NoSignature | Self::Bad)
    }
}

impl Serialize for SignatureStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_code())
    }
}

impl<'de> Deserialize<'de> for SignatureStatus {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = String::deserialize(deserializer)?;
        Self::from_code(&code)
            .ok_or_else(|| D::Error::custom(format!("invalid signature status code: {code:?}")))
    }
}

/// A commit record as produced by branch enumeration. Materialized once and
/// never mutated afterwards.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Commit {
    /// The full 40-hex commit hash.
    #[serde(rename = "GitOID")]
    pub oid: String,

    /// The commit subject plus body.
    #[serde(rename = "Message")]
    pub message: String,

    /// The committer date in strict ISO-8601 format with zone, as emitted by
    /// Git's `%cI` placeholder.
    #[serde(rename = "Date")]
    pub date: String,

    /// The signature status reported by Git.
    #[serde(rename = "Signed")]
    pub sign_status: SignatureStatus,
}

/// A bare local clone of the repository under audit. All operations are
/// short-lived `git` subprocess invocations against the clone directory.
#[derive(Debug)]
pub struct Repo {
    run_info: GitRunInfo,
    path: PathBuf,
}

impl Repo {
    /// Make a bare clone of `url` into `path`. The directory must already
    /// exist and be empty; the caller controls its lifetime.
    #[instrument]
    pub fn clone_bare(run_info: GitRunInfo, url: &str, path: &Path) -> Result<Self, Error> {
        let timer = Instant::now();
        run_info
            .run_silent(path, &["clone", "--bare", url, "."])
            .map_err(|source| Error::CloneRepo {
                source,
                url: url.to_string(),
                path: path.to_path_buf(),
            })?;
        info!(elapsed = ?timer.elapsed(), url, "cloned repository");
        Ok(Repo {
            run_info,
            path: path.to_path_buf(),
        })
    }

    /// Open an existing clone directory without cloning.
    pub fn from_existing(run_info: GitRunInfo, path: &Path) -> Self {
        Repo {
            run_info,
            path: path.to_path_buf(),
        }
    }

    /// The clone directory this repository operates on.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn run(&self, args: &[&str]) -> eyre::Result<Vec<u8>> {
        let result = self.run_info.run_silent(&self.path, args)?;
        Ok(result.stdout)
    }

    /// Fetch `refs/pull/<n>/head` for each of the provided pull request
    /// numbers from `origin` in a single subprocess call. An up-to-date ref is
    /// not an error; Git reports it as success.
    #[instrument(skip(pr_numbers), fields(num_prs = pr_numbers.len()))]
    pub fn fetch_pr_refs(&self, pr_numbers: &[u64]) -> Result<(), Error> {
        if pr_numbers.is_empty() {
            return Ok(());
        }
        let timer = Instant::now();
        let refspecs: Vec<String> = pr_numbers
            .iter()
            .map(|number| format!("+refs/pull/{number}/head:refs/pull/{number}/head"))
            .collect();
        let mut args = vec!["fetch", "origin"];
        args.extend(refspecs.iter().map(String::as_str));
        self.run(&args).map_err(Error::FetchPrRefs)?;
        info!(elapsed = ?timer.elapsed(), refs = pr_numbers.len(), "fetched pull request refs");
        Ok(())
    }

    /// Enumerate the commits reachable from `branch` by first-parent
    /// traversal, most recent first.
    #[instrument]
    pub fn branch_commits(&self, branch: &str) -> Result<Vec<Commit>, Error> {
        let stdout = self
            .run(&[
                "log",
                "--first-parent",
                "--no-patch",
                "--expand-tabs",
                COMMIT_FORMAT_ARG,
                branch,
            ])
            .map_err(|source| Error::EnumerateBranchCommits {
                source,
                branch: branch.to_string(),
            })?;
        Ok(parse_commit_records(&String::from_utf8_lossy(&stdout)))
    }

    /// List the hashes of commits reachable from `head` but not from `base`
    /// (the two-dot range `base..head`).
    #[instrument]
    pub fn commits_between(&self, base: &str, head: &str) -> Result<Vec<String>, Error> {
        let stdout = self
            .run(&["rev-list", &format!("{base}..{head}")])
            .map_err(|source| Error::ListCommitRange {
                source,
                base: base.to_string(),
                head: head.to_string(),
            })?;
        Ok(String::from_utf8_lossy(&stdout)
            .lines()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .collect())
    }

    /// Read the commit records for the provided commit hashes or ref names,
    /// without walking their ancestry.
    #[instrument]
    pub fn read_commits(&self, ids: &[&str]) -> Result<Vec<Commit>, Error> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut args = vec![
            "log",
            "--no-walk",
            "--no-patch",
            "--expand-tabs",
            COMMIT_FORMAT_ARG,
        ];
        args.extend(ids);
        let stdout = self.run(&args).map_err(Error::ReadCommits)?;
        Ok(parse_commit_records(&String::from_utf8_lossy(&stdout)))
    }

    /// Compute the stable patch id of a commit by piping its patch text
    /// through `git patch-id --stable`. Returns the empty string when the
    /// pipeline produces no usable output, which is the common case for merge
    /// commits; callers substitute the commit hash itself in that case.
    #[instrument]
    pub fn patch_id(&self, oid: &str) -> Result<String, Error> {
        let result = self
            .run_info
            .run_piped(&self.path, &["show", oid], &["patch-id", "--stable"])
            .map_err(|source| Error::ComputePatchId {
                source,
                oid: oid.to_string(),
            })?;
        if result.exit_code != 0 {
            warn!(%oid, ?result, "patch id pipeline failed");
            return Ok(String::new());
        }
        let stdout = String::from_utf8_lossy(&result.stdout);
        Ok(stdout
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_string())
    }
}

/// Parse a stream of delimited commit records. Malformed records are logged
/// and skipped, never fatal.
fn parse_commit_records(stdout: &str) -> Vec<Commit> {
    let mut commits = Vec::new();
    for record in stdout.split(RECORD_SEP) {
        let record = record.trim_matches(['\n', '\r', ' ']);
        if record.is_empty() {
            continue;
        }
        let fields: Vec<&str> = record.split(FIELD_SEP).collect();
        let (oid, message, date, sign_status) = match fields.as_slice() {
            [oid, message, date, sign_status] => (*oid, *message, *date, *sign_status),
            _ => {
                warn!(
                    num_fields = fields.len(),
                    "skipping malformed commit record"
                );
                continue;
            }
        };
        let oid = oid.trim();
        if oid.len() != 40 || !oid.chars().all(|char| char.is_ascii_hexdigit()) {
            warn!(%oid, "skipping commit record with malformed hash");
            continue;
        }
        let sign_status = match SignatureStatus::from_code(sign_status.trim()) {
            Some(sign_status) => sign_status,
            None => {
                warn!(
                    %oid,
                    code = sign_status.trim(),
                    "skipping commit record with unknown signature status"
                );
                continue;
            }
        };
        commits.push(Commit {
            oid: oid.to_string(),
            message: sanitize_message(message),
            date: date.trim().to_string(),
            sign_status,
        });
    }
    commits
}

/// Strip control characters (other than newlines) from a commit message.
fn sanitize_message(message: &str) -> String {
    message
        .trim_end_matches('\n')
        .chars()
        .filter(|char| !char.is_control() || *char == '\n')
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{make_git, test_date};

    #[test]
    fn test_branch_commits_first_parent() -> eyre::Result<()> {
        let git = make_git()?;
        git.init_repo()?;
        let first_oid = git.commit_file("first", 1)?;

        git.run(&["checkout", "-b", "feature"])?;
        let feature_oid = git.commit_file("feature-change", 2)?;
        git.run(&["checkout", "master"])?;
        git.merge_no_ff("feature", 3)?;
        let merge_oid = git.rev_parse("HEAD")?;

        let repo = Repo::from_existing(git.git_run_info(), &git.repo_path);
        let commits = repo.branch_commits("master")?;
        let oids: Vec<&str> = commits.iter().map(|commit| commit.oid.as_str()).collect();

        // First-parent traversal of master skips the feature-branch commit.
        assert_eq!(commits.len(), 3);
        assert_eq!(oids[0], merge_oid);
        assert_eq!(oids[1], first_oid);
        assert!(!oids.contains(&feature_oid.as_str()));

        let first = &commits[1];
        assert_eq!(first.message, "create first.txt");
        assert_eq!(first.date, test_date(1));
        assert_eq!(first.sign_status, SignatureStatus::NoSignature);
        Ok(())
    }

    #[test]
    fn test_commits_between_two_dot_range() -> eyre::Result<()> {
        let git = make_git()?;
        git.init_repo()?;
        let base_oid = git.rev_parse("HEAD")?;
        let second_oid = git.commit_file("second", 1)?;
        let third_oid = git.commit_file("third", 2)?;

        let repo = Repo::from_existing(git.git_run_info(), &git.repo_path);
        let range = repo.commits_between(&base_oid, &third_oid)?;
        assert_eq!(range.len(), 2);
        assert!(range.contains(&second_oid));
        assert!(range.contains(&third_oid));
        assert!(!range.contains(&base_oid));
        Ok(())
    }

    #[test]
    fn test_patch_id_stable_across_branches() -> eyre::Result<()> {
        let git = make_git()?;
        git.init_repo()?;
        let base_oid = git.rev_parse("HEAD")?;

        git.run(&["checkout", "-b", "one"])?;
        let one_oid = git.commit_file("same-change", 1)?;
        git.run(&["checkout", &base_oid])?;
        git.run(&["checkout", "-b", "two"])?;
        let two_oid = git.commit_file("same-change", 5)?;

        let repo = Repo::from_existing(git.git_run_info(), &git.repo_path);
        let one_patch_id = repo.patch_id(&one_oid)?;
        let two_patch_id = repo.patch_id(&two_oid)?;
        assert_eq!(one_patch_id.len(), 40);
        // The same diff yields the same patch id despite differing hashes.
        assert_ne!(one_oid, two_oid);
        assert_eq!(one_patch_id, two_patch_id);
        Ok(())
    }

    #[test]
    fn test_patch_id_empty_for_merge_commit() -> eyre::Result<()> {
        let git = make_git()?;
        git.init_repo()?;
        git.run(&["checkout", "-b", "feature"])?;
        git.commit_file("feature-change", 1)?;
        git.run(&["checkout", "master"])?;
        git.commit_file("mainline-change", 2)?;
        git.merge_no_ff("feature", 3)?;
        let merge_oid = git.rev_parse("HEAD")?;

        let repo = Repo::from_existing(git.git_run_info(), &git.repo_path);
        assert_eq!(repo.patch_id(&merge_oid)?, "");
        Ok(())
    }

    #[test]
    fn test_read_commits_resolves_branch_head() -> eyre::Result<()> {
        let git = make_git()?;
        git.init_repo()?;
        let head_oid = git.commit_file("second", 1)?;

        let repo = Repo::from_existing(git.git_run_info(), &git.repo_path);
        let commits = repo.read_commits(&["master"])?;
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].oid, head_oid);
        Ok(())
    }

    #[test]
    fn test_parse_commit_records_skips_malformed_rows() {
        let good_oid = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
        let stdout = format!(
            "{good_oid}\x1fsubject line\x1f2020-10-29T12:30:00+00:00\x1fN\x1e\
             not-a-hash\x1fbroken\x1f2020-10-29T12:30:00+00:00\x1fN\x1e\
             {good_oid}\x1ftoo few fields\x1e\
             \n"
        );
        let commits = parse_commit_records(&stdout);
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].oid, good_oid);
        assert_eq!(commits[0].message, "subject line");
    }

    #[test]
    fn test_sanitize_message_strips_control_characters() {
        assert_eq!(
            sanitize_message("subject\x1b[31m\nbody\x07\n"),
            "subject[31m\nbody"
        );
    }

    #[test]
    fn test_signature_status_codes_round_trip() {
        for code in ["G", "B", "U", "X", "Y", "R", "E", "N"] {
            let status = SignatureStatus::from_code(code).unwrap();
            assert_eq!(status.as_code(), code);
        }
        assert_eq!(SignatureStatus::from_code("Z"), None);
        assert!(SignatureStatus::NoSignature.is_unsigned());
        assert!(SignatureStatus::Bad.is_unsigned());
        assert!(!SignatureStatus::Good.is_unsigned());
    }
}
