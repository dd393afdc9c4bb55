//! Testing utilities.
//!
//! This is inside `src` rather than `tests` since we use this code in some unit
//! tests.

use std::collections::HashMap;
use std::ffi::OsString;
use std::fs;
use std::ops::Deref;
use std::path::PathBuf;
use std::process::Command;

use eyre::Context;
use tempfile::TempDir;
use tracing::instrument;

use crate::git::GitRunInfo;

const DUMMY_NAME: &str = "Testy McTestface";
const DUMMY_EMAIL: &str = "test@example.com";

/// Deterministic commit date for test commit number `time`, in the strict
/// ISO-8601 format Git's `%cI` placeholder emits.
pub fn test_date(time: isize) -> String {
    format!("2020-10-29T12:{:02}:00+00:00", 30 + time)
}

/// Wrapper around the Git executable, for testing.
#[derive(Clone, Debug)]
pub struct Git {
    /// The path to the repository on disk. The directory itself must exist,
    /// although it might not have a `.git` folder in it. (Use `Git::init_repo`
    /// to initialize it.)
    pub repo_path: PathBuf,

    /// The path to the Git executable on disk.
    pub path_to_git: PathBuf,
}

impl Git {
    /// Constructor.
    pub fn new(repo_path: PathBuf) -> Self {
        Git {
            repo_path,
            path_to_git: PathBuf::from("git"),
        }
    }

    /// Get the environment variables needed to run git in the test
    /// environment. The commit dates are baked into the commit hashes, so
    /// they are pinned for determinism; the user's own Git configuration is
    /// masked out.
    pub fn get_base_env(&self, time: isize) -> Vec<(OsString, OsString)> {
        let date: OsString = test_date(time).into();
        let envs = vec![
            ("GIT_CONFIG_NOSYSTEM", OsString::from("1")),
            ("GIT_CONFIG_GLOBAL", OsString::from("/dev/null")),
            ("GIT_AUTHOR_DATE", date.clone()),
            ("GIT_COMMITTER_DATE", date),
            ("GIT_EDITOR", OsString::from(":")),
            (
                "PATH",
                std::env::var_os("PATH").unwrap_or_else(|| OsString::from("/usr/bin:/bin")),
            ),
        ];
        envs.into_iter()
            .map(|(key, value)| (OsString::from(key), value))
            .collect()
    }

    /// Run a Git command in the test repository at a particular virtual time.
    #[instrument]
    pub fn run_at_time(&self, args: &[&str], time: isize) -> eyre::Result<(String, String)> {
        let mut command = Command::new(&self.path_to_git);
        command
            .current_dir(&self.repo_path)
            .args(args)
            .env_clear()
            .envs(self.get_base_env(time));

        let result = command.output().wrap_err_with(|| {
            format!(
                "Running git
                Executable: {:?}
                Args: {:?}",
                &self.path_to_git, &args
            )
        })?;
        if !result.status.success() {
            eyre::bail!(
                "Git command {:?} {:?} failed with exit code {:?}
stdout:
{}
stderr:
{}",
                &self.path_to_git,
                &args,
                result.status.code(),
                &String::from_utf8_lossy(&result.stdout),
                &String::from_utf8_lossy(&result.stderr),
            );
        }
        let stdout = String::from_utf8(result.stdout)?;
        let stderr = String::from_utf8(result.stderr)?;
        Ok((stdout, stderr))
    }

    /// Run a Git command in the test repository.
    pub fn run(&self, args: &[&str]) -> eyre::Result<(String, String)> {
        self.run_at_time(args, 0)
    }

    /// Set up a Git repo in the directory, with `master` as the initial
    /// branch and an initial commit.
    #[instrument]
    pub fn init_repo(&self) -> eyre::Result<()> {
        self.run(&["init", "-b", "master"])?;
        self.run(&["config", "user.name", DUMMY_NAME])?;
        self.run(&["config", "user.email", DUMMY_EMAIL])?;
        self.run(&["config", "core.autocrlf", "false"])?;
        self.commit_file("initial", 0)?;
        Ok(())
    }

    /// Write the provided contents to the provided file in the repository root.
    pub fn write_file(&self, name: &str, contents: &str) -> eyre::Result<()> {
        let path = self.repo_path.join(format!("{name}.txt"));
        fs::write(path, contents)?;
        Ok(())
    }

    /// Commit a file with the given name and contents derived from it, at the
    /// given virtual time. Returns the hash of the new commit.
    #[instrument]
    pub fn commit_file_with_contents(
        &self,
        name: &str,
        time: isize,
        contents: &str,
    ) -> eyre::Result<String> {
        self.write_file(name, contents)?;
        self.run(&["add", "."])?;
        self.run_at_time(&["commit", "-m", &format!("create {name}.txt")], time)?;
        self.rev_parse("HEAD")
    }

    /// Commit a file with default contents at the given virtual time. Returns
    /// the hash of the new commit.
    pub fn commit_file(&self, name: &str, time: isize) -> eyre::Result<String> {
        self.commit_file_with_contents(name, time, &format!("{name} contents\n"))
    }

    /// Merge the provided branch into the current branch with a merge commit.
    /// Returns the hash of the merge commit.
    #[instrument]
    pub fn merge_no_ff(&self, branch: &str, time: isize) -> eyre::Result<String> {
        self.run_at_time(
            &["merge", "--no-ff", "-m", &format!("merge {branch}"), branch],
            time,
        )?;
        self.rev_parse("HEAD")
    }

    /// Resolve a revision to a full commit hash.
    pub fn rev_parse(&self, rev: &str) -> eyre::Result<String> {
        let (stdout, _stderr) = self.run(&["rev-parse", rev])?;
        Ok(stdout.trim().to_string())
    }

    /// Point the provided ref (e.g. `refs/pull/7/head`) at the provided
    /// commit.
    pub fn update_ref(&self, ref_name: &str, oid: &str) -> eyre::Result<()> {
        self.run(&["update-ref", ref_name, oid])?;
        Ok(())
    }

    /// A `GitRunInfo` suitable for driving this test repository through the
    /// production code paths.
    pub fn git_run_info(&self) -> GitRunInfo {
        let env: HashMap<OsString, OsString> = self.get_base_env(0).into_iter().collect();
        GitRunInfo {
            path_to_git: self.path_to_git.clone(),
            env,
        }
    }
}

/// Wrapper around a `Git` instance which owns the temporary directory the
/// repository lives in.
pub struct GitWrapper {
    _temp_dir: TempDir,
    git: Git,
}

impl Deref for GitWrapper {
    type Target = Git;

    fn deref(&self) -> &Self::Target {
        &self.git
    }
}

/// Create a Git instance in a new temporary directory.
pub fn make_git() -> eyre::Result<GitWrapper> {
    let temp_dir = tempfile::tempdir().wrap_err("Creating temporary directory")?;
    let git = Git::new(temp_dir.path().to_path_buf());
    Ok(GitWrapper {
        _temp_dir: temp_dir,
        git,
    })
}
