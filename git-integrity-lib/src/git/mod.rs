//! Tools for interfacing with the Git repository.

mod repo;
mod run;

pub use repo::{Commit, Error as RepoError, Repo, SignatureStatus};
pub use run::{GitRunInfo, GitRunResult};
