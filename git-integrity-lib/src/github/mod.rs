//! Client for the GitHub REST and GraphQL APIs.

mod graphql;
mod rest;

pub use graphql::{
    MergeCommit, MergedPullRequests, PullRequest, Review, ReviewConnection, PAGE_SIZE,
};
pub use rest::{BranchProtection, RepoInfo};

/// Base URL of the production GitHub API.
pub const GITHUB_API_URL: &str = "https://api.github.com";

/// Authenticated handle to the GitHub API. One HTTP agent is shared across
/// all calls made through the same client.
#[derive(Clone)]
pub struct GithubClient {
    pub(crate) agent: ureq::Agent,
    pub(crate) api_url: String,
    pub(crate) token: String,
}

impl std::fmt::Debug for GithubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "<GithubClient api_url={:?} token=not shown>",
            self.api_url
        )
    }
}

impl GithubClient {
    /// Construct a client for the production GitHub API.
    pub fn new(token: String) -> Self {
        Self::with_api_url(GITHUB_API_URL.to_string(), token)
    }

    /// Construct a client against an alternative API root, e.g. a GitHub
    /// Enterprise installation.
    pub fn with_api_url(api_url: String, token: String) -> Self {
        GithubClient {
            agent: ureq::AgentBuilder::new()
                .user_agent("git-integrity")
                .build(),
            api_url,
            token,
        }
    }
}
