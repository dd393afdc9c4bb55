//! GitHub REST API lookups: repository metadata, force-push activity, and the
//! branch protection posture.

use std::collections::BTreeMap;

use eyre::Context;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use super::GithubClient;

/// Repository metadata needed to start an audit.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RepoInfo {
    /// URL to clone the repository from.
    pub clone_url: String,

    /// The branch analyzed when none is requested explicitly.
    pub default_branch: String,

    /// Stargazer count.
    pub stars: u64,

    /// Languages detected in the repository.
    pub languages: Vec<String>,
}

/// The branch protection posture configured on the forge. Recorded metadata;
/// nothing is enforced based on it.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct BranchProtection {
    /// Number of approving reviews required before merging.
    #[serde(rename = "RequiredApprovingReviews")]
    pub required_approving_reviews: u64,

    /// Whether the most recent push must be approved by someone other than
    /// the pusher.
    #[serde(rename = "RequireLastPushApproval")]
    pub require_last_push_approval: bool,

    /// Whether signed commits are required on the branch.
    #[serde(rename = "RequireSignatures")]
    pub require_signatures: bool,

    /// Whether force pushes are permitted on the branch.
    #[serde(rename = "AllowForcePushes")]
    pub allow_force_pushes: bool,
}

#[derive(Debug, Deserialize)]
struct RepoResponse {
    clone_url: String,
    default_branch: String,
    #[serde(default)]
    stargazers_count: u64,
}

#[derive(Debug, Deserialize)]
struct ProtectionResponse {
    required_pull_request_reviews: Option<RequiredReviewsResponse>,
    required_signatures: Option<EnabledFlag>,
    allow_force_pushes: Option<EnabledFlag>,
}

#[derive(Debug, Deserialize)]
struct RequiredReviewsResponse {
    #[serde(default)]
    required_approving_review_count: u64,
    #[serde(default)]
    require_last_push_approval: bool,
}

#[derive(Debug, Deserialize)]
struct EnabledFlag {
    #[serde(default)]
    enabled: bool,
}

/// Extract the `rel="next"` target from a `Link` response header.
fn next_page_url(link_header: Option<&str>) -> Option<String> {
    lazy_static! {
        static ref NEXT_LINK_RE: Regex = Regex::new(r#"<([^<>]*)>;\s*rel="next""#).unwrap();
    }
    let link_header = link_header?;
    NEXT_LINK_RE
        .captures(link_header)
        .map(|captures| captures[1].to_string())
}

impl GithubClient {
    fn get(&self, url: &str) -> ureq::Request {
        self.agent
            .get(url)
            .set("Authorization", &format!("Bearer {}", self.token))
            .set("Accept", "application/vnd.github+json")
    }

    /// Fetch the clone URL, default branch, star count, and language list of
    /// a repository.
    #[instrument(skip(self))]
    pub fn get_repo_info(&self, owner: &str, name: &str) -> eyre::Result<RepoInfo> {
        let repo: RepoResponse = self
            .get(&format!("{}/repos/{owner}/{name}", self.api_url))
            .call()
            .wrap_err("Querying repository metadata")?
            .into_json()
            .wrap_err("Decoding repository metadata")?;

        // The language list is auxiliary; an audit can proceed without it.
        let languages = (|| -> eyre::Result<BTreeMap<String, u64>> {
            let url = format!("{}/repos/{owner}/{name}/languages", self.api_url);
            Ok(self.get(&url).call()?.into_json()?)
        })();
        let languages = match languages {
            Ok(languages) => languages,
            Err(err) => {
                warn!(%err, "language lookup failed");
                BTreeMap::new()
            }
        };

        Ok(RepoInfo {
            clone_url: repo.clone_url,
            default_branch: repo.default_branch,
            stars: repo.stargazers_count,
            languages: languages.into_keys().collect(),
        })
    }

    /// Count the force-push events recorded on a branch by the repository
    /// activity API, following pagination to the end.
    #[instrument(skip(self))]
    pub fn get_force_push_count(
        &self,
        owner: &str,
        name: &str,
        branch: &str,
    ) -> eyre::Result<usize> {
        let mut url = format!(
            "{}/repos/{owner}/{name}/activity?per_page=100&activity_type=force_push&ref={branch}",
            self.api_url
        );
        let mut count = 0usize;
        loop {
            let response = self
                .get(&url)
                .call()
                .wrap_err("Querying repository activity")?;
            let next_url = next_page_url(response.header("link"));
            let events: Vec<serde_json::Value> = response
                .into_json()
                .wrap_err("Decoding repository activity")?;
            count += events.len();
            debug!(count, "accumulated force push events");
            match next_url {
                Some(next_url) => url = next_url,
                None => break,
            }
        }
        Ok(count)
    }

    /// Read the branch protection posture of a branch. Errors (including the
    /// 404 GitHub returns for unprotected branches) are the caller's to
    /// downgrade.
    #[instrument(skip(self))]
    pub fn get_branch_protection(
        &self,
        owner: &str,
        name: &str,
        branch: &str,
    ) -> eyre::Result<BranchProtection> {
        let protection: ProtectionResponse = self
            .get(&format!(
                "{}/repos/{owner}/{name}/branches/{branch}/protection",
                self.api_url
            ))
            .call()
            .wrap_err("Querying branch protection")?
            .into_json()
            .wrap_err("Decoding branch protection")?;

        let reviews = protection.required_pull_request_reviews;
        Ok(BranchProtection {
            required_approving_reviews: reviews
                .as_ref()
                .map(|reviews| reviews.required_approving_review_count)
                .unwrap_or_default(),
            require_last_push_approval: reviews
                .as_ref()
                .map(|reviews| reviews.require_last_push_approval)
                .unwrap_or_default(),
            require_signatures: protection
                .required_signatures
                .map(|flag| flag.enabled)
                .unwrap_or_default(),
            allow_force_pushes: protection
                .allow_force_pushes
                .map(|flag| flag.enabled)
                .unwrap_or(true),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_page_url_extraction() {
        let link_header = r#"<https://api.github.com/repositories/1/activity?page=2>; rel="next", <https://api.github.com/repositories/1/activity?page=5>; rel="last""#;
        assert_eq!(
            next_page_url(Some(link_header)).as_deref(),
            Some("https://api.github.com/repositories/1/activity?page=2")
        );
        assert_eq!(
            next_page_url(Some(r#"<https://example.com?page=1>; rel="prev""#)),
            None
        );
        assert_eq!(next_page_url(None), None);
    }

    #[test]
    fn test_decode_protection_response() -> eyre::Result<()> {
        let fixture = r#"{
            "required_pull_request_reviews": {
                "required_approving_review_count": 2,
                "require_last_push_approval": true
            },
            "required_signatures": { "enabled": true },
            "allow_force_pushes": { "enabled": false }
        }"#;
        let protection: ProtectionResponse = serde_json::from_str(fixture)?;
        let reviews = protection.required_pull_request_reviews.unwrap();
        assert_eq!(reviews.required_approving_review_count, 2);
        assert!(reviews.require_last_push_approval);
        assert!(protection.required_signatures.unwrap().enabled);
        assert!(!protection.allow_force_pushes.unwrap().enabled);
        Ok(())
    }

    #[test]
    fn test_decode_repo_response_ignores_extra_fields() -> eyre::Result<()> {
        let fixture = r#"{
            "id": 1296269,
            "name": "example",
            "clone_url": "https://github.com/octocat/example.git",
            "default_branch": "main",
            "stargazers_count": 80,
            "forks_count": 9
        }"#;
        let repo: RepoResponse = serde_json::from_str(fixture)?;
        assert_eq!(repo.clone_url, "https://github.com/octocat/example.git");
        assert_eq!(repo.default_branch, "main");
        assert_eq!(repo.stargazers_count, 80);
        Ok(())
    }
}
