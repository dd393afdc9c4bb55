//! Lazy, paginated access to a repository's merged pull requests via the
//! GraphQL API.

use std::collections::VecDeque;

use serde::Deserialize;
use tracing::{debug, instrument, warn};

use super::GithubClient;

/// Number of pull requests requested per page, and the cap on the number of
/// reviews carried per pull request.
pub const PAGE_SIZE: usize = 100;

const MERGED_PRS_QUERY: &str = r#"
query ($owner: String!, $name: String!, $branch: String!, $after: String) {
    repository(owner: $owner, name: $name) {
        pullRequests(first: 100, states: MERGED, baseRefName: $branch, after: $after) {
            nodes {
                number
                state
                baseRefOid
                headRefOid
                mergedAt
                mergeCommit {
                    oid
                    messageHeadline
                }
                reviews(first: 100) {
                    nodes {
                        state
                    }
                }
            }
            pageInfo {
                hasNextPage
                endCursor
            }
        }
    }
}
"#;

/// A merged pull request as returned by the forge.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct PullRequest {
    /// The pull request number.
    pub number: u64,

    /// The pull request state; only `MERGED` pull requests are processed.
    #[serde(default)]
    pub state: String,

    /// Hash of the base-ref commit at merge time.
    #[serde(rename = "baseRefOid", default)]
    pub base_ref_oid: String,

    /// Hash of the head-ref commit at merge time.
    #[serde(rename = "headRefOid", default)]
    pub head_ref_oid: String,

    /// When the pull request was merged, in ISO-8601 UTC. Comparable by
    /// lexicographic order.
    #[serde(rename = "mergedAt", default)]
    pub merged_at: String,

    /// The commit which the merge produced on the base branch, if any.
    #[serde(rename = "mergeCommit")]
    pub merge_commit: Option<MergeCommit>,

    /// The first page of reviews, capped at [`PAGE_SIZE`]. Review
    /// sub-pagination is not chased.
    #[serde(default)]
    pub reviews: ReviewConnection,
}

/// The merge commit of a pull request.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct MergeCommit {
    /// The merge (or squash, or rebase head) commit hash.
    pub oid: String,

    /// The first line of the merge commit message.
    #[serde(rename = "messageHeadline", default)]
    pub message_headline: String,
}

/// The first page of reviews attached to a pull request.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct ReviewConnection {
    /// The review records.
    #[serde(default)]
    pub nodes: Vec<Review>,
}

/// A single review of a pull request.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct Review {
    /// The review state, e.g. `APPROVED` or `CHANGES_REQUESTED`.
    #[serde(default)]
    pub state: String,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: Option<ResponseData>,
}

#[derive(Debug, Deserialize)]
struct ResponseData {
    repository: Option<RepositoryData>,
}

#[derive(Debug, Deserialize)]
struct RepositoryData {
    #[serde(rename = "pullRequests")]
    pull_requests: PullRequestPage,
}

#[derive(Debug, Deserialize)]
struct PullRequestPage {
    #[serde(default)]
    nodes: Vec<PullRequest>,
    #[serde(rename = "pageInfo")]
    page_info: PageInfo,
}

#[derive(Debug, Deserialize)]
struct PageInfo {
    #[serde(rename = "hasNextPage")]
    has_next_page: bool,
    #[serde(rename = "endCursor")]
    end_cursor: Option<String>,
}

/// A pull-driven, finite sequence of merged pull requests. Pages are fetched
/// on demand as the consumer advances the iterator.
///
/// A transport or decode error terminates the sequence early: the consumer
/// observes end-of-sequence, never an error. Pull requests from pages fetched
/// before the failure are still yielded.
pub struct MergedPullRequests<'client> {
    client: &'client GithubClient,
    owner: String,
    name: String,
    branch: String,
    buffered: VecDeque<PullRequest>,
    cursor: Option<String>,
    exhausted: bool,
}

impl GithubClient {
    /// Iterate the merged pull requests whose base is `branch`.
    pub fn merged_pull_requests(
        &self,
        owner: &str,
        name: &str,
        branch: &str,
    ) -> MergedPullRequests<'_> {
        MergedPullRequests {
            client: self,
            owner: owner.to_string(),
            name: name.to_string(),
            branch: branch.to_string(),
            buffered: VecDeque::new(),
            cursor: None,
            exhausted: false,
        }
    }
}

impl MergedPullRequests<'_> {
    #[instrument(skip(self), fields(owner = %self.owner, name = %self.name, cursor = ?self.cursor))]
    fn fetch_next_page(&mut self) {
        let variables = serde_json::json!({
            "owner": self.owner,
            "name": self.name,
            "branch": self.branch,
            "after": self.cursor,
        });
        let request_body = serde_json::json!({
            "query": MERGED_PRS_QUERY,
            "variables": variables,
        });

        let response = self
            .client
            .agent
            .post(&format!("{}/graphql", self.client.api_url))
            .set("Authorization", &format!("Bearer {}", self.client.token))
            .set("Content-Type", "application/json")
            .send_json(request_body);
        let response = match response {
            Ok(response) => response,
            Err(err) => {
                warn!(%err, "pull request page query failed; truncating the sequence");
                self.exhausted = true;
                return;
            }
        };
        let response: GraphQlResponse = match response.into_json() {
            Ok(response) => response,
            Err(err) => {
                warn!(%err, "could not decode pull request page; truncating the sequence");
                self.exhausted = true;
                return;
            }
        };

        let page = match response
            .data
            .and_then(|data| data.repository)
            .map(|repository| repository.pull_requests)
        {
            Some(page) => page,
            None => {
                warn!("pull request page carried no repository data; truncating the sequence");
                self.exhausted = true;
                return;
            }
        };

        debug!(num_prs = page.nodes.len(), "fetched pull request page");
        self.cursor = page.page_info.end_cursor;
        // Without an end cursor there is no way to request the next page.
        if !page.page_info.has_next_page || self.cursor.is_none() {
            self.exhausted = true;
        }
        self.buffered.extend(
            page.nodes
                .into_iter()
                .filter(|pull_request| pull_request.state == "MERGED"),
        );
    }
}

impl Iterator for MergedPullRequests<'_> {
    type Item = PullRequest;

    fn next(&mut self) -> Option<PullRequest> {
        loop {
            if let Some(pull_request) = self.buffered.pop_front() {
                return Some(pull_request);
            }
            if self.exhausted {
                return None;
            }
            self.fetch_next_page();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE_FIXTURE: &str = r#"{
        "data": {
            "repository": {
                "pullRequests": {
                    "nodes": [
                        {
                            "number": 7,
                            "state": "MERGED",
                            "baseRefOid": "1111111111111111111111111111111111111111",
                            "headRefOid": "2222222222222222222222222222222222222222",
                            "mergedAt": "2023-05-01T10:00:00Z",
                            "mergeCommit": {
                                "oid": "3333333333333333333333333333333333333333",
                                "messageHeadline": "Merge pull request #7"
                            },
                            "reviews": {
                                "nodes": [
                                    { "state": "APPROVED" },
                                    { "state": "CHANGES_REQUESTED" }
                                ]
                            }
                        },
                        {
                            "number": 9,
                            "state": "MERGED",
                            "baseRefOid": "4444444444444444444444444444444444444444",
                            "headRefOid": "5555555555555555555555555555555555555555",
                            "mergedAt": "2023-05-02T10:00:00Z",
                            "mergeCommit": null,
                            "reviews": { "nodes": [] }
                        }
                    ],
                    "pageInfo": {
                        "hasNextPage": true,
                        "endCursor": "Y3Vyc29yOjEwMA=="
                    }
                }
            }
        }
    }"#;

    #[test]
    fn test_decode_pull_request_page() -> eyre::Result<()> {
        let response: GraphQlResponse = serde_json::from_str(PAGE_FIXTURE)?;
        let page = response
            .data
            .and_then(|data| data.repository)
            .map(|repository| repository.pull_requests)
            .unwrap();

        assert_eq!(page.nodes.len(), 2);
        assert!(page.page_info.has_next_page);
        assert_eq!(page.page_info.end_cursor.as_deref(), Some("Y3Vyc29yOjEwMA=="));

        let first = &page.nodes[0];
        assert_eq!(first.number, 7);
        assert_eq!(first.state, "MERGED");
        assert_eq!(first.merged_at, "2023-05-01T10:00:00Z");
        assert_eq!(
            first.merge_commit.as_ref().map(|commit| commit.oid.as_str()),
            Some("3333333333333333333333333333333333333333")
        );
        assert_eq!(first.reviews.nodes.len(), 2);
        assert_eq!(first.reviews.nodes[0].state, "APPROVED");

        // A squash-merged-then-deleted merge commit can come back null.
        assert_eq!(page.nodes[1].merge_commit, None);
        Ok(())
    }

    #[test]
    fn test_decode_empty_repository_response() -> eyre::Result<()> {
        let response: GraphQlResponse =
            serde_json::from_str(r#"{ "data": { "repository": null } }"#)?;
        assert!(response.data.unwrap().repository.is_none());
        Ok(())
    }
}
