//! Read-only lookups against source control, comments and sprint data.
//!
//! These are query-only calls made from inside specific detectors. An empty
//! result is a valid answer ("no commits", "no pull requests"), never an error.
//! Every call goes through [`Lookups`], which bounds it with a timeout so a slow
//! collaborator turns into a retryable [`EngineError::Timeout`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::error::{EngineError, Result};
use crate::models::{Issue, Sprint};

/// Default bound on a single lookup.
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Pull request linked to a ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    /// Provider ID or number
    pub id: String,
    /// Title
    pub title: String,
    /// Web URL
    #[serde(default)]
    pub url: Option<String>,
    /// Author login
    #[serde(default)]
    pub author: Option<String>,
    /// When the pull request was opened
    pub created_at: DateTime<Utc>,
}

/// A mention of a user in an issue comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mention {
    /// Comment containing the mention
    pub comment_id: String,
    /// Comment author
    pub author_id: String,
    /// Mentioned user
    pub mentioned_user_id: String,
    /// When the comment was posted
    pub created_at: DateTime<Utc>,
    /// Whether the mentioned user has replied since
    #[serde(default)]
    pub answered: bool,
}

/// An active sprint together with the issues it contains.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SprintWork {
    /// The sprint
    pub sprint: Sprint,
    /// Issues in the sprint
    #[serde(default)]
    pub issues: Vec<Issue>,
}

/// Commit counts per ticket.
#[async_trait]
pub trait CommitLookup: Send + Sync {
    /// Number of commits referencing the issue key.
    async fn count_for_ticket(&self, issue_key: &str) -> Result<u64>;
}

/// Open pull requests per ticket.
#[async_trait]
pub trait PullRequestLookup: Send + Sync {
    /// Open pull requests referencing the issue key.
    async fn open_for_ticket(&self, issue_key: &str) -> Result<Vec<PullRequest>>;
}

/// Comment mentions per issue.
#[async_trait]
pub trait CommentLookup: Send + Sync {
    /// Mentions posted on the issue since `since`.
    async fn recent_mentions(&self, issue_id: &str, since: DateTime<Utc>) -> Result<Vec<Mention>>;
}

/// Active sprints per organization, used by the sprint scan.
#[async_trait]
pub trait SprintSource: Send + Sync {
    /// Active sprints and their issues.
    async fn active_sprints(&self, organization_id: &str) -> Result<Vec<SprintWork>>;
}

/// Timeout-bounded bundle of the detector lookups.
#[derive(Clone)]
pub struct Lookups {
    commits: Arc<dyn CommitLookup>,
    pull_requests: Arc<dyn PullRequestLookup>,
    comments: Arc<dyn CommentLookup>,
    timeout: Duration,
}

impl Lookups {
    /// Bundle the given lookups with the default timeout.
    #[must_use]
    pub fn new(
        commits: Arc<dyn CommitLookup>,
        pull_requests: Arc<dyn PullRequestLookup>,
        comments: Arc<dyn CommentLookup>,
    ) -> Self {
        Self {
            commits,
            pull_requests,
            comments,
            timeout: DEFAULT_LOOKUP_TIMEOUT,
        }
    }

    /// Use one in-memory source for all lookups.
    #[must_use]
    pub fn from_static(source: Arc<StaticLookups>) -> Self {
        Self::new(source.clone(), source.clone(), source)
    }

    /// Lookups that always find nothing.
    #[must_use]
    pub fn empty() -> Self {
        Self::from_static(Arc::new(StaticLookups::default()))
    }

    /// Override the per-call timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Commits referencing the issue key.
    pub async fn commit_count(&self, issue_key: &str) -> Result<u64> {
        self.bounded("commit lookup", self.commits.count_for_ticket(issue_key))
            .await
    }

    /// Open pull requests referencing the issue key.
    pub async fn open_pull_requests(&self, issue_key: &str) -> Result<Vec<PullRequest>> {
        self.bounded(
            "pull request lookup",
            self.pull_requests.open_for_ticket(issue_key),
        )
        .await
    }

    /// Mentions on the issue since `since`.
    pub async fn recent_mentions(
        &self,
        issue_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Mention>> {
        self.bounded(
            "comment lookup",
            self.comments.recent_mentions(issue_id, since),
        )
        .await
    }

    async fn bounded<T>(
        &self,
        operation: &str,
        call: impl Future<Output = Result<T>> + Send,
    ) -> Result<T> {
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| EngineError::timeout(operation))?
    }
}

/// In-memory lookup data, keyed by issue key (commits, pull requests), issue ID
/// (mentions) or organization (sprints).
#[derive(Default)]
pub struct StaticLookups {
    commits: RwLock<HashMap<String, u64>>,
    pull_requests: RwLock<HashMap<String, Vec<PullRequest>>>,
    mentions: RwLock<HashMap<String, Vec<Mention>>>,
    sprints: RwLock<HashMap<String, Vec<SprintWork>>>,
}

impl StaticLookups {
    /// Create an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the commit count for an issue key.
    pub async fn set_commit_count(&self, issue_key: &str, count: u64) {
        self.commits
            .write()
            .await
            .insert(issue_key.to_string(), count);
    }

    /// Set the open pull requests for an issue key.
    pub async fn set_pull_requests(&self, issue_key: &str, pull_requests: Vec<PullRequest>) {
        self.pull_requests
            .write()
            .await
            .insert(issue_key.to_string(), pull_requests);
    }

    /// Set the mentions for an issue ID.
    pub async fn set_mentions(&self, issue_id: &str, mentions: Vec<Mention>) {
        self.mentions
            .write()
            .await
            .insert(issue_id.to_string(), mentions);
    }

    /// Set the active sprints for an organization.
    pub async fn set_sprints(&self, organization_id: &str, sprints: Vec<SprintWork>) {
        self.sprints
            .write()
            .await
            .insert(organization_id.to_string(), sprints);
    }
}

#[async_trait]
impl CommitLookup for StaticLookups {
    async fn count_for_ticket(&self, issue_key: &str) -> Result<u64> {
        Ok(self
            .commits
            .read()
            .await
            .get(issue_key)
            .copied()
            .unwrap_or(0))
    }
}

#[async_trait]
impl PullRequestLookup for StaticLookups {
    async fn open_for_ticket(&self, issue_key: &str) -> Result<Vec<PullRequest>> {
        Ok(self
            .pull_requests
            .read()
            .await
            .get(issue_key)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl CommentLookup for StaticLookups {
    async fn recent_mentions(&self, issue_id: &str, since: DateTime<Utc>) -> Result<Vec<Mention>> {
        Ok(self
            .mentions
            .read()
            .await
            .get(issue_id)
            .map(|mentions| {
                mentions
                    .iter()
                    .filter(|m| m.created_at >= since)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl SprintSource for StaticLookups {
    async fn active_sprints(&self, organization_id: &str) -> Result<Vec<SprintWork>> {
        Ok(self
            .sprints
            .read()
            .await
            .get(organization_id)
            .map(|work| {
                work.iter()
                    .filter(|w| w.sprint.is_active())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StalledCommits;

    #[async_trait]
    impl CommitLookup for StalledCommits {
        async fn count_for_ticket(&self, _issue_key: &str) -> Result<u64> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(1)
        }
    }

    #[tokio::test]
    async fn test_missing_data_is_empty_not_error() {
        let lookups = Lookups::empty();
        assert_eq!(lookups.commit_count("TEST-1").await.unwrap(), 0);
        assert!(lookups.open_pull_requests("TEST-1").await.unwrap().is_empty());
        assert!(lookups
            .recent_mentions("10001", Utc::now())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_lookup_times_out() {
        let source = Arc::new(StaticLookups::new());
        let lookups = Lookups::new(Arc::new(StalledCommits), source.clone(), source)
            .with_timeout(Duration::from_secs(5));

        let err = lookups.commit_count("TEST-1").await.unwrap_err();
        assert!(matches!(err, EngineError::Timeout { .. }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_mentions_filtered_by_since() {
        let now = Utc::now();
        let source = Arc::new(StaticLookups::new());
        source
            .set_mentions(
                "10001",
                vec![
                    Mention {
                        comment_id: "c1".to_string(),
                        author_id: "u1".to_string(),
                        mentioned_user_id: "u2".to_string(),
                        created_at: now - chrono::Duration::days(10),
                        answered: false,
                    },
                    Mention {
                        comment_id: "c2".to_string(),
                        author_id: "u1".to_string(),
                        mentioned_user_id: "u2".to_string(),
                        created_at: now - chrono::Duration::days(1),
                        answered: false,
                    },
                ],
            )
            .await;

        let lookups = Lookups::from_static(source);
        let mentions = lookups
            .recent_mentions("10001", now - chrono::Duration::days(7))
            .await
            .unwrap();
        assert_eq!(mentions.len(), 1);
        assert_eq!(mentions[0].comment_id, "c2");
    }
}
