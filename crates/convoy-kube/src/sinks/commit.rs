//! Commit metadata lookup through the GitHub REST API

use convoy_core::CommitInfo;

use super::http_client;
use crate::error::Result;
use crate::options::GithubOptions;

pub struct GithubCommits {
    options: GithubOptions,
    client: Option<reqwest::Client>,
}

impl GithubCommits {
    pub fn new(options: GithubOptions) -> Result<Self> {
        let client = if options.enabled {
            Some(http_client()?)
        } else {
            None
        };
        Ok(Self { options, client })
    }

    /// Fetch `sha` from `GET /repos/{user}/{repo}/commits/{sha}`
    ///
    /// Returns `None` when the lookup is disabled or not fully configured.
    pub async fn lookup(&self, sha: &str) -> Result<Option<CommitInfo>> {
        let (Some(client), Some(user), Some(repo)) =
            (&self.client, &self.options.user, &self.options.repo)
        else {
            return Ok(None);
        };
        if sha.is_empty() {
            return Ok(None);
        }

        let url = format!(
            "{}/repos/{user}/{repo}/commits/{sha}",
            self.options.api_url.trim_end_matches('/')
        );
        let mut request = client
            .get(&url)
            .header("Accept", "application/vnd.github+json");
        if let Some(token) = &self.options.token {
            request = request.header("Authorization", format!("token {token}"));
        }
        let commit: CommitInfo = request.send().await?.error_for_status()?.json().await?;
        tracing::debug!(sha, date = ?commit.committer_date(), "resolved commit");
        Ok(Some(commit))
    }

    /// Commit annotation for `sha`, with the committer date when the lookup
    /// succeeds
    pub async fn resolve(&self, sha: Option<&str>) -> (CommitInfo, Option<String>) {
        let Some(sha) = sha else {
            return (CommitInfo::default(), None);
        };
        match self.lookup(sha).await {
            Ok(Some(commit)) => (commit, None),
            Ok(None) => (CommitInfo::from_sha(sha), None),
            Err(e) => (
                CommitInfo::from_sha(sha),
                Some(format!("Unable to look up commit {sha}: {e}")),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn options(url: &str) -> GithubOptions {
        GithubOptions {
            enabled: true,
            token: Some("t0k3n".to_string()),
            user: Some("acme".to_string()),
            repo: Some("shop".to_string()),
            api_url: url.to_string(),
        }
    }

    #[tokio::test]
    async fn test_lookup_returns_committer_date() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/shop/commits/abc123"))
            .and(header("Authorization", "token t0k3n"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "sha": "abc123",
                "commit": { "committer": { "date": "2024-05-01T12:00:00Z" } }
            })))
            .mount(&server)
            .await;

        let commits = GithubCommits::new(options(&server.uri())).unwrap();
        let commit = commits.lookup("abc123").await.unwrap().unwrap();
        assert_eq!(commit.sha.as_deref(), Some("abc123"));
        assert_eq!(
            commit.committer_date().unwrap().to_rfc3339(),
            "2024-05-01T12:00:00+00:00"
        );
    }

    #[tokio::test]
    async fn test_disabled_lookup() {
        let commits = GithubCommits::new(GithubOptions::default()).unwrap();
        assert!(commits.lookup("abc123").await.unwrap().is_none());

        let (commit, warning) = commits.resolve(Some("abc123")).await;
        assert_eq!(commit, CommitInfo::from_sha("abc123"));
        assert!(warning.is_none());
    }

    #[tokio::test]
    async fn test_failed_lookup_falls_back_to_sha() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let commits = GithubCommits::new(options(&server.uri())).unwrap();
        let (commit, warning) = commits.resolve(Some("abc123")).await;
        assert_eq!(commit, CommitInfo::from_sha("abc123"));
        assert!(commit.committer_date().is_none());
        assert!(warning.is_some());
    }
}
