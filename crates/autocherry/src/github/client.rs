//! reqwest implementation of [`GitHubApi`].

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tracing::{debug, instrument};

use super::{
    Commit, CommitSummary, GitHubApi, GitRef, Issue, IssueFilter, Label, NewPullRequest,
    PullRequest, PullRequestFilter, PullRequestState, RepoRef,
};
use crate::error::GitHubError;

const PER_PAGE: usize = 100;
const LABEL_COLOR: &str = "ededed";
pub(crate) const USER_AGENT_VALUE: &str = "autocherry/0.1";

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// GitHub REST client authenticated with an installation token.
#[derive(Clone)]
pub struct RestClient {
    http_client: reqwest::Client,
    base_url: String,
    token: String,
}

impl fmt::Debug for RestClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestClient")
            .field("base_url", &self.base_url)
            .field("token", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl RestClient {
    /// Create a client for `base_url` (e.g. `https://api.github.com`).
    pub fn new(base_url: &str, token: impl Into<String>) -> Result<Self, GitHubError> {
        Ok(Self {
            http_client: build_http_client()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    fn repo_url(&self, repo: &RepoRef, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/{path}",
            self.base_url,
            urlencoding::encode(&repo.owner),
            urlencoding::encode(&repo.name)
        )
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.http_client
            .request(method, url)
            .header(AUTHORIZATION, format!("Bearer {}", self.token))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, GitHubError> {
        check(request.send().await?).await
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, GitHubError> {
        let response = self.send(self.request(Method::GET, url)).await?;
        Ok(response.json().await?)
    }

    /// Walk `page=1..` until a page comes back short.
    async fn get_paged<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>, GitHubError> {
        let mut out = Vec::new();
        let mut page = 1usize;

        loop {
            let request = self
                .request(Method::GET, url)
                .query(query)
                .query(&[("per_page", PER_PAGE), ("page", page)]);
            let items: Vec<T> = self.send(request).await?.json().await?;
            let count = items.len();
            out.extend(items);

            if count < PER_PAGE {
                break;
            }
            page += 1;
        }

        debug!(url = %url, count = out.len(), "Fetched paginated list");
        Ok(out)
    }
}

pub(crate) fn build_http_client() -> Result<reqwest::Client, GitHubError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("application/vnd.github+json"),
    );
    headers.insert(
        "X-GitHub-Api-Version",
        HeaderValue::from_static("2022-11-28"),
    );
    headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));

    Ok(reqwest::Client::builder()
        .default_headers(headers)
        .timeout(Duration::from_secs(30))
        .build()?)
}

/// Turn a non-success response into [`GitHubError::Api`].
pub(crate) async fn check(response: Response) -> Result<Response, GitHubError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|body| body.message)
        .unwrap_or(text);

    Err(GitHubError::Api {
        status: status.as_u16(),
        message,
    })
}

/// Percent-encode each segment of a ref, keeping the `/` separators.
fn encode_ref(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[async_trait]
impl GitHubApi for RestClient {
    #[instrument(skip(self, repo), fields(repo = %repo))]
    async fn get_pull_request(
        &self,
        repo: &RepoRef,
        number: u64,
    ) -> Result<PullRequest, GitHubError> {
        self.get_json(&self.repo_url(repo, &format!("pulls/{number}")))
            .await
    }

    #[instrument(skip(self, repo), fields(repo = %repo))]
    async fn list_pull_requests(
        &self,
        repo: &RepoRef,
        filter: &PullRequestFilter,
    ) -> Result<Vec<PullRequest>, GitHubError> {
        let mut query = vec![("state", filter.state.as_str().to_string())];
        if let Some(head) = &filter.head {
            query.push(("head", head.clone()));
        }
        if let Some(base) = &filter.base {
            query.push(("base", base.clone()));
        }
        self.get_paged(&self.repo_url(repo, "pulls"), &query).await
    }

    #[instrument(skip(self, repo), fields(repo = %repo))]
    async fn list_pull_request_commits(
        &self,
        repo: &RepoRef,
        number: u64,
    ) -> Result<Vec<CommitSummary>, GitHubError> {
        self.get_paged(&self.repo_url(repo, &format!("pulls/{number}/commits")), &[])
            .await
    }

    #[instrument(skip(self, repo, new_pr), fields(repo = %repo, head = %new_pr.head, base = %new_pr.base))]
    async fn create_pull_request(
        &self,
        repo: &RepoRef,
        new_pr: &NewPullRequest,
    ) -> Result<PullRequest, GitHubError> {
        let request = self
            .request(Method::POST, &self.repo_url(repo, "pulls"))
            .json(new_pr);
        Ok(self.send(request).await?.json().await?)
    }

    #[instrument(skip(self, repo), fields(repo = %repo))]
    async fn set_pull_request_state(
        &self,
        repo: &RepoRef,
        number: u64,
        state: PullRequestState,
    ) -> Result<(), GitHubError> {
        let request = self
            .request(Method::PATCH, &self.repo_url(repo, &format!("pulls/{number}")))
            .json(&serde_json::json!({ "state": state }));
        self.send(request).await?;
        Ok(())
    }

    #[instrument(skip(self, repo, body), fields(repo = %repo))]
    async fn create_comment(
        &self,
        repo: &RepoRef,
        number: u64,
        body: &str,
    ) -> Result<(), GitHubError> {
        let request = self
            .request(
                Method::POST,
                &self.repo_url(repo, &format!("issues/{number}/comments")),
            )
            .json(&serde_json::json!({ "body": body }));
        self.send(request).await?;
        Ok(())
    }

    #[instrument(skip(self, repo), fields(repo = %repo))]
    async fn list_issues(
        &self,
        repo: &RepoRef,
        filter: &IssueFilter,
    ) -> Result<Vec<Issue>, GitHubError> {
        let mut query = vec![("state", filter.state.as_str().to_string())];
        if let Some(labels) = &filter.labels {
            query.push(("labels", labels.clone()));
        }
        self.get_paged(&self.repo_url(repo, "issues"), &query).await
    }

    #[instrument(skip(self, repo), fields(repo = %repo))]
    async fn remove_label_from_issue(
        &self,
        repo: &RepoRef,
        number: u64,
        label: &str,
    ) -> Result<(), GitHubError> {
        let url = self.repo_url(
            repo,
            &format!("issues/{number}/labels/{}", urlencoding::encode(label)),
        );
        self.send(self.request(Method::DELETE, &url)).await?;
        Ok(())
    }

    #[instrument(skip(self, repo), fields(repo = %repo))]
    async fn list_repo_labels(&self, repo: &RepoRef) -> Result<Vec<Label>, GitHubError> {
        self.get_paged(&self.repo_url(repo, "labels"), &[]).await
    }

    #[instrument(skip(self, repo), fields(repo = %repo))]
    async fn create_repo_label(&self, repo: &RepoRef, name: &str) -> Result<(), GitHubError> {
        let request = self
            .request(Method::POST, &self.repo_url(repo, "labels"))
            .json(&Label {
                name: name.to_string(),
                color: LABEL_COLOR.to_string(),
            });
        self.send(request).await?;
        Ok(())
    }

    #[instrument(skip(self, repo), fields(repo = %repo))]
    async fn delete_repo_label(&self, repo: &RepoRef, name: &str) -> Result<(), GitHubError> {
        let url = self.repo_url(repo, &format!("labels/{}", urlencoding::encode(name)));
        self.send(self.request(Method::DELETE, &url)).await?;
        Ok(())
    }

    #[instrument(skip(self, repo), fields(repo = %repo))]
    async fn get_ref(&self, repo: &RepoRef, git_ref: &str) -> Result<GitRef, GitHubError> {
        let short = git_ref.strip_prefix("refs/").unwrap_or(git_ref);
        self.get_json(&self.repo_url(repo, &format!("git/ref/{}", encode_ref(short))))
            .await
    }

    #[instrument(skip(self, repo), fields(repo = %repo))]
    async fn delete_ref(&self, repo: &RepoRef, git_ref: &str) -> Result<(), GitHubError> {
        let short = git_ref.strip_prefix("refs/").unwrap_or(git_ref);
        let url = self.repo_url(repo, &format!("git/refs/{}", encode_ref(short)));
        self.send(self.request(Method::DELETE, &url)).await?;
        Ok(())
    }

    #[instrument(skip(self, repo), fields(repo = %repo))]
    async fn get_commit(&self, repo: &RepoRef, sha: &str) -> Result<Commit, GitHubError> {
        self.get_json(&self.repo_url(repo, &format!("commits/{}", urlencoding::encode(sha))))
            .await
    }
}
