//! GitHub REST implementation of [`PullRequestClient`].

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

use super::{MergeMethod, MergeState, NewPullRequest, PullRequest, PullRequestClient};
use crate::error::HostingError;
use crate::git::RemoteRepo;
use crate::sanitize::truncate_body;

pub const DEFAULT_API_URL: &str = "https://api.github.com";

const API_VERSION: &str = "2022-11-28";
const USER_AGENT: &str = concat!("propagator/", env!("CARGO_PKG_VERSION"));
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Maximum response body length kept in error messages.
const MAX_ERROR_BODY_LENGTH: usize = 200;

// https://host/owner/repo(.git), ssh://git@host/owner/repo, git@host:owner/repo.git
static RE_REPO_SLUG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:[a-z+]+://(?:[^@/]+@)?[^/]+/|[^@/]+@[^:/]+:)(?P<owner>[^/]+)/(?P<repo>[^/]+?)(?:\.git)?/?$",
    )
    .expect("repository slug regex is valid")
});

/// `owner/repo` for a GitHub remote URL.
pub fn repo_slug(url: &str) -> Result<(String, String), HostingError> {
    let caps = RE_REPO_SLUG
        .captures(url.trim())
        .ok_or_else(|| HostingError::InvalidRepositoryUrl(url.to_string()))?;
    Ok((caps["owner"].to_string(), caps["repo"].to_string()))
}

pub struct GitHubClient {
    client: Client,
    api_url: String,
}

impl GitHubClient {
    pub fn new(api_url: Option<&str>) -> Result<Self, HostingError> {
        let client = Client::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| HostingError::Client(e.to_string()))?;
        Ok(Self::with_client(client, api_url))
    }

    pub fn with_client(client: Client, api_url: Option<&str>) -> Self {
        let api_url = api_url
            .filter(|u| !u.is_empty())
            .unwrap_or(DEFAULT_API_URL)
            .trim_end_matches('/')
            .to_string();
        Self { client, api_url }
    }

    fn pulls_url(&self, repo: &RemoteRepo) -> Result<String, HostingError> {
        let (owner, name) = repo_slug(&repo.url)?;
        Ok(format!("{}/repos/{}/{}/pulls", self.api_url, owner, name))
    }

    fn request(&self, method: Method, url: &str, repo: &RemoteRepo) -> RequestBuilder {
        let builder = self
            .client
            .request(method, url)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION);
        match repo.credentials.token.as_ref() {
            Some(token) => builder.bearer_auth(token.expose_secret()),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder, url: &str) -> Result<reqwest::Response, HostingError> {
        let response = builder.send().await.map_err(|e| HostingError::Request {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(HostingError::Status {
            status: status.as_u16(),
            url: url.to_string(),
            body: truncate_body(&body, MAX_ERROR_BODY_LENGTH),
        })
    }

    async fn parse<T: for<'de> Deserialize<'de>>(
        response: reqwest::Response,
        url: &str,
    ) -> Result<T, HostingError> {
        response.json::<T>().await.map_err(|e| HostingError::Request {
            url: url.to_string(),
            message: format!("invalid response body: {}", e),
        })
    }
}

#[derive(Serialize)]
struct CreateBody<'a> {
    title: &'a str,
    head: &'a str,
    base: &'a str,
    body: &'a str,
}

#[derive(Serialize)]
struct MergeBody {
    merge_method: &'static str,
}

#[derive(Deserialize)]
struct ApiPullRequest {
    number: u64,
    html_url: String,
    #[serde(default)]
    merged: bool,
    #[serde(default)]
    mergeable_state: Option<MergeState>,
    head: ApiRef,
    base: ApiRef,
}

#[derive(Deserialize)]
struct ApiRef {
    #[serde(rename = "ref")]
    name: String,
}

impl From<ApiPullRequest> for PullRequest {
    fn from(pr: ApiPullRequest) -> Self {
        Self {
            number: pr.number,
            url: pr.html_url,
            head: pr.head.name,
            base: pr.base.name,
            merged: pr.merged,
            state: pr.mergeable_state.unwrap_or(MergeState::Unknown),
        }
    }
}

#[async_trait]
impl PullRequestClient for GitHubClient {
    async fn create_pull_request(
        &self,
        repo: &RemoteRepo,
        request: &NewPullRequest,
    ) -> Result<PullRequest, HostingError> {
        let url = self.pulls_url(repo)?;
        let body = CreateBody {
            title: &request.title,
            head: &request.head,
            base: &request.base,
            body: &request.body,
        };

        let response = self
            .send(self.request(Method::POST, &url, repo).json(&body), &url)
            .await?;
        let pr: ApiPullRequest = Self::parse(response, &url).await?;
        log::debug!("Created pull request #{} ({})", pr.number, pr.html_url);
        Ok(pr.into())
    }

    async fn get_pull_request(
        &self,
        repo: &RemoteRepo,
        number: u64,
    ) -> Result<PullRequest, HostingError> {
        let url = format!("{}/{}", self.pulls_url(repo)?, number);
        let response = match self.send(self.request(Method::GET, &url, repo), &url).await {
            Err(HostingError::Status { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                return Err(HostingError::NotFound(number))
            }
            other => other?,
        };
        let pr: ApiPullRequest = Self::parse(response, &url).await?;
        Ok(pr.into())
    }

    async fn merge_pull_request(
        &self,
        repo: &RemoteRepo,
        number: u64,
        method: MergeMethod,
    ) -> Result<(), HostingError> {
        let url = format!("{}/{}/merge", self.pulls_url(repo)?, number);
        let body = MergeBody {
            merge_method: method.as_str(),
        };
        self.send(self.request(Method::PUT, &url, repo).json(&body), &url)
            .await?;
        log::info!("Merged pull request #{} with method {}", number, method.as_str());
        Ok(())
    }
}
