use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

use crate::config::AutomationConfig;
use crate::constants::DEPLOY_JSON;
use crate::error::{AutomationError, AutomationResult};
use crate::secrets::ResolvedSecret;
use crate::utils::expect_success;

const FALLBACK_TARGET_BRANCH: &str = "master";

/// The contract the orchestrator and the secret resolver consume.
pub trait ProjectHost {
    /// `group/project` style path.
    fn path(&self) -> &str;
    fn ssh_url(&self) -> &str;
    fn get_variable(&self, name: &str) -> AutomationResult<Option<Variable>>;
    fn set_variable(&self, secret: &ResolvedSecret) -> AutomationResult<()>;
    /// Idempotent: enabling an already enabled project succeeds.
    fn enable_builds(&self) -> AutomationResult<()>;
    fn open_merge_request(&self, source_branch: &str, title: &str)
        -> AutomationResult<MergeRequest>;
    /// Raw `deploy.json`, from `branch` or the default branch.
    fn deploy_descriptor(&self, branch: Option<&str>) -> AutomationResult<String>;
}

#[derive(Clone, Deserialize)]
pub struct Variable {
    pub key: String,
    pub value: String,
}

impl fmt::Debug for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Variable")
            .field("key", &self.key)
            .field("value", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct MergeRequest {
    pub iid: u64,
    pub title: String,
    #[serde(default)]
    pub web_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteProject {
    pub id: u64,
    pub path_with_namespace: String,
    pub ssh_url_to_repo: String,
    pub http_url_to_repo: String,
    #[serde(default)]
    pub default_branch: Option<String>,
    #[serde(default)]
    pub jobs_enabled: bool,
}

/// A project URL split into the GitLab base URL and the project path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectLocator {
    pub base_url: String,
    pub path: String,
}

impl ProjectLocator {
    /// Accepts `https://host/group/project(.git)`, `ssh://git@host/group/project.git`
    /// and scp-like `git@host:group/project.git`.
    pub fn parse(project_url: &str) -> AutomationResult<Self> {
        let trimmed = project_url.trim();
        let invalid = || AutomationError::config(format!("invalid project URL: {trimmed}"));

        let (base_url, raw_path) = if let Some((user_host, path)) = scp_like(trimmed) {
            let host = user_host.rsplit('@').next().unwrap_or(user_host);
            (format!("https://{host}"), path.to_string())
        } else {
            let parsed = Url::parse(trimmed).map_err(|_| invalid())?;
            let host = parsed.host_str().ok_or_else(invalid)?;
            let base_url = match parsed.scheme() {
                "http" | "https" => match parsed.port() {
                    Some(port) => format!("{}://{host}:{port}", parsed.scheme()),
                    None => format!("{}://{host}", parsed.scheme()),
                },
                "ssh" | "git" => format!("https://{host}"),
                _ => return Err(invalid()),
            };
            (base_url, parsed.path().to_string())
        };

        let path = raw_path
            .trim_matches('/')
            .trim_end_matches(".git")
            .trim_end_matches('/')
            .to_string();
        if path.is_empty() || !path.contains('/') {
            return Err(invalid());
        }
        Ok(Self { base_url, path })
    }

    pub fn default_api_url(&self) -> String {
        format!("{}/api/v4", self.base_url)
    }
}

fn scp_like(value: &str) -> Option<(&str, &str)> {
    if value.contains("://") {
        return None;
    }
    value.split_once(':')
}

pub fn encode_path(path: &str) -> String {
    url::form_urlencoded::byte_serialize(path.as_bytes()).collect()
}

pub struct GitlabProject {
    client: Client,
    api_url: String,
    token: String,
    project: RemoteProject,
}

impl GitlabProject {
    pub fn connect(project_url: &str, config: &AutomationConfig) -> AutomationResult<Self> {
        let locator = ProjectLocator::parse(project_url)?;
        let token = config.gitlab_private_token.clone().ok_or_else(|| {
            AutomationError::config("GITLAB_PRIVATE_TOKEN must be set to talk to GitLab")
        })?;
        let api_url = config
            .gitlab_api_url
            .clone()
            .unwrap_or_else(|| locator.default_api_url());
        let api_url = api_url.trim_end_matches('/').to_string();
        let client = Client::new();

        let url = format!("{api_url}/projects/{}", encode_path(&locator.path));
        let response = send(client.get(&url).header("PRIVATE-TOKEN", &token), &url)?;
        let project: RemoteProject = response
            .json()
            .map_err(|err| AutomationError::http(&url, err))?;
        tracing::info!(
            project = %project.path_with_namespace,
            id = project.id,
            "connected to gitlab project"
        );
        Ok(Self {
            client,
            api_url,
            token,
            project,
        })
    }

    pub fn remote(&self) -> &RemoteProject {
        &self.project
    }

    fn project_url(&self, suffix: &str) -> String {
        format!("{}/projects/{}{suffix}", self.api_url, self.project.id)
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request.header("PRIVATE-TOKEN", &self.token)
    }
}

#[derive(Serialize)]
struct VariablePayload<'a> {
    key: &'a str,
    value: &'a str,
    masked: bool,
}

#[derive(Serialize)]
struct MergeRequestPayload<'a> {
    source_branch: &'a str,
    target_branch: &'a str,
    title: &'a str,
}

impl ProjectHost for GitlabProject {
    fn path(&self) -> &str {
        &self.project.path_with_namespace
    }

    fn ssh_url(&self) -> &str {
        &self.project.ssh_url_to_repo
    }

    fn get_variable(&self, name: &str) -> AutomationResult<Option<Variable>> {
        let url = self.project_url(&format!("/variables/{name}"));
        let response = self
            .authed(self.client.get(&url))
            .send()
            .map_err(|err| AutomationError::http(&url, err))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = expect_success(response, &url)?;
        let variable = response
            .json()
            .map_err(|err| AutomationError::http(&url, err))?;
        Ok(Some(variable))
    }

    fn set_variable(&self, secret: &ResolvedSecret) -> AutomationResult<()> {
        let name = secret.name().as_str();
        let payload = VariablePayload {
            key: name,
            value: secret.expose(),
            masked: true,
        };
        if self.get_variable(name)?.is_some() {
            let url = self.project_url(&format!("/variables/{name}"));
            send(self.authed(self.client.put(&url)).json(&payload), &url)?;
        } else {
            let url = self.project_url("/variables");
            send(self.authed(self.client.post(&url)).json(&payload), &url)?;
        }
        tracing::info!(variable = name, project = self.path(), "variable set");
        Ok(())
    }

    fn enable_builds(&self) -> AutomationResult<()> {
        let url = self.project_url("");
        send(
            self.authed(self.client.put(&url))
                .json(&serde_json::json!({ "jobs_enabled": true })),
            &url,
        )?;
        Ok(())
    }

    fn open_merge_request(
        &self,
        source_branch: &str,
        title: &str,
    ) -> AutomationResult<MergeRequest> {
        let url = self.project_url("/merge_requests");
        let target_branch = self
            .project
            .default_branch
            .as_deref()
            .unwrap_or(FALLBACK_TARGET_BRANCH);
        let payload = MergeRequestPayload {
            source_branch,
            target_branch,
            title,
        };
        let response = send(self.authed(self.client.post(&url)).json(&payload), &url)?;
        response
            .json()
            .map_err(|err| AutomationError::http(&url, err))
    }

    fn deploy_descriptor(&self, branch: Option<&str>) -> AutomationResult<String> {
        let reference = branch
            .or(self.project.default_branch.as_deref())
            .unwrap_or(FALLBACK_TARGET_BRANCH);
        let url = self.project_url(&format!(
            "/repository/files/{}/raw?ref={}",
            encode_path(DEPLOY_JSON),
            encode_path(reference)
        ));
        let response = self
            .authed(self.client.get(&url))
            .send()
            .map_err(|err| AutomationError::http(&url, err))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(AutomationError::config(format!(
                "{DEPLOY_JSON} not found on {} at {reference}",
                self.path()
            )));
        }
        expect_success(response, &url)?
            .text()
            .map_err(|err| AutomationError::http(&url, err))
    }
}

fn send(request: RequestBuilder, url: &str) -> AutomationResult<Response> {
    let response = request
        .send()
        .map_err(|err| AutomationError::http(url, err))?;
    expect_success(response, url)
}
