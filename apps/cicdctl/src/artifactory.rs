use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt;

use crate::config::AutomationConfig;
use crate::error::{AutomationError, AutomationResult};
use crate::secrets::ResolvedSecret;
use crate::utils::expect_success;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    Read,
    Annotate,
    Write,
    Delete,
    Manage,
}

impl Permission {
    pub fn code(self) -> &'static str {
        match self {
            Permission::Read => "r",
            Permission::Annotate => "n",
            Permission::Write => "w",
            Permission::Delete => "d",
            Permission::Manage => "m",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepositoryOutcome {
    Created,
    AlreadyExists,
}

pub trait ArtifactStore {
    /// Succeeds when the repository already exists.
    fn create_repository(&self, key: &str) -> AutomationResult<RepositoryOutcome>;
    fn create_or_replace_user(&self, username: &str, password: &ResolvedSecret)
        -> AutomationResult<()>;
    fn grant_permission(
        &self,
        repository: &str,
        username: &str,
        permissions: &[Permission],
    ) -> AutomationResult<()>;
}

#[derive(Serialize)]
struct PermissionTarget<'a> {
    name: String,
    repositories: Vec<&'a str>,
    principals: Principals<'a>,
}

#[derive(Serialize)]
struct Principals<'a> {
    users: BTreeMap<&'a str, Vec<&'static str>>,
}

pub struct ArtifactoryClient {
    base_url: String,
    admin_user: String,
    admin_password: String,
    http: Client,
}

impl fmt::Debug for ArtifactoryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtifactoryClient")
            .field("base_url", &self.base_url)
            .field("admin_user", &self.admin_user)
            .finish_non_exhaustive()
    }
}

impl ArtifactoryClient {
    pub fn connect(base_url: &str, config: &AutomationConfig) -> AutomationResult<Self> {
        let admin_user = config
            .artifactory_admin_user
            .clone()
            .ok_or_else(|| AutomationError::config("ARTIFACTORY_ADMIN_USER is not set"))?;
        let admin_password = config
            .artifactory_admin_password
            .clone()
            .ok_or_else(|| AutomationError::config("ARTIFACTORY_ADMIN_PASSWORD is not set"))?;
        let http = Client::builder()
            .build()
            .map_err(|err| AutomationError::http(base_url, err))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            admin_user,
            admin_password,
            http,
        })
    }

    fn url(&self, suffix: &str) -> String {
        format!("{}/api/{suffix}", self.base_url)
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request.basic_auth(&self.admin_user, Some(&self.admin_password))
    }

    fn send(&self, request: RequestBuilder, url: &str) -> AutomationResult<Response> {
        let response = self
            .authed(request)
            .send()
            .map_err(|err| AutomationError::http(url, err))?;
        expect_success(response, url)
    }
}

impl ArtifactStore for ArtifactoryClient {
    fn create_repository(&self, key: &str) -> AutomationResult<RepositoryOutcome> {
        let url = self.url(&format!("repositories/{key}"));
        let existing = self
            .authed(self.http.get(&url))
            .send()
            .map_err(|err| AutomationError::http(&url, err))?;
        if existing.status().is_success() {
            tracing::info!(
                instance = %self.base_url,
                repository = key,
                "repository already exists"
            );
            return Ok(RepositoryOutcome::AlreadyExists);
        }
        if existing.status() != StatusCode::NOT_FOUND
            && existing.status() != StatusCode::BAD_REQUEST
        {
            expect_success(existing, &url)?;
        }

        let body = json!({
            "key": key,
            "rclass": "local",
            "packageType": "generic",
        });
        self.send(self.http.put(&url).json(&body), &url)?;
        tracing::info!(instance = %self.base_url, repository = key, "repository created");
        Ok(RepositoryOutcome::Created)
    }

    fn create_or_replace_user(
        &self,
        username: &str,
        password: &ResolvedSecret,
    ) -> AutomationResult<()> {
        let url = self.url(&format!("security/users/{username}"));
        let body = json!({
            "name": username,
            "email": format!("{username}@localhost"),
            "password": password.expose(),
            "admin": false,
            "profileUpdatable": false,
        });
        self.send(self.http.put(&url).json(&body), &url)?;
        tracing::info!(instance = %self.base_url, user = username, "user created or replaced");
        Ok(())
    }

    fn grant_permission(
        &self,
        repository: &str,
        username: &str,
        permissions: &[Permission],
    ) -> AutomationResult<()> {
        let name = format!("{repository}-{username}");
        let url = self.url(&format!("security/permissions/{name}"));
        let target = PermissionTarget {
            name: name.clone(),
            repositories: vec![repository],
            principals: Principals {
                users: BTreeMap::from([(
                    username,
                    permissions.iter().map(|permission| permission.code()).collect(),
                )]),
            },
        };
        self.send(self.http.put(&url).json(&target), &url)?;
        tracing::info!(
            instance = %self.base_url,
            repository,
            user = username,
            permissions = %permissions.iter().map(|p| p.code()).collect::<String>(),
            "permission granted"
        );
        Ok(())
    }
}
