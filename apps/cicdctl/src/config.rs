use dotenvy::dotenv;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::constants::{DEFAULT_GIT_AUTHOR_EMAIL, DEFAULT_GIT_AUTHOR_NAME, DEFAULT_TEMPLATES_DIR};
use crate::error::{AutomationError, AutomationResult};

/// Runtime settings. Environment variables win over the optional JSON
/// overrides file, which wins over defaults. Tokens and passwords are only
/// ever read from the environment.
#[derive(Debug, Clone)]
pub struct AutomationConfig {
    pub gitlab_api_url: Option<String>,
    pub gitlab_private_token: Option<String>,
    pub artifactory_admin_user: Option<String>,
    pub artifactory_admin_password: Option<String>,
    pub templates_dir: PathBuf,
    pub work_root: PathBuf,
    pub git_author_name: String,
    pub git_author_email: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ConfigOverrides {
    #[serde(default)]
    gitlab_api_url: Option<String>,
    #[serde(default)]
    artifactory_admin_user: Option<String>,
    #[serde(default)]
    templates_dir: Option<String>,
    #[serde(default)]
    work_root: Option<String>,
    #[serde(default)]
    git_author_name: Option<String>,
    #[serde(default)]
    git_author_email: Option<String>,
}

pub fn config_path(cli_path: Option<PathBuf>) -> Option<PathBuf> {
    cli_path.or_else(|| env_optional_string("CICDCTL_CONFIG_PATH").map(PathBuf::from))
}

fn load_overrides(path: Option<&Path>) -> AutomationResult<ConfigOverrides> {
    let Some(path) = path else {
        return Ok(ConfigOverrides::default());
    };
    let contents = std::fs::read_to_string(path).map_err(|err| {
        AutomationError::config(format!("cannot read {}: {err}", path.display()))
    })?;
    serde_json::from_str(&contents)
        .map_err(|err| AutomationError::config(format!("invalid {}: {err}", path.display())))
}

impl AutomationConfig {
    pub fn from_env(cli_config_path: Option<PathBuf>) -> AutomationResult<Self> {
        dotenv().ok();

        let path = config_path(cli_config_path);
        let overrides = load_overrides(path.as_deref())?;

        let pick = |key: &str, file_value: Option<String>| {
            env_optional_string(key).or_else(|| {
                file_value
                    .map(|value| value.trim().to_string())
                    .filter(|value| !value.is_empty())
            })
        };

        let templates_dir = pick("CICDCTL_TEMPLATES_DIR", overrides.templates_dir)
            .unwrap_or_else(|| DEFAULT_TEMPLATES_DIR.to_string());
        let work_root = pick("CICDCTL_WORK_ROOT", overrides.work_root)
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir);

        Ok(Self {
            gitlab_api_url: pick("GITLAB_API_URL", overrides.gitlab_api_url),
            gitlab_private_token: env_optional_string("GITLAB_PRIVATE_TOKEN"),
            artifactory_admin_user: pick(
                "ARTIFACTORY_ADMIN_USER",
                overrides.artifactory_admin_user,
            ),
            artifactory_admin_password: env_optional_string("ARTIFACTORY_ADMIN_PASSWORD"),
            templates_dir: PathBuf::from(templates_dir),
            work_root,
            git_author_name: pick("CICDCTL_GIT_AUTHOR_NAME", overrides.git_author_name)
                .unwrap_or_else(|| DEFAULT_GIT_AUTHOR_NAME.to_string()),
            git_author_email: pick("CICDCTL_GIT_AUTHOR_EMAIL", overrides.git_author_email)
                .unwrap_or_else(|| DEFAULT_GIT_AUTHOR_EMAIL.to_string()),
        })
    }
}

pub fn env_optional_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn env_flag(key: &str) -> bool {
    std::env::var_os(key).is_some_and(|value| !value.is_empty())
}
