pub const DEPLOY_JSON: &str = "deploy.json";
pub const GITLAB_CI_FILE: &str = ".gitlab-ci.yml";
pub const BUILD_DIR: &str = "build";
pub const ANSIBLE_DIR: &str = "ansible";

pub const GITLAB_CI_TEMPLATE: &str = "gitlab-ci.yml.tmpl";
pub const DEPLOY_JSON_TEMPLATE: &str = "deploy.json.tmpl";

pub const DEFAULT_TEMPLATES_DIR: &str = "templates";
pub const DEFAULT_GIT_AUTHOR_NAME: &str = "cicdctl";
pub const DEFAULT_GIT_AUTHOR_EMAIL: &str = "cicdctl@localhost";
pub const DEFAULT_REMOTE: &str = "origin";

pub const PASSWORD_SUFFIX: &str = "_password";
pub const INSTANCES_KEY: &str = "instances";
pub const INSTANCES_SUFFIX: &str = "_instances";
pub const USERNAME_KEY: &str = "username";
pub const ARCHIVE_EXCLUDE_DIRECTORIES_KEY: &str = "archive_exclude_directories";
pub const ARCHIVE_EXCLUDE_EXTENSIONS_KEY: &str = "archive_exclude_extensions";

pub const ARTIFACTORY_ENVIRONMENT: &str = "artifactory";
pub const TOWER_ENVIRONMENT: &str = "tower";

/// 32 bytes, 256 bits before encoding.
pub const SECRET_BYTES: usize = 32;
