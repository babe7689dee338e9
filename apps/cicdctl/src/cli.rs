use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::constants::{ARTIFACTORY_ENVIRONMENT, DEPLOY_JSON, TOWER_ENVIRONMENT};

#[derive(Parser)]
#[command(name = "cicdctl", version, about = "GitLab, Artifactory and Tower pipeline automation")]
pub struct Cli {
    /// Plain status markers without ANSI colors.
    #[arg(long, global = true, default_value_t = false)]
    pub no_color: bool,
    /// JSON file with non-secret configuration overrides.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scaffold the CI pipeline, publish secrets and open a merge request.
    Gitlab(IssueArgs),
    /// Create repository, user and permission on every Artifactory instance.
    Artifactory(TargetArgs),
    /// Look up the project's inventory on every Tower instance.
    Tower(TowerArgs),
    /// Commit the ansible scaffold and open a merge request.
    Ansible(IssueArgs),
    /// Archive the project tree for publication.
    Package(PackageArgs),
}

#[derive(Args)]
pub struct IssueArgs {
    #[arg(short = 'p', long)]
    pub project_url: String,
    /// Tracker issue; also the branch name.
    #[arg(short = 'j', long, value_parser = parse_issue)]
    pub jira_issue: String,
}

#[derive(Args)]
pub struct TargetArgs {
    #[arg(short = 'p', long)]
    pub project_url: String,
    #[arg(short = 'e', long, default_value = ARTIFACTORY_ENVIRONMENT)]
    pub environment: String,
}

#[derive(Args)]
pub struct TowerArgs {
    #[arg(short = 'p', long)]
    pub project_url: String,
    #[arg(short = 'e', long, default_value = TOWER_ENVIRONMENT)]
    pub environment: String,
}

#[derive(Args)]
pub struct PackageArgs {
    #[arg(long, default_value = DEPLOY_JSON)]
    pub deploy_json: PathBuf,
    #[arg(long, default_value = ".")]
    pub base_dir: PathBuf,
    #[arg(short = 'e', long, default_value = ARTIFACTORY_ENVIRONMENT)]
    pub environment: String,
}

/// Issues become branch names, so only characters git accepts anywhere.
pub fn parse_issue(value: &str) -> Result<String, String> {
    let value = value.trim();
    let valid = !value.is_empty()
        && !value.starts_with('-')
        && !value.starts_with('.')
        && !value.ends_with(".lock")
        && !value.contains("..")
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if !valid {
        return Err(format!("{value:?} is not usable as a branch name"));
    }
    Ok(value.to_string())
}
