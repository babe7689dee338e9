use anyhow::{Context, Result};

use crate::artifactory::ArtifactoryClient;
use crate::cli::{Cli, Commands, IssueArgs, PackageArgs, TargetArgs, TowerArgs};
use crate::config::AutomationConfig;
use crate::git::GitCloner;
use crate::gitlab::GitlabProject;
use crate::orchestrator::Orchestrator;
use crate::package::{self, PackageOptions};
use crate::provision::{lookup_tower, provision_artifactory};
use crate::report::Reporter;
use crate::secrets::SecretGenerator;
use crate::templates::TemplateSet;
use crate::tower::TowerClient;

pub fn run(cli: Cli, reporter: &Reporter) -> Result<()> {
    let config = AutomationConfig::from_env(cli.config).context("failed to load configuration")?;
    match cli.command {
        Commands::Gitlab(args) => gitlab(args, &config, reporter),
        Commands::Artifactory(args) => artifactory(args, &config, reporter),
        Commands::Tower(args) => tower(args, &config, reporter),
        Commands::Ansible(args) => ansible(args, &config, reporter),
        Commands::Package(args) => package_project(args, reporter),
    }
}

fn connect(
    project_url: &str,
    config: &AutomationConfig,
    reporter: &Reporter,
) -> Result<GitlabProject> {
    let project = GitlabProject::connect(project_url, config)
        .with_context(|| format!("cannot reach project {project_url}"))?;
    reporter.info(&format!("project {}", project.remote().path_with_namespace));
    Ok(project)
}

fn gitlab(args: IssueArgs, config: &AutomationConfig, reporter: &Reporter) -> Result<()> {
    let project = connect(&args.project_url, config, reporter)?;
    let cloner = GitCloner::new(config);
    let templates = TemplateSet::new(&config.templates_dir);
    let orchestrator = Orchestrator {
        host: &project,
        cloner: &cloner,
        templates: &templates,
        reporter,
    };
    let report = orchestrator.bootstrap(&args.jira_issue, &mut SecretGenerator::new())?;
    if let Some(url) = report.merge_request.and_then(|mr| mr.web_url) {
        reporter.info(&format!("merge request: {url}"));
    }
    Ok(())
}

fn ansible(args: IssueArgs, config: &AutomationConfig, reporter: &Reporter) -> Result<()> {
    let project = connect(&args.project_url, config, reporter)?;
    let cloner = GitCloner::new(config);
    let templates = TemplateSet::new(&config.templates_dir);
    let orchestrator = Orchestrator {
        host: &project,
        cloner: &cloner,
        templates: &templates,
        reporter,
    };
    let report = orchestrator.ansible_scaffold(&args.jira_issue)?;
    if let Some(url) = report.merge_request.and_then(|mr| mr.web_url) {
        reporter.info(&format!("merge request: {url}"));
    }
    Ok(())
}

fn artifactory(args: TargetArgs, config: &AutomationConfig, reporter: &Reporter) -> Result<()> {
    let project = connect(&args.project_url, config, reporter)?;
    let fan_out = provision_artifactory(
        &project,
        &args.environment,
        |url| ArtifactoryClient::connect(url, config),
        reporter,
    )?;
    reporter.success(&format!(
        "{} artifactory instance(s) provisioned",
        fan_out.outcomes.len()
    ));
    Ok(())
}

fn tower(args: TowerArgs, config: &AutomationConfig, reporter: &Reporter) -> Result<()> {
    let project = connect(&args.project_url, config, reporter)?;
    let fan_out = lookup_tower(
        &project,
        &args.environment,
        TowerClient::connect,
        reporter,
    )?;
    reporter.success(&format!("{} tower instance(s) queried", fan_out.outcomes.len()));
    Ok(())
}

fn package_project(args: PackageArgs, reporter: &Reporter) -> Result<()> {
    let options = PackageOptions {
        deploy_json: args.deploy_json,
        base_dir: args.base_dir,
        environment: args.environment,
    };
    package::package(&options, reporter)?;
    Ok(())
}
