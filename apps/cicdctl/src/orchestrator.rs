//! The git-side flows: bootstrap and ansible scaffold.
//!
//! Both are a strictly linear state machine. Every step either advances to the
//! next [`Stage`] or stops the run with a [`RunFailure`] recording the last
//! stage reached. The working copy is held by a [`CopyGuard`], so it is
//! destroyed exactly once whichever way the run ends. Remote side effects
//! already applied (pushed commits, variables) are not undone.

use rand::RngCore;
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use crate::constants::{
    ANSIBLE_DIR, BUILD_DIR, DEFAULT_REMOTE, DEPLOY_JSON, DEPLOY_JSON_TEMPLATE, GITLAB_CI_FILE,
    GITLAB_CI_TEMPLATE,
};
use crate::deploy::DeployConfiguration;
use crate::error::{AutomationError, AutomationResult};
use crate::git::{Cloner, CopyGuard, WorkingCopy};
use crate::gitlab::{MergeRequest, ProjectHost};
use crate::report::Reporter;
use crate::secrets::{CredentialReference, SecretGenerator};
use crate::templates::{TemplateContext, TemplateSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Start,
    Cloned,
    BranchReady,
    FilesRendered,
    Committed,
    Pushed,
    CiEnabled,
    SecretsSet,
    MergeRequested,
    Done,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Start => "start",
            Stage::Cloned => "cloned",
            Stage::BranchReady => "branch ready",
            Stage::FilesRendered => "files rendered",
            Stage::Committed => "committed",
            Stage::Pushed => "pushed",
            Stage::CiEnabled => "ci enabled",
            Stage::SecretsSet => "secrets set",
            Stage::MergeRequested => "merge requested",
            Stage::Done => "done",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A run that stopped early. `stage` is the last stage successfully reached.
#[derive(Debug)]
pub struct RunFailure {
    pub stage: Stage,
    pub error: AutomationError,
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stopped after stage \"{}\"", self.stage)
    }
}

impl std::error::Error for RunFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

#[derive(Debug)]
pub struct RunReport {
    pub branch: String,
    pub stages: Vec<Stage>,
    pub merge_request: Option<MergeRequest>,
    pub published_variables: Vec<CredentialReference>,
}

struct Run<'a> {
    stage: Stage,
    visited: Vec<Stage>,
    reporter: &'a Reporter,
}

impl<'a> Run<'a> {
    fn new(reporter: &'a Reporter) -> Self {
        Self {
            stage: Stage::Start,
            visited: vec![Stage::Start],
            reporter,
        }
    }

    fn advance(&mut self, next: Stage, message: &str) {
        tracing::debug!(from = %self.stage, to = %next, "stage transition");
        self.stage = next;
        self.visited.push(next);
        self.reporter.success(message);
    }

    fn fail(&self, error: AutomationError) -> RunFailure {
        RunFailure {
            stage: self.stage,
            error,
        }
    }
}

pub fn pipeline_title(issue: &str) -> String {
    format!("{issue}: pipeline automation")
}

pub fn ansible_title(issue: &str) -> String {
    format!("{issue}: ansible automation")
}

/// Collaborators shared by the git-side flows.
pub struct Orchestrator<'a, H: ?Sized, C> {
    pub host: &'a H,
    pub cloner: &'a C,
    pub templates: &'a TemplateSet,
    pub reporter: &'a Reporter,
}

impl<'a, H, C> Orchestrator<'a, H, C>
where
    H: ProjectHost + ?Sized,
    C: Cloner,
{
    /// Scaffold the CI pipeline on a branch named after `issue`, enable CI,
    /// publish freshly generated secrets and open a merge request.
    pub fn bootstrap<R: RngCore>(
        &self,
        issue: &str,
        generator: &mut SecretGenerator<R>,
    ) -> Result<RunReport, RunFailure> {
        let mut run = Run::new(self.reporter);
        let branch = issue;
        let title = pipeline_title(issue);

        let mut copy = self.clone_copy(&mut run)?;
        self.checkout(&mut run, &mut copy, branch)?;

        self.render_pipeline_files(&mut *copy)
            .map_err(|err| run.fail(err))?;
        run.advance(Stage::FilesRendered, "build/, .gitlab-ci.yml and deploy.json rendered");

        self.publish_branch(&mut run, &mut copy, branch, &title)?;

        // Variables can only be set once the project has CI enabled.
        self.host.enable_builds().map_err(|err| run.fail(err))?;
        run.advance(Stage::CiEnabled, "ci enabled");

        let published = self
            .publish_secrets(copy.root(), generator)
            .map_err(|err| run.fail(err))?;
        run.advance(
            Stage::SecretsSet,
            &format!("{} variable(s) set", published.len()),
        );

        let merge_request = self
            .host
            .open_merge_request(branch, &title)
            .map_err(|err| run.fail(err))?;
        run.advance(Stage::MergeRequested, &format!("merge request !{} opened", merge_request.iid));

        copy.release();
        run.advance(Stage::Done, "gitlab automation completed");
        Ok(RunReport {
            branch: branch.to_string(),
            stages: run.visited,
            merge_request: Some(merge_request),
            published_variables: published,
        })
    }

    /// Commit the ansible template tree on a branch named after `issue` and
    /// open a merge request. No CI change and no secrets.
    pub fn ansible_scaffold(&self, issue: &str) -> Result<RunReport, RunFailure> {
        let mut run = Run::new(self.reporter);
        let branch = issue;
        let title = ansible_title(issue);

        let mut copy = self.clone_copy(&mut run)?;
        self.checkout(&mut run, &mut copy, branch)?;

        let root = copy.root().to_path_buf();
        self.templates
            .install_directory(ANSIBLE_DIR, &root)
            .and_then(|rel| copy.add(&rel))
            .map_err(|err| run.fail(err))?;
        run.advance(Stage::FilesRendered, "ansible/ copied");

        self.publish_branch(&mut run, &mut copy, branch, &title)?;

        let merge_request = self
            .host
            .open_merge_request(branch, &title)
            .map_err(|err| run.fail(err))?;
        run.advance(Stage::MergeRequested, &format!("merge request !{} opened", merge_request.iid));

        copy.release();
        run.advance(Stage::Done, "ansible automation completed");
        Ok(RunReport {
            branch: branch.to_string(),
            stages: run.visited,
            merge_request: Some(merge_request),
            published_variables: Vec::new(),
        })
    }

    fn clone_copy(&self, run: &mut Run<'_>) -> Result<CopyGuard<C::Copy>, RunFailure> {
        let copy = self
            .cloner
            .clone_repository(self.host.ssh_url())
            .map_err(|err| run.fail(err))?;
        let guard = CopyGuard::new(copy);
        run.advance(Stage::Cloned, &format!("{} cloned", self.host.path()));
        Ok(guard)
    }

    fn checkout(
        &self,
        run: &mut Run<'_>,
        copy: &mut CopyGuard<C::Copy>,
        branch: &str,
    ) -> Result<(), RunFailure> {
        copy.switch_to_branch(branch).map_err(|err| run.fail(err))?;
        run.advance(Stage::BranchReady, &format!("on branch {branch}"));
        Ok(())
    }

    fn publish_branch(
        &self,
        run: &mut Run<'_>,
        copy: &mut CopyGuard<C::Copy>,
        branch: &str,
        message: &str,
    ) -> Result<(), RunFailure> {
        copy.commit(message).map_err(|err| run.fail(err))?;
        run.advance(Stage::Committed, &format!("committed \"{message}\""));
        copy.push(DEFAULT_REMOTE, branch)
            .map_err(|err| run.fail(err))?;
        run.advance(Stage::Pushed, &format!("pushed {branch} to {DEFAULT_REMOTE}"));
        Ok(())
    }

    fn render_pipeline_files(&self, copy: &mut C::Copy) -> AutomationResult<()> {
        let root = copy.root().to_path_buf();
        let context = TemplateContext::new(self.host.path());

        let build = self.templates.install_directory(BUILD_DIR, &root)?;
        copy.add(&build)?;
        for (template, destination) in [
            (GITLAB_CI_TEMPLATE, GITLAB_CI_FILE),
            (DEPLOY_JSON_TEMPLATE, DEPLOY_JSON),
        ] {
            let rendered = self
                .templates
                .render_file(template, &root, destination, &context)?;
            copy.add(&rendered)?;
        }
        Ok(())
    }

    /// Generate and publish one secret per distinct credential reference found
    /// in the pushed deploy descriptor. Stops at the first failure; variables
    /// already published stay published.
    fn publish_secrets<R: RngCore>(
        &self,
        root: &Path,
        generator: &mut SecretGenerator<R>,
    ) -> AutomationResult<Vec<CredentialReference>> {
        let config = DeployConfiguration::load(&root.join(DEPLOY_JSON))?;
        let mut seen = HashSet::new();
        let mut published = Vec::new();
        let environments: Vec<&str> = config.environment_names().collect();
        for environment in environments {
            for (role, reference) in config.credential_variable_names(environment)? {
                if !seen.insert(reference.clone()) {
                    continue;
                }
                let secret = generator.generate(&reference)?;
                self.host.set_variable(&secret)?;
                self.reporter
                    .success(&format!("variable {reference} set ({environment}.{role})"));
                published.push(reference);
            }
        }
        Ok(published)
    }
}
