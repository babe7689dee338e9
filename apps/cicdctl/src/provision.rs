use crate::artifactory::{ArtifactStore, Permission, RepositoryOutcome};
use crate::constants::USERNAME_KEY;
use crate::deploy::DeployConfiguration;
use crate::error::{AutomationError, AutomationResult};
use crate::gitlab::ProjectHost;
use crate::report::Reporter;
use crate::secrets::{resolve, ResolvedSecret};
use crate::templates::project_slug;
use crate::tower::{Inventory, InventorySource};

#[derive(Debug)]
pub struct InstanceOutcome<T> {
    pub url: String,
    pub result: AutomationResult<T>,
}

#[derive(Debug)]
pub struct FanOut<T> {
    pub outcomes: Vec<InstanceOutcome<T>>,
}

impl<T> FanOut<T> {
    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.result.is_err())
            .count()
    }

    /// Partial success is failure.
    pub fn into_result(self) -> AutomationResult<Self> {
        let failed = self.failed();
        if failed > 0 {
            return Err(AutomationError::automation(format!(
                "{failed} of {} instances failed",
                self.outcomes.len()
            )));
        }
        Ok(self)
    }
}

fn fan_out<T>(
    instances: Vec<String>,
    reporter: &Reporter,
    mut apply: impl FnMut(&str) -> AutomationResult<T>,
) -> FanOut<T> {
    let outcomes = instances
        .into_iter()
        .map(|url| {
            let result = apply(&url);
            match &result {
                Ok(_) => reporter.success(&url),
                Err(err) => reporter.failed(&format!("{url}: {err}")),
            }
            InstanceOutcome { url, result }
        })
        .collect();
    FanOut { outcomes }
}

/// Environment data every target flow needs, with secrets already resolved.
struct Prepared {
    instances: Vec<String>,
    secrets: Vec<ResolvedSecret>,
    username: String,
    slug: String,
}

fn prepare<H: ProjectHost + ?Sized>(host: &H, environment: &str) -> AutomationResult<Prepared> {
    let descriptor = host.deploy_descriptor(None)?;
    let config = DeployConfiguration::from_json(&descriptor)?;
    let references = config.credential_variable_names(environment)?;
    if references.is_empty() {
        return Err(AutomationError::config(format!(
            "environment {environment} declares no credential reference"
        )));
    }
    let secrets = references
        .iter()
        .map(|(_, reference)| resolve(host, reference))
        .collect::<AutomationResult<Vec<_>>>()?;

    let instances = config.instance_urls(environment)?;
    if instances.is_empty() {
        return Err(AutomationError::config(format!(
            "environment {environment} declares no instances"
        )));
    }

    let slug = project_slug(host.path());
    let username = config
        .text(environment, USERNAME_KEY)?
        .map(str::to_string)
        .unwrap_or_else(|| slug.clone());
    Ok(Prepared {
        instances,
        secrets,
        username,
        slug,
    })
}

impl Prepared {
    fn password(&self) -> AutomationResult<&ResolvedSecret> {
        self.secrets
            .first()
            .ok_or_else(|| AutomationError::config("no credential reference resolved"))
    }
}

/// Create the project's repository, its deploy user and the user's write
/// permission on every Artifactory instance of `environment`.
pub fn provision_artifactory<H, S, F>(
    host: &H,
    environment: &str,
    connect: F,
    reporter: &Reporter,
) -> AutomationResult<FanOut<RepositoryOutcome>>
where
    H: ProjectHost + ?Sized,
    S: ArtifactStore,
    F: Fn(&str) -> AutomationResult<S>,
{
    let prepared = prepare(host, environment)?;
    let password = prepared.password()?;
    let repository = &prepared.slug;
    let username = &prepared.username;
    reporter.info(&format!(
        "provisioning repository {repository} for user {username} (password from {})",
        password.name()
    ));

    fan_out(prepared.instances.clone(), reporter, |url| {
        let store = connect(url)?;
        let outcome = store.create_repository(repository)?;
        store.create_or_replace_user(username, password)?;
        store.grant_permission(repository, username, &[Permission::Write])?;
        Ok(outcome)
    })
    .into_result()
}

/// Print the inventory named after the project on every Tower instance.
pub fn lookup_tower<H, S, F>(
    host: &H,
    environment: &str,
    connect: F,
    reporter: &Reporter,
) -> AutomationResult<FanOut<Option<Inventory>>>
where
    H: ProjectHost + ?Sized,
    S: InventorySource,
    F: Fn(&str, &str, ResolvedSecret) -> AutomationResult<S>,
{
    let prepared = prepare(host, environment)?;
    let password = prepared.password()?;
    let inventory_name = &prepared.slug;

    fan_out(prepared.instances.clone(), reporter, |url| {
        let source = connect(url, &prepared.username, password.clone())?;
        let inventory = source.inventory(inventory_name)?;
        match &inventory {
            Some(found) => reporter.info(&format!(
                "{url}: inventory {} (id {}) variables:\n{}",
                found.name, found.id, found.variables
            )),
            None => reporter.info(&format!("{url}: no inventory named {inventory_name}")),
        }
        Ok(inventory)
    })
    .into_result()
}
