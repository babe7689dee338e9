use serde_json::Value;
use std::fs;
use std::path::Path;

use crate::constants::{
    ARCHIVE_EXCLUDE_DIRECTORIES_KEY, ARCHIVE_EXCLUDE_EXTENSIONS_KEY, INSTANCES_KEY,
    INSTANCES_SUFFIX, PASSWORD_SUFFIX,
};
use crate::error::{AutomationError, AutomationResult};
use crate::package::ArchiveRules;
use crate::secrets::CredentialReference;

#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    Text(String),
    List(Vec<String>),
    Other(Value),
}

impl Entry {
    fn from_value(value: Value) -> Self {
        match value {
            Value::String(text) => Entry::Text(text),
            Value::Array(items) if items.iter().all(Value::is_string) => Entry::List(
                items
                    .into_iter()
                    .filter_map(|item| match item {
                        Value::String(text) => Some(text),
                        _ => None,
                    })
                    .collect(),
            ),
            other => Entry::Other(other),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Entry::Text(text) => Some(text),
            _ => None,
        }
    }

}

#[derive(Debug, Clone, PartialEq)]
pub struct Environment {
    name: String,
    entries: Vec<(String, Entry)>,
}

impl Environment {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, key: &str) -> Option<&Entry> {
        self.entries
            .iter()
            .find(|(candidate, _)| candidate == key)
            .map(|(_, entry)| entry)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &Entry)> {
        self.entries.iter().map(|(key, entry)| (key.as_str(), entry))
    }
}

pub fn is_credential_key(key: &str) -> bool {
    key.ends_with(PASSWORD_SUFFIX)
}

/// Environments in file order. `_password` keys hold variable names, never values.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeployConfiguration {
    environments: Vec<Environment>,
}

impl DeployConfiguration {
    pub fn load(path: &Path) -> AutomationResult<Self> {
        let contents = fs::read_to_string(path).map_err(|err| {
            AutomationError::config(format!(
                "cannot read configuration file {}: {err}",
                path.display()
            ))
        })?;
        Self::from_json(&contents).map_err(|err| match err {
            AutomationError::Config(message) => {
                AutomationError::config(format!("{}: {message}", path.display()))
            }
            other => other,
        })
    }

    pub fn from_json(contents: &str) -> AutomationResult<Self> {
        let value: Value = serde_json::from_str(contents)
            .map_err(|err| AutomationError::config(format!("invalid deploy descriptor: {err}")))?;
        let Value::Object(root) = value else {
            return Err(AutomationError::config(
                "deploy descriptor must be a JSON object keyed by environment",
            ));
        };

        let mut environments = Vec::with_capacity(root.len());
        for (name, body) in root {
            let Value::Object(fields) = body else {
                return Err(AutomationError::config(format!(
                    "environment {name} must be a JSON object"
                )));
            };
            let mut entries = Vec::with_capacity(fields.len());
            for (key, raw) in fields {
                let entry = Entry::from_value(raw);
                // The offending value is not echoed: it may be a pasted secret.
                let names_variable = entry
                    .as_text()
                    .is_some_and(|text| CredentialReference::new(text).is_ok());
                if is_credential_key(&key) && !names_variable {
                    return Err(AutomationError::config(format!(
                        "{name}.{key} must name a CI/CD variable"
                    )));
                }
                entries.push((key, entry));
            }
            environments.push(Environment { name, entries });
        }
        Ok(Self { environments })
    }

    pub fn environment_names(&self) -> impl Iterator<Item = &str> {
        self.environments.iter().map(|env| env.name.as_str())
    }

    pub fn environment(&self, name: &str) -> AutomationResult<&Environment> {
        self.environments
            .iter()
            .find(|env| env.name == name)
            .ok_or_else(|| {
                AutomationError::config(format!(
                    "environment {name} is not declared in the deploy descriptor"
                ))
            })
    }

    /// `(role, variable name)` for every `_password` key, in declaration order.
    pub fn credential_variable_names(
        &self,
        environment: &str,
    ) -> AutomationResult<Vec<(String, CredentialReference)>> {
        let env = self.environment(environment)?;
        env.entries
            .iter()
            .filter(|(key, _)| is_credential_key(key))
            .map(|(key, entry)| {
                let name = entry.as_text().unwrap_or_default();
                Ok((key.clone(), CredentialReference::new(name)?))
            })
            .collect()
    }

    /// Reads `instances`, falling back to `<environment>_instances`.
    pub fn instance_urls(&self, environment: &str) -> AutomationResult<Vec<String>> {
        let env = self.environment(environment)?;
        let prefixed = format!("{environment}{INSTANCES_SUFFIX}");
        let (key, entry) = match env.get(INSTANCES_KEY) {
            Some(entry) => (INSTANCES_KEY, entry),
            None => match env.get(&prefixed) {
                Some(entry) => (prefixed.as_str(), entry),
                None => return Ok(Vec::new()),
            },
        };
        match entry {
            Entry::List(urls) => Ok(urls.clone()),
            _ => Err(AutomationError::config(format!(
                "{environment}.{key} must be a list of URLs"
            ))),
        }
    }

    pub fn text(&self, environment: &str, key: &str) -> AutomationResult<Option<&str>> {
        let env = self.environment(environment)?;
        Ok(env.get(key).and_then(Entry::as_text))
    }

    pub fn archive_rules(&self, environment: &str) -> AutomationResult<ArchiveRules> {
        let env = self.environment(environment)?;
        let list = |key: &str| -> AutomationResult<Vec<String>> {
            match env.get(key) {
                None => Ok(Vec::new()),
                Some(Entry::List(items)) => Ok(items.clone()),
                Some(_) => Err(AutomationError::config(format!(
                    "{environment}.{key} must be a list of strings"
                ))),
            }
        };
        Ok(ArchiveRules {
            exclude_directories: list(ARCHIVE_EXCLUDE_DIRECTORIES_KEY)?,
            exclude_extensions: list(ARCHIVE_EXCLUDE_EXTENSIONS_KEY)?,
        })
    }
}
