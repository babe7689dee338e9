use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{AutomationError, AutomationResult};
use crate::utils::copy_dir;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateContext {
    pub project: String,
    pub project_slug: String,
}

impl TemplateContext {
    pub fn new(project_path: &str) -> Self {
        Self {
            project: project_path.to_string(),
            project_slug: project_slug(project_path),
        }
    }
}

pub fn project_slug(project_path: &str) -> String {
    project_path.trim_matches('/').replace('/', "-")
}

/// `{{ project }}` becomes the project path, `{{ project_slug }}` its slug.
pub fn render_placeholders(template: &str, context: &TemplateContext) -> String {
    let mut rendered = template.to_string();
    for (names, value) in [
        (["{{ project_slug }}", "{{project_slug}}"], &context.project_slug),
        (["{{ project }}", "{{project}}"], &context.project),
    ] {
        for name in names {
            rendered = rendered.replace(name, value);
        }
    }
    rendered
}

#[derive(Debug, Clone)]
pub struct TemplateSet {
    root: PathBuf,
}

impl TemplateSet {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Copies the template directory `name` to `<dest_root>/<name>`, replacing
    /// an existing directory. A plain file in the way is fatal and left alone.
    pub fn install_directory(&self, name: &str, dest_root: &Path) -> AutomationResult<PathBuf> {
        let src = self.root.join(name);
        let dst = dest_root.join(name);
        if let Ok(meta) = fs::symlink_metadata(&dst) {
            if !meta.is_dir() {
                return Err(AutomationError::automation(format!(
                    "file named \"{name}\" already exists in the repository"
                )));
            }
        }
        if !src.is_dir() {
            return Err(AutomationError::automation(format!(
                "template directory {} does not exist",
                src.display()
            )));
        }
        copy_dir(&src, &dst).map_err(|err| {
            AutomationError::automation(format!(
                "cannot copy {} to {}, with error: {err}",
                src.display(),
                dst.display()
            ))
        })?;
        Ok(PathBuf::from(name))
    }

    pub fn render_file(
        &self,
        template: &str,
        dest_root: &Path,
        dest_name: &str,
        context: &TemplateContext,
    ) -> AutomationResult<PathBuf> {
        let src = self.root.join(template);
        let contents = fs::read_to_string(&src).map_err(|err| {
            AutomationError::io(format!("cannot read template {}", src.display()), err)
        })?;
        let dst = dest_root.join(dest_name);
        fs::write(&dst, render_placeholders(&contents, context))
            .map_err(|err| AutomationError::io(format!("cannot write {}", dst.display()), err))?;
        Ok(PathBuf::from(dest_name))
    }
}
