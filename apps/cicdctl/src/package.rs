use anyhow::{Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs;
use std::path::{Path, PathBuf};
use tar::Builder;
use walkdir::WalkDir;

use crate::config::env_optional_string;
use crate::constants::ARTIFACTORY_ENVIRONMENT;
use crate::deploy::DeployConfiguration;
use crate::report::Reporter;
use crate::templates::project_slug;
use crate::utils::file_digests;

/// Always archived, whatever the exclusion lists say.
const ALWAYS_INCLUDED: &[&str] = &["robots.txt"];

const DEFAULT_PROJECT_NAME: &str = "just_a_test";
const DEFAULT_VERSION: &str = "999";
const DEFAULT_PIPELINE_ID: &str = "999";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveRules {
    pub exclude_directories: Vec<String>,
    pub exclude_extensions: Vec<String>,
}

impl ArchiveRules {
    /// Applies to files and directories alike; an excluded directory drops
    /// its whole subtree.
    pub fn excludes(&self, file_name: &str) -> bool {
        if ALWAYS_INCLUDED.contains(&file_name) {
            return false;
        }
        self.exclude_directories.iter().any(|dir| dir == file_name)
            || self
                .exclude_extensions
                .iter()
                .any(|ext| !ext.is_empty() && file_name.ends_with(ext.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageCoordinates {
    pub project_name: String,
    pub project_path: Option<String>,
    pub version: String,
    pub pipeline_id: String,
}

impl PackageCoordinates {
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            project_name: lookup("CI_PROJECT_NAME")
                .unwrap_or_else(|| DEFAULT_PROJECT_NAME.to_string()),
            project_path: lookup("CI_PROJECT_PATH"),
            version: lookup("VERSION").unwrap_or_else(|| DEFAULT_VERSION.to_string()),
            pipeline_id: lookup("CI_PIPELINE_ID")
                .unwrap_or_else(|| DEFAULT_PIPELINE_ID.to_string()),
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(env_optional_string)
    }

    pub fn package_name(&self) -> String {
        format!("{}-{}.{}", self.project_name, self.version, self.pipeline_id)
    }

    pub fn archive_name(&self) -> String {
        format!("{}.tar.gz", self.package_name())
    }

    /// The Artifactory repository key the archive is published to.
    pub fn repository(&self) -> String {
        match &self.project_path {
            Some(path) => project_slug(path),
            None => self.project_name.clone(),
        }
    }
}

pub fn artifact_urls(instances: &[String], repository: &str, archive_name: &str) -> Vec<String> {
    instances
        .iter()
        .map(|instance| format!("{}/{repository}/{archive_name}", instance.trim_end_matches('/')))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub path: PathBuf,
    pub entries: Vec<PathBuf>,
    pub sha1: String,
    pub sha256: String,
}

/// Writes `archive` from the tree under `base_dir`, replacing any previous
/// archive at that path. The archive never contains itself.
pub fn create_archive(
    base_dir: &Path,
    archive: &Path,
    rules: &ArchiveRules,
) -> Result<ArchiveSummary> {
    if let Some(parent) = archive.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    if archive.exists() {
        fs::remove_file(archive)
            .with_context(|| format!("failed to remove previous {}", archive.display()))?;
    }

    let file = fs::File::create(archive)
        .with_context(|| format!("failed to create {}", archive.display()))?;
    let archive_real = fs::canonicalize(archive)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = Builder::new(encoder);
    builder.follow_symlinks(false);

    let mut entries = Vec::new();
    let mut walker = WalkDir::new(base_dir).sort_by_file_name().into_iter();
    while let Some(entry) = walker.next() {
        let entry = entry.with_context(|| format!("failed to walk {}", base_dir.display()))?;
        let rel = entry.path().strip_prefix(base_dir).unwrap_or(entry.path());
        if rel.as_os_str().is_empty() {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy();
        if rules.excludes(&file_name) {
            if entry.file_type().is_dir() {
                walker.skip_current_dir();
            }
            continue;
        }
        if entry.file_type().is_dir() {
            builder
                .append_dir(rel, entry.path())
                .with_context(|| format!("failed to archive {}", entry.path().display()))?;
            continue;
        }
        if fs::canonicalize(entry.path()).ok().as_deref() == Some(archive_real.as_path()) {
            continue;
        }
        builder
            .append_path_with_name(entry.path(), rel)
            .with_context(|| format!("failed to archive {}", entry.path().display()))?;
        entries.push(rel.to_path_buf());
    }

    let encoder = builder.into_inner()?;
    encoder.finish()?;

    let digests = file_digests(archive)
        .with_context(|| format!("failed to checksum {}", archive.display()))?;
    Ok(ArchiveSummary {
        path: archive.to_path_buf(),
        entries,
        sha1: digests.sha1,
        sha256: digests.sha256,
    })
}

#[derive(Debug, Clone)]
pub struct PackageOptions {
    pub deploy_json: PathBuf,
    pub base_dir: PathBuf,
    pub environment: String,
}

impl Default for PackageOptions {
    fn default() -> Self {
        Self {
            deploy_json: PathBuf::from(crate::constants::DEPLOY_JSON),
            base_dir: PathBuf::from("."),
            environment: ARTIFACTORY_ENVIRONMENT.to_string(),
        }
    }
}

pub fn package(options: &PackageOptions, reporter: &Reporter) -> Result<ArchiveSummary> {
    let config = DeployConfiguration::load(&options.deploy_json)?;
    let rules = config.archive_rules(&options.environment)?;
    let instances = config.instance_urls(&options.environment)?;

    let coordinates = PackageCoordinates::from_env();
    let output_dir = env_optional_string("CI_PROJECT_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let archive = output_dir.join(coordinates.archive_name());

    reporter.info(&format!("creating {}", archive.display()));
    let summary = create_archive(&options.base_dir, &archive, &rules)?;
    reporter.success(&format!(
        "{} ({} files)",
        summary.path.display(),
        summary.entries.len()
    ));
    reporter.info(&format!("sha1 {}", summary.sha1));
    reporter.info(&format!("sha256 {}", summary.sha256));
    for url in artifact_urls(&instances, &coordinates.repository(), &coordinates.archive_name()) {
        reporter.info(&format!("artifact url: {url}"));
    }
    Ok(summary)
}
