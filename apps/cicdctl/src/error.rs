use thiserror::Error;

/// Every failure a flow can surface. Entry points catch this, log one line and exit 1.
#[derive(Debug, Error)]
pub enum AutomationError {
    /// Malformed or missing configuration, or an absent environment key.
    #[error("configuration error: {0}")]
    Config(String),

    /// Any git-side failure: clone, branch, stage, commit or push.
    #[error("repository error: {0}")]
    Repository(String),

    #[error("secret generation failed: {0}")]
    SecretGeneration(String),

    #[error("variable {name} does not exist on project {project}")]
    SecretNotFound { project: String, name: String },

    /// A target system (GitLab, Artifactory, Tower) answered with a non-success status.
    #[error("{url} returned {status}: {message}")]
    Provisioning {
        url: String,
        status: u16,
        message: String,
    },

    /// Transport-level failure before any status was received.
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Automation(String),
}

impl AutomationError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn repository(message: impl Into<String>) -> Self {
        Self::Repository(message.into())
    }

    pub fn automation(message: impl Into<String>) -> Self {
        Self::Automation(message.into())
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn http(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Http {
            url: url.into(),
            source,
        }
    }
}

pub type AutomationResult<T> = Result<T, AutomationError>;
