use std::path::PathBuf;

/// Structural failures. Any of these aborts the whole batch or harvest;
/// per-run and per-file problems are recorded as data instead.
#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    #[error("invalid combination grammar for `{key}`: {message}")]
    Grammar { key: String, message: String },
    #[error("invalid configuration for `{key}`: {message}")]
    Configuration { key: String, message: String },
    #[error("result store {path} is unusable: {message}")]
    Store { path: String, message: String },
    #[error("plugin `{name}` failed: {source}")]
    Plugin {
        name: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, SweepError>;

impl SweepError {
    pub fn grammar(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Grammar {
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn configuration(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn store(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Store {
            path: path.into().display().to_string(),
            message: message.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into().display().to_string(),
            source,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Grammar { .. } => "grammar_error",
            Self::Configuration { .. } => "configuration_error",
            Self::Store { .. } => "store_error",
            Self::Plugin { .. } => "plugin_failure",
            Self::Io { .. } => "io_error",
        }
    }
}

