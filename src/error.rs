use std::path::PathBuf;

use aws_cfn_stack::StackError;
use aws_lambda::LambdaError;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Binding a {kind} source requires {requirement}")]
    MissingContext {
        kind: &'static str,
        requirement: &'static str,
    },

    #[error("Asset {path:?} is not a zip archive. Use a directory or a .zip file")]
    NotAZipArchive { path: PathBuf },

    #[error(transparent)]
    Stack(#[from] StackError),
}

#[derive(Debug, thiserror::Error)]
pub enum WebappDeployError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Lambda(#[from] LambdaError),

    #[error(transparent)]
    Stack(#[from] StackError),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}\n{source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path:?}\n{source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error(transparent)]
    Stack(#[from] StackError),
}
