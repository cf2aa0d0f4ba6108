//! TOML description of a stack with one webapp deployment in it.
//!
//! ```toml
//! [stack]
//! name = "webapp"
//! account = "123456789123"
//! region = "eu-west-1"
//!
//! [deployment]
//! web_bucket = "web-bucket"
//! distribution_id = "EKJ2IPY1KTEAR1"
//! exclude_pattern = '\.map$'
//!
//! [deployment.source]
//! type = "asset"
//! path = "build"
//! ```
//!
//! Relative paths are resolved against the directory of the config file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use aws_cfn_stack::{AssetOptions, Environment, Stack, ZipAssetPackager, DEFAULT_OUT_DIR};
use aws_cloudfront_distribution::DistributionRef;
use aws_lambda::{FunctionCode, Runtime};
use aws_s3::BucketRef;
use serde::Deserialize;
use tracing::debug;

use crate::error::ConfigError;
use crate::source::Source;
use crate::webapp_deploy::{WebappDeployProps, DEFAULT_CODE_PATH};

pub const DEFAULT_CONSTRUCT_ID: &str = "WebappDeploy";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeployConfigFile {
    pub stack: StackSection,
    pub deployment: DeploymentSection,
    /// directory the config was loaded from.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StackSection {
    pub name: String,
    pub account: Option<String>,
    pub region: Option<String>,
    pub out_dir: Option<PathBuf>,
    pub asset_bucket: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeploymentSection {
    #[serde(default = "default_construct_id")]
    pub id: String,
    pub web_bucket: String,
    pub builds_bucket: Option<String>,
    pub distribution_id: Option<String>,
    pub distribution_domain_name: Option<String>,
    pub exclude_pattern: Option<String>,
    pub prune_deployments_older_than_seconds: Option<u64>,
    pub function_name: Option<String>,
    #[serde(default)]
    pub with_outputs: bool,
    pub source: Option<SourceSection>,
    pub code: Option<CodeSection>,
}

fn default_construct_id() -> String {
    DEFAULT_CONSTRUCT_ID.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", deny_unknown_fields)]
pub enum SourceSection {
    Bucket {
        bucket: String,
        zip_object_key: String,
    },
    Asset {
        path: PathBuf,
        #[serde(default)]
        exclude: Vec<String>,
        asset_hash: Option<String>,
    },
}

/// the deploy function's code. Either a local `path` or a `bucket` + `key`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CodeSection {
    pub path: Option<PathBuf>,
    pub bucket: Option<String>,
    pub key: Option<String>,
    pub runtime: Option<Runtime>,
    pub handler: Option<String>,
}

impl DeployConfigFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let config = Self::parse(&contents, base_dir).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse { path: path.to_path_buf(), source },
            other => other,
        })?;
        debug!(path = %path.display(), stack = %config.stack.name, "loaded config");
        Ok(config)
    }

    pub fn parse(contents: &str, base_dir: PathBuf) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        })?;
        config.base_dir = base_dir;
        Ok(config)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    pub fn out_dir(&self) -> PathBuf {
        let out_dir = self.stack.out_dir.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_OUT_DIR));
        self.resolve(&out_dir)
    }

    /// an empty stack for the `[stack]` section, staging assets into `out_dir`.
    pub fn new_stack(&self) -> Result<Stack, ConfigError> {
        let env = Environment {
            account: self.stack.account.clone(),
            region: self.stack.region.clone(),
        };
        let mut stack = Stack::new(&self.stack.name, env)?
            .with_packager(Box::new(ZipAssetPackager::new(self.out_dir())));
        if let Some(bucket) = &self.stack.asset_bucket {
            stack = stack.with_asset_bucket(bucket);
        }
        Ok(stack)
    }

    pub fn into_props(&self) -> Result<WebappDeployProps, ConfigError> {
        let d = &self.deployment;
        let mut props = WebappDeployProps::new(BucketRef::from_bucket_name(&d.web_bucket))
            .with_outputs(d.with_outputs);
        if let Some(bucket) = &d.builds_bucket {
            props = props.builds_bucket(BucketRef::from_bucket_name(bucket));
        }
        match (&d.distribution_id, &d.distribution_domain_name) {
            (Some(id), Some(domain)) => props = props.distribution(DistributionRef::from_attributes(id, domain)),
            (Some(id), None) => props = props.distribution(id.as_str()),
            (None, Some(_)) => {
                return Err(ConfigError::Invalid("distribution_domain_name is set without a distribution_id".into()));
            }
            (None, None) => {}
        }
        if let Some(pattern) = &d.exclude_pattern {
            props = props.exclude_pattern(pattern);
        }
        if let Some(seconds) = d.prune_deployments_older_than_seconds {
            props = props.prune_deployments_older_than(Duration::from_secs(seconds));
        }
        if let Some(name) = &d.function_name {
            props = props.function_name(name);
        }
        if let Some(source) = &d.source {
            props = props.source(match source {
                SourceSection::Bucket { bucket, zip_object_key } => {
                    Source::bucket(BucketRef::from_bucket_name(bucket), zip_object_key)
                }
                SourceSection::Asset { path, exclude, asset_hash } => {
                    let options = AssetOptions { asset_hash: asset_hash.clone(), exclude: exclude.clone() };
                    Source::asset_with_options(self.resolve(path), options)
                }
            });
        }

        let code = d.code.clone().unwrap_or_default();
        props.code = match (&code.path, &code.bucket, &code.key) {
            (None, None, None) => FunctionCode::from_asset(self.resolve(Path::new(DEFAULT_CODE_PATH))),
            (Some(path), None, None) => FunctionCode::from_asset(self.resolve(path)),
            (None, Some(bucket), Some(key)) => FunctionCode::from_bucket(BucketRef::from_bucket_name(bucket), key),
            _ => {
                return Err(ConfigError::Invalid("[deployment.code] needs either a path, or a bucket and a key".into()));
            }
        };
        if let Some(runtime) = code.runtime {
            props.runtime = runtime;
        }
        if let Some(handler) = code.handler {
            props.handler = handler;
        }
        Ok(props)
    }
}
