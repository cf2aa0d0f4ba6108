//! Deploy a built webapp into an existing S3 bucket fronted by a
//! CloudFront distribution.
//!
//! [`WebappDeploy`] declares a deploy function that syncs a zip artifact
//! into the bucket's `web/` prefix, keeps a deployment log, prunes old
//! deployments and invalidates the distribution. When given a [`Source`],
//! the artifact is deployed as part of every stack create/update.
//!
//! ```no_run
//! use aws_cfn_stack::{Environment, Stack};
//! use aws_s3::BucketRef;
//! use webapp_deploy::{Source, WebappDeploy, WebappDeployProps};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut stack = Stack::new("Webapp", Environment::new("123456789123", "eu-west-1"))?;
//! let root = stack.root();
//! let props = WebappDeployProps::new(BucketRef::from_bucket_name("web-bucket"))
//!     .distribution("EKJ2IPY1KTEAR1")
//!     .source(Source::asset("build"));
//! WebappDeploy::new(&mut stack, root, "WebappDeploy", props)?;
//! println!("{}", stack.to_template_json()?);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod source;
pub mod webapp_deploy;

pub use config::DeployConfigFile;
pub use error::{ConfigError, SourceError, WebappDeployError};
pub use source::{Source, SourceConfig, SourceContext};
pub use webapp_deploy::{WebappDeploy, WebappDeployProps};
