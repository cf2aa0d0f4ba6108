use std::collections::BTreeMap;
use std::time::Duration;

use aws_cfn_stack::{NodeId, Stack, StackError, SubTemplate};
use aws_cloudfront_distribution::DistributionRef;
use aws_iam::{grant, Grantable, PolicyStatement};
use aws_lambda::{Function, FunctionCode, FunctionProps, LambdaInvoke, LambdaInvokeProps, Runtime};
use aws_s3::BucketRef;
use serde_json::Value;
use tracing::info;

use crate::error::WebappDeployError;
use crate::source::{Source, SourceConfig, SourceContext};

/// deployments older than this are pruned, except the newest of them.
pub const DEFAULT_EXPIRE_SECONDS: u64 = 5 * 24 * 60 * 60;
/// constant so that every stack update re-invokes the deploy function
/// rather than replacing the invocation resource.
pub const PHYSICAL_RESOURCE_ID: &str = "webapp-deploy";
pub const DEFAULT_HANDLER: &str = "webapp_deploy.main.handler";
pub const DEFAULT_CODE_PATH: &str = "dist";
pub const DEPLOY_FUNCTION_TIMEOUT_SECONDS: u16 = 120;

/// prefix of the web bucket the site is served from.
pub const WEB_PREFIX: &str = "web";
pub const DEPLOY_LOG_KEY: &str = "deployments.log";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebappDeployProps {
    /// bucket the artifacts are deployed into, under `web/`.
    pub web_bucket: BucketRef,
    /// bucket that builds may be deployed from outside of the stack.
    /// the deploy function is allowed to read it.
    pub builds_bucket: Option<BucketRef>,
    /// invalidated after each deploy.
    pub distribution: Option<DistributionRef>,
    /// regex of files to leave out of a deployment, ie: `\.map$`
    pub exclude_pattern: Option<String>,
    /// defaults to 5 days.
    pub prune_deployments_older_than: Option<Duration>,
    pub function_name: Option<String>,
    /// artifact deployed as part of every stack create/update.
    pub source: Option<Source>,
    pub code: FunctionCode,
    pub runtime: Runtime,
    pub handler: String,
    /// add stack outputs with the deploy function's name and arn.
    pub with_outputs: bool,
}

impl WebappDeployProps {
    pub fn new(web_bucket: BucketRef) -> Self {
        Self {
            web_bucket,
            builds_bucket: None,
            distribution: None,
            exclude_pattern: None,
            prune_deployments_older_than: None,
            function_name: None,
            source: None,
            code: FunctionCode::from_asset(DEFAULT_CODE_PATH),
            runtime: Runtime::default(),
            handler: DEFAULT_HANDLER.to_string(),
            with_outputs: false,
        }
    }

    pub fn builds_bucket(mut self, bucket: BucketRef) -> Self {
        self.builds_bucket = Some(bucket);
        self
    }

    pub fn distribution<D: Into<DistributionRef>>(mut self, distribution: D) -> Self {
        self.distribution = Some(distribution.into());
        self
    }

    pub fn exclude_pattern(mut self, pattern: &str) -> Self {
        self.exclude_pattern = Some(pattern.to_string());
        self
    }

    pub fn prune_deployments_older_than(mut self, age: Duration) -> Self {
        self.prune_deployments_older_than = Some(age);
        self
    }

    pub fn function_name(mut self, name: &str) -> Self {
        self.function_name = Some(name.to_string());
        self
    }

    pub fn source(mut self, source: Source) -> Self {
        self.source = Some(source);
        self
    }

    pub fn code(mut self, code: FunctionCode) -> Self {
        self.code = code;
        self
    }

    pub fn with_outputs(mut self, with_outputs: bool) -> Self {
        self.with_outputs = with_outputs;
        self
    }
}

/// the environment the deploy function reads its configuration from.
pub fn deploy_environment(props: &WebappDeployProps) -> BTreeMap<String, SubTemplate> {
    let mut environment = BTreeMap::new();
    let expire_seconds = props.prune_deployments_older_than
        .map(|d| d.as_secs())
        .unwrap_or(DEFAULT_EXPIRE_SECONDS);
    environment.insert("DEPLOY_LOG_BUCKET_URL".to_string(), props.web_bucket.s3_url(DEPLOY_LOG_KEY));
    environment.insert("EXPIRE_SECONDS".to_string(), SubTemplate::literal(&expire_seconds.to_string()));
    environment.insert("TARGET_BUCKET_URL".to_string(), props.web_bucket.s3_url(WEB_PREFIX));
    if let Some(distribution) = &props.distribution {
        environment.insert("CF_DISTRIBUTION_ID".to_string(), SubTemplate::literal(distribution.distribution_id()));
    }
    if let Some(pattern) = &props.exclude_pattern {
        environment.insert("EXCLUDE_PATTERN".to_string(), SubTemplate::literal(pattern));
    }
    environment
}

/// `{"artifactS3Url":"s3://<bucket>/<key>"}`
pub fn artifact_payload(source: &SourceConfig) -> SubTemplate {
    let quoted_key = Value::String(source.zip_object_key.clone()).to_string();
    let key = &quoted_key[1..quoted_key.len() - 1];
    SubTemplate::literal(r#"{"artifactS3Url":"s3://"#)
        .append(source.bucket.bucket_name())
        .append_literal("/")
        .append_literal(key)
        .append_literal(r#""}"#)
}

fn grant_web_bucket(stack: &mut Stack, bucket: &BucketRef, grantee: &dyn Grantable) -> Result<(), StackError> {
    let web_objects = format!("{WEB_PREFIX}/*");
    grant(stack, grantee, &["s3:GetObject", "s3:PutObject", "s3:DeleteObject"], vec![bucket.arn_for_objects(&web_objects)])?;
    grant(stack, grantee, &["s3:GetObject", "s3:PutObject"], vec![bucket.arn_for_objects(DEPLOY_LOG_KEY)])?;
    grant(stack, grantee, &["s3:List*"], vec![bucket.bucket_arn()])
}

/// deploys a built webapp into an existing bucket and distribution.
/// With a source set, the source is deployed on every stack create/update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebappDeploy {
    node: NodeId,
    deploy_fn: Function,
    source: Option<SourceConfig>,
    invocation: Option<LambdaInvoke>,
}

impl WebappDeploy {
    pub fn new(stack: &mut Stack, scope: NodeId, id: &str, props: WebappDeployProps) -> Result<Self, WebappDeployError> {
        let node = stack.add_child(scope, id)?;

        let invalidation_target = match &props.distribution {
            Some(distribution) => distribution.arn(),
            None => SubTemplate::literal("*"),
        };
        let mut fn_props = FunctionProps::new(props.runtime, &props.handler, props.code.clone());
        fn_props.function_name = props.function_name.clone();
        fn_props.environment = deploy_environment(&props);
        fn_props.reserved_concurrent_executions = Some(1);
        fn_props.timeout = DEPLOY_FUNCTION_TIMEOUT_SECONDS;
        fn_props.initial_policy.push(PolicyStatement::allow(&["cloudfront:CreateInvalidation"], vec![invalidation_target]));
        let deploy_fn = Function::new(stack, node, "Resource", fn_props)?;

        grant_web_bucket(stack, &props.web_bucket, &deploy_fn)?;
        if let Some(builds_bucket) = &props.builds_bucket {
            builds_bucket.grant_read(stack, &deploy_fn)?;
        }

        let mut source = None;
        let mut invocation = None;
        if let Some(descriptor) = &props.source {
            let context = SourceContext { handler_role: Some(deploy_fn.role().clone()) };
            let bound = descriptor.bind(stack, node, Some(&context))?;
            let invoke = LambdaInvoke::new(stack, node, "CustomResource", LambdaInvokeProps {
                function: &deploy_fn,
                payload: artifact_payload(&bound),
                physical_resource_id: PHYSICAL_RESOURCE_ID.to_string(),
                timeout: DEPLOY_FUNCTION_TIMEOUT_SECONDS,
            })?;
            source = Some(bound);
            invocation = Some(invoke);
        }

        if props.with_outputs {
            let prefix = deploy_fn.logical_id().to_string();
            stack.add_output(&format!("{prefix}FunctionName"), "name of the webapp deploy function", deploy_fn.function_name());
            stack.add_output(&format!("{prefix}FunctionArn"), "arn of the webapp deploy function", deploy_fn.arn_value());
        }

        let path = stack.path(node)?;
        info!(
            construct = %path,
            function = deploy_fn.logical_id(),
            deploys_on_update = invocation.is_some(),
            "declared webapp deploy"
        );
        Ok(Self { node, deploy_fn, source, invocation })
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn deploy_fn(&self) -> &Function {
        &self.deploy_fn
    }

    /// the bound source, if one was given.
    pub fn source(&self) -> Option<&SourceConfig> {
        self.source.as_ref()
    }

    pub fn invocation(&self) -> Option<&LambdaInvoke> {
        self.invocation.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props() -> WebappDeployProps {
        WebappDeployProps::new(BucketRef::from_bucket_name("web-bucket"))
    }

    #[test]
    fn environment_defaults() {
        let env = deploy_environment(&props());
        assert_eq!(env.len(), 3);
        assert_eq!(env["DEPLOY_LOG_BUCKET_URL"].to_value(), "s3://web-bucket/deployments.log");
        assert_eq!(env["TARGET_BUCKET_URL"].to_value(), "s3://web-bucket/web");
        assert_eq!(env["EXPIRE_SECONDS"].to_value(), "432000");
    }

    #[test]
    fn optional_environment_keys() {
        let env = deploy_environment(&props()
            .distribution(DistributionRef::from_attributes("EKJ2IPY1KTEAR1", "example.com"))
            .exclude_pattern(r"\.map$")
            .prune_deployments_older_than(Duration::from_secs(3600)));
        assert_eq!(env["CF_DISTRIBUTION_ID"].to_value(), "EKJ2IPY1KTEAR1");
        assert_eq!(env["EXCLUDE_PATTERN"].to_value(), r"\.map$");
        assert_eq!(env["EXPIRE_SECONDS"].to_value(), "3600");
    }

    #[test]
    fn payload_is_json() {
        let source = SourceConfig { bucket: BucketRef::from_bucket_name("S"), zip_object_key: "artifact.zip".into() };
        let payload = artifact_payload(&source).to_value();
        let parsed: Value = serde_json::from_str(payload.as_str().unwrap()).unwrap();
        assert_eq!(parsed, serde_json::json!({ "artifactS3Url": "s3://S/artifact.zip" }));
    }

    #[test]
    fn payload_with_unresolved_bucket_is_substituted() {
        let source = SourceConfig {
            bucket: BucketRef::from_template(SubTemplate::raw("assets-${AWS::AccountId}")),
            zip_object_key: "k.zip".into(),
        };
        assert_eq!(
            artifact_payload(&source).to_value(),
            serde_json::json!({ "Fn::Sub": r#"{"artifactS3Url":"s3://assets-${AWS::AccountId}/k.zip"}"# })
        );
    }
}
