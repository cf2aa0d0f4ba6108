use std::collections::BTreeMap;
use std::path::PathBuf;

use aws_cfn_stack::{get_att, get_ref, AssetOptions, CfnResource, NodeId, Stack, StackError, SubTemplate};
use aws_iam::{grant, Grantable, PolicyStatement, Role, RoleProps, LAMBDA_BASIC_EXECUTION_POLICY_ARN};
use aws_s3::{Asset, BucketRef};
use serde_json::{json, Map, Value};
use tracing::debug;

pub use lambda::function::{CfnFunction, Code};

pub mod invoke;

pub use invoke::{CfnLambdaInvoke, LambdaInvoke, LambdaInvokeProps};

#[derive(Debug, thiserror::Error)]
pub enum LambdaError {
    #[error(transparent)]
    Stack(#[from] StackError),

    #[error("Function code at {path:?} must be a directory or a zip archive")]
    CodeNotAZipArchive { path: PathBuf },

    #[error("{message}")]
    InvalidProps { message: String },

    #[error("Runtime {runtime:?} is not known to the resource model\n{source}")]
    UnknownRuntime { runtime: Runtime, source: serde_json::Error },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum Runtime {
    #[serde(rename = "python3.8")]
    Python38,
    #[default]
    #[serde(rename = "python3.9")]
    Python39,
    #[serde(rename = "python3.10")]
    Python310,
    #[serde(rename = "nodejs18.x")]
    Nodejs18x,
    #[serde(rename = "provided.al2")]
    ProvidedAl2,
}

impl Runtime {
    pub fn as_str(&self) -> &'static str {
        match self {
            Runtime::Python38 => "python3.8",
            Runtime::Python39 => "python3.9",
            Runtime::Python310 => "python3.10",
            Runtime::Nodejs18x => "nodejs18.x",
            Runtime::ProvidedAl2 => "provided.al2",
        }
    }
}

/// where the function's code comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FunctionCode {
    /// a local directory (zipped) or zip file, packaged as an asset.
    Asset { path: PathBuf, options: AssetOptions },
    /// a zip archive that is already in a bucket.
    Bucket { bucket: BucketRef, key: String },
    /// source inlined into the template. Only for small handlers.
    Inline(String),
}

impl FunctionCode {
    pub fn from_asset<P: Into<PathBuf>>(path: P) -> Self {
        FunctionCode::Asset { path: path.into(), options: AssetOptions::default() }
    }

    pub fn from_bucket(bucket: BucketRef, key: &str) -> Self {
        FunctionCode::Bucket { bucket, key: key.to_string() }
    }
}

/// the function as declared in the stack. Environment values may
/// reference other resources, so they are rendered next to the
/// generated model rather than through it.
pub struct FunctionResource {
    pub function: CfnFunction,
    pub environment: BTreeMap<String, SubTemplate>,
}

impl CfnResource for FunctionResource {
    fn type_string(&self) -> &'static str {
        self.function.type_string()
    }

    fn properties(&self) -> Value {
        let mut properties = self.function.properties();
        if !self.environment.is_empty() {
            let variables: Map<String, Value> = self.environment.iter()
                .map(|(k, v)| (k.clone(), v.to_value()))
                .collect();
            if let Value::Object(map) = &mut properties {
                map.insert("Environment".to_string(), json!({ "Variables": variables }));
            }
        }
        properties
    }
}

#[derive(Debug, Clone)]
pub struct FunctionProps {
    /// physical name. By default cloudformation generates one.
    pub function_name: Option<String>,
    pub runtime: Runtime,
    pub handler: String,
    pub code: FunctionCode,
    pub environment: BTreeMap<String, SubTemplate>,
    pub reserved_concurrent_executions: Option<u16>,
    /// seconds. Defaults to 3. Valid values: 1 - 900
    pub timeout: u16,
    /// MB. Defaults to 128. Valid values: 128 - 10240
    pub memory_size: u16,
    /// statements added to the execution role before anything else.
    pub initial_policy: Vec<PolicyStatement>,
}

impl FunctionProps {
    pub fn new(runtime: Runtime, handler: &str, code: FunctionCode) -> Self {
        Self {
            function_name: None,
            runtime,
            handler: handler.to_string(),
            code,
            environment: BTreeMap::new(),
            reserved_concurrent_executions: None,
            timeout: 3,
            memory_size: 128,
            initial_policy: vec![],
        }
    }

    pub fn is_valid(&self) -> Option<String> {
        if let Some(name) = &self.function_name {
            if name.is_empty() || name.len() > 64 {
                return Some(format!("Invalid function name {:?}\nMust be between 1 and 64 characters", name));
            }
        }
        if self.memory_size < 128 || self.memory_size > 10240 {
            return Some(format!("Invalid memory size {:?}\nMust be between 128 and 10240", self.memory_size));
        }
        if self.timeout < 1 || self.timeout > 900 {
            return Some(format!("Invalid timeout {:?}\nMust be between 1 and 900", self.timeout));
        }
        for key in self.environment.keys() {
            let starts_alpha = key.chars().next().map(|c| c.is_ascii_alphabetic()).unwrap_or(false);
            if !starts_alpha || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Some(format!("Invalid environment variable name {:?}", key));
            }
        }
        None
    }
}

/// a lambda function together with its execution role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    node: NodeId,
    logical_id: String,
    role: Role,
}

impl Function {
    pub fn new(stack: &mut Stack, scope: NodeId, id: &str, props: FunctionProps) -> Result<Self, LambdaError> {
        if let Some(message) = props.is_valid() {
            return Err(LambdaError::InvalidProps { message });
        }
        let runtime = serde_json::from_value(json!(props.runtime.as_str()))
            .map_err(|source| LambdaError::UnknownRuntime { runtime: props.runtime, source })?;
        let node = stack.add_child(scope, id)?;
        let role = Role::new(stack, node, "ServiceRole", RoleProps {
            assumed_by: "lambda.amazonaws.com".into(),
            managed_policy_arns: vec![LAMBDA_BASIC_EXECUTION_POLICY_ARN.to_string()],
            ..Default::default()
        })?;
        for statement in props.initial_policy {
            role.add_to_policy(stack, statement)?;
        }

        let code = match props.code {
            FunctionCode::Asset { path, options } => {
                let asset = Asset::new(stack, node, "Code", &path, &options)?;
                if !asset.is_zip_archive() {
                    return Err(LambdaError::CodeNotAZipArchive { path });
                }
                Code {
                    s3_bucket: Some(asset.bucket().bucket_name().clone().into()),
                    s3_key: Some(asset.object_key().into()),
                    ..Default::default()
                }
            }
            FunctionCode::Bucket { bucket, key } => Code {
                s3_bucket: Some(bucket.bucket_name().clone().into()),
                s3_key: Some(key.into()),
                ..Default::default()
            },
            FunctionCode::Inline(source) => Code {
                zip_file: Some(source.into()),
                ..Default::default()
            },
        };

        let function = CfnFunction {
            function_name: props.function_name.map(Into::into),
            runtime,
            handler: Some(props.handler.into()),
            code,
            role: role.arn_value().into(),
            reserved_concurrent_executions: props.reserved_concurrent_executions.map(Into::into),
            timeout: Some(props.timeout.into()),
            memory_size: Some(props.memory_size.into()),
            ..Default::default()
        };
        let resource = stack.add_resource(node, "Resource", FunctionResource { function, environment: props.environment })?;
        let logical_id = stack.logical_id(resource)?;
        debug!(function = %logical_id, role = role.logical_id(), "declared function");
        Ok(Self { node, logical_id, role })
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn logical_id(&self) -> &str {
        &self.logical_id
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    /// { "Ref": <function> }, which resolves to the function name.
    pub fn function_name(&self) -> Value {
        get_ref(&self.logical_id)
    }

    pub fn arn(&self) -> SubTemplate {
        SubTemplate::att_of(&self.logical_id, "Arn")
    }

    pub fn arn_value(&self) -> Value {
        get_att(&self.logical_id, "Arn")
    }

    /// allow `grantee` to invoke this function, including any of its versions.
    pub fn grant_invoke(&self, stack: &mut Stack, grantee: &dyn Grantable) -> Result<(), StackError> {
        grant(stack, grantee, &["lambda:InvokeFunction"], vec![self.arn(), self.arn().append_literal(":*")])
    }
}

impl Grantable for Function {
    fn grant_principal(&self) -> &Role {
        &self.role
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_cfn_stack::{AssetError, AssetPackager, AssetPackaging, Environment, PackagedAsset};
    use std::path::Path;

    struct FakePackager;

    impl AssetPackager for FakePackager {
        fn package(&self, path: &Path, _options: &AssetOptions) -> Result<PackagedAsset, AssetError> {
            let is_zip_archive = path.extension().is_none() || path.extension().map(|e| e == "zip").unwrap_or(false);
            Ok(PackagedAsset {
                source_hash: "abc".into(),
                object_key: if is_zip_archive { "abc.zip".into() } else { "abc.txt".into() },
                is_zip_archive,
                packaging: if path.extension().is_none() { AssetPackaging::ZipDirectory } else { AssetPackaging::File },
                staged_path: None,
            })
        }
    }

    fn stack() -> Stack {
        Stack::new("Stack", Environment::new("123456789123", "eu-west-1"))
            .unwrap()
            .with_packager(Box::new(FakePackager))
    }

    #[test]
    fn function_from_asset() {
        let mut stack = stack();
        let root = stack.root();
        let mut props = FunctionProps::new(Runtime::Python39, "main.handler", FunctionCode::from_asset("dist"));
        props.reserved_concurrent_executions = Some(1);
        props.timeout = 120;
        props.environment.insert("FOO".into(), "bar".into());
        let f = Function::new(&mut stack, root, "Deploy", props).unwrap();
        assert_eq!(f.logical_id(), "Deploy");
        assert_eq!(f.role().logical_id(), "DeployServiceRole");

        let template = stack.synth().unwrap();
        let props = &template.resources["Deploy"].properties;
        assert_eq!(template.resources["Deploy"].ty, "AWS::Lambda::Function");
        assert_eq!(props["Runtime"], "python3.9");
        assert_eq!(props["Code"]["S3Bucket"], "cdk-hnb659fds-assets-123456789123-eu-west-1");
        assert_eq!(props["Code"]["S3Key"], "abc.zip");
        assert_eq!(props["Role"], get_att("DeployServiceRole", "Arn"));
        assert_eq!(props["Environment"]["Variables"]["FOO"], "bar");
        assert_eq!(props["ReservedConcurrentExecutions"], 1);
        assert_eq!(props["Timeout"], 120);
        assert_eq!(props["MemorySize"], 128);
        assert!(props.get("FunctionName").map_or(true, Value::is_null));
    }

    #[test]
    fn non_zip_code_is_rejected() {
        let mut stack = stack();
        let root = stack.root();
        let props = FunctionProps::new(Runtime::Python39, "main.handler", FunctionCode::from_asset("notes.txt"));
        let err = Function::new(&mut stack, root, "Deploy", props).unwrap_err();
        assert!(matches!(err, LambdaError::CodeNotAZipArchive { .. }));
    }

    #[test]
    fn invalid_props_are_rejected_before_declaring() {
        let mut stack = stack();
        let root = stack.root();
        let mut props = FunctionProps::new(Runtime::Python39, "index.handler", FunctionCode::Inline("pass".into()));
        props.timeout = 901;
        let err = Function::new(&mut stack, root, "Fn", props.clone()).unwrap_err();
        assert!(matches!(err, LambdaError::InvalidProps { .. }));
        assert!(stack.try_find_child(root, "Fn").is_none());

        props.timeout = 30;
        props.environment.insert("1BAD".into(), "x".into());
        assert!(props.is_valid().unwrap().contains("1BAD"));
        props.environment.clear();
        props.function_name = Some("f".repeat(65));
        assert!(props.is_valid().is_some());
        props.function_name = Some("f".into());
        assert_eq!(props.is_valid(), None);
    }

    #[test]
    fn inline_code_is_a_zip_file() {
        let mut stack = stack();
        let root = stack.root();
        Function::new(&mut stack, root, "Fn", FunctionProps::new(Runtime::Nodejs18x, "index.handler", FunctionCode::Inline("exports.handler = 1".into()))).unwrap();
        let template = stack.synth().unwrap();
        let props = &template.resources["Fn"].properties;
        assert_eq!(props["Code"]["ZipFile"], "exports.handler = 1");
        assert_eq!(props["Runtime"], "nodejs18.x");
        assert_eq!(props["Handler"], "index.handler");
        assert!(props.get("Environment").map_or(true, Value::is_null));
    }

    #[test]
    fn grant_invoke_covers_versions() {
        let mut stack = stack();
        let root = stack.root();
        let code = FunctionCode::from_bucket(BucketRef::from_bucket_name("code"), "fn.zip");
        let f = Function::new(&mut stack, root, "Fn", FunctionProps::new(Runtime::Python39, "index.handler", code)).unwrap();
        let caller = Role::new(&mut stack, root, "CallerRole", RoleProps { assumed_by: "lambda.amazonaws.com".into(), ..Default::default() }).unwrap();
        f.grant_invoke(&mut stack, &caller).unwrap();

        let statements = caller.statements(&stack).unwrap();
        assert_eq!(statements.len(), 1);
        assert!(statements[0].has_action("lambda:InvokeFunction"));
        assert!(statements[0].has_resource(&f.arn()));
        assert!(statements[0].has_resource(&SubTemplate::raw("${Fn.Arn}:*")));
        let template = stack.synth().unwrap();
        assert_eq!(template.resources["Fn"].properties["Code"]["S3Bucket"], "code");
        assert_eq!(template.resources["Fn"].properties["Code"]["S3Key"], "fn.zip");
    }
}
