use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

pub mod assets;
pub mod error;
pub mod intrinsics;
pub mod regions;
pub mod runtime;

pub use assets::{AssetError, AssetOptions, AssetPackager, AssetPackaging, PackagedAsset, ZipAssetPackager};
pub use cfn_resources::{get_att, get_ref, CfnResource, StrVal};
pub use error::StackError;
pub use intrinsics::SubTemplate;

/// directory the default asset packager stages into.
pub const DEFAULT_OUT_DIR: &str = "cdk.out";

/// a resource as the stack holds it. `properties` is rendered lazily
/// at synth time, so constructs can get their resource back and keep
/// mutating it (ie: policies growing new statements) until then.
pub trait StackResource: CfnResource + Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: CfnResource + Any> StackResource for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

struct Node {
    id: String,
    parent: Option<NodeId>,
    children: BTreeMap<String, NodeId>,
    resource: Option<Box<dyn StackResource>>,
}

/// account/region the stack is bound to. Either may be left
/// unset, in which case pseudo parameters are used instead.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    pub account: Option<String>,
    pub region: Option<String>,
}

impl Environment {
    pub fn new(account: &str, region: &str) -> Self {
        Self {
            account: Some(account.to_string()),
            region: Some(region.to_string()),
        }
    }
}

/// an asset that was packaged while declaring the stack. The apply
/// runtime uploads `staged_path` to the asset bucket under `object_key`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedAsset {
    pub construct_path: String,
    pub source_path: PathBuf,
    pub object_key: String,
    pub staged_path: Option<PathBuf>,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedResource {
    #[serde(rename = "Type")]
    pub ty: String,
    #[serde(rename = "Properties")]
    pub properties: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedTemplate {
    #[serde(rename = "AWSTemplateFormatVersion")]
    pub version: String,
    #[serde(rename = "Resources")]
    pub resources: BTreeMap<String, SavedResource>,
    #[serde(rename = "Outputs", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, ResourceOutput>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceOutput {
    #[serde(rename = "Description")]
    pub description: String,
    #[serde(rename = "Value")]
    pub value: Value,
}

impl Default for SavedTemplate {
    fn default() -> Self {
        Self {
            version: "2010-09-09".to_string(),
            resources: Default::default(),
            outputs: Default::default(),
        }
    }
}

impl SavedTemplate {
    /// all resources of the given cloudformation type, keyed by logical id.
    pub fn resources_of_type<'a>(&'a self, ty: &'a str) -> impl Iterator<Item = (&'a String, &'a SavedResource)> + 'a {
        self.resources.iter().filter(move |(_, r)| r.ty == ty)
    }
}

/// the root of a construct tree. Every construct is a node in an arena
/// owned by the stack; each node owns the namespace of its children.
pub struct Stack {
    nodes: Vec<Node>,
    env: Environment,
    outputs: BTreeMap<String, ResourceOutput>,
    packager: Box<dyn AssetPackager>,
    asset_bucket: Option<String>,
    assets: Vec<StagedAsset>,
}

impl Stack {
    pub fn new(name: &str, env: Environment) -> Result<Self, StackError> {
        validate_stack_name(name)?;
        if let Some(region) = &env.region {
            regions::verify_region(region).map_err(StackError::InvalidRegion)?;
        }
        let root = Node {
            id: name.to_string(),
            parent: None,
            children: Default::default(),
            resource: None,
        };
        Ok(Self {
            nodes: vec![root],
            env,
            outputs: Default::default(),
            packager: Box::new(ZipAssetPackager::new(DEFAULT_OUT_DIR)),
            asset_bucket: None,
            assets: vec![],
        })
    }

    /// replace the packager used for local assets.
    pub fn with_packager(mut self, packager: Box<dyn AssetPackager>) -> Self {
        self.packager = packager;
        self
    }

    /// use an explicit bucket for assets instead of the bootstrap bucket.
    pub fn with_asset_bucket(mut self, bucket_name: &str) -> Self {
        self.asset_bucket = Some(bucket_name.to_string());
        self
    }

    pub fn name(&self) -> &str {
        &self.nodes[0].id
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// name of the bucket assets get uploaded to. Without an explicit
    /// bucket this is the bootstrap bucket for the stack's environment.
    pub fn asset_bucket_name(&self) -> SubTemplate {
        if let Some(bucket) = &self.asset_bucket {
            return SubTemplate::literal(bucket);
        }
        let account = match &self.env.account {
            Some(a) => SubTemplate::literal(a),
            None => SubTemplate::raw("${AWS::AccountId}"),
        };
        let region = match &self.env.region {
            Some(r) => SubTemplate::literal(r),
            None => SubTemplate::raw("${AWS::Region}"),
        };
        SubTemplate::literal("cdk-hnb659fds-assets-")
            .append(&account)
            .append_literal("-")
            .append(&region)
    }

    fn node(&self, node: NodeId) -> Result<&Node, StackError> {
        self.nodes.get(node.0).ok_or(StackError::UnknownNode { index: node.0 })
    }

    pub fn add_child(&mut self, parent: NodeId, id: &str) -> Result<NodeId, StackError> {
        let parent_path = self.path(parent)?;
        if id.is_empty() || id.contains('/') {
            return Err(StackError::InvalidId { parent: parent_path, id: id.to_string() });
        }
        if self.try_find_child(parent, id).is_some() {
            return Err(StackError::DuplicateId { parent: parent_path, id: id.to_string() });
        }
        let node_id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            id: id.to_string(),
            parent: Some(parent),
            children: Default::default(),
            resource: None,
        });
        self.nodes[parent.0].children.insert(id.to_string(), node_id);
        Ok(node_id)
    }

    pub fn try_find_child(&self, parent: NodeId, id: &str) -> Option<NodeId> {
        self.nodes.get(parent.0)?.children.get(id).copied()
    }

    pub fn children(&self, parent: NodeId) -> Result<impl Iterator<Item = (&str, NodeId)>, StackError> {
        Ok(self.node(parent)?.children.iter().map(|(k, v)| (k.as_str(), *v)))
    }

    pub fn add_resource<R: CfnResource + 'static>(&mut self, parent: NodeId, id: &str, resource: R) -> Result<NodeId, StackError> {
        let node = self.add_child(parent, id)?;
        let path = self.path(node)?;
        debug!(path = %path, ty = resource.type_string(), "declared resource");
        self.nodes[node.0].resource = Some(Box::new(resource));
        Ok(node)
    }

    pub fn resource_as<T: 'static>(&self, node: NodeId) -> Result<&T, StackError> {
        let path = self.path(node)?;
        self.node(node)?
            .resource
            .as_ref()
            .and_then(|r| r.as_any().downcast_ref::<T>())
            .ok_or(StackError::ResourceMismatch { path })
    }

    pub fn resource_mut<T: 'static>(&mut self, node: NodeId) -> Result<&mut T, StackError> {
        let path = self.path(node)?;
        self.nodes.get_mut(node.0)
            .and_then(|n| n.resource.as_mut())
            .and_then(|r| r.as_any_mut().downcast_mut::<T>())
            .ok_or(StackError::ResourceMismatch { path })
    }

    /// the construct ids from the stack down to `node`, excluding the stack itself.
    fn components(&self, node: NodeId) -> Result<Vec<&str>, StackError> {
        let mut out = vec![];
        let mut current = Some(node);
        while let Some(n) = current {
            let entry = self.node(n)?;
            if entry.parent.is_some() {
                out.push(entry.id.as_str());
            }
            current = entry.parent;
        }
        out.reverse();
        Ok(out)
    }

    pub fn path(&self, node: NodeId) -> Result<String, StackError> {
        let mut parts = vec![self.name()];
        parts.extend(self.components(node)?);
        Ok(parts.join("/"))
    }

    /// `Resource` and `Default` components are elided so that the
    /// primary resource of a construct gets the construct's own name.
    pub fn logical_id(&self, node: NodeId) -> Result<String, StackError> {
        let components = self.components(node)?;
        let visible: Vec<&str> = components.iter()
            .copied()
            .filter(|c| *c != "Resource" && *c != "Default")
            .collect();
        let chosen = if visible.is_empty() { components } else { visible };
        let mut out: String = chosen.concat().chars().filter(|c| c.is_ascii_alphanumeric()).collect();
        out.truncate(255);
        Ok(out)
    }

    pub fn add_output(&mut self, key: &str, description: &str, value: Value) {
        self.outputs.insert(key.to_string(), ResourceOutput {
            description: description.to_string(),
            value,
        });
    }

    /// package a local path with the stack's packager and record it
    /// in the asset manifest under `construct`.
    pub fn package_asset(&mut self, construct: NodeId, path: &Path, options: &AssetOptions) -> Result<PackagedAsset, StackError> {
        let packaged = self.packager.package(path, options)?;
        debug!(path = %path.display(), key = %packaged.object_key, zip = packaged.is_zip_archive, "packaged asset");
        let staged = StagedAsset {
            construct_path: self.path(construct)?,
            source_path: path.to_path_buf(),
            object_key: packaged.object_key.clone(),
            staged_path: packaged.staged_path.clone(),
        };
        if !self.assets.iter().any(|a| a.object_key == staged.object_key) {
            self.assets.push(staged);
        }
        Ok(packaged)
    }

    pub fn assets(&self) -> &[StagedAsset] {
        &self.assets
    }

    pub fn synth(&self) -> Result<SavedTemplate, StackError> {
        let mut out_template = SavedTemplate::default();
        let mut owners: HashMap<String, String> = HashMap::new();
        for (index, node) in self.nodes.iter().enumerate() {
            let resource = match &node.resource {
                Some(r) => r,
                None => continue,
            };
            let node_id = NodeId(index);
            let logical_id = self.logical_id(node_id)?;
            let path = self.path(node_id)?;
            if let Err(e) = resource.validate() {
                return Err(StackError::Validation { logical_id, message: e.to_string() });
            }
            if let Some(first) = owners.insert(logical_id.clone(), path.clone()) {
                return Err(StackError::DuplicateLogicalId { logical_id, first, second: path });
            }
            let saved_resource = SavedResource {
                ty: resource.type_string().to_string(),
                properties: resource.properties(),
            };
            out_template.resources.insert(logical_id, saved_resource);
        }
        out_template.outputs = self.outputs.clone();
        Ok(out_template)
    }

    /// pretty so that if a user needs to look at the stack in the
    /// cloudformation console, it looks nice.
    pub fn to_template_json(&self) -> Result<String, StackError> {
        let template = self.synth()?;
        Ok(serde_json::to_string_pretty(&template)?)
    }
}

/// A stack name can contain only alphanumeric characters (case sensitive) and hyphens.
/// It must start with an alphabetical character and can't be longer than 128 characters.
pub fn validate_stack_name(stack_name: &str) -> Result<(), StackError> {
    let invalid = || StackError::InvalidStackName { name: stack_name.to_string() };
    if stack_name.is_empty() || stack_name.len() > 128 {
        return Err(invalid());
    }
    for (i, c) in stack_name.chars().enumerate() {
        if i == 0 && !c.is_ascii_alphabetic() {
            return Err(invalid());
        }
        if !c.is_ascii_alphanumeric() && c != '-' {
            return Err(invalid());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Dummy {
        value: String,
    }

    impl CfnResource for Dummy {
        fn type_string(&self) -> &'static str {
            "Custom::Dummy"
        }
        fn properties(&self) -> Value {
            json!({ "Value": self.value })
        }
    }

    fn stack() -> Stack {
        Stack::new("Stack", Environment::new("123456789123", "eu-west-1")).unwrap()
    }

    #[test]
    fn stack_names_are_validated() {
        assert!(validate_stack_name("my-stack-1").is_ok());
        assert!(validate_stack_name("1stack").is_err());
        assert!(validate_stack_name("my_stack").is_err());
        assert!(validate_stack_name("").is_err());
        assert!(validate_stack_name(&"a".repeat(129)).is_err());
    }

    #[test]
    fn unknown_region_is_rejected() {
        let res = Stack::new("Stack", Environment::new("123456789123", "mars-north-1"));
        assert!(matches!(res, Err(StackError::InvalidRegion(_))));
    }

    #[test]
    fn duplicate_child_ids_fail() {
        let mut stack = stack();
        let root = stack.root();
        stack.add_child(root, "A").unwrap();
        let err = stack.add_child(root, "A").unwrap_err();
        assert!(matches!(err, StackError::DuplicateId { .. }));
        assert!(stack.add_child(root, "a/b").is_err());
    }

    #[test]
    fn children_have_their_own_namespace() {
        let mut stack = stack();
        let root = stack.root();
        let a = stack.add_child(root, "A").unwrap();
        let b = stack.add_child(root, "B").unwrap();
        let a_child = stack.add_child(a, "Child").unwrap();
        let b_child = stack.add_child(b, "Child").unwrap();
        assert_ne!(a_child, b_child);
        assert_eq!(stack.try_find_child(a, "Child"), Some(a_child));
        assert_eq!(stack.try_find_child(root, "Child"), None);
        assert_eq!(stack.path(b_child).unwrap(), "Stack/B/Child");
    }

    #[test]
    fn logical_ids_hide_resource_components() {
        let mut stack = stack();
        let root = stack.root();
        let construct = stack.add_child(root, "Webapp-Deploy").unwrap();
        let resource = stack.add_resource(construct, "Resource", Dummy { value: "x".into() }).unwrap();
        let role = stack.add_resource(resource, "ServiceRole", Dummy { value: "y".into() }).unwrap();
        assert_eq!(stack.logical_id(resource).unwrap(), "WebappDeploy");
        assert_eq!(stack.logical_id(role).unwrap(), "WebappDeployServiceRole");
    }

    #[test]
    fn synth_renders_current_properties() {
        let mut stack = stack();
        let root = stack.root();
        let node = stack.add_resource(root, "Thing", Dummy { value: "before".into() }).unwrap();
        stack.resource_mut::<Dummy>(node).unwrap().value = "after".into();
        stack.add_output("ThingOut", "the thing", get_ref("Thing"));
        let template = stack.synth().unwrap();
        let saved = &template.resources["Thing"];
        assert_eq!(saved.ty, "Custom::Dummy");
        assert_eq!(saved.properties, json!({ "Value": "after" }));
        assert_eq!(template.outputs["ThingOut"].value, json!({ "Ref": "Thing" }));
        let rendered: Value = serde_json::from_str(&stack.to_template_json().unwrap()).unwrap();
        assert_eq!(rendered["AWSTemplateFormatVersion"], "2010-09-09");
    }

    #[test]
    fn synth_detects_logical_id_collisions() {
        let mut stack = stack();
        let root = stack.root();
        stack.add_resource(root, "AB", Dummy { value: "1".into() }).unwrap();
        let a = stack.add_child(root, "A").unwrap();
        stack.add_resource(a, "B", Dummy { value: "2".into() }).unwrap();
        assert!(matches!(stack.synth(), Err(StackError::DuplicateLogicalId { .. })));
    }

    #[test]
    fn resource_downcast_checks_type() {
        let mut stack = stack();
        let root = stack.root();
        let plain = stack.add_child(root, "Plain").unwrap();
        assert!(stack.resource_mut::<Dummy>(plain).is_err());
        assert!(stack.resource_as::<String>(plain).is_err());
    }

    #[test]
    fn nodes_of_another_stack_are_errors() {
        let mut other = stack();
        let other_root = other.root();
        other.add_child(other_root, "A").unwrap();
        let foreign = other.add_child(other_root, "B").unwrap();

        let mut stack = stack();
        assert!(matches!(stack.children(foreign).err(), Some(StackError::UnknownNode { .. })));
        assert!(matches!(stack.path(foreign), Err(StackError::UnknownNode { .. })));
        assert!(matches!(stack.logical_id(foreign), Err(StackError::UnknownNode { .. })));
        assert!(matches!(stack.add_child(foreign, "C"), Err(StackError::UnknownNode { .. })));
        assert!(matches!(stack.resource_mut::<Dummy>(foreign), Err(StackError::UnknownNode { .. })));
        assert_eq!(stack.try_find_child(foreign, "C"), None);
    }

    #[test]
    fn asset_bucket_follows_environment() {
        let stack = stack();
        assert_eq!(stack.asset_bucket_name().to_value(), json!("cdk-hnb659fds-assets-123456789123-eu-west-1"));

        let agnostic = Stack::new("Stack", Environment::default()).unwrap();
        assert_eq!(
            agnostic.asset_bucket_name().to_value(),
            json!({ "Fn::Sub": "cdk-hnb659fds-assets-${AWS::AccountId}-${AWS::Region}" })
        );

        let explicit = Stack::new("Stack", Environment::default()).unwrap().with_asset_bucket("my-assets");
        assert_eq!(explicit.asset_bucket_name().to_value(), json!("my-assets"));
    }
}
