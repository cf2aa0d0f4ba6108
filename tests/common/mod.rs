use std::path::Path;

use aws_cfn_stack::{AssetError, AssetOptions, AssetPackager, AssetPackaging, Environment, PackagedAsset, SavedResource, SavedTemplate, Stack};
use serde_json::Value;

/// packages nothing. Paths without an extension count as directories,
/// `.zip` files as zip archives and anything else as a plain file.
/// The object key is derived from the file name so tests can tell
/// assets apart.
pub struct FakePackager;

impl AssetPackager for FakePackager {
    fn package(&self, path: &Path, options: &AssetOptions) -> Result<PackagedAsset, AssetError> {
        let name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
        let (packaging, is_zip_archive) = match path.extension() {
            None => (AssetPackaging::ZipDirectory, true),
            Some(ext) => (AssetPackaging::File, ext == "zip"),
        };
        let source_hash = options.asset_hash.clone().unwrap_or_else(|| format!("hash-{}", name.replace('.', "-")));
        let object_key = if is_zip_archive { format!("{source_hash}.zip") } else { source_hash.clone() };
        Ok(PackagedAsset { source_hash, object_key, is_zip_archive, packaging, staged_path: None })
    }
}

pub fn stack() -> Stack {
    Stack::new("Stack", Environment::new("123456789123", "eu-west-1"))
        .unwrap()
        .with_packager(Box::new(FakePackager))
}

pub fn resource<'a>(template: &'a SavedTemplate, logical_id: &str) -> &'a SavedResource {
    template.resources.get(logical_id).unwrap_or_else(|| {
        panic!("no resource {logical_id}, have {:?}", template.resources.keys().collect::<Vec<_>>())
    })
}

/// the rendered statements of a role's default policy.
pub fn policy_statements(template: &SavedTemplate, role_logical_id: &str) -> Vec<Value> {
    let props = &resource(template, role_logical_id).properties;
    match props.get("Policies") {
        Some(policies) => policies[0]["PolicyDocument"]["Statement"].as_array().cloned().unwrap_or_default(),
        None => vec![],
    }
}

pub fn environment(template: &SavedTemplate, function_logical_id: &str) -> serde_json::Map<String, Value> {
    resource(template, function_logical_id).properties["Environment"]["Variables"]
        .as_object()
        .cloned()
        .unwrap_or_default()
}
