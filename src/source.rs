//! Where the artifact to deploy comes from.
//!
//! A [`Source`] is plain data until it is bound into a scope. Binding
//! resolves it to a bucket and the key of a zip archive in it, and
//! grants the handler role (if any) read access to that bucket.

use std::path::PathBuf;

use aws_cfn_stack::{AssetOptions, NodeId, Stack, SubTemplate};
use aws_iam::Role;
use aws_s3::{Asset, BucketRef};
use tracing::debug;

use crate::error::SourceError;

/// what a source is bound with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceContext {
    /// role that will read the artifact.
    pub handler_role: Option<Role>,
}

/// a resolved source: a zip archive in a bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceConfig {
    pub bucket: BucketRef,
    pub zip_object_key: String,
}

impl SourceConfig {
    /// `s3://<bucket>/<key>`
    pub fn s3_url(&self) -> SubTemplate {
        self.bucket.s3_url(&self.zip_object_key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// a zip archive that already exists in a bucket.
    Bucket { bucket: BucketRef, zip_object_key: String },
    /// a local directory or zip file, packaged as an asset when bound.
    Asset { path: PathBuf, options: AssetOptions },
}

impl Source {
    pub fn bucket(bucket: BucketRef, zip_object_key: &str) -> Self {
        Source::Bucket { bucket, zip_object_key: zip_object_key.to_string() }
    }

    pub fn asset<P: Into<PathBuf>>(path: P) -> Self {
        Self::asset_with_options(path, AssetOptions::default())
    }

    pub fn asset_with_options<P: Into<PathBuf>>(path: P, options: AssetOptions) -> Self {
        Source::Asset { path: path.into(), options }
    }

    pub fn bind(&self, stack: &mut Stack, scope: NodeId, context: Option<&SourceContext>) -> Result<SourceConfig, SourceError> {
        match self {
            Source::Bucket { bucket, zip_object_key } => {
                let role = context
                    .and_then(|c| c.handler_role.as_ref())
                    .ok_or(SourceError::MissingContext {
                        kind: "bucket",
                        requirement: "a context with a handler role",
                    })?;
                bucket.grant_read(stack, role)?;
                debug!(bucket = bucket.bucket_name().as_str(), key = %zip_object_key, "bound bucket source");
                Ok(SourceConfig { bucket: bucket.clone(), zip_object_key: zip_object_key.clone() })
            }
            Source::Asset { path, options } => {
                let context = context.ok_or(SourceError::MissingContext {
                    kind: "asset",
                    requirement: "a context",
                })?;
                let id = next_asset_id(stack, scope);
                let asset = Asset::new(stack, scope, &id, path, options)?;
                if !asset.is_zip_archive() {
                    return Err(SourceError::NotAZipArchive { path: path.clone() });
                }
                if let Some(role) = &context.handler_role {
                    asset.grant_read(stack, role)?;
                }
                debug!(id = %id, path = %path.display(), key = asset.object_key(), "bound asset source");
                Ok(SourceConfig {
                    bucket: asset.bucket().clone(),
                    zip_object_key: asset.object_key().to_string(),
                })
            }
        }
    }
}

/// first of `Asset1`, `Asset2`, ... not yet taken under `scope`.
fn next_asset_id(stack: &Stack, scope: NodeId) -> String {
    let mut n = 1;
    loop {
        let id = format!("Asset{n}");
        if stack.try_find_child(scope, &id).is_none() {
            return id;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_cfn_stack::{AssetError, AssetPackager, AssetPackaging, Environment, PackagedAsset};
    use aws_iam::RoleProps;
    use std::path::Path;

    struct FakePackager;

    impl AssetPackager for FakePackager {
        fn package(&self, path: &Path, _options: &AssetOptions) -> Result<PackagedAsset, AssetError> {
            let name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
            let is_zip_archive = !name.contains('.') || name.ends_with(".zip");
            Ok(PackagedAsset {
                source_hash: name.clone(),
                object_key: if is_zip_archive { format!("{name}.zip") } else { name },
                is_zip_archive,
                packaging: AssetPackaging::File,
                staged_path: None,
            })
        }
    }

    fn stack() -> Stack {
        Stack::new("Stack", Environment::new("123456789123", "eu-west-1"))
            .unwrap()
            .with_packager(Box::new(FakePackager))
    }

    fn context(stack: &mut Stack) -> SourceContext {
        let root = stack.root();
        let role = Role::new(stack, root, "HandlerRole", RoleProps { assumed_by: "lambda.amazonaws.com".into(), ..Default::default() }).unwrap();
        SourceContext { handler_role: Some(role) }
    }

    #[test]
    fn bucket_source_passes_through() {
        let mut stack = stack();
        let ctx = context(&mut stack);
        let root = stack.root();
        let bucket = BucketRef::from_bucket_name("S");
        let bound = Source::bucket(bucket.clone(), "artifact.zip").bind(&mut stack, root, Some(&ctx)).unwrap();
        assert_eq!(bound, SourceConfig { bucket: bucket.clone(), zip_object_key: "artifact.zip".into() });
        assert_eq!(bound.s3_url().to_value(), "s3://S/artifact.zip");

        let statements = ctx.handler_role.unwrap().statements(&stack).unwrap();
        assert!(statements.iter().any(|s| s.has_resource(&bucket.arn_for_objects("*"))));
    }

    #[test]
    fn bucket_source_needs_a_role() {
        let mut stack = stack();
        let root = stack.root();
        let source = Source::bucket(BucketRef::from_bucket_name("S"), "artifact.zip");
        assert!(matches!(source.bind(&mut stack, root, None), Err(SourceError::MissingContext { .. })));
        let empty = SourceContext::default();
        assert!(matches!(source.bind(&mut stack, root, Some(&empty)), Err(SourceError::MissingContext { .. })));
    }

    #[test]
    fn asset_source_needs_a_context_but_not_a_role() {
        let mut stack = stack();
        let root = stack.root();
        let source = Source::asset("build");
        assert!(matches!(source.bind(&mut stack, root, None), Err(SourceError::MissingContext { .. })));
        let bound = source.bind(&mut stack, root, Some(&SourceContext::default())).unwrap();
        assert_eq!(bound.zip_object_key, "build.zip");
    }

    #[test]
    fn asset_ids_take_the_first_free_number() {
        let mut stack = stack();
        let ctx = context(&mut stack);
        let root = stack.root();
        stack.add_child(root, "Asset2").unwrap();
        Source::asset("a").bind(&mut stack, root, Some(&ctx)).unwrap();
        Source::asset("b").bind(&mut stack, root, Some(&ctx)).unwrap();
        let ids: Vec<&str> = stack.children(root).unwrap().map(|(id, _)| id).collect();
        assert!(ids.contains(&"Asset1"));
        assert!(ids.contains(&"Asset2"));
        assert!(ids.contains(&"Asset3"));
    }

    #[test]
    fn non_zip_assets_are_rejected() {
        let mut stack = stack();
        let ctx = context(&mut stack);
        let root = stack.root();
        let err = Source::asset("index.html").bind(&mut stack, root, Some(&ctx)).unwrap_err();
        assert!(matches!(err, SourceError::NotAZipArchive { .. }));
        assert!(ctx.handler_role.unwrap().statements(&stack).unwrap().is_empty());
    }
}
