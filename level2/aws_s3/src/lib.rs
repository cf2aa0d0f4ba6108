use std::path::Path;

use aws_cfn_stack::{AssetOptions, NodeId, Stack, StackError, SubTemplate};
use aws_iam::{grant, Grantable};
use tracing::debug;

pub const BUCKET_READ_ACTIONS: &[&str] = &["s3:GetObject*", "s3:GetBucket*", "s3:List*"];

/// a bucket that already exists, or one whose name is only known
/// at deploy time (ie: the asset bucket of an environment agnostic stack).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BucketRef {
    bucket_name: SubTemplate,
}

impl BucketRef {
    pub fn from_bucket_name(bucket_name: &str) -> Self {
        Self { bucket_name: SubTemplate::literal(bucket_name) }
    }

    pub fn from_template(bucket_name: SubTemplate) -> Self {
        Self { bucket_name }
    }

    pub fn bucket_name(&self) -> &SubTemplate {
        &self.bucket_name
    }

    pub fn bucket_arn(&self) -> SubTemplate {
        SubTemplate::raw("arn:${AWS::Partition}:s3:::").append(&self.bucket_name)
    }

    /// arn for the objects matching `key_pattern`, ie: `web/*`
    pub fn arn_for_objects(&self, key_pattern: &str) -> SubTemplate {
        self.bucket_arn().append_literal("/").append_literal(key_pattern)
    }

    /// `s3://<bucket>/<key>`
    pub fn s3_url(&self, key: &str) -> SubTemplate {
        SubTemplate::literal("s3://")
            .append(&self.bucket_name)
            .append_literal("/")
            .append_literal(key)
    }

    /// read access to the bucket and every object in it.
    pub fn grant_read(&self, stack: &mut Stack, grantee: &dyn Grantable) -> Result<(), StackError> {
        debug!(bucket = self.bucket_name.as_str(), role = grantee.grant_principal().logical_id(), "granting bucket read");
        grant(stack, grantee, BUCKET_READ_ACTIONS, vec![self.bucket_arn(), self.arn_for_objects("*")])
    }
}

/// a local file or directory packaged into the stack's asset bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    node: NodeId,
    bucket: BucketRef,
    object_key: String,
    is_zip_archive: bool,
}

impl Asset {
    pub fn new(stack: &mut Stack, scope: NodeId, id: &str, path: &Path, options: &AssetOptions) -> Result<Self, StackError> {
        let node = stack.add_child(scope, id)?;
        let packaged = stack.package_asset(node, path, options)?;
        Ok(Self {
            node,
            bucket: BucketRef::from_template(stack.asset_bucket_name()),
            object_key: packaged.object_key,
            is_zip_archive: packaged.is_zip_archive,
        })
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn bucket(&self) -> &BucketRef {
        &self.bucket
    }

    pub fn object_key(&self) -> &str {
        &self.object_key
    }

    pub fn is_zip_archive(&self) -> bool {
        self.is_zip_archive
    }

    pub fn grant_read(&self, stack: &mut Stack, grantee: &dyn Grantable) -> Result<(), StackError> {
        self.bucket.grant_read(stack, grantee)
    }
}
