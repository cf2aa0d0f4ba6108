//! Apply phase: upload staged assets and create or update the stack.

use std::collections::HashMap;

use aws_sdk_cloudformation::types::{Capability, OnFailure, Stack as DescribedStack, StackStatus};
use aws_sdk_s3::primitives::ByteStream;
use tracing::{info, warn};

use crate::{Stack, StackError};

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Stack(#[from] StackError),

    #[error("Asset bucket {0:?} depends on the deploy environment. Set an account and region on the stack, or an explicit asset bucket")]
    UnresolvedAssetBucket(String),

    #[error("Asset {construct_path} was never staged to disk and cannot be uploaded")]
    AssetNotStaged { construct_path: String },

    #[error("Failed to read staged asset {path:?}\n{source}")]
    ReadAsset {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to upload s3://{bucket}/{key}\n{message}")]
    Upload { bucket: String, key: String, message: String },

    #[error("Stack {name} not found")]
    StackNotFound { name: String },

    #[error("Stack {name} failed: {reason}")]
    StackFailed { name: String, reason: String },

    #[error("CloudFormation request failed\n{0}")]
    Api(String),
}

/// upload the stack's assets, then create or update it and wait
/// until it reaches a terminal state. Returns the stack outputs.
pub async fn apply(stack: &Stack) -> Result<HashMap<String, String>, RuntimeError> {
    let template_body = stack.to_template_json()?;
    let mut loader = aws_config::from_env();
    if let Some(region) = &stack.env().region {
        loader = loader.region(aws_types::region::Region::new(region.clone()));
    }
    let shared_config = loader.load().await;

    if !stack.assets().is_empty() {
        let s3 = aws_sdk_s3::Client::new(&shared_config);
        upload_assets(&s3, stack).await?;
    }

    let client = aws_sdk_cloudformation::Client::new(&shared_config);
    let name = stack.name();
    info!(stack = name, "about to deploy stack");
    create_or_update_stack(&client, name, &template_body).await?;
    wait_for_output(&client, name).await
}

/// the asset bucket as a plain name. Uploading needs a real bucket, so
/// an environment agnostic stack cannot be applied with local assets.
pub fn concrete_asset_bucket(stack: &Stack) -> Result<String, RuntimeError> {
    let bucket = stack.asset_bucket_name();
    match bucket.to_value() {
        serde_json::Value::String(s) => Ok(s),
        _ => Err(RuntimeError::UnresolvedAssetBucket(bucket.as_str().to_string())),
    }
}

pub async fn upload_assets(client: &aws_sdk_s3::Client, stack: &Stack) -> Result<(), RuntimeError> {
    let bucket = concrete_asset_bucket(stack)?;
    for asset in stack.assets() {
        let staged = asset.staged_path.as_ref().ok_or_else(|| RuntimeError::AssetNotStaged {
            construct_path: asset.construct_path.clone(),
        })?;
        let body = tokio::fs::read(staged).await.map_err(|source| RuntimeError::ReadAsset {
            path: staged.clone(),
            source,
        })?;
        info!(bucket = %bucket, key = %asset.object_key, source = %asset.source_path.display(), "uploading asset");
        client
            .put_object()
            .bucket(&bucket)
            .key(&asset.object_key)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| RuntimeError::Upload {
                bucket: bucket.clone(),
                key: asset.object_key.clone(),
                message: format!("{:#?}", e),
            })?;
    }
    Ok(())
}

pub async fn does_stack_exist(client: &aws_sdk_cloudformation::Client, name: &str) -> Result<bool, RuntimeError> {
    match client.describe_stacks().stack_name(name).send().await {
        Ok(_) => Ok(true),
        Err(e) => {
            let e_str = format!("{:#?}", e);
            if e_str.contains("does not exist") {
                return Ok(false);
            }
            Err(RuntimeError::Api(e_str))
        }
    }
}

/// `Ok(None)` while the stack is still in progress.
pub async fn describe_stack(client: &aws_sdk_cloudformation::Client, name: &str) -> Result<Option<DescribedStack>, RuntimeError> {
    let not_found = || RuntimeError::StackNotFound { name: name.to_string() };
    let described = client.describe_stacks().stack_name(name).send().await
        .map_err(|e| RuntimeError::Api(format!("{:#?}", e)))?;
    let first = described.stacks()
        .and_then(|stacks| stacks.first())
        .ok_or_else(not_found)?;
    let status = first.stack_status().ok_or_else(not_found)?;
    match progress(status) {
        StackProgress::Done => Ok(Some(first.clone())),
        StackProgress::InProgress => Ok(None),
        StackProgress::Failed => Err(RuntimeError::StackFailed {
            name: name.to_string(),
            reason: first.stack_status_reason()
                .unwrap_or("Failed to get stack failure reason")
                .to_string(),
        }),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackProgress {
    Done,
    InProgress,
    Failed,
}

pub fn progress(status: &StackStatus) -> StackProgress {
    match status {
        StackStatus::CreateComplete
        | StackStatus::UpdateComplete
        | StackStatus::ImportComplete => StackProgress::Done,

        StackStatus::CreateInProgress
        | StackStatus::DeleteInProgress
        | StackStatus::ImportInProgress
        | StackStatus::ImportRollbackInProgress
        | StackStatus::ReviewInProgress
        | StackStatus::RollbackInProgress
        | StackStatus::UpdateCompleteCleanupInProgress
        | StackStatus::UpdateInProgress
        | StackStatus::UpdateRollbackCompleteCleanupInProgress
        | StackStatus::UpdateRollbackInProgress => StackProgress::InProgress,

        // a rolled back update means the deploy invocation (or another
        // resource) failed, even though the stack itself is usable again.
        // a deleted stack is what a failed create leaves behind.
        _ => StackProgress::Failed,
    }
}

pub async fn wait_for_output(client: &aws_sdk_cloudformation::Client, name: &str) -> Result<HashMap<String, String>, RuntimeError> {
    loop {
        tokio::time::sleep(tokio::time::Duration::from_millis(2000)).await;
        match describe_stack(client, name).await? {
            Some(stack) => {
                let mut out = HashMap::new();
                for output in stack.outputs().unwrap_or_default() {
                    if let (Some(key), Some(val)) = (output.output_key(), output.output_value()) {
                        out.insert(key.to_string(), val.to_string());
                    }
                }
                info!(stack = name, outputs = out.len(), "stack is up to date");
                return Ok(out);
            }
            None => {
                info!(stack = name, "waiting for stack");
            }
        }
    }
}

pub async fn create_or_update_stack(client: &aws_sdk_cloudformation::Client, name: &str, body: &str) -> Result<(), RuntimeError> {
    if does_stack_exist(client, name).await? {
        info!(stack = name, "updating stack");
        let res = client
            .update_stack()
            .capabilities(Capability::CapabilityNamedIam)
            .capabilities(Capability::CapabilityIam)
            .stack_name(name)
            .template_body(body)
            .send()
            .await;
        if let Err(e) = res {
            let e_str = format!("{:#?}", e);
            if e_str.contains("No updates are to be performed") {
                warn!(stack = name, "no changes to deploy");
                return Ok(());
            }
            return Err(RuntimeError::Api(e_str));
        }
    } else {
        info!(stack = name, "creating stack");
        client
            .create_stack()
            .on_failure(OnFailure::Delete)
            .capabilities(Capability::CapabilityNamedIam)
            .capabilities(Capability::CapabilityIam)
            .stack_name(name)
            .template_body(body)
            .send()
            .await
            .map_err(|e| RuntimeError::Api(format!("{:#?}", e)))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Environment;

    #[test]
    fn asset_bucket_must_be_concrete_to_upload() {
        let agnostic = Stack::new("Stack", Environment::default()).unwrap();
        assert!(matches!(concrete_asset_bucket(&agnostic), Err(RuntimeError::UnresolvedAssetBucket(_))));

        let bound = Stack::new("Stack", Environment::new("123456789123", "eu-west-1")).unwrap();
        assert_eq!(concrete_asset_bucket(&bound).unwrap(), "cdk-hnb659fds-assets-123456789123-eu-west-1");
    }

    #[test]
    fn deleted_stacks_are_failures() {
        assert_eq!(progress(&StackStatus::DeleteComplete), StackProgress::Failed);
        assert_eq!(progress(&StackStatus::RollbackComplete), StackProgress::Failed);
        assert_eq!(progress(&StackStatus::UpdateRollbackComplete), StackProgress::Failed);
        assert_eq!(progress(&StackStatus::CreateComplete), StackProgress::Done);
        assert_eq!(progress(&StackStatus::UpdateComplete), StackProgress::Done);
        assert_eq!(progress(&StackStatus::DeleteInProgress), StackProgress::InProgress);
    }
}
