//! Invoke a lambda function once per stack create/update.
//!
//! A small provider function receives the custom resource events from
//! cloudformation and synchronously invokes the target with the given
//! payload. A failed invocation fails the custom resource, and with it
//! the whole stack operation.

use aws_cfn_stack::{CfnResource, NodeId, Stack, SubTemplate};
use aws_iam::PolicyStatement;
use serde_json::{Map, Value};
use tracing::debug;

use crate::{Function, FunctionCode, FunctionProps, LambdaError, Runtime};

pub const PROVIDER_SOURCE: &str = r#"import os

import boto3
import cfnresponse
from botocore.config import Config

# one attempt per event, held open for as long as the target may run.
client = boto3.client(
    "lambda",
    config=Config(
        read_timeout=int(os.environ["READ_TIMEOUT_SECONDS"]),
        retries={"max_attempts": 0},
    ),
)


def handler(event, context):
    props = event["ResourceProperties"]
    physical_id = props.get("PhysicalResourceId") or event.get("PhysicalResourceId")
    if event["RequestType"] == "Delete":
        cfnresponse.send(event, context, cfnresponse.SUCCESS, {}, physical_id)
        return
    try:
        res = client.invoke(
            FunctionName=props["FunctionName"],
            InvocationType="RequestResponse",
            Payload=props["Payload"].encode("utf-8"),
        )
        body = res["Payload"].read().decode("utf-8")
        if "FunctionError" in res:
            raise Exception(body)
        cfnresponse.send(event, context, cfnresponse.SUCCESS, {"Payload": body[:1024]}, physical_id)
    except Exception as e:
        print(e)
        cfnresponse.send(event, context, cfnresponse.FAILED, {}, physical_id, reason=str(e)[:1024])
"#;

/// the provider has to outlive the invocation it waits on.
pub const PROVIDER_TIMEOUT_SECONDS: u16 = 900;
/// time the provider keeps reading after the target's own timeout.
pub const READ_TIMEOUT_MARGIN_SECONDS: u16 = 30;

#[derive(Debug, Clone, PartialEq)]
pub struct CfnLambdaInvoke {
    pub service_token: Value,
    pub function_name: Value,
    pub payload: SubTemplate,
    pub physical_resource_id: String,
}

impl CfnResource for CfnLambdaInvoke {
    fn type_string(&self) -> &'static str {
        "Custom::LambdaInvoke"
    }

    fn properties(&self) -> Value {
        let mut map = Map::new();
        map.insert("ServiceToken".to_string(), self.service_token.clone());
        map.insert("FunctionName".to_string(), self.function_name.clone());
        map.insert("Payload".to_string(), self.payload.to_value());
        map.insert("PhysicalResourceId".to_string(), Value::String(self.physical_resource_id.clone()));
        Value::Object(map)
    }
}

pub struct LambdaInvokeProps<'a> {
    pub function: &'a Function,
    /// json text sent as the invocation payload.
    pub payload: SubTemplate,
    /// the resource keeps this id across updates, so a changed payload
    /// re-invokes the function instead of replacing the resource.
    pub physical_resource_id: String,
    /// seconds the target may run for. The provider waits this long
    /// plus a margin for the response.
    pub timeout: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LambdaInvoke {
    node: NodeId,
    logical_id: String,
    provider: Function,
}

impl LambdaInvoke {
    pub fn new(stack: &mut Stack, scope: NodeId, id: &str, props: LambdaInvokeProps) -> Result<Self, LambdaError> {
        if props.physical_resource_id.is_empty() {
            return Err(LambdaError::InvalidProps { message: "PhysicalResourceId must not be empty".into() });
        }
        let read_timeout = props.timeout.saturating_add(READ_TIMEOUT_MARGIN_SECONDS);
        if read_timeout >= PROVIDER_TIMEOUT_SECONDS {
            return Err(LambdaError::InvalidProps {
                message: format!("Invalid invocation timeout {:?}\nMust leave the provider {}s to respond", props.timeout, READ_TIMEOUT_MARGIN_SECONDS),
            });
        }
        let node = stack.add_child(scope, id)?;
        let mut provider_props = FunctionProps::new(Runtime::Python39, "index.handler", FunctionCode::Inline(PROVIDER_SOURCE.to_string()));
        provider_props.timeout = PROVIDER_TIMEOUT_SECONDS;
        provider_props.environment.insert("READ_TIMEOUT_SECONDS".to_string(), SubTemplate::literal(&read_timeout.to_string()));
        provider_props.initial_policy.push(PolicyStatement::allow(&["lambda:InvokeFunction"], vec![props.function.arn()]));
        let provider = Function::new(stack, node, "Provider", provider_props)?;

        let invoke = CfnLambdaInvoke {
            service_token: provider.arn_value(),
            function_name: props.function.function_name(),
            payload: props.payload,
            physical_resource_id: props.physical_resource_id,
        };
        let resource = stack.add_resource(node, "Resource", invoke)?;
        let logical_id = stack.logical_id(resource)?;
        debug!(invoke = %logical_id, function = props.function.logical_id(), read_timeout, "declared function invocation");
        Ok(Self { node, logical_id, provider })
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn logical_id(&self) -> &str {
        &self.logical_id
    }

    pub fn provider(&self) -> &Function {
        &self.provider
    }
}
