use aws_cfn_stack::{get_att, CfnResource, NodeId, Stack, StackError, SubTemplate};
use serde_json::{json, Map, Value};
use tracing::debug;

pub use iam::role::{CfnRole, Policy};

pub const POLICY_VERSION: &str = "2012-10-17";
/// name of the inline policy grants are appended to.
pub const DEFAULT_POLICY_NAME: &str = "DefaultPolicy";
pub const LAMBDA_BASIC_EXECUTION_POLICY_ARN: &str = "arn:aws:iam::aws:policy/service-role/AWSLambdaBasicExecutionRole";

/// an `Allow` statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyStatement {
    pub actions: Vec<String>,
    pub resources: Vec<SubTemplate>,
}

impl PolicyStatement {
    pub fn allow(actions: &[&str], resources: Vec<SubTemplate>) -> Self {
        Self {
            actions: actions.iter().map(|a| a.to_string()).collect(),
            resources,
        }
    }

    pub fn has_action(&self, action: &str) -> bool {
        self.actions.iter().any(|a| a == action)
    }

    pub fn has_resource(&self, resource: &SubTemplate) -> bool {
        self.resources.contains(resource)
    }

    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("Effect".to_string(), Value::String("Allow".to_string()));
        let actions: Vec<Value> = self.actions.iter().map(|a| Value::String(a.clone())).collect();
        map.insert("Action".to_string(), one_or_many(actions));
        let resources: Vec<Value> = self.resources.iter().map(|r| r.to_value()).collect();
        map.insert("Resource".to_string(), one_or_many(resources));
        Value::Object(map)
    }
}

fn one_or_many(mut values: Vec<Value>) -> Value {
    if values.len() == 1 {
        values.remove(0)
    } else {
        Value::Array(values)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyDocument {
    statements: Vec<PolicyStatement>,
}

impl PolicyDocument {
    /// returns false if an identical statement was already present.
    pub fn add_statement(&mut self, statement: PolicyStatement) -> bool {
        if self.statements.contains(&statement) {
            return false;
        }
        self.statements.push(statement);
        true
    }

    pub fn statements(&self) -> &[PolicyStatement] {
        &self.statements
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn to_value(&self) -> Value {
        let statements: Vec<Value> = self.statements.iter().map(|s| s.to_value()).collect();
        json!({ "Version": POLICY_VERSION, "Statement": statements })
    }
}

pub fn create_assume_role_policy_doc(service: &str) -> Value {
    json!({
        "Version": POLICY_VERSION,
        "Statement": [{
            "Effect": "Allow",
            "Principal": { "Service": service },
            "Action": "sts:AssumeRole",
        }],
    })
}

/// a role plus everything granted to it so far. The grants are
/// rendered as the role's inline default policy.
pub struct RoleResource {
    pub role: CfnRole,
    pub default_policy: PolicyDocument,
}

impl CfnResource for RoleResource {
    fn type_string(&self) -> &'static str {
        self.role.type_string()
    }

    fn properties(&self) -> Value {
        let mut role = self.role.clone();
        if !self.default_policy.is_empty() {
            role.policies.get_or_insert_with(Vec::new).push(Policy {
                policy_name: DEFAULT_POLICY_NAME.into(),
                policy_document: self.default_policy.to_value(),
            });
        }
        role.properties()
    }
}

#[derive(Debug, Clone, Default)]
pub struct RoleProps {
    /// service principal allowed to assume the role, ie: `lambda.amazonaws.com`
    pub assumed_by: String,
    pub description: Option<String>,
    pub managed_policy_arns: Vec<String>,
}

/// an IAM role declared in a stack. Grants are appended to the role's
/// inline default policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Role {
    node: NodeId,
    logical_id: String,
}

impl Role {
    pub fn new(stack: &mut Stack, scope: NodeId, id: &str, props: RoleProps) -> Result<Self, StackError> {
        let managed_policy_arns = if props.managed_policy_arns.is_empty() {
            None
        } else {
            Some(props.managed_policy_arns.into_iter().map(Into::into).collect())
        };
        let role = CfnRole {
            description: props.description.map(Into::into),
            assume_role_policy_document: create_assume_role_policy_doc(&props.assumed_by),
            managed_policy_arns,
            ..Default::default()
        };
        let node = stack.add_resource(scope, id, RoleResource { role, default_policy: PolicyDocument::default() })?;
        Ok(Self { node, logical_id: stack.logical_id(node)? })
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn logical_id(&self) -> &str {
        &self.logical_id
    }

    pub fn arn_value(&self) -> Value {
        get_att(&self.logical_id, "Arn")
    }

    pub fn add_to_policy(&self, stack: &mut Stack, statement: PolicyStatement) -> Result<(), StackError> {
        debug!(role = %self.logical_id, actions = ?statement.actions, "adding statement to role policy");
        stack.resource_mut::<RoleResource>(self.node)?.default_policy.add_statement(statement);
        Ok(())
    }

    /// statements of the default policy, in the order they were added.
    pub fn statements(&self, stack: &Stack) -> Result<Vec<PolicyStatement>, StackError> {
        let role = stack.resource_as::<RoleResource>(self.node)?;
        Ok(role.default_policy.statements().to_vec())
    }
}

/// anything that has a role which permissions can be granted to.
pub trait Grantable {
    fn grant_principal(&self) -> &Role;
}

impl Grantable for Role {
    fn grant_principal(&self) -> &Role {
        self
    }
}

/// allow `grantee` to perform `actions` on `resources`.
pub fn grant(stack: &mut Stack, grantee: &dyn Grantable, actions: &[&str], resources: Vec<SubTemplate>) -> Result<(), StackError> {
    grantee.grant_principal().add_to_policy(stack, PolicyStatement::allow(actions, resources))
}
