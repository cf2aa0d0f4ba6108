use cfn_resources::StrVal;
use serde::{Serialize, Serializer};
use serde_json::{json, Value};

/// a string that may contain `Fn::Sub` placeholders such as `${AWS::Region}`
/// or `${MyFunction.Arn}`. Literal text is escaped on the way in, so
/// a template without placeholders renders as a plain string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct SubTemplate(String);

impl SubTemplate {
    pub fn literal(s: &str) -> Self {
        Self(s.replace("${", "${!"))
    }

    /// use `template` as is. Placeholders are not escaped.
    pub fn raw<S: Into<String>>(template: S) -> Self {
        Self(template.into())
    }

    pub fn ref_of(logical_id: &str) -> Self {
        Self(format!("${{{logical_id}}}"))
    }

    pub fn att_of(logical_id: &str, attribute: &str) -> Self {
        Self(format!("${{{logical_id}.{attribute}}}"))
    }

    pub fn append(mut self, other: &SubTemplate) -> Self {
        self.0.push_str(&other.0);
        self
    }

    pub fn append_literal(mut self, s: &str) -> Self {
        self.0.push_str(&Self::literal(s).0);
        self
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn has_substitutions(&self) -> bool {
        self.0.match_indices("${").any(|(i, _)| !self.0[i + 2..].starts_with('!'))
    }

    pub fn to_value(&self) -> Value {
        if self.has_substitutions() {
            json!({ "Fn::Sub": self.0 })
        } else {
            Value::String(self.0.replace("${!", "${"))
        }
    }
}

impl From<&str> for SubTemplate {
    fn from(s: &str) -> Self {
        Self::literal(s)
    }
}

impl From<String> for SubTemplate {
    fn from(s: String) -> Self {
        Self::literal(&s)
    }
}

impl From<SubTemplate> for StrVal {
    fn from(t: SubTemplate) -> Self {
        StrVal::Val(t.to_value())
    }
}

impl Serialize for SubTemplate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}
