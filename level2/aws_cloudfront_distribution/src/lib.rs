use aws_cfn_stack::SubTemplate;

/// a distribution that already exists. Only its id is needed to
/// invalidate it; the domain name is kept for callers that want to
/// output it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionRef {
    distribution_id: String,
    domain_name: Option<String>,
}

impl DistributionRef {
    pub fn from_distribution_id(distribution_id: &str) -> Self {
        Self { distribution_id: distribution_id.to_string(), domain_name: None }
    }

    pub fn from_attributes(distribution_id: &str, domain_name: &str) -> Self {
        Self {
            distribution_id: distribution_id.to_string(),
            domain_name: Some(domain_name.to_string()),
        }
    }

    pub fn distribution_id(&self) -> &str {
        &self.distribution_id
    }

    pub fn domain_name(&self) -> Option<&str> {
        self.domain_name.as_deref()
    }

    /// distributions are global, so the arn has no region.
    pub fn arn(&self) -> SubTemplate {
        SubTemplate::raw("arn:${AWS::Partition}:cloudfront::${AWS::AccountId}:distribution/")
            .append_literal(&self.distribution_id)
    }
}

impl From<&str> for DistributionRef {
    fn from(distribution_id: &str) -> Self {
        Self::from_distribution_id(distribution_id)
    }
}

impl From<String> for DistributionRef {
    fn from(distribution_id: String) -> Self {
        Self { distribution_id, domain_name: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arn_is_account_scoped() {
        let d = DistributionRef::from_attributes("E2ABCDEF", "d111111abcdef8.cloudfront.net");
        assert_eq!(
            d.arn().to_value(),
            serde_json::json!({ "Fn::Sub": "arn:${AWS::Partition}:cloudfront::${AWS::AccountId}:distribution/E2ABCDEF" })
        );
        assert_eq!(d.domain_name(), Some("d111111abcdef8.cloudfront.net"));
    }

    #[test]
    fn raw_ids_convert() {
        let d: DistributionRef = "E2ABCDEF".into();
        assert_eq!(d.distribution_id(), "E2ABCDEF");
        assert_eq!(d.domain_name(), None);
    }
}
