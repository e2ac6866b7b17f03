//! Object storage bucket.

use super::*;
use crate::core::error::ValidationError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketSpec {
    pub bucket_name: String,
    pub public_read_access: bool,
    pub block_public_acls: bool,
    pub block_public_policy: bool,
    pub ignore_public_acls: bool,
    pub restrict_public_buckets: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketHandle {
    pub node: NodeId,
    /// Known at plan time
    pub bucket_name: String,
    pub bucket_arn: OutputRef,
    pub regional_domain_name: OutputRef,
    pub region: OutputRef,
}

/// Declare a private bucket with every public-access block on.
pub fn bucket(scope: &Scope, bucket_name: &str) -> Result<(ResourceNode, BucketHandle), ValidationError> {
    let id = scope.node_id("Bucket");
    if !valid_bucket_name(bucket_name) {
        return Err(ValidationError::out_of_range(
            &id,
            "bucket_name",
            format!(
                "'{}' must be 3-63 lowercase letters, digits, '-' or '.'",
                bucket_name
            ),
        ));
    }
    let spec = BucketSpec {
        bucket_name: bucket_name.to_string(),
        public_read_access: false,
        block_public_acls: true,
        block_public_policy: true,
        ignore_public_acls: true,
        restrict_public_buckets: true,
    };
    let handle = BucketHandle {
        node: id.clone(),
        bucket_name: bucket_name.to_string(),
        bucket_arn: OutputRef::new(&id, "bucket_arn"),
        regional_domain_name: OutputRef::new(&id, "regional_domain_name"),
        region: OutputRef::new(&id, "region"),
    };
    Ok((ResourceNode::new(id, scope, NodeSpec::Bucket(spec), vec![]), handle))
}

fn valid_bucket_name(name: &str) -> bool {
    (3..=63).contains(&name.len())
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
        && name.starts_with(|c: char| c.is_ascii_alphanumeric())
        && name.ends_with(|c: char| c.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_bucket_blocks_public_access() {
        let scope = Scope::staged("acme-staging-StorageStack", "acme", "staging");
        let (node, handle) = bucket(&scope, "sf-acme-staging").unwrap();
        match &node.spec {
            NodeSpec::Bucket(spec) => {
                assert!(!spec.public_read_access);
                assert!(spec.block_public_acls && spec.block_public_policy);
                assert!(spec.ignore_public_acls && spec.restrict_public_buckets);
            }
            other => panic!("unexpected spec: {:?}", other),
        }
        assert_eq!(handle.bucket_name, "sf-acme-staging");
        assert_eq!(handle.region.node, node.id);
    }

    #[test]
    fn test_storage_bucket_name_rules() {
        assert!(valid_bucket_name("sf-acme-production"));
        assert!(!valid_bucket_name("sf"));
        assert!(!valid_bucket_name("SF-Acme"));
        assert!(!valid_bucket_name("-leading"));
        assert!(!valid_bucket_name("under_score"));
    }
}
