//! Hosted zones and records.

use super::distribution::DistributionHandle;
use super::*;
use crate::core::error::{ConfigurationError, ValidationError};
use crate::core::types::{DnsRecords, MxEntry};

const NS_TTL_SECONDS: u32 = 1800;
const RECORD_TTL_SECONDS: u32 = 3600;
const ALIAS_TTL_SECONDS: u32 = 600;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneSpec {
    pub zone_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSpec {
    pub zone: OutputRef,
    /// Relative to the zone; `None` is the apex
    pub record_name: Option<String>,
    pub ttl_seconds: u32,
    pub data: RecordData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "record_type", rename_all = "UPPERCASE")]
pub enum RecordData {
    Ns { values: OutputRef },
    Cname { domain_name: String },
    Mx { values: Vec<MxEntry> },
    Txt { values: Vec<String> },
    /// A record aliased to a distribution
    A { alias_target: OutputRef },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneHandle {
    pub node: NodeId,
    pub zone_name: String,
    pub zone_id: OutputRef,
    pub name_servers: OutputRef,
}

impl ZoneHandle {
    fn new(id: &str, zone_name: &str) -> Self {
        Self {
            node: id.to_string(),
            zone_name: zone_name.to_string(),
            zone_id: OutputRef::new(id, "hosted_zone_id"),
            name_servers: OutputRef::new(id, "name_servers"),
        }
    }
}

/// The apex zone and its delegated `dev.` zone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneSet {
    pub public: ZoneHandle,
    pub dev: ZoneHandle,
}

impl ZoneSet {
    /// The zone whose name equals `domain`.
    pub fn zone_for(&self, domain: &str) -> Result<&ZoneHandle, ConfigurationError> {
        [&self.public, &self.dev]
            .into_iter()
            .find(|z| z.zone_name == domain)
            .ok_or_else(|| ConfigurationError::NoHostedZone {
                domain: domain.to_string(),
                zones: vec![self.public.zone_name.clone(), self.dev.zone_name.clone()],
            })
    }
}

/// Declare `{base_domain}`, `dev.{base_domain}` and the NS record delegating
/// the latter from the former.
pub fn hosted_zones(scope: &Scope, base_domain: &str) -> Result<(Vec<ResourceNode>, ZoneSet), ValidationError> {
    let public_id = scope.node_id("PublicZone");
    if base_domain.is_empty() || base_domain.starts_with('.') || base_domain.ends_with('.') {
        return Err(ValidationError::out_of_range(
            &public_id,
            "zone_name",
            format!("'{}' is not a domain name", base_domain),
        ));
    }
    let dev_name = format!("dev.{}", base_domain);
    let dev_id = scope.node_id("DevPublicZone");

    let public = ZoneHandle::new(&public_id, base_domain);
    let dev = ZoneHandle::new(&dev_id, &dev_name);

    let ns = RecordSpec {
        zone: public.zone_id.clone(),
        record_name: Some("dev".to_string()),
        ttl_seconds: NS_TTL_SECONDS,
        data: RecordData::Ns {
            values: dev.name_servers.clone(),
        },
    };
    let nodes = vec![
        ResourceNode::new(
            public_id,
            scope,
            NodeSpec::Zone(ZoneSpec {
                zone_name: base_domain.to_string(),
            }),
            vec![],
        ),
        ResourceNode::new(dev_id, scope, NodeSpec::Zone(ZoneSpec { zone_name: dev_name }), vec![]),
        ResourceNode::new(
            scope.node_id("DevNsRecord"),
            scope,
            NodeSpec::Record(ns),
            vec![public.zone_id.clone(), dev.name_servers.clone()],
        ),
    ];
    Ok((nodes, ZoneSet { public, dev }))
}

/// Declare the stage's CNAME, MX and TXT records in `zone`.
pub fn profile_records(
    scope: &Scope,
    zone: &ZoneHandle,
    records: &DnsRecords,
) -> Result<Vec<ResourceNode>, ValidationError> {
    let mut nodes = Vec::new();
    let refs = || vec![zone.zone_id.clone()];

    for (i, entry) in records.cname.iter().enumerate() {
        let id = scope.node_id(&format!("Cname-{}", i));
        if entry.host.is_empty() || entry.value.is_empty() {
            return Err(ValidationError::out_of_range(&id, "cname", "host and value must not be empty"));
        }
        let spec = RecordSpec {
            zone: zone.zone_id.clone(),
            record_name: Some(entry.host.clone()),
            ttl_seconds: RECORD_TTL_SECONDS,
            data: RecordData::Cname {
                domain_name: entry.value.clone(),
            },
        };
        nodes.push(ResourceNode::new(id, scope, NodeSpec::Record(spec), refs()));
    }

    if !records.mx.is_empty() {
        let id = scope.node_id("MxRecords");
        if let Some(bad) = records.mx.iter().find(|m| m.host_name.is_empty()) {
            return Err(ValidationError::out_of_range(
                &id,
                "mx",
                format!("entry with priority {} has no host name", bad.priority),
            ));
        }
        let spec = RecordSpec {
            zone: zone.zone_id.clone(),
            record_name: None,
            ttl_seconds: RECORD_TTL_SECONDS,
            data: RecordData::Mx {
                values: records.mx.clone(),
            },
        };
        nodes.push(ResourceNode::new(id, scope, NodeSpec::Record(spec), refs()));
    }

    if !records.txt.is_empty() {
        let id = scope.node_id("TxtRecords");
        if records.txt.iter().any(|t| t.is_empty()) {
            return Err(ValidationError::out_of_range(&id, "txt", "values must not be empty"));
        }
        let spec = RecordSpec {
            zone: zone.zone_id.clone(),
            record_name: None,
            ttl_seconds: RECORD_TTL_SECONDS,
            data: RecordData::Txt {
                values: records.txt.clone(),
            },
        };
        nodes.push(ResourceNode::new(id, scope, NodeSpec::Record(spec), refs()));
    }

    Ok(nodes)
}

/// Alias A record pointing `distribution.alias` at the distribution.
pub fn alias_record(
    scope: &Scope,
    construct: &str,
    zone: &ZoneHandle,
    distribution: &DistributionHandle,
) -> ResourceNode {
    // Apex of the zone unless the alias is a subdomain of it.
    let record_name = (distribution.alias != zone.zone_name).then(|| distribution.alias.clone());
    let spec = RecordSpec {
        zone: zone.zone_id.clone(),
        record_name,
        ttl_seconds: ALIAS_TTL_SECONDS,
        data: RecordData::A {
            alias_target: distribution.domain_name.clone(),
        },
    };
    ResourceNode::new(
        scope.node_id(construct),
        scope,
        NodeSpec::Record(spec),
        vec![zone.zone_id.clone(), distribution.domain_name.clone()],
    )
}
