//! Manifest construction and render target submission.
//!
//! The manifest carries no timestamps: identical input yields byte-identical
//! output, so a render target can diff submissions by fingerprint alone.

use super::composer::Deployment;
use super::error::{Error, ExternalServiceError};
use super::hasher;
use super::persist;
use super::types::{Context, Manifest, ManifestNode, StageProfile};
use crate::resources::{NodeSpec, ResourceKind};
use indexmap::IndexMap;
use serde::Serialize;
use std::path::PathBuf;

pub const MANIFEST_SCHEMA: &str = "1.0";
const MANIFEST_FILE: &str = "manifest.json";

/// Fields a node hash covers.
#[derive(Serialize)]
struct NodeContent<'a> {
    kind: ResourceKind,
    depends_on: &'a [String],
    tags: &'a IndexMap<String, String>,
    spec: &'a NodeSpec,
}

/// Flatten a frozen deployment into the submission format.
pub fn build_manifest(ctx: &Context, profile: &StageProfile, deployment: &Deployment) -> Result<Manifest, Error> {
    let mut nodes = Vec::with_capacity(deployment.order.len());
    for node in deployment.graph.ordered_nodes() {
        let mut depends_on = deployment.dependencies(&node.id).to_vec();
        depends_on.sort();
        let hash = hasher::hash_json(&NodeContent {
            kind: node.kind(),
            depends_on: &depends_on,
            tags: &node.tags,
            spec: &node.spec,
        })?;
        nodes.push(ManifestNode {
            id: node.id.clone(),
            stack: node.stack.clone(),
            kind: node.kind(),
            depends_on,
            tags: node.tags.clone(),
            hash,
            spec: node.spec.clone(),
        });
    }

    let context_hash = hasher::hash_json(ctx)?;
    let stacks_hash = hasher::hash_json(&deployment.stacks)?;
    let mut parts: Vec<(&str, &str)> = vec![
        ("context", context_hash.as_str()),
        ("secrets_name", profile.secrets_name.as_str()),
        ("stacks", stacks_hash.as_str()),
    ];
    parts.extend(nodes.iter().map(|n| (n.id.as_str(), n.hash.as_str())));
    let fingerprint = hasher::composite_hash(&parts);

    tracing::debug!(%fingerprint, nodes = nodes.len(), "manifest built");
    Ok(Manifest {
        schema: MANIFEST_SCHEMA.to_string(),
        generator: format!("stackplan {}", env!("CARGO_PKG_VERSION")),
        context: ctx.clone(),
        secrets_name: profile.secrets_name.clone(),
        fingerprint,
        stacks: deployment.stacks.clone(),
        nodes,
    })
}

/// Consumer of validated manifests.
pub trait RenderTarget {
    /// Hand over a manifest. Returns where it was delivered.
    fn submit(&self, manifest: &Manifest) -> Result<String, Error>;

    /// Last manifest submitted for a stage, if any.
    fn previous(&self, stage: &str) -> Result<Option<Manifest>, Error>;
}

/// Writes `{root}/{stage}/manifest.json`, where the deployer picks it up.
#[derive(Debug, Clone)]
pub struct DirectoryTarget {
    root: PathBuf,
}

impl DirectoryTarget {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Path of the manifest for a stage.
    pub fn manifest_path(&self, stage: &str) -> PathBuf {
        self.root.join(stage).join(MANIFEST_FILE)
    }
}

impl RenderTarget for DirectoryTarget {
    fn submit(&self, manifest: &Manifest) -> Result<String, Error> {
        let path = self.manifest_path(manifest.context.stage.as_str());
        let json = serde_json::to_string_pretty(manifest)?;
        persist::write_atomic(&path, json.as_bytes()).map_err(|source| ExternalServiceError::RenderTarget {
            path: path.clone(),
            source,
        })?;
        tracing::info!(path = %path.display(), fingerprint = %manifest.fingerprint, "manifest written");
        Ok(path.display().to_string())
    }

    fn previous(&self, stage: &str) -> Result<Option<Manifest>, Error> {
        let path = self.manifest_path(stage);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path).map_err(|source| ExternalServiceError::RenderTarget {
            path: path.clone(),
            source,
        })?;
        let manifest: Manifest = serde_json::from_str(&content)?;
        Ok(Some(manifest))
    }
}
