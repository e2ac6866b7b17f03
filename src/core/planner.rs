//! Plan generation: diff a composed manifest against the last submitted one.

use super::types::*;
use std::collections::HashMap;

/// Compare `desired` with `previous` node by node.
///
/// Desired nodes come first in emission order. Nodes only present in the
/// previous manifest follow as destroys, in reverse of their old order so
/// dependents go before what they depend on.
pub fn plan(desired: &Manifest, previous: Option<&Manifest>) -> ExecutionPlan {
    let old: HashMap<&str, &ManifestNode> = previous
        .map(|m| m.nodes.iter().map(|n| (n.id.as_str(), n)).collect())
        .unwrap_or_default();

    let mut changes = Vec::new();
    let mut to_create = 0u32;
    let mut to_update = 0u32;
    let mut to_destroy = 0u32;
    let mut unchanged = 0u32;

    for node in &desired.nodes {
        let action = determine_action(node, old.get(node.id.as_str()).copied());
        match action {
            PlanAction::Create => to_create += 1,
            PlanAction::Update => to_update += 1,
            PlanAction::Destroy => to_destroy += 1,
            PlanAction::NoOp => unchanged += 1,
        }
        changes.push(PlannedChange {
            description: describe_action(node, &action),
            node_id: node.id.clone(),
            stack: node.stack.clone(),
            kind: node.kind,
            action,
        });
    }

    if let Some(previous) = previous {
        let current: HashMap<&str, ()> = desired.nodes.iter().map(|n| (n.id.as_str(), ())).collect();
        for node in previous.nodes.iter().rev() {
            if current.contains_key(node.id.as_str()) {
                continue;
            }
            to_destroy += 1;
            changes.push(PlannedChange {
                description: describe_action(node, &PlanAction::Destroy),
                node_id: node.id.clone(),
                stack: node.stack.clone(),
                kind: node.kind,
                action: PlanAction::Destroy,
            });
        }
    }

    tracing::debug!(to_create, to_update, to_destroy, unchanged, "plan computed");
    ExecutionPlan {
        name: format!("{}/{}", desired.context.project, desired.context.stage),
        changes,
        to_create,
        to_update,
        to_destroy,
        unchanged,
    }
}

fn determine_action(node: &ManifestNode, previous: Option<&ManifestNode>) -> PlanAction {
    match previous {
        None => PlanAction::Create,
        Some(old) if old.hash == node.hash => PlanAction::NoOp,
        Some(_) => PlanAction::Update,
    }
}

fn describe_action(node: &ManifestNode, action: &PlanAction) -> String {
    match action {
        PlanAction::Create => format!("{}: create {}", node.id, node.kind),
        PlanAction::Update => format!("{}: update {}", node.id, node.kind),
        PlanAction::Destroy => format!("{}: destroy {}", node.id, node.kind),
        PlanAction::NoOp => format!("{}: no changes", node.id),
    }
}
