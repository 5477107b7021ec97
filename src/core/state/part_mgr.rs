// src/core/state/part_mgr.rs

//! Partition lifecycle: diff updates, the default flag invariant, and
//! two-phase removal.

use crate::core::LatticeError;
use crate::core::model::{JobState, PartitionUpdate};
use crate::core::state::{ConfigTable, JobTable, NodeTable, PartTable};
use tracing::info;

/// Applies a partition update diff. Fields absent from the diff are left
/// alone; an empty string clears a list field. A `nodes` change rebuilds
/// the membership bitmap from scratch and reattaches the partition index
/// on every affected node.
pub fn update_partition(
    parts: &mut PartTable,
    nodes: &mut NodeTable,
    configs: &ConfigTable,
    update: &PartitionUpdate,
) -> Result<(), LatticeError> {
    let part_idx = parts
        .index_of(&update.name)
        .ok_or_else(|| LatticeError::InvalidPartition(update.name.clone()))?;

    // A nodes change is validated before anything is mutated so a bad
    // hostlist leaves the partition untouched.
    let new_bitmap = match &update.nodes {
        Some(expr) => Some(nodes.name2bitmap(expr)?),
        None => None,
    };

    if update.set_default == Some(true) {
        // Exactly one default at any time: clear the flag elsewhere first.
        for (name, other) in parts.parts.iter_mut() {
            if name != &update.name {
                other.is_default = false;
            }
        }
    }

    let part = parts
        .parts
        .get_index_mut(part_idx)
        .map(|(_, p)| p)
        .expect("partition index resolved above");

    if let Some(v) = update.max_time {
        part.max_time = v;
    }
    if let Some(v) = update.max_nodes {
        part.max_nodes = v;
    }
    if let Some(v) = update.max_cpus_per_job {
        part.max_cpus_per_job = v;
    }
    if let Some(v) = update.root_only {
        part.root_only = v;
    }
    if let Some(v) = update.shared {
        part.shared = v;
    }
    if let Some(v) = update.state_up {
        part.state_up = v;
    }
    if let Some(v) = update.set_default {
        part.is_default = v;
    }
    if let Some(groups) = &update.allow_groups {
        part.allow_groups = if groups.is_empty() {
            Vec::new()
        } else {
            groups
                .split(',')
                .map(|g| g.trim().to_string())
                .filter(|g| !g.is_empty())
                .collect()
        };
    }

    if let (Some(expr), Some(bitmap)) = (&update.nodes, new_bitmap) {
        let old_bitmap = part.node_bitmap.clone();
        part.nodes = expr.clone();
        part.node_bitmap = bitmap;
        part.total_nodes = part.node_bitmap.count() as u32;
        part.total_cpus = part
            .node_bitmap
            .iter_set()
            .map(|i| configs.configs[nodes.nodes[i].config_idx].cpus)
            .sum();
        // Reattach partition indices: departing nodes detach, joining
        // nodes point here.
        for idx in old_bitmap.iter_set() {
            if !part.node_bitmap.test(idx) && nodes.nodes[idx].part_idx == Some(part_idx) {
                nodes.nodes[idx].part_idx = None;
            }
        }
        for idx in part.node_bitmap.iter_set() {
            nodes.nodes[idx].part_idx = Some(part_idx);
        }
    }

    info!(partition = %update.name, "partition updated");
    Ok(())
}

/// Phase one of removal: flag the partition. It stops accepting jobs but
/// stays in the table until the sweep finds no job referencing it.
pub fn flag_partition_removal(parts: &mut PartTable, name: &str) -> Result<(), LatticeError> {
    let part = parts
        .get_mut(name)
        .ok_or_else(|| LatticeError::InvalidPartition(name.to_string()))?;
    if part.is_default {
        return Err(LatticeError::AccessDenied);
    }
    part.to_be_removed = true;
    part.state_up = false;
    info!(partition = name, "partition flagged for removal");
    Ok(())
}

/// Phase two: drops flagged partitions once every referencing job has
/// finished. Returns the names removed.
pub fn sweep_removed_partitions(
    parts: &mut PartTable,
    jobs: &JobTable,
    nodes: &mut NodeTable,
) -> Vec<String> {
    let mut removed = Vec::new();
    let flagged: Vec<String> = parts
        .parts
        .values()
        .filter(|p| p.to_be_removed)
        .map(|p| p.name.clone())
        .collect();
    for name in flagged {
        let referenced = jobs
            .jobs
            .values()
            .any(|j| j.partition == name && j.state != JobState::Pending && !j.state.is_finished());
        let pending_ref = jobs
            .jobs
            .values()
            .any(|j| j.partition == name && j.state == JobState::Pending);
        if referenced || pending_ref {
            continue;
        }
        if let Some(part_idx) = parts.index_of(&name) {
            for node in nodes.nodes.iter_mut() {
                if node.part_idx == Some(part_idx) {
                    node.part_idx = None;
                }
            }
            // shift_remove keeps the remaining partition indices dense
            // and in configuration order.
            parts.parts.shift_remove(&name);
            for node in nodes.nodes.iter_mut() {
                if let Some(idx) = node.part_idx {
                    if idx > part_idx {
                        node.part_idx = Some(idx - 1);
                    }
                }
            }
            removed.push(name);
        }
    }
    for name in &removed {
        info!(partition = %name, "partition removed");
    }
    removed
}
