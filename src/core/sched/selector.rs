// src/core/sched/selector.rs

//! The resource selector: matches one pending job against the node,
//! config, and partition tables and produces an allocation.

use crate::core::model::{JobDetails, PartRecord, Reservation, SharedPolicy, TaskDist};
use crate::core::rpc::pack::NO_VAL;
use crate::core::sched::topology::{TopoRequest, TopologyPlugin};
use crate::core::sched::{Allocation, SelectorKind, cons_res, dist};
use crate::core::state::{ConfigTable, NodeTable};
use crate::core::{Bitmap, LatticeError};
use tracing::debug;

/// Everything the selector needs to know about one selection attempt.
pub struct SelectContext<'a> {
    pub details: &'a JobDetails,
    pub part: &'a PartRecord,
    pub part_idx: usize,
    pub resv: Option<&'a Reservation>,
    pub topo_params: Option<&'a str>,
    pub kind: SelectorKind,
    /// Will-run simulation: compute the placement but charge nothing.
    pub test_only: bool,
}

/// Selects nodes for a job. On success the consumable-resource rows for
/// the chosen nodes are already charged (unless `test_only`) and the row
/// choices are returned alongside the bitmap; on failure nothing is left
/// charged.
pub fn select_nodes(
    ctx: &SelectContext,
    nodes: &mut NodeTable,
    configs: &ConfigTable,
    topology: &dyn TopologyPlugin,
) -> Result<(Allocation, Vec<(usize, usize)>), LatticeError> {
    let details = ctx.details;
    if details.max_nodes != NO_VAL && details.min_nodes > details.max_nodes {
        return Err(LatticeError::InvalidNodeCount);
    }
    if details.min_nodes == 0 {
        return Err(LatticeError::InvalidNodeCount);
    }

    let exclusive = details.exclusive || ctx.part.shared == SharedPolicy::Exclusive;
    let sharing = !exclusive
        && details.shared
        && matches!(ctx.part.shared, SharedPolicy::Yes | SharedPolicy::Force)
        && ctx.kind == SelectorKind::ConsRes;

    // 1. Candidate set: reservation or partition membership, up nodes
    //    only, then per-node constraint filtering.
    let mut candidates = match ctx.resv {
        Some(resv) => resv.node_bitmap.intersection(&nodes.up_nodes),
        None => ctx.part.node_bitmap.intersection(&nodes.up_nodes),
    };
    if !sharing {
        candidates.and(&nodes.idle_nodes);
    }

    for idx in 0..nodes.count() {
        if !candidates.test(idx) {
            continue;
        }
        let config = &configs.configs[nodes.nodes[idx].config_idx];
        let feature_ok = details.features.iter().all(|f| config.has_feature(f));
        let capacity_ok = config.cpus >= details.min_procs_per_node
            && config.real_memory >= details.min_memory
            && config.tmp_disk >= details.min_tmp_disk;
        if !feature_ok || !capacity_ok {
            candidates.clear(idx);
        } else if sharing {
            // A shared node must still have row capacity for this request.
            let free = free_row_capacity(nodes, idx, ctx.part_idx, config.cpus);
            if free < details.min_procs_per_node.max(1) {
                candidates.clear(idx);
            }
        }
    }

    // Required nodes must have survived the filters.
    if let Some(required) = &details.req_node_bitmap {
        if !candidates.is_superset_of(required) {
            let missing = required
                .iter_set()
                .find(|&i| !candidates.test(i))
                .and_then(|i| nodes.nodes.get(i))
                .map(|n| n.name.clone())
                .unwrap_or_default();
            return Err(LatticeError::RequiredNodeNotAvailable(missing));
        }
    }

    let effective_procs = details.num_procs.max(details.min_nodes);

    // 2. Placement: topology block, contiguous run, or weighted best-fit.
    let chosen = if ctx.topo_params.is_some() {
        let req = TopoRequest {
            node_count: details.min_nodes,
            ..Default::default()
        };
        topology
            .allocate(&req, &candidates)
            .map_err(|e| match e {
                LatticeError::NodesBusy => LatticeError::NodesBusy,
                other => LatticeError::InterconnectFailure(other.to_string()),
            })?
    } else if details.contiguous {
        select_contiguous(&candidates, details, effective_procs, nodes, configs)?
    } else {
        select_weighted(&candidates, details, effective_procs, nodes, configs, ctx, sharing)?
    };

    // 3. Per-node CPU layout over the chosen nodes.
    let chosen_indices: Vec<usize> = chosen.iter_set().collect();
    let capacities: Vec<u32> = chosen_indices
        .iter()
        .map(|&i| {
            let config = &configs.configs[nodes.nodes[i].config_idx];
            if sharing {
                free_row_capacity(nodes, i, ctx.part_idx, config.cpus)
            } else {
                config.cpus
            }
        })
        .collect();

    let per_node_cpus: Vec<u32> = if exclusive {
        // Exclusive short-circuits per-core math: every CPU on every
        // selected node is charged.
        capacities.clone()
    } else {
        allocation_layout(effective_procs, &capacities, details)?
    };

    let allocation = Allocation {
        node_bitmap: chosen,
        per_node_cpus,
    };

    if ctx.test_only {
        return Ok((allocation, Vec::new()));
    }

    // 4. Charge the consumable-resource rows, unwinding on any failure so
    //    a refused allocation leaves no partial charges behind.
    let mut charged: Vec<(usize, usize)> = Vec::new();
    for (slot, &node_idx) in chosen_indices.iter().enumerate() {
        let cpus = allocation.per_node_cpus[slot];
        if cpus == 0 {
            continue;
        }
        let config = &configs.configs[nodes.nodes[node_idx].config_idx];
        let per_socket = if config.sockets > 1 {
            match dist::distribute_over_sockets(
                cpus,
                config.sockets,
                config.cores_per_socket,
                details.min_sockets,
                details.max_sockets,
                details.min_cores_per_socket,
            ) {
                Ok(per_socket) => Some(per_socket),
                Err(e) => {
                    unwind_charges(nodes, ctx.part_idx, &charged, &allocation, &chosen_indices);
                    return Err(e);
                }
            }
        } else {
            None
        };
        let capacity = config.cpus;
        let rows = nodes.cr_rows_mut(node_idx, ctx.part_idx);
        match cons_res::pick_row(rows, cpus, capacity) {
            Some(row_idx) => {
                cons_res::charge(rows, row_idx, cpus, per_socket.as_deref());
                charged.push((node_idx, row_idx));
            }
            None => {
                unwind_charges(nodes, ctx.part_idx, &charged, &allocation, &chosen_indices);
                return Err(LatticeError::NodesBusy);
            }
        }
    }

    debug!(
        nodes = allocation.node_bitmap.count(),
        cpus = allocation.total_cpus(),
        "selection complete"
    );
    Ok((allocation, charged))
}

/// Allocation-level CPU layout: every chosen node gets at least one CPU,
/// and the remainder spreads according to the requested distribution.
fn allocation_layout(
    effective_procs: u32,
    capacities: &[u32],
    details: &JobDetails,
) -> Result<Vec<u32>, LatticeError> {
    let node_count = capacities.len() as u32;
    let mut per_node = vec![1u32; capacities.len()];
    let remaining = effective_procs.saturating_sub(node_count);
    if remaining == 0 {
        return Ok(per_node);
    }
    let residual: Vec<u32> = capacities.iter().map(|&c| c.saturating_sub(1)).collect();
    let extra = match details.dist {
        TaskDist::Cyclic => dist::dist_cyclic(remaining, &residual, false)?,
        TaskDist::Block => dist::dist_block(remaining, &residual, false)?,
        TaskDist::Plane => dist::dist_plane(
            remaining,
            residual.len(),
            details.plane_size.max(1),
            false,
        )?,
    };
    for (slot, add) in per_node.iter_mut().zip(extra) {
        *slot += add;
    }
    Ok(per_node)
}

/// Releases row charges made during a failed attempt.
fn unwind_charges(
    nodes: &mut NodeTable,
    part_idx: usize,
    charged: &[(usize, usize)],
    allocation: &Allocation,
    chosen_indices: &[usize],
) {
    for &(node_idx, row_idx) in charged {
        let slot = chosen_indices
            .iter()
            .position(|&i| i == node_idx)
            .expect("charged node not in chosen set");
        let cpus = allocation.per_node_cpus[slot];
        let rows = nodes.cr_rows_mut(node_idx, part_idx);
        cons_res::release(rows, row_idx, cpus, None);
    }
}

/// Remaining free capacity in the best row of a `(node, partition)` pair.
fn free_row_capacity(nodes: &NodeTable, node_idx: usize, part_idx: usize, capacity: u32) -> u32 {
    match nodes.cr_rows.get(&(node_idx, part_idx)) {
        Some(rows) => rows
            .iter()
            .map(|r| capacity.saturating_sub(r.used_cpus))
            .max()
            .unwrap_or(capacity),
        None => capacity,
    }
}

/// Contiguous placement: the shortest run of consecutive candidate
/// indices that satisfies both the node count and the CPU total.
fn select_contiguous(
    candidates: &Bitmap,
    details: &JobDetails,
    effective_procs: u32,
    nodes: &NodeTable,
    configs: &ConfigTable,
) -> Result<Bitmap, LatticeError> {
    let max_nodes = if details.max_nodes == NO_VAL {
        candidates.count()
    } else {
        details.max_nodes as usize
    };
    for run_len in details.min_nodes as usize..=max_nodes.min(candidates.count()) {
        let mut start = 0usize;
        while let Some(run_start) = find_run_from(candidates, start, run_len) {
            let cpu_sum: u32 = (run_start..run_start + run_len)
                .map(|i| configs.configs[nodes.nodes[i].config_idx].cpus)
                .sum();
            if cpu_sum >= effective_procs {
                return Ok(Bitmap::from_indices(
                    candidates.len(),
                    &(run_start..run_start + run_len).collect::<Vec<_>>(),
                ));
            }
            start = run_start + 1;
        }
    }
    // Distinguish "not enough nodes at all" from "enough nodes, no run".
    if candidates.count() < details.min_nodes as usize {
        Err(LatticeError::NodesBusy)
    } else {
        Err(LatticeError::Fragmentation)
    }
}

/// First run of `run_len` consecutive set bits at or after `from`.
fn find_run_from(bitmap: &Bitmap, from: usize, run_len: usize) -> Option<usize> {
    let mut run = 0usize;
    let mut run_start = None;
    for i in from..bitmap.len() {
        if bitmap.test(i) {
            if run == 0 {
                run_start = Some(i);
            }
            run += 1;
            if run >= run_len {
                return run_start;
            }
        } else {
            run = 0;
            run_start = None;
        }
    }
    None
}

/// Default placement: candidates ordered by config weight ascending, then
/// available capacity descending, then index; greedily take nodes until
/// both the node floor and the CPU total are met.
#[allow(clippy::too_many_arguments)]
fn select_weighted(
    candidates: &Bitmap,
    details: &JobDetails,
    effective_procs: u32,
    nodes: &NodeTable,
    configs: &ConfigTable,
    ctx: &SelectContext,
    sharing: bool,
) -> Result<Bitmap, LatticeError> {
    let mut order: Vec<usize> = candidates.iter_set().collect();
    order.sort_by(|&a, &b| {
        let ca = &configs.configs[nodes.nodes[a].config_idx];
        let cb = &configs.configs[nodes.nodes[b].config_idx];
        let cap_a = if sharing {
            free_row_capacity(nodes, a, ctx.part_idx, ca.cpus)
        } else {
            ca.cpus
        };
        let cap_b = if sharing {
            free_row_capacity(nodes, b, ctx.part_idx, cb.cpus)
        } else {
            cb.cpus
        };
        ca.weight
            .cmp(&cb.weight)
            .then(cap_b.cmp(&cap_a))
            .then(a.cmp(&b))
    });

    // Required nodes come first regardless of ordering.
    let mut chosen = Bitmap::new(candidates.len());
    let mut count = 0usize;
    let mut cpus = 0u32;
    let take = |idx: usize, chosen: &mut Bitmap, count: &mut usize, cpus: &mut u32| {
        if chosen.test(idx) {
            return;
        }
        chosen.set(idx);
        *count += 1;
        let config = &configs.configs[nodes.nodes[idx].config_idx];
        *cpus += if sharing {
            free_row_capacity(nodes, idx, ctx.part_idx, config.cpus)
        } else {
            config.cpus
        };
    };
    if let Some(required) = &details.req_node_bitmap {
        for idx in required.iter_set() {
            take(idx, &mut chosen, &mut count, &mut cpus);
        }
    }

    let max_nodes = if details.max_nodes == NO_VAL {
        usize::MAX
    } else {
        details.max_nodes as usize
    };
    for idx in order {
        if count >= details.min_nodes as usize && cpus >= effective_procs {
            break;
        }
        if count >= max_nodes {
            break;
        }
        take(idx, &mut chosen, &mut count, &mut cpus);
    }

    if count < details.min_nodes as usize || cpus < effective_procs {
        return Err(LatticeError::NodesBusy);
    }
    if count > max_nodes {
        return Err(LatticeError::TooManyCpus);
    }
    Ok(chosen)
}
