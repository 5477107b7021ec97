// src/core/sched/dist.rs

//! Task-to-node and task-to-socket layout.
//!
//! Each function distributes `max_tasks` over the given per-node CPU
//! capacities and returns a freshly built per-node task vector. A pass
//! that makes no progress means the input cannot hold the tasks at all
//! (no nodes, or zero capacity everywhere); that fails deterministically
//! with `BadTaskCount` and nothing partial escapes to the caller.

use crate::core::LatticeError;

/// Round-robin layout: one task per node per cycle while the node still
/// has a free CPU in that cycle; once every node is full the layout keeps
/// cycling (over-subscribe). With `over_commit`, extra tasks stop
/// inflating the per-node CPU charge beyond one.
pub fn dist_cyclic(
    max_tasks: u32,
    cpus: &[u32],
    over_commit: bool,
) -> Result<Vec<u32>, LatticeError> {
    let mut alloc = vec![0u32; cpus.len()];
    let mut assigned = 0u32;
    let mut over_subscribe = false;
    let mut cycle = 0u32;
    while assigned < max_tasks {
        let before = assigned;
        let mut space_remaining = false;
        for (i, &cap) in cpus.iter().enumerate() {
            if assigned >= max_tasks {
                break;
            }
            if cycle < cap || over_subscribe {
                assigned += 1;
                if alloc[i] == 0 || !over_commit {
                    alloc[i] += 1;
                }
                if cycle + 1 < cap {
                    space_remaining = true;
                }
            }
        }
        if !space_remaining {
            over_subscribe = true;
        }
        if before == assigned {
            return Err(LatticeError::BadTaskCount);
        }
        cycle += 1;
    }
    Ok(alloc)
}

/// Block layout: fill each node to capacity before moving on; remaining
/// tasks over-subscribe round-robin.
pub fn dist_block(
    max_tasks: u32,
    cpus: &[u32],
    over_commit: bool,
) -> Result<Vec<u32>, LatticeError> {
    let mut alloc = vec![0u32; cpus.len()];
    let mut assigned = 0u32;
    for (i, &cap) in cpus.iter().enumerate() {
        while alloc[i] < cap && assigned < max_tasks {
            alloc[i] += 1;
            assigned += 1;
        }
    }
    // Capacity exhausted; over-subscribe one task per node per pass.
    while assigned < max_tasks {
        let before = assigned;
        for (i, &cap) in cpus.iter().enumerate() {
            if assigned >= max_tasks {
                break;
            }
            if cap == 0 {
                continue;
            }
            assigned += 1;
            if !over_commit {
                alloc[i] += 1;
            }
        }
        if before == assigned {
            return Err(LatticeError::BadTaskCount);
        }
    }
    Ok(alloc)
}

/// Plane layout: blocks of `plane_size` tasks cycled across the nodes.
pub fn dist_plane(
    max_tasks: u32,
    node_count: usize,
    plane_size: u16,
    over_commit: bool,
) -> Result<Vec<u32>, LatticeError> {
    if plane_size == 0 || node_count == 0 {
        return Err(LatticeError::BadDistribution);
    }
    let mut alloc = vec![0u32; node_count];
    let mut assigned = 0u32;
    while assigned < max_tasks {
        let before = assigned;
        for node in alloc.iter_mut() {
            for _ in 0..plane_size {
                if assigned >= max_tasks {
                    break;
                }
                assigned += 1;
                if *node == 0 || !over_commit {
                    *node += 1;
                }
            }
            if assigned >= max_tasks {
                break;
            }
        }
        if before == assigned {
            return Err(LatticeError::BadTaskCount);
        }
    }
    Ok(alloc)
}

/// Distributes `cpus_needed` over a node's sockets, filling sockets in
/// turn to minimize cross-socket spread while honoring the socket-count
/// window and the per-socket core minimum. `NO_VAL` constraints are
/// unconstrained.
pub fn distribute_over_sockets(
    cpus_needed: u32,
    sockets: u32,
    cores_per_socket: u32,
    min_sockets: u32,
    max_sockets: u32,
    min_cores_per_socket: u32,
) -> Result<Vec<u32>, LatticeError> {
    use crate::core::rpc::pack::NO_VAL;

    if sockets == 0 || cores_per_socket == 0 {
        return Err(LatticeError::BadTaskCount);
    }
    let usable_sockets = if max_sockets == NO_VAL {
        sockets
    } else {
        max_sockets.min(sockets)
    };
    let floor_sockets = if min_sockets == NO_VAL { 1 } else { min_sockets };
    if floor_sockets > usable_sockets {
        return Err(LatticeError::RequestedConfigUnavailable);
    }
    let per_socket_floor = if min_cores_per_socket == NO_VAL {
        0
    } else {
        min_cores_per_socket
    };
    if per_socket_floor > cores_per_socket {
        return Err(LatticeError::RequestedConfigUnavailable);
    }
    if cpus_needed > usable_sockets * cores_per_socket {
        return Err(LatticeError::BadTaskCount);
    }

    let mut per_socket = vec![0u32; sockets as usize];
    let mut remaining = cpus_needed;

    // Spread the floor across the minimum socket count first.
    for s in per_socket.iter_mut().take(floor_sockets as usize) {
        let take = per_socket_floor.min(remaining);
        *s = take;
        remaining -= take;
    }
    // Fill sockets sequentially to keep the spread minimal.
    for s in per_socket.iter_mut().take(usable_sockets as usize) {
        if remaining == 0 {
            break;
        }
        let take = (cores_per_socket - *s).min(remaining);
        *s += take;
        remaining -= take;
    }
    if remaining > 0 {
        return Err(LatticeError::BadTaskCount);
    }
    Ok(per_socket)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rpc::pack::NO_VAL;

    #[test]
    fn cyclic_round_robin() {
        // 5 tasks over capacities [2, 2, 1]: cycle 1 gives one each,
        // cycle 2 fills the first two.
        let alloc = dist_cyclic(5, &[2, 2, 1], false).unwrap();
        assert_eq!(alloc, vec![2, 2, 1]);
    }

    #[test]
    fn cyclic_oversubscribes_past_capacity() {
        let alloc = dist_cyclic(5, &[1, 1], false).unwrap();
        assert_eq!(alloc.iter().sum::<u32>(), 5);
    }

    #[test]
    fn cyclic_over_commit_caps_charge() {
        let alloc = dist_cyclic(6, &[1, 1], true).unwrap();
        assert_eq!(alloc, vec![1, 1]);
    }

    #[test]
    fn block_fills_in_turn() {
        let alloc = dist_block(4, &[2, 4], false).unwrap();
        assert_eq!(alloc, vec![2, 2]);
    }

    #[test]
    fn zero_capacity_is_bad_task_count() {
        assert_eq!(
            dist_cyclic(1, &[0, 0], false).unwrap_err(),
            LatticeError::BadTaskCount
        );
        assert_eq!(
            dist_block(1, &[], false).unwrap_err(),
            LatticeError::BadTaskCount
        );
    }

    #[test]
    fn plane_cycles_blocks() {
        // plane_size 2 over 2 nodes: blocks of 2 alternate.
        let alloc = dist_plane(6, 2, 2, false).unwrap();
        assert_eq!(alloc, vec![4, 2]);
    }

    #[test]
    fn sockets_fill_sequentially() {
        let per_socket =
            distribute_over_sockets(5, 2, 4, NO_VAL, NO_VAL, NO_VAL).unwrap();
        assert_eq!(per_socket, vec![4, 1]);
    }

    #[test]
    fn sockets_honor_min_spread() {
        let per_socket = distribute_over_sockets(4, 4, 4, 2, NO_VAL, 1).unwrap();
        assert!(per_socket[0] >= 1 && per_socket[1] >= 1);
        assert_eq!(per_socket.iter().sum::<u32>(), 4);
    }
}
