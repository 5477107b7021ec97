// src/core/sched/cons_res.rs

//! Consumable-resource row accounting.
//!
//! Under a sharing partition each node carries a small fixed number of
//! rows per partition; every running job's CPUs (or cores per socket) are
//! charged against exactly one row. Row choice is best-fit: prefer the
//! row with the most existing use that still has room, which packs work
//! together and keeps whole rows free for wide jobs.

use crate::core::state::CrRow;

/// Picks the row to charge `cpus_needed` against, given the node's total
/// capacity. Best-fit by most existing use; ties break to the lowest
/// index. `None` when no row has room.
pub fn pick_row(rows: &[CrRow], cpus_needed: u32, capacity: u32) -> Option<usize> {
    let mut best: Option<(usize, u32)> = None;
    for (idx, row) in rows.iter().enumerate() {
        let free = capacity.saturating_sub(row.used_cpus);
        if free < cpus_needed {
            continue;
        }
        match best {
            Some((_, best_used)) if row.used_cpus <= best_used => {}
            _ => best = Some((idx, row.used_cpus)),
        }
    }
    best.map(|(idx, _)| idx)
}

/// Charges an allocation against a row.
pub fn charge(rows: &mut [CrRow], row_idx: usize, cpus: u32, per_socket: Option<&[u32]>) {
    let row = &mut rows[row_idx];
    row.used_cpus += cpus;
    if let Some(per_socket) = per_socket {
        if row.used_cores_per_socket.len() < per_socket.len() {
            row.used_cores_per_socket.resize(per_socket.len(), 0);
        }
        for (used, add) in row.used_cores_per_socket.iter_mut().zip(per_socket) {
            *used += add;
        }
    }
}

/// Releases a previous charge. Saturating: a release can never drive a
/// row negative even if state was rebuilt in between.
pub fn release(rows: &mut [CrRow], row_idx: usize, cpus: u32, per_socket: Option<&[u32]>) {
    let row = &mut rows[row_idx];
    row.used_cpus = row.used_cpus.saturating_sub(cpus);
    if let Some(per_socket) = per_socket {
        for (used, sub) in row.used_cores_per_socket.iter_mut().zip(per_socket) {
            *used = used.saturating_sub(*sub);
        }
    }
}
