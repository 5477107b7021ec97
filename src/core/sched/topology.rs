// src/core/sched/topology.rs

//! The pluggable topology allocator.
//!
//! Interconnect-aware placement is abstracted behind [`TopologyPlugin`].
//! The controller carries connection type and node use as opaque job
//! parameters; only the plugin interprets them. Two implementations are
//! bundled: a linear pass-through used by default, and a d-dimensional
//! grid allocator that carves aligned sub-blocks out of a torus or mesh.

use crate::core::model::Qos;
use crate::core::{Bitmap, LatticeError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use strum_macros::{Display, EnumString};

/// Interconnect wiring requested for a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Default)]
#[strum(serialize_all = "lowercase")]
pub enum ConnType {
    #[default]
    Torus,
    Mesh,
    Nav,
    Small,
}

/// How the nodes in a block are used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Default)]
#[strum(serialize_all = "lowercase")]
pub enum NodeUse {
    #[default]
    Coprocessor,
    Virtual,
}

/// A topology allocation request.
#[derive(Debug, Clone, Default)]
pub struct TopoRequest {
    pub node_count: u32,
    /// Explicit box geometry per axis; `None` lets the plugin choose.
    pub geometry: Option<Vec<u32>>,
    pub conn: ConnType,
    pub node_use: NodeUse,
    /// Allow the plugin to rotate the requested geometry.
    pub rotate: bool,
}

/// Checks whether adding `new_preempt` edges from `origin` would close a
/// cycle in the QOS preemption relation. The walk is a DFS over the
/// existing preemption bitsets starting from the proposed targets; hitting
/// `origin` again means the transitive closure would contain a self-loop.
pub fn preemption_introduces_loop(qoses: &[Qos], origin: u32, new_preempt: &Bitmap) -> bool {
    let mut stack: Vec<u32> = new_preempt.iter_set().map(|i| i as u32).collect();
    let mut visited: Vec<u32> = Vec::new();
    while let Some(id) = stack.pop() {
        if id == origin {
            return true;
        }
        if visited.contains(&id) {
            continue;
        }
        visited.push(id);
        if let Some(qos) = qoses.iter().find(|q| q.id == id) {
            stack.extend(qos.preempt.iter_set().map(|i| i as u32));
        }
    }
    false
}

/// Interface every topology backend implements. All methods take the
/// dense node index space; blocks are plain bitmaps to the controller.
pub trait TopologyPlugin: Send + Sync {
    fn name(&self) -> &'static str;

    /// Chooses a block satisfying `req` out of `avail`, or fails.
    fn allocate(&self, req: &TopoRequest, avail: &Bitmap) -> Result<Bitmap, LatticeError>;

    /// Carves `sub_count` sub-blocks out of an existing block.
    fn split(&self, block: &Bitmap, sub_count: u32) -> Result<Vec<Bitmap>, LatticeError>;

    /// Returns a block to the free pool.
    fn free(&self, block: &Bitmap);

    /// Builds an opaque interconnect context handle for a step.
    fn make_context(&self, job_id: u32, step_id: u32, nodes: &Bitmap)
    -> Result<u64, LatticeError>;

    /// Guard invoked before a QOS preemption modification is accepted.
    fn would_introduce_preemption_loop(
        &self,
        qoses: &[Qos],
        origin: u32,
        new_preempt: &Bitmap,
    ) -> bool {
        preemption_introduces_loop(qoses, origin, new_preempt)
    }
}

/// Resolves a topology backend by name.
pub fn plugin_for(name: &str, node_count: usize) -> Result<std::sync::Arc<dyn TopologyPlugin>, LatticeError> {
    match name {
        "none" | "linear" | "builtin" => Ok(std::sync::Arc::new(NoneTopology::default())),
        "grid" => Ok(std::sync::Arc::new(GridTopology::new(
            vec![node_count as u32, 1, 1],
            ConnType::Mesh,
        ))),
        other => Err(LatticeError::ParseFailure(format!(
            "unknown topology plugin '{other}'"
        ))),
    }
}

/// Pass-through allocator for machines without interconnect wiring
/// constraints: takes the lowest available indices and mints context
/// handles from a counter.
#[derive(Debug, Default)]
pub struct NoneTopology {
    ctx_counter: AtomicU64,
}

impl TopologyPlugin for NoneTopology {
    fn name(&self) -> &'static str {
        "none"
    }

    fn allocate(&self, req: &TopoRequest, avail: &Bitmap) -> Result<Bitmap, LatticeError> {
        let mut out = Bitmap::new(avail.len());
        let mut taken = 0;
        for idx in avail.iter_set() {
            if taken == req.node_count {
                break;
            }
            out.set(idx);
            taken += 1;
        }
        if taken < req.node_count {
            return Err(LatticeError::NodesBusy);
        }
        Ok(out)
    }

    fn split(&self, block: &Bitmap, sub_count: u32) -> Result<Vec<Bitmap>, LatticeError> {
        let total = block.count();
        if sub_count == 0 || total < sub_count as usize {
            return Err(LatticeError::InvalidNodeCount);
        }
        let per = total / sub_count as usize;
        let mut subs = Vec::with_capacity(sub_count as usize);
        let mut current = Bitmap::new(block.len());
        let mut filled = 0;
        for idx in block.iter_set() {
            current.set(idx);
            filled += 1;
            if filled == per && (subs.len() as u32) < sub_count - 1 {
                subs.push(std::mem::replace(&mut current, Bitmap::new(block.len())));
                filled = 0;
            }
        }
        subs.push(current);
        Ok(subs)
    }

    fn free(&self, _block: &Bitmap) {}

    fn make_context(
        &self,
        _job_id: u32,
        _step_id: u32,
        _nodes: &Bitmap,
    ) -> Result<u64, LatticeError> {
        Ok(self.ctx_counter.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

/// A d-dimensional grid allocator. Nodes are laid out row-major over
/// `dims`; allocation carves an axis-aligned box, wrapping on torus
/// wiring. Freed boxes simply return to the available pool; adjacent free
/// boxes merge implicitly because availability is tracked per node.
#[derive(Debug)]
pub struct GridTopology {
    dims: Vec<u32>,
    conn: ConnType,
    used: Mutex<Bitmap>,
    ctx_counter: AtomicU64,
}

impl GridTopology {
    pub fn new(dims: Vec<u32>, conn: ConnType) -> Self {
        let size: u32 = dims.iter().product();
        Self {
            dims,
            conn,
            used: Mutex::new(Bitmap::new(size as usize)),
            ctx_counter: AtomicU64::new(0),
        }
    }

    pub fn size(&self) -> usize {
        self.dims.iter().product::<u32>() as usize
    }

    fn linear_index(&self, coords: &[u32]) -> usize {
        let mut idx = 0usize;
        for (axis, &c) in coords.iter().enumerate() {
            idx = idx * self.dims[axis] as usize + c as usize;
        }
        idx
    }

    /// Default geometry for a bare node count: a 1-d run along the last
    /// axis, the smallest shape the wiring supports.
    fn default_geometry(&self, node_count: u32) -> Vec<u32> {
        let mut geom = vec![1; self.dims.len()];
        if let Some(last) = geom.last_mut() {
            *last = node_count;
        }
        geom
    }

    /// Enumerates every cell of the box anchored at `corner`, honoring
    /// torus wrap. Returns `None` when the box leaves a mesh edge.
    fn box_cells(&self, corner: &[u32], geom: &[u32]) -> Option<Vec<usize>> {
        let wrap = self.conn == ConnType::Torus;
        let dims = &self.dims;
        for axis in 0..dims.len() {
            if !wrap && corner[axis] + geom[axis] > dims[axis] {
                return None;
            }
            if geom[axis] > dims[axis] {
                return None;
            }
        }
        let mut cells = Vec::new();
        let mut cursor = vec![0u32; dims.len()];
        loop {
            let coords: Vec<u32> = cursor
                .iter()
                .enumerate()
                .map(|(axis, &o)| (corner[axis] + o) % dims[axis])
                .collect();
            cells.push(self.linear_index(&coords));

            let mut axis = dims.len();
            loop {
                if axis == 0 {
                    return Some(cells);
                }
                axis -= 1;
                if cursor[axis] + 1 < geom[axis] {
                    cursor[axis] += 1;
                    cursor[axis + 1..].fill(0);
                    break;
                }
            }
        }
    }
}

impl TopologyPlugin for GridTopology {
    fn name(&self) -> &'static str {
        "grid"
    }

    fn allocate(&self, req: &TopoRequest, avail: &Bitmap) -> Result<Bitmap, LatticeError> {
        let geom = req
            .geometry
            .clone()
            .unwrap_or_else(|| self.default_geometry(req.node_count));
        if geom.len() != self.dims.len() {
            return Err(LatticeError::InterconnectFailure(format!(
                "geometry rank {} does not match machine rank {}",
                geom.len(),
                self.dims.len()
            )));
        }

        let mut used = self.used.lock();

        // First-fit over every anchor position.
        let mut corner = vec![0u32; self.dims.len()];
        'corners: loop {
            if let Some(cells) = self.box_cells(&corner, &geom) {
                let fits = cells
                    .iter()
                    .all(|&c| c < avail.len() && avail.test(c) && !used.test(c));
                if fits {
                    let mut block = Bitmap::new(avail.len());
                    for &c in &cells {
                        used.set(c);
                        block.set(c);
                    }
                    return Ok(block);
                }
            }
            // Advance the anchor odometer.
            let mut axis = self.dims.len();
            loop {
                if axis == 0 {
                    break 'corners;
                }
                axis -= 1;
                if corner[axis] + 1 < self.dims[axis] {
                    corner[axis] += 1;
                    corner[axis + 1..].fill(0);
                    break;
                }
                corner[axis] = 0;
            }
        }
        Err(LatticeError::NodesBusy)
    }

    fn split(&self, block: &Bitmap, sub_count: u32) -> Result<Vec<Bitmap>, LatticeError> {
        // Splitting a wired block keeps cells contiguous in linear order;
        // the wiring inside each sub-block stays valid on a grid.
        let total = block.count();
        if sub_count == 0 || total < sub_count as usize || total % sub_count as usize != 0 {
            return Err(LatticeError::InvalidNodeCount);
        }
        let per = total / sub_count as usize;
        let mut subs = Vec::with_capacity(sub_count as usize);
        let mut current = Bitmap::new(block.len());
        let mut filled = 0;
        for idx in block.iter_set() {
            current.set(idx);
            filled += 1;
            if filled == per {
                subs.push(std::mem::replace(&mut current, Bitmap::new(block.len())));
                filled = 0;
            }
        }
        Ok(subs)
    }

    fn free(&self, block: &Bitmap) {
        let mut used = self.used.lock();
        for idx in block.iter_set() {
            if idx < used.len() {
                used.clear(idx);
            }
        }
    }

    fn make_context(
        &self,
        _job_id: u32,
        _step_id: u32,
        _nodes: &Bitmap,
    ) -> Result<u64, LatticeError> {
        Ok(self.ctx_counter.fetch_add(1, Ordering::Relaxed) + 1)
    }
}
