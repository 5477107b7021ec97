// src/core/model/config.rs

//! Shared node-configuration records.

use crate::core::Bitmap;

/// One configuration specification shared by a set of identically-equipped
/// nodes. Weight orders configurations for scheduling; lower weight is
/// preferred.
#[derive(Debug, Clone)]
pub struct ConfigRecord {
    pub cpus: u32,
    /// Megabytes of real memory.
    pub real_memory: u32,
    /// Megabytes of temporary disk.
    pub tmp_disk: u32,
    pub weight: u32,
    pub features: Vec<String>,
    /// The node-line expression this record came from.
    pub nodes: String,
    /// Ground-truth membership over the dense node index.
    pub node_bitmap: Bitmap,
    /// Sockets per node and cores per socket for the core-level selector
    /// plugins; a flat-cpu configuration reports one socket.
    pub sockets: u32,
    pub cores_per_socket: u32,
    pub threads_per_core: u32,
}

impl ConfigRecord {
    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.iter().any(|f| f == feature)
    }

    /// Total schedulable cores on one node of this configuration.
    pub fn cores(&self) -> u32 {
        (self.sockets * self.cores_per_socket).max(1)
    }
}
