// src/core/model/assoc.rs

//! Association records: the nested-set authorization tree.

use crate::core::Bitmap;
use crate::core::rpc::pack::{NO_VAL, NO_VAL64};
use serde::{Deserialize, Serialize};

/// Resource limits shared by associations and QOS classes. `NO_VAL`
/// fields are unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssocLimits {
    /// Per-user concurrent job cap.
    pub max_jobs: u32,
    /// Per-user pending+running submission cap.
    pub max_submit_jobs: u32,
    pub max_cpus_per_job: u32,
    pub max_nodes_per_job: u32,
    /// Minutes.
    pub max_wall_per_job: u32,
    pub max_cpu_mins_per_job: u64,
    /// Group-wide caps across the subtree.
    pub grp_jobs: u32,
    pub grp_submit_jobs: u32,
    pub grp_cpus: u32,
    pub grp_nodes: u32,
    pub grp_wall: u32,
    pub grp_cpu_mins: u64,
    /// Fair-share weight.
    pub fairshare: u32,
}

impl Default for AssocLimits {
    fn default() -> Self {
        Self {
            max_jobs: NO_VAL,
            max_submit_jobs: NO_VAL,
            max_cpus_per_job: NO_VAL,
            max_nodes_per_job: NO_VAL,
            max_wall_per_job: NO_VAL,
            max_cpu_mins_per_job: NO_VAL64,
            grp_jobs: NO_VAL,
            grp_submit_jobs: NO_VAL,
            grp_cpus: NO_VAL,
            grp_nodes: NO_VAL,
            grp_wall: NO_VAL,
            grp_cpu_mins: NO_VAL64,
            fairshare: 1,
        }
    }
}

/// One node of the nested-set tree over `(cluster, account, user,
/// partition)` tuples. `lft`/`rgt` bound the subtree, so any subtree query
/// is a single interval scan. The root of each cluster's tree has
/// `user == ""` and `acct == "root"`.
#[derive(Debug, Clone)]
pub struct Association {
    pub id: u32,
    pub cluster: String,
    pub acct: String,
    /// Empty for account (non-user) associations.
    pub user: String,
    pub partition: String,
    pub parent_acct: String,
    pub lft: u32,
    pub rgt: u32,
    pub limits: AssocLimits,
    /// QOS ids this association may use.
    pub qos: Bitmap,
    /// Delta-QOS string, e.g. `+fast,-slow`, applied over the parent set.
    pub delta_qos: String,
    /// Soft-delete flag; removed rows are never physically deleted.
    pub deleted: bool,
    pub mod_time: i64,
}

impl Association {
    /// True when this association is a (strict or equal) ancestor of `other`.
    pub fn contains(&self, other: &Association) -> bool {
        self.lft <= other.lft && other.rgt <= self.rgt
    }

    /// True when this association is a user leaf rather than an account.
    pub fn is_user(&self) -> bool {
        !self.user.is_empty()
    }
}
