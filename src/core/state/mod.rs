// src/core/state/mod.rs

//! The central `ControllerState` struct: the six lockable tables plus the
//! handful of process-wide singletons (config snapshot, id counters,
//! credential trust store).

pub mod job_mgr;
pub mod node_mgr;
pub mod part_mgr;
pub mod step_mgr;

use crate::config::Config;
use crate::core::accounting::store::AccountingStore;
use crate::core::cred::CredManager;
use crate::core::hostlist::{self, NameIndex};
use crate::core::locks::{LockLevel, LockRequest, TableGuard, TableId};
use crate::core::model::{
    Association, ConfigRecord, JobRecord, NodeRecord, PartRecord, Qos, Reservation,
};
use crate::core::sched::topology::TopologyPlugin;
use crate::core::{Bitmap, LatticeError};
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64};
use tokio::sync::broadcast;
use tracing::info;

/// Width of the QOS id space; preemption bitsets are sized to this.
pub const QOS_WIDTH: usize = 1024;

/// Current unix time in seconds.
pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// The jobs table.
#[derive(Debug, Default)]
pub struct JobTable {
    pub jobs: IndexMap<u32, JobRecord>,
}

impl JobTable {
    pub fn get(&self, job_id: u32) -> Option<&JobRecord> {
        self.jobs.get(&job_id)
    }

    pub fn get_mut(&mut self, job_id: u32) -> Option<&mut JobRecord> {
        self.jobs.get_mut(&job_id)
    }

    /// Pending job ids in scheduling order: priority descending, ties by
    /// submit time ascending.
    pub fn pending_queue(&self) -> Vec<u32> {
        let mut pending: Vec<&JobRecord> = self
            .jobs
            .values()
            .filter(|j| j.state == crate::core::model::JobState::Pending)
            .collect();
        pending.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.submit_time.cmp(&b.submit_time))
        });
        pending.iter().map(|j| j.job_id).collect()
    }
}

/// Consumable-resource usage row for one `(node, partition)` pair.
#[derive(Debug, Clone, Default)]
pub struct CrRow {
    pub used_cpus: u32,
    /// Used cores indexed by socket; empty for the flat-cpu selector.
    pub used_cores_per_socket: Vec<u32>,
}

/// Number of sharing rows per `(node, partition)` pair.
pub const CR_ROW_COUNT: usize = 4;

/// The nodes table, including the selector's consumable-resource rows.
#[derive(Debug, Default)]
pub struct NodeTable {
    pub nodes: Vec<NodeRecord>,
    pub name_index: Option<NameIndex>,
    pub up_nodes: Bitmap,
    pub idle_nodes: Bitmap,
    /// Per-`(node index, partition index)` sharing rows.
    pub cr_rows: HashMap<(usize, usize), Vec<CrRow>>,
}

impl NodeTable {
    pub fn count(&self) -> usize {
        self.nodes.len()
    }

    pub fn find(&self, name: &str) -> Option<&NodeRecord> {
        let idx = self.name_index.as_ref()?.lookup(name)?;
        self.nodes.get(idx)
    }

    pub fn find_index(&self, name: &str) -> Option<usize> {
        self.name_index.as_ref()?.lookup(name)
    }

    /// Resolves a hostlist expression into a bitmap over the node index.
    pub fn name2bitmap(&self, expr: &str) -> Result<Bitmap, LatticeError> {
        let mut bitmap = Bitmap::new(self.count());
        if expr.is_empty() {
            return Ok(bitmap);
        }
        for name in hostlist::expand(expr)? {
            let idx = self
                .find_index(&name)
                .ok_or_else(|| LatticeError::InvalidNodeName(name.clone()))?;
            bitmap.set(idx);
        }
        Ok(bitmap)
    }

    /// Renders a bitmap as the canonical ranged name string.
    pub fn bitmap2names(&self, bitmap: &Bitmap) -> String {
        let names: Vec<String> = bitmap
            .iter_set()
            .filter_map(|i| self.nodes.get(i).map(|n| n.name.clone()))
            .collect();
        hostlist::compress(&names)
    }

    /// Recomputes the up/idle bitmaps from node states.
    pub fn refresh_state_bitmaps(&mut self) {
        let count = self.count();
        let mut up = Bitmap::new(count);
        let mut idle = Bitmap::new(count);
        for node in &self.nodes {
            if node.state.is_up() && !node.no_respond {
                up.set(node.index);
            }
            if node.state.is_schedulable() && !node.no_respond {
                idle.set(node.index);
            }
        }
        self.up_nodes = up;
        self.idle_nodes = idle;
    }

    /// Sharing rows for a `(node, partition)` pair, created on first use.
    pub fn cr_rows_mut(&mut self, node_idx: usize, part_idx: usize) -> &mut Vec<CrRow> {
        self.cr_rows
            .entry((node_idx, part_idx))
            .or_insert_with(|| vec![CrRow::default(); CR_ROW_COUNT])
    }
}

/// The partitions table, which also owns reservations.
#[derive(Debug, Default)]
pub struct PartTable {
    pub parts: IndexMap<String, PartRecord>,
    pub resvs: Vec<Reservation>,
    pub next_resv_id: u32,
}

impl PartTable {
    pub fn get(&self, name: &str) -> Option<&PartRecord> {
        self.parts.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut PartRecord> {
        self.parts.get_mut(name)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.parts.get_index_of(name)
    }

    pub fn by_index(&self, idx: usize) -> Option<&PartRecord> {
        self.parts.get_index(idx).map(|(_, p)| p)
    }

    pub fn default_part(&self) -> Option<&PartRecord> {
        self.parts.values().find(|p| p.is_default)
    }

    pub fn find_resv(&self, name: &str) -> Option<&Reservation> {
        self.resvs.iter().find(|r| r.name == name)
    }

    pub fn find_resv_by_id(&self, id: u32) -> Option<&Reservation> {
        self.resvs.iter().find(|r| r.id == id)
    }
}

/// The configs table.
#[derive(Debug, Default)]
pub struct ConfigTable {
    pub configs: Vec<ConfigRecord>,
}

/// The associations table; QOS classes live under the same lock.
#[derive(Debug, Default)]
pub struct AssocTable {
    pub assocs: Vec<Association>,
    pub qoses: Vec<Qos>,
    pub next_assoc_id: u32,
    pub next_qos_id: u32,
}

impl AssocTable {
    pub fn find(&self, acct: &str, user: &str, partition: &str) -> Option<&Association> {
        self.assocs
            .iter()
            .find(|a| !a.deleted && a.acct == acct && a.user == user && a.partition == partition)
    }

    pub fn find_by_id(&self, id: u32) -> Option<&Association> {
        self.assocs.iter().find(|a| a.id == id)
    }

    pub fn find_qos(&self, name: &str) -> Option<&Qos> {
        self.qoses.iter().find(|q| !q.deleted && q.name == name)
    }

    pub fn find_qos_by_id(&self, id: u32) -> Option<&Qos> {
        self.qoses.iter().find(|q| q.id == id)
    }

    /// All live associations inside the subtree of `root`.
    pub fn subtree(&self, root: &Association) -> Vec<&Association> {
        self.assocs
            .iter()
            .filter(|a| !a.deleted && root.lft <= a.lft && a.rgt <= root.rgt)
            .collect()
    }

    /// Recomputes `lft`/`rgt` bounds from the parent-account links. The
    /// numbering walks accounts depth-first with user leaves nested under
    /// their account, so subtree membership stays a single interval test.
    pub fn rebuild_nested_sets(&mut self) {
        // Children per account, preserving insertion order.
        let mut children: HashMap<String, Vec<String>> = HashMap::new();
        for a in self.assocs.iter().filter(|a| !a.is_user() && !a.deleted) {
            if a.acct != a.parent_acct {
                children
                    .entry(a.parent_acct.clone())
                    .or_default()
                    .push(a.acct.clone());
            }
        }

        let mut counter = 0u32;
        let mut stack: Vec<(String, bool)> = vec![("root".to_string(), false)];
        while let Some((acct, children_done)) = stack.pop() {
            if !children_done {
                counter += 1;
                let lft = counter;
                if let Some(a) = self
                    .assocs
                    .iter_mut()
                    .find(|a| !a.is_user() && a.acct == acct)
                {
                    a.lft = lft;
                }
                // User leaves nest directly under their account.
                let user_ids: Vec<u32> = self
                    .assocs
                    .iter()
                    .filter(|a| a.is_user() && a.acct == acct && !a.deleted)
                    .map(|a| a.id)
                    .collect();
                for id in user_ids {
                    counter += 1;
                    let user_lft = counter;
                    counter += 1;
                    let user_rgt = counter;
                    if let Some(a) = self.assocs.iter_mut().find(|a| a.id == id) {
                        a.lft = user_lft;
                        a.rgt = user_rgt;
                    }
                }
                stack.push((acct.clone(), true));
                if let Some(kids) = children.get(&acct) {
                    for kid in kids.iter().rev() {
                        stack.push((kid.clone(), false));
                    }
                }
            } else {
                counter += 1;
                let rgt = counter;
                if let Some(a) = self
                    .assocs
                    .iter_mut()
                    .find(|a| !a.is_user() && a.acct == acct)
                {
                    a.rgt = rgt;
                }
            }
        }
    }
}

/// The usage table: live accumulation state feeding the rollup engine.
#[derive(Debug, Default)]
pub struct UsageTable {
    /// Start of the next hourly window to roll.
    pub last_hour_rollup: i64,
    pub last_day_rollup: i64,
    pub last_month_rollup: i64,
    /// Raw CPU-seconds accumulated per association since startup; the
    /// fair-share input.
    pub assoc_raw: HashMap<u32, u64>,
    pub wckey_raw: HashMap<String, u64>,
}

struct Tables {
    jobs: RwLock<JobTable>,
    nodes: RwLock<NodeTable>,
    partitions: RwLock<PartTable>,
    configs: RwLock<ConfigTable>,
    associations: RwLock<AssocTable>,
    usage: RwLock<UsageTable>,
}

/// Guards over the declared subset of tables. Fields are declared in
/// reverse rank order so drops release usage first and jobs last.
pub struct LockSet<'a> {
    usage: TableGuard<'a, UsageTable>,
    associations: TableGuard<'a, AssocTable>,
    configs: TableGuard<'a, ConfigTable>,
    partitions: TableGuard<'a, PartTable>,
    nodes: TableGuard<'a, NodeTable>,
    jobs: TableGuard<'a, JobTable>,
}

impl LockSet<'_> {
    pub fn jobs(&self) -> &JobTable {
        self.jobs.get()
    }
    pub fn jobs_mut(&mut self) -> &mut JobTable {
        self.jobs.get_mut()
    }
    pub fn nodes(&self) -> &NodeTable {
        self.nodes.get()
    }
    pub fn nodes_mut(&mut self) -> &mut NodeTable {
        self.nodes.get_mut()
    }
    pub fn partitions(&self) -> &PartTable {
        self.partitions.get()
    }
    pub fn partitions_mut(&mut self) -> &mut PartTable {
        self.partitions.get_mut()
    }
    pub fn configs(&self) -> &ConfigTable {
        self.configs.get()
    }
    pub fn configs_mut(&mut self) -> &mut ConfigTable {
        self.configs.get_mut()
    }
    pub fn associations(&self) -> &AssocTable {
        self.associations.get()
    }
    pub fn associations_mut(&mut self) -> &mut AssocTable {
        self.associations.get_mut()
    }
    pub fn usage(&self) -> &UsageTable {
        self.usage.get()
    }
    pub fn usage_mut(&mut self) -> &mut UsageTable {
        self.usage.get_mut()
    }

    /// Splits the guard set for callers that must walk jobs and nodes
    /// simultaneously with exclusive access to both.
    pub fn jobs_nodes_mut(&mut self) -> (&mut JobTable, &mut NodeTable) {
        (self.jobs.get_mut(), self.nodes.get_mut())
    }

    /// Splits the guard set for node registration: exclusive nodes,
    /// shared configs.
    pub fn node_view(&mut self) -> (&mut NodeTable, &ConfigTable) {
        (self.nodes.get_mut(), self.configs.get())
    }

    /// Splits the guard set for partition updates: exclusive partitions
    /// and nodes, shared configs.
    pub fn part_view(&mut self) -> (&mut PartTable, &mut NodeTable, &ConfigTable) {
        (
            self.partitions.get_mut(),
            self.nodes.get_mut(),
            self.configs.get(),
        )
    }

    /// Splits the guard set for the purge sweep: shared jobs, exclusive
    /// nodes and partitions.
    pub fn purge_view(&mut self) -> (&JobTable, &mut NodeTable, &mut PartTable) {
        (self.jobs.get(), self.nodes.get_mut(), self.partitions.get_mut())
    }

    /// Splits the guard set into the scheduler's working view: exclusive
    /// jobs and nodes, shared partitions, configs, and associations.
    pub fn sched_view(&mut self) -> SchedView<'_> {
        SchedView {
            jobs: self.jobs.get_mut(),
            nodes: self.nodes.get_mut(),
            partitions: self.partitions.get(),
            configs: self.configs.get(),
            associations: self.associations.get(),
        }
    }
}

/// The scheduler's split borrow over a lock set.
pub struct SchedView<'a> {
    pub jobs: &'a mut JobTable,
    pub nodes: &'a mut NodeTable,
    pub partitions: &'a PartTable,
    pub configs: &'a ConfigTable,
    pub associations: &'a AssocTable,
}

/// The central struct holding all shared controller state. Wrapped in an
/// `Arc` and passed to every handler and background agent.
pub struct ControllerState {
    /// The configuration snapshot, replaced atomically on reconfigure.
    pub conf: RwLock<Arc<Config>>,
    tables: Tables,
    /// Monotonic job-id counter; see `job_mgr::set_job_id`.
    pub next_job_id: AtomicU32,
    /// Monotonic interconnect-context handle counter.
    pub next_switch_ctx: AtomicU64,
    /// Monotonic base for default priority assignment.
    pub prio_counter: AtomicU32,
    /// Cluster CPU count last reported to accounting; a change opens a
    /// fresh registration event row.
    pub last_reported_cpus: AtomicU32,
    pub cred: Arc<CredManager>,
    pub store: Arc<dyn AccountingStore>,
    pub topology: Arc<dyn TopologyPlugin>,
    pub prioritizer: Arc<dyn crate::core::sched::priority::Prioritizer>,
    pub shutdown_tx: broadcast::Sender<()>,
    /// Unique run id for this controller instance.
    pub run_id: String,
}

impl ControllerState {
    /// Builds the full controller state from a loaded configuration.
    pub fn initialize(
        conf: Config,
        cred: Arc<CredManager>,
        store: Arc<dyn AccountingStore>,
        topology: Arc<dyn TopologyPlugin>,
    ) -> Result<Arc<Self>, LatticeError> {
        let (shutdown_tx, _) = broadcast::channel(1);

        let mut run_id_bytes = [0u8; 16];
        getrandom::fill(&mut run_id_bytes).map_err(|e| LatticeError::Internal(e.to_string()))?;
        let run_id = hex::encode(run_id_bytes);

        let mut configs = ConfigTable::default();
        let mut node_table = NodeTable::default();

        // Dense node indices are assigned in node-line order; each line
        // becomes one shared configuration record.
        let mut names: Vec<String> = Vec::new();
        for line in &conf.nodes {
            let config_idx = configs.configs.len();
            let addrs = match &line.addrs {
                Some(expr) => Some(hostlist::expand(expr)?),
                None => None,
            };
            for (pos, name) in hostlist::expand(&line.names)?.into_iter().enumerate() {
                let idx = names.len();
                names.push(name.clone());
                let addr = addrs
                    .as_ref()
                    .and_then(|a| a.get(pos).cloned())
                    .unwrap_or_else(|| name.clone());
                node_table
                    .nodes
                    .push(NodeRecord::new(name, addr, line.port, idx, config_idx));
            }
            configs.configs.push(ConfigRecord {
                cpus: line.cpus,
                real_memory: line.real_memory,
                tmp_disk: line.tmp_disk,
                weight: line.weight,
                features: line.features.clone(),
                nodes: line.names.clone(),
                node_bitmap: Bitmap::new(0), // resized once all nodes are known
                sockets: line.sockets,
                cores_per_socket: line.cores_per_socket,
                threads_per_core: line.threads_per_core,
            });
        }
        let node_count = names.len();
        for config in configs.configs.iter_mut() {
            let mut bitmap = Bitmap::new(node_count);
            for name in hostlist::expand(&config.nodes)? {
                if let Some(pos) = names.iter().position(|n| n == &name) {
                    bitmap.set(pos);
                }
            }
            config.node_bitmap = bitmap;
        }
        node_table.name_index = Some(NameIndex::build(&names, conf.hash_base));
        node_table.up_nodes = Bitmap::new(node_count);
        node_table.idle_nodes = Bitmap::new(node_count);

        let mut partitions = PartTable::default();
        for line in &conf.partitions {
            let mut part = PartRecord::new(line.name.clone(), node_count);
            part.max_time = line.max_time;
            part.max_nodes = line.max_nodes;
            part.max_cpus_per_job = line.max_cpus_per_job;
            part.root_only = line.root_only;
            part.shared = line.shared;
            part.state_up = line.state_up;
            part.allow_groups = line.allow_groups.clone();
            part.is_default = line.default;
            part.nodes = line.nodes.clone();
            part.node_bitmap = node_table.name2bitmap(&line.nodes)?;
            part.total_nodes = part.node_bitmap.count() as u32;
            part.total_cpus = part
                .node_bitmap
                .iter_set()
                .map(|i| configs.configs[node_table.nodes[i].config_idx].cpus)
                .sum();
            let part_idx = partitions.parts.len();
            for idx in part.node_bitmap.iter_set() {
                node_table.nodes[idx].part_idx = Some(part_idx);
            }
            partitions.parts.insert(part.name.clone(), part);
        }

        // Seed the association tree with the cluster root and the default
        // QOS class.
        let mut associations = AssocTable {
            next_assoc_id: 2,
            next_qos_id: 2,
            ..Default::default()
        };
        associations.assocs.push(Association {
            id: 1,
            cluster: conf.cluster_name.clone(),
            acct: "root".to_string(),
            user: String::new(),
            partition: String::new(),
            parent_acct: "root".to_string(),
            lft: 0,
            rgt: 0,
            limits: Default::default(),
            qos: Bitmap::new(QOS_WIDTH),
            delta_qos: String::new(),
            deleted: false,
            mod_time: now(),
        });
        associations
            .qoses
            .push(Qos::new(1, "normal".to_string(), QOS_WIDTH));
        associations.rebuild_nested_sets();

        info!(
            nodes = node_count,
            partitions = partitions.parts.len(),
            "controller state initialized"
        );

        let first_job_id = conf.first_job_id;
        Ok(Arc::new(Self {
            conf: RwLock::new(Arc::new(conf)),
            tables: Tables {
                jobs: RwLock::new(JobTable::default()),
                nodes: RwLock::new(node_table),
                partitions: RwLock::new(partitions),
                configs: RwLock::new(configs),
                associations: RwLock::new(associations),
                usage: RwLock::new(UsageTable::default()),
            },
            next_job_id: AtomicU32::new(first_job_id),
            next_switch_ctx: AtomicU64::new(1),
            prio_counter: AtomicU32::new(0),
            last_reported_cpus: AtomicU32::new(0),
            cred,
            store,
            topology,
            prioritizer: Arc::new(crate::core::sched::priority::AgePrioritizer),
            shutdown_tx,
            run_id,
        }))
    }

    /// Acquires the declared lock set in the fixed global order.
    pub fn lock(&self, req: LockRequest) -> LockSet<'_> {
        let jobs = TableGuard::acquire(&self.tables.jobs, req.jobs, TableId::Jobs);
        let nodes = TableGuard::acquire(&self.tables.nodes, req.nodes, TableId::Nodes);
        let partitions =
            TableGuard::acquire(&self.tables.partitions, req.partitions, TableId::Partitions);
        let configs = TableGuard::acquire(&self.tables.configs, req.configs, TableId::Configs);
        let associations = TableGuard::acquire(
            &self.tables.associations,
            req.associations,
            TableId::Associations,
        );
        let usage = TableGuard::acquire(&self.tables.usage, req.usage, TableId::Usage);
        LockSet {
            usage,
            associations,
            configs,
            partitions,
            nodes,
            jobs,
        }
    }

    /// Convenience: the current configuration snapshot.
    pub fn config(&self) -> Arc<Config> {
        self.conf.read().clone()
    }

    /// Swaps in a new configuration snapshot (reconfigure).
    pub fn swap_config(&self, conf: Config) {
        *self.conf.write() = Arc::new(conf);
    }

    pub fn read_request() -> LockRequest {
        LockRequest {
            jobs: LockLevel::Read,
            nodes: LockLevel::Read,
            partitions: LockLevel::Read,
            configs: LockLevel::Read,
            associations: LockLevel::Read,
            usage: LockLevel::Read,
        }
    }
}
