// src/core/accounting/store.rs

//! The abstract relational store behind the accounting writer and the
//! rollup engine.
//!
//! Every mutation travels as a batch of [`StoreOp`]s committed together
//! with exactly one transaction-log row; the whole batch rolls back on
//! any failure. The bundled backend is an in-memory implementation with
//! the same observable semantics (tables, txn ids, atomic batches) as a
//! SQL deployment; queries used by the rollup are expressed as explicit
//! trait methods the way a SQL backend would expose stored procedures.

use crate::core::LatticeError;
use crate::core::model::{AssocUsage, ClusterUsage, RollupPeriod, WckeyUsage};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use strum_macros::{Display, EnumString};

/// Action recorded in the transaction log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum TxnAction {
    AddUser,
    ModifyUser,
    RemoveUser,
    AddAccount,
    ModifyAccount,
    RemoveAccount,
    AddAssoc,
    ModifyAssoc,
    RemoveAssoc,
    AddQos,
    ModifyQos,
    RemoveQos,
    AddCoord,
    RemoveCoord,
    RegisterCluster,
    AddJob,
    ModifyJob,
    CompleteJob,
    CancelJob,
    RollupUsage,
}

/// One row of the transaction log. `id` is monotonic and breaks timestamp
/// ties.
#[derive(Debug, Clone)]
pub struct TxnRow {
    pub id: u64,
    pub timestamp: i64,
    pub action: TxnAction,
    pub object: String,
    pub actor: String,
    pub info: String,
}

/// Input for the txn row appended with a commit.
#[derive(Debug, Clone)]
pub struct TxnInput {
    pub timestamp: i64,
    pub action: TxnAction,
    pub object: String,
    pub actor: String,
    pub info: String,
}

#[derive(Debug, Clone, Default)]
pub struct UserRow {
    pub name: String,
    pub default_acct: String,
    pub admin_level: u16,
    pub deleted: bool,
    pub mod_time: i64,
}

#[derive(Debug, Clone, Default)]
pub struct AccountRow {
    pub name: String,
    pub description: String,
    pub organization: String,
    pub deleted: bool,
    pub mod_time: i64,
}

#[derive(Debug, Clone, Default)]
pub struct CoordRow {
    pub acct: String,
    pub user: String,
    /// Direct grant rather than inherited through a parent account.
    pub direct: bool,
    pub deleted: bool,
}

#[derive(Debug, Clone, Default)]
pub struct AssocRow {
    pub id: u32,
    pub cluster: String,
    pub acct: String,
    pub user: String,
    pub partition: String,
    pub parent_acct: String,
    pub lft: u32,
    pub rgt: u32,
    /// QOS names granted, comma-joined.
    pub qos: String,
    /// Delta-QOS column, e.g. `+fast,-slow`.
    pub delta_qos: String,
    pub deleted: bool,
    pub mod_time: i64,
}

#[derive(Debug, Clone, Default)]
pub struct QosRow {
    pub id: u32,
    pub name: String,
    pub description: String,
    pub preempt: Vec<u32>,
    pub usage_factor: f64,
    pub deleted: bool,
    pub mod_time: i64,
}

#[derive(Debug, Clone, Default)]
pub struct ClusterRow {
    pub name: String,
    pub control_host: String,
    pub control_port: u16,
    pub rpc_version: u32,
    pub cpu_count: u32,
    pub deleted: bool,
    pub mod_time: i64,
}

/// A node event. An empty node name marks a cluster-registration record
/// carrying the live CPU count; otherwise the row is a down-node interval.
#[derive(Debug, Clone, Default)]
pub struct EventRow {
    pub cluster: String,
    pub node: String,
    pub cpus: u32,
    pub start: i64,
    /// 0 while the event is still open.
    pub end: i64,
    pub reason: String,
    pub maint: bool,
}

impl EventRow {
    pub fn is_registration(&self) -> bool {
        self.node.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResvRow {
    pub id: u32,
    pub cluster: String,
    pub name: String,
    pub assocs: Vec<u32>,
    pub cpus: u32,
    pub start: i64,
    pub end: i64,
    pub maint: bool,
}

#[derive(Debug, Clone, Default)]
pub struct JobRow {
    pub job_id: u32,
    pub cluster: String,
    pub assoc_id: u32,
    pub wckey: String,
    pub resv_id: u32,
    pub alloc_cpus: u32,
    pub eligible: i64,
    pub start: i64,
    /// 0 while running.
    pub end: i64,
    pub state: String,
}

#[derive(Debug, Clone, Default)]
pub struct SuspendRow {
    pub job_id: u32,
    pub start: i64,
    pub end: i64,
}

/// Scope of a usage aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageScope {
    Cluster,
    Assoc,
    Wckey,
}

/// One mutation inside a committed batch.
#[derive(Debug, Clone)]
pub enum StoreOp {
    UpsertUser(UserRow),
    SoftDeleteUser { name: String, mod_time: i64 },
    UpsertAccount(AccountRow),
    SoftDeleteAccount { name: String, mod_time: i64 },
    UpsertAssoc(AssocRow),
    SoftDeleteAssoc { id: u32, mod_time: i64 },
    UpsertQos(QosRow),
    SoftDeleteQos { name: String, mod_time: i64 },
    /// Regex-style replace over every association's delta-QOS column,
    /// applied when a QOS is removed so live references shrink to a
    /// valid set.
    RewriteDeltaQos { pattern: String, replacement: String, mod_time: i64 },
    AddCoords { acct: String, users: Vec<String> },
    RemoveCoords { acct: String, users: Vec<String> },
    UpsertCluster(ClusterRow),
    InsertEvent(EventRow),
    CloseEvent { cluster: String, node: String, end: i64 },
    UpsertResv(ResvRow),
    UpsertJob(JobRow),
    InsertSuspend(SuspendRow),
}

/// The abstract relational store.
#[async_trait]
pub trait AccountingStore: Send + Sync {
    /// Applies `ops` and appends one txn row, atomically. Returns the txn
    /// id. On failure nothing is applied and no txn row is written.
    async fn commit(&self, ops: Vec<StoreOp>, txn: TxnInput) -> Result<u64, LatticeError>;

    /// The transaction log, in commit order.
    async fn txns(&self) -> Vec<TxnRow>;

    async fn users(&self) -> Vec<UserRow>;
    async fn accounts(&self) -> Vec<AccountRow>;
    async fn assocs(&self) -> Vec<AssocRow>;
    async fn qoses(&self) -> Vec<QosRow>;
    async fn clusters(&self) -> Vec<ClusterRow>;
    async fn coords(&self) -> Vec<CoordRow>;

    /// Node events overlapping `[start, end)`.
    async fn events_overlapping(&self, cluster: &str, start: i64, end: i64) -> Vec<EventRow>;

    /// Reservations overlapping `[start, end)`.
    async fn resvs_overlapping(&self, cluster: &str, start: i64, end: i64) -> Vec<ResvRow>;

    /// Jobs whose `[eligible, end)` interval overlaps `[start, end)`.
    async fn jobs_overlapping(&self, cluster: &str, start: i64, end: i64) -> Vec<JobRow>;

    /// Seconds of suspension for `job_id` clipped to `[start, end)`; the
    /// stored-function equivalent over the suspend table.
    async fn suspend_secs(&self, job_id: u32, start: i64, end: i64) -> i64;

    /// The rollup's single batched emit for one window.
    async fn store_usage(
        &self,
        period: RollupPeriod,
        cluster_rows: Vec<ClusterUsage>,
        assoc_rows: Vec<AssocUsage>,
        wckey_rows: Vec<WckeyUsage>,
    ) -> Result<(), LatticeError>;

    /// Stored aggregation summing finer rows of `scope` into `target`
    /// rows for the window `[start, end)` keyed at `start`.
    async fn usage_aggregate(
        &self,
        scope: UsageScope,
        target: RollupPeriod,
        now: i64,
        start: i64,
        end: i64,
    ) -> Result<(), LatticeError>;

    async fn usage_cluster(&self, period: RollupPeriod, cluster: &str) -> Vec<ClusterUsage>;
    async fn usage_assoc(&self, period: RollupPeriod) -> Vec<AssocUsage>;
    async fn usage_wckey(&self, period: RollupPeriod) -> Vec<WckeyUsage>;

    /// Removes events/jobs/suspends/reservations that ended before
    /// `cutoff` and returns them for archival.
    async fn take_archivable(&self, cutoff: i64) -> ArchiveBundle;
}

/// Rows detached from the store by an archival pass.
#[derive(Debug, Clone, Default)]
pub struct ArchiveBundle {
    pub events: Vec<EventRow>,
    pub jobs: Vec<JobRow>,
    pub suspends: Vec<SuspendRow>,
    pub resvs: Vec<ResvRow>,
}

impl ArchiveBundle {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
            && self.jobs.is_empty()
            && self.suspends.is_empty()
            && self.resvs.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
struct Inner {
    next_txn_id: u64,
    txns: Vec<TxnRow>,
    users: Vec<UserRow>,
    accounts: Vec<AccountRow>,
    assocs: Vec<AssocRow>,
    qoses: Vec<QosRow>,
    clusters: Vec<ClusterRow>,
    coords: Vec<CoordRow>,
    events: Vec<EventRow>,
    resvs: Vec<ResvRow>,
    jobs: Vec<JobRow>,
    suspends: Vec<SuspendRow>,
    usage_cluster: BTreeMap<(String, i64, u8), ClusterUsage>,
    usage_assoc: BTreeMap<(u32, i64, u8), AssocUsage>,
    usage_wckey: BTreeMap<(String, i64, u8), WckeyUsage>,
}

fn period_key(period: RollupPeriod) -> u8 {
    match period {
        RollupPeriod::Hour => 0,
        RollupPeriod::Day => 1,
        RollupPeriod::Month => 2,
    }
}

/// In-memory transactional store backend.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn apply(inner: &mut Inner, op: StoreOp) -> Result<(), LatticeError> {
        match op {
            StoreOp::UpsertUser(row) => {
                match inner.users.iter_mut().find(|u| u.name == row.name) {
                    Some(existing) => *existing = row,
                    None => inner.users.push(row),
                }
            }
            StoreOp::SoftDeleteUser { name, mod_time } => {
                let user = inner
                    .users
                    .iter_mut()
                    .find(|u| u.name == name && !u.deleted)
                    .ok_or(LatticeError::EmptyResult)?;
                user.deleted = true;
                user.mod_time = mod_time;
            }
            StoreOp::UpsertAccount(row) => {
                match inner.accounts.iter_mut().find(|a| a.name == row.name) {
                    Some(existing) => *existing = row,
                    None => inner.accounts.push(row),
                }
            }
            StoreOp::SoftDeleteAccount { name, mod_time } => {
                let acct = inner
                    .accounts
                    .iter_mut()
                    .find(|a| a.name == name && !a.deleted)
                    .ok_or(LatticeError::EmptyResult)?;
                acct.deleted = true;
                acct.mod_time = mod_time;
            }
            StoreOp::UpsertAssoc(row) => {
                match inner.assocs.iter_mut().find(|a| a.id == row.id) {
                    Some(existing) => *existing = row,
                    None => inner.assocs.push(row),
                }
            }
            StoreOp::SoftDeleteAssoc { id, mod_time } => {
                let assoc = inner
                    .assocs
                    .iter_mut()
                    .find(|a| a.id == id && !a.deleted)
                    .ok_or(LatticeError::EmptyResult)?;
                assoc.deleted = true;
                assoc.mod_time = mod_time;
            }
            StoreOp::UpsertQos(row) => {
                match inner.qoses.iter_mut().find(|q| q.name == row.name) {
                    Some(existing) => *existing = row,
                    None => inner.qoses.push(row),
                }
            }
            StoreOp::SoftDeleteQos { name, mod_time } => {
                let qos = inner
                    .qoses
                    .iter_mut()
                    .find(|q| q.name == name && !q.deleted)
                    .ok_or(LatticeError::EmptyResult)?;
                qos.deleted = true;
                qos.mod_time = mod_time;
            }
            StoreOp::RewriteDeltaQos {
                pattern,
                replacement,
                mod_time,
            } => {
                let re = regex::Regex::new(&pattern)
                    .map_err(|e| LatticeError::InvalidQuery(e.to_string()))?;
                for assoc in inner.assocs.iter_mut() {
                    let rewritten = re.replace_all(&assoc.delta_qos, replacement.as_str());
                    if rewritten != assoc.delta_qos {
                        assoc.delta_qos = rewritten.into_owned();
                        assoc.mod_time = mod_time;
                    }
                }
            }
            StoreOp::AddCoords { acct, users } => {
                for user in users {
                    match inner
                        .coords
                        .iter_mut()
                        .find(|c| c.acct == acct && c.user == user)
                    {
                        Some(existing) => existing.deleted = false,
                        None => inner.coords.push(CoordRow {
                            acct: acct.clone(),
                            user,
                            direct: true,
                            deleted: false,
                        }),
                    }
                }
            }
            StoreOp::RemoveCoords { acct, users } => {
                for coord in inner
                    .coords
                    .iter_mut()
                    .filter(|c| c.acct == acct && users.contains(&c.user))
                {
                    coord.deleted = true;
                }
            }
            StoreOp::UpsertCluster(row) => {
                match inner.clusters.iter_mut().find(|c| c.name == row.name) {
                    Some(existing) => *existing = row,
                    None => inner.clusters.push(row),
                }
            }
            StoreOp::InsertEvent(row) => inner.events.push(row),
            StoreOp::CloseEvent { cluster, node, end } => {
                if let Some(event) = inner
                    .events
                    .iter_mut()
                    .rev()
                    .find(|e| e.cluster == cluster && e.node == node && e.end == 0)
                {
                    event.end = end;
                }
            }
            StoreOp::UpsertResv(row) => {
                match inner.resvs.iter_mut().find(|r| r.id == row.id) {
                    Some(existing) => *existing = row,
                    None => inner.resvs.push(row),
                }
            }
            StoreOp::UpsertJob(row) => {
                match inner.jobs.iter_mut().find(|j| j.job_id == row.job_id) {
                    Some(existing) => *existing = row,
                    None => inner.jobs.push(row),
                }
            }
            StoreOp::InsertSuspend(row) => inner.suspends.push(row),
        }
        Ok(())
    }
}

#[async_trait]
impl AccountingStore for MemoryStore {
    async fn commit(&self, ops: Vec<StoreOp>, txn: TxnInput) -> Result<u64, LatticeError> {
        let mut inner = self.inner.lock();
        // Apply against a scratch copy so a mid-batch failure rolls the
        // whole batch back.
        let mut scratch = inner.clone();
        for op in ops {
            Self::apply(&mut scratch, op)?;
        }
        scratch.next_txn_id += 1;
        let id = scratch.next_txn_id;
        scratch.txns.push(TxnRow {
            id,
            timestamp: txn.timestamp,
            action: txn.action,
            object: txn.object,
            actor: txn.actor,
            info: txn.info,
        });
        *inner = scratch;
        Ok(id)
    }

    async fn txns(&self) -> Vec<TxnRow> {
        self.inner.lock().txns.clone()
    }

    async fn users(&self) -> Vec<UserRow> {
        self.inner.lock().users.clone()
    }

    async fn accounts(&self) -> Vec<AccountRow> {
        self.inner.lock().accounts.clone()
    }

    async fn assocs(&self) -> Vec<AssocRow> {
        self.inner.lock().assocs.clone()
    }

    async fn qoses(&self) -> Vec<QosRow> {
        self.inner.lock().qoses.clone()
    }

    async fn clusters(&self) -> Vec<ClusterRow> {
        self.inner.lock().clusters.clone()
    }

    async fn coords(&self) -> Vec<CoordRow> {
        self.inner.lock().coords.clone()
    }

    async fn events_overlapping(&self, cluster: &str, start: i64, end: i64) -> Vec<EventRow> {
        self.inner
            .lock()
            .events
            .iter()
            .filter(|e| {
                e.cluster == cluster && e.start < end && (e.end == 0 || e.end > start)
            })
            .cloned()
            .collect()
    }

    async fn resvs_overlapping(&self, cluster: &str, start: i64, end: i64) -> Vec<ResvRow> {
        self.inner
            .lock()
            .resvs
            .iter()
            .filter(|r| r.cluster == cluster && r.start < end && r.end > start)
            .cloned()
            .collect()
    }

    async fn jobs_overlapping(&self, cluster: &str, start: i64, end: i64) -> Vec<JobRow> {
        self.inner
            .lock()
            .jobs
            .iter()
            .filter(|j| {
                j.cluster == cluster && j.eligible < end && (j.end == 0 || j.end > start)
            })
            .cloned()
            .collect()
    }

    async fn suspend_secs(&self, job_id: u32, start: i64, end: i64) -> i64 {
        self.inner
            .lock()
            .suspends
            .iter()
            .filter(|s| s.job_id == job_id)
            .map(|s| {
                let s_end = if s.end == 0 { end } else { s.end };
                (s_end.min(end) - s.start.max(start)).max(0)
            })
            .sum()
    }

    async fn store_usage(
        &self,
        period: RollupPeriod,
        cluster_rows: Vec<ClusterUsage>,
        assoc_rows: Vec<AssocUsage>,
        wckey_rows: Vec<WckeyUsage>,
    ) -> Result<(), LatticeError> {
        let mut inner = self.inner.lock();
        let pk = period_key(period);
        for row in cluster_rows {
            inner
                .usage_cluster
                .insert((row.cluster.clone(), row.period_start, pk), row);
        }
        for row in assoc_rows {
            inner
                .usage_assoc
                .insert((row.assoc_id, row.period_start, pk), row);
        }
        for row in wckey_rows {
            inner
                .usage_wckey
                .insert((row.wckey.clone(), row.period_start, pk), row);
        }
        Ok(())
    }

    async fn usage_aggregate(
        &self,
        scope: UsageScope,
        target: RollupPeriod,
        _now: i64,
        start: i64,
        end: i64,
    ) -> Result<(), LatticeError> {
        let mut inner = self.inner.lock();
        let source = match target {
            RollupPeriod::Day => RollupPeriod::Hour,
            RollupPeriod::Month => RollupPeriod::Day,
            RollupPeriod::Hour => return Err(LatticeError::InvalidQuery("hour target".into())),
        };
        let (src_pk, dst_pk) = (period_key(source), period_key(target));
        match scope {
            UsageScope::Cluster => {
                let mut sums: BTreeMap<String, ClusterUsage> = BTreeMap::new();
                for ((name, pstart, pk), row) in inner.usage_cluster.iter() {
                    if *pk != src_pk || *pstart < start || *pstart >= end {
                        continue;
                    }
                    let entry = sums.entry(name.clone()).or_insert_with(|| ClusterUsage {
                        cluster: name.clone(),
                        period_start: start,
                        ..Default::default()
                    });
                    entry.cpu_count = row.cpu_count.max(entry.cpu_count);
                    entry.total_time += row.total_time;
                    entry.alloc_secs += row.alloc_secs;
                    entry.down_secs += row.down_secs;
                    entry.pdown_secs += row.pdown_secs;
                    entry.idle_secs += row.idle_secs;
                    entry.over_secs += row.over_secs;
                    entry.resv_secs += row.resv_secs;
                }
                for (name, row) in sums {
                    inner.usage_cluster.insert((name, start, dst_pk), row);
                }
            }
            UsageScope::Assoc => {
                let mut sums: BTreeMap<u32, u64> = BTreeMap::new();
                for ((id, pstart, pk), row) in inner.usage_assoc.iter() {
                    if *pk != src_pk || *pstart < start || *pstart >= end {
                        continue;
                    }
                    *sums.entry(*id).or_default() += row.alloc_secs;
                }
                for (id, alloc_secs) in sums {
                    inner.usage_assoc.insert(
                        (id, start, dst_pk),
                        AssocUsage {
                            assoc_id: id,
                            period_start: start,
                            alloc_secs,
                        },
                    );
                }
            }
            UsageScope::Wckey => {
                let mut sums: BTreeMap<String, u64> = BTreeMap::new();
                for ((key, pstart, pk), row) in inner.usage_wckey.iter() {
                    if *pk != src_pk || *pstart < start || *pstart >= end {
                        continue;
                    }
                    *sums.entry(key.clone()).or_default() += row.alloc_secs;
                }
                for (key, alloc_secs) in sums {
                    inner.usage_wckey.insert(
                        (key.clone(), start, dst_pk),
                        WckeyUsage {
                            wckey: key,
                            period_start: start,
                            alloc_secs,
                        },
                    );
                }
            }
        }
        Ok(())
    }

    async fn usage_cluster(&self, period: RollupPeriod, cluster: &str) -> Vec<ClusterUsage> {
        let pk = period_key(period);
        self.inner
            .lock()
            .usage_cluster
            .iter()
            .filter(|((name, _, p), _)| name == cluster && *p == pk)
            .map(|(_, row)| row.clone())
            .collect()
    }

    async fn usage_assoc(&self, period: RollupPeriod) -> Vec<AssocUsage> {
        let pk = period_key(period);
        self.inner
            .lock()
            .usage_assoc
            .iter()
            .filter(|((_, _, p), _)| *p == pk)
            .map(|(_, row)| row.clone())
            .collect()
    }

    async fn usage_wckey(&self, period: RollupPeriod) -> Vec<WckeyUsage> {
        let pk = period_key(period);
        self.inner
            .lock()
            .usage_wckey
            .iter()
            .filter(|((_, _, p), _)| *p == pk)
            .map(|(_, row)| row.clone())
            .collect()
    }

    async fn take_archivable(&self, cutoff: i64) -> ArchiveBundle {
        let mut inner = self.inner.lock();
        let mut bundle = ArchiveBundle::default();

        let (archive, keep): (Vec<_>, Vec<_>) = inner
            .events
            .drain(..)
            .partition(|e| e.end != 0 && e.end < cutoff);
        bundle.events = archive;
        inner.events = keep;

        let (archive, keep): (Vec<_>, Vec<_>) = inner
            .jobs
            .drain(..)
            .partition(|j| j.end != 0 && j.end < cutoff);
        bundle.jobs = archive;
        inner.jobs = keep;

        let archived_jobs: Vec<u32> = bundle.jobs.iter().map(|j| j.job_id).collect();
        let (archive, keep): (Vec<_>, Vec<_>) = inner
            .suspends
            .drain(..)
            .partition(|s| archived_jobs.contains(&s.job_id));
        bundle.suspends = archive;
        inner.suspends = keep;

        let (archive, keep): (Vec<_>, Vec<_>) = inner
            .resvs
            .drain(..)
            .partition(|r| r.end != 0 && r.end < cutoff);
        bundle.resvs = archive;
        inner.resvs = keep;

        bundle
    }
}
